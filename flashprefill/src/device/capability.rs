use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Hardware generation identifier, `major.minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceCapability {
    pub major: u32,
    pub minor: u32,
}

impl DeviceCapability {
    pub const fn new(
        major: u32,
        minor: u32,
    ) -> Self {
        Self {
            major,
            minor,
        }
    }
}

impl fmt::Display for DeviceCapability {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for DeviceCapability {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidCapability(s.to_string());
        let (major, minor) = s.trim().split_once('.').ok_or_else(invalid)?;
        let major = major.parse::<u32>().map_err(|_| invalid())?;
        let minor = minor.parse::<u32>().map_err(|_| invalid())?;
        Ok(Self::new(major, minor))
    }
}

impl TryFrom<String> for DeviceCapability {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceCapability> for String {
    fn from(capability: DeviceCapability) -> Self {
        capability.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("8.6".parse::<DeviceCapability>().unwrap(), DeviceCapability::new(8, 6));
        assert_eq!(" 12.0 ".parse::<DeviceCapability>().unwrap(), DeviceCapability::new(12, 0));
        assert!("86".parse::<DeviceCapability>().is_err());
        assert!("sm_90".parse::<DeviceCapability>().is_err());
    }

    #[test]
    fn test_ordering_follows_generation() {
        assert!(DeviceCapability::new(7, 5) < DeviceCapability::new(8, 0));
        assert!(DeviceCapability::new(8, 9) < DeviceCapability::new(9, 0));
    }
}
