use std::fmt::{self, Debug};

use half::{bf16, f16};
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    BF16,
    F16,
    F32,
}

impl DataType {
    pub const fn size_in_bits(&self) -> usize {
        match self {
            DataType::BF16 | DataType::F16 => 16,
            DataType::F32 => 32,
        }
    }

    pub const fn size_in_bytes(&self) -> usize {
        self.size_in_bits().div_ceil(8)
    }
}

impl fmt::Display for DataType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            DataType::BF16 => write!(f, "bf16"),
            DataType::F16 => write!(f, "f16"),
            DataType::F32 => write!(f, "f32"),
        }
    }
}

/// Element type of query/key/value/output tensors.
///
/// Loads widen to `f32` and stores narrow back, so accumulation never happens
/// at the storage precision.
pub trait ArrayElement: Copy + Send + Sync + Debug + 'static {
    fn data_type() -> DataType;

    fn to_f32(self) -> f32;

    fn from_f32(value: f32) -> Self;
}

macro_rules! impl_array_element {
    ($($type:ty => $variant:ident, $widen:expr, $narrow:expr);+ $(;)?) => {
        $(
            impl ArrayElement for $type {
                fn data_type() -> DataType {
                    DataType::$variant
                }

                #[inline]
                fn to_f32(self) -> f32 {
                    $widen(self)
                }

                #[inline]
                fn from_f32(value: f32) -> Self {
                    $narrow(value)
                }
            }
        )+
    };
}

impl_array_element! {
    f16 => F16, f16::to_f32, f16::from_f32;
    bf16 => BF16, bf16::to_f32, bf16::from_f32;
    f32 => F32, std::convert::identity, std::convert::identity;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(DataType::F32.size_in_bytes(), 4);
        assert_eq!(DataType::F16.size_in_bytes(), 2);
        assert_eq!(DataType::BF16.size_in_bytes(), 2);
    }

    #[test]
    fn test_element_round_trip_precision() {
        assert_eq!(<f32 as ArrayElement>::from_f32(0.1).to_f32(), 0.1);
        assert_eq!(f16::data_type(), DataType::F16);
        assert!((bf16::from_f32(1.5).to_f32() - 1.5).abs() < 1e-6);
    }
}
