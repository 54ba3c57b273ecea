//! Aligned addressing blocks for the feature dimensions.

const MIN_SECONDARY_BLOCK: usize = 16;

/// Splits `head_dim_k` into at most two power-of-two chunks and rounds
/// `head_dim_v` up to a power of two.
///
/// A non-power-of-two key dimension such as 96 becomes a 64-wide primary
/// chunk plus a 32-wide secondary chunk, and `Q·Kᵀ` is the sum of the two
/// partial products. Columns past the true dimension are zero on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeadDimSplit {
    pub head_dim_k: usize,
    pub head_dim_v: usize,
    pub block_dk: usize,
    /// Zero when `head_dim_k` needs no split.
    pub block_dk1: usize,
    pub block_dv: usize,
}

impl HeadDimSplit {
    pub fn new(
        head_dim_k: usize,
        head_dim_v: usize,
    ) -> Self {
        let mut block_dk = head_dim_k.next_power_of_two();
        let mut block_dk1 = 0;
        if block_dk != head_dim_k {
            block_dk /= 2;
            block_dk1 = (head_dim_k - block_dk).next_power_of_two().max(MIN_SECONDARY_BLOCK);
        }
        Self {
            head_dim_k,
            head_dim_v,
            block_dk,
            block_dk1,
            block_dv: head_dim_v.next_power_of_two(),
        }
    }

    pub fn is_split(&self) -> bool {
        self.block_dk1 != 0
    }
}
