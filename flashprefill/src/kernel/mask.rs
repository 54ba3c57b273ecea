//! Score transform and masking of one `BLOCK_M x BLOCK_N` score block.

use std::f32::consts::LOG2_E;

use ndarray::ArrayViewMut2;

use super::AttentionOptions;

/// Finite stand-in for `-inf`. Keeps `exp2(s - m)` well defined when every
/// score of a block is masked.
pub const MASKED_SCORE: f32 = -1.0e30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPhase {
    /// Key tiles entirely below the diagonal of every row of the query tile.
    Bulk,
    /// Key tiles crossing the diagonal or the end of the key range.
    Boundary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskMode {
    None,
    /// Window lower bound only.
    Window,
    /// Full per-row bounds: the window, plus the diagonal when causal or the
    /// end of the key range otherwise.
    Boundary,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskingPolicy {
    causal: bool,
    window: Option<usize>,
    softcap: Option<f32>,
}

/// Inclusive range of key positions a query row may attend to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBounds {
    pub lower: isize,
    pub upper: isize,
}

impl KeyBounds {
    pub fn contains(
        &self,
        key: isize,
    ) -> bool {
        self.lower <= key && key <= self.upper
    }
}

impl MaskingPolicy {
    pub fn new(
        causal: bool,
        window_size: i32,
        logit_softcapping: f32,
    ) -> Self {
        Self {
            causal,
            window: usize::try_from(window_size).ok().filter(|&window| window > 0),
            softcap: (logit_softcapping > 0.0).then_some(logit_softcapping),
        }
    }

    pub fn from_options(options: &AttentionOptions) -> Self {
        Self::new(options.causal, options.window_size, options.logit_softcapping)
    }

    pub fn causal(&self) -> bool {
        self.causal
    }

    pub fn window(&self) -> Option<usize> {
        self.window
    }

    pub fn softcap(&self) -> Option<f32> {
        self.softcap
    }

    pub fn mode(
        &self,
        phase: SweepPhase,
    ) -> MaskMode {
        match phase {
            SweepPhase::Boundary => MaskMode::Boundary,
            SweepPhase::Bulk if self.window.is_some() => MaskMode::Window,
            SweepPhase::Bulk => MaskMode::None,
        }
    }

    /// Whether scores of this phase go through the full transform rather
    /// than the single folded multiply.
    pub fn uses_transform(
        &self,
        phase: SweepPhase,
    ) -> bool {
        self.mode(phase) != MaskMode::None || self.softcap.is_some()
    }

    /// `row` is relative to the first query of the sequence. Without causal
    /// masking the upper bound only excludes padding past `kv_len`.
    pub fn key_bounds(
        &self,
        row: usize,
        history: isize,
        kv_len: usize,
    ) -> KeyBounds {
        let diagonal = history + row as isize;
        let upper = if self.causal {
            diagonal
        } else {
            kv_len as isize - 1
        };
        let lower = match self.window {
            Some(window) => (diagonal - window as isize + 1).max(0),
            None => 0,
        };
        KeyBounds {
            lower,
            upper,
        }
    }

    /// Turns raw `Q·Kᵀ` products into base-2 logits, masking disallowed
    /// entries with [`MASKED_SCORE`].
    pub fn transform_scores(
        &self,
        mut scores: ArrayViewMut2<'_, f32>,
        phase: SweepPhase,
        sm_scale: f32,
        first_row: usize,
        first_key: usize,
        history: isize,
        kv_len: usize,
    ) {
        if !self.uses_transform(phase) {
            let log2_scale = sm_scale * LOG2_E;
            scores.mapv_inplace(|score| score * log2_scale);
            return;
        }

        let masked = self.mode(phase) != MaskMode::None;
        for (row_index, mut row) in scores.outer_iter_mut().enumerate() {
            let bounds = self.key_bounds(first_row + row_index, history, kv_len);
            for (column, score) in row.iter_mut().enumerate() {
                let mut value = *score * sm_scale;
                if let Some(cap) = self.softcap {
                    value = cap * (value / cap).tanh();
                }
                value *= LOG2_E;
                if masked && !bounds.contains((first_key + column) as isize) {
                    value = MASKED_SCORE;
                }
                *score = value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;

    #[test]
    fn test_sentinels_disable_features() {
        let policy = MaskingPolicy::new(true, -1, -1.0);
        assert_eq!(policy.window(), None);
        assert_eq!(policy.softcap(), None);
        assert_eq!(MaskingPolicy::new(true, 0, 0.0).window(), None);

        let policy = MaskingPolicy::new(false, 16, 30.0);
        assert_eq!(policy.window(), Some(16));
        assert_eq!(policy.softcap(), Some(30.0));
    }

    #[test]
    fn test_modes_are_exclusive_per_phase() {
        let plain = MaskingPolicy::new(true, -1, -1.0);
        assert_eq!(plain.mode(SweepPhase::Bulk), MaskMode::None);
        assert_eq!(plain.mode(SweepPhase::Boundary), MaskMode::Boundary);
        assert!(!plain.uses_transform(SweepPhase::Bulk));

        let windowed = MaskingPolicy::new(true, 8, -1.0);
        assert_eq!(windowed.mode(SweepPhase::Bulk), MaskMode::Window);

        // without causal masking the boundary phase still clips keys past kv_len
        let bidirectional = MaskingPolicy::new(false, -1, -1.0);
        assert_eq!(bidirectional.mode(SweepPhase::Boundary), MaskMode::Boundary);
        assert_eq!(bidirectional.key_bounds(0, 0, 10).upper, 9);

        let capped = MaskingPolicy::new(true, -1, 20.0);
        assert_eq!(capped.mode(SweepPhase::Bulk), MaskMode::None);
        assert!(capped.uses_transform(SweepPhase::Bulk));
    }

    #[test]
    fn test_key_bounds() {
        let policy = MaskingPolicy::new(true, 4, -1.0);
        // history 10, row 3: diagonal 13, window keeps 10..=13
        assert_eq!(
            policy.key_bounds(3, 10, 14),
            KeyBounds {
                lower: 10,
                upper: 13,
            }
        );
        assert_eq!(policy.key_bounds(0, 0, 14).lower, 0);

        let bidirectional = MaskingPolicy::new(false, -1, -1.0);
        assert_eq!(
            bidirectional.key_bounds(0, -2, 3),
            KeyBounds {
                lower: 0,
                upper: 2,
            }
        );
    }

    #[test]
    fn test_fast_path_folds_scale() {
        let policy = MaskingPolicy::new(true, -1, -1.0);
        let mut scores = Array2::from_elem((2, 3), 2.0f32);
        policy.transform_scores(scores.view_mut(), SweepPhase::Bulk, 0.5, 0, 0, 0, 3);
        assert!(scores.iter().all(|&score| (score - LOG2_E).abs() < 1e-6));
    }

    #[test]
    fn test_boundary_masks_future_keys() {
        let policy = MaskingPolicy::new(true, -1, -1.0);
        let mut scores = Array2::from_elem((2, 4), 1.0f32);
        policy.transform_scores(scores.view_mut(), SweepPhase::Boundary, 1.0, 0, 0, 0, 2);
        assert_eq!(scores[[0, 0]], LOG2_E);
        assert_eq!(scores[[0, 1]], MASKED_SCORE);
        assert_eq!(scores[[1, 1]], LOG2_E);
        assert_eq!(scores[[1, 2]], MASKED_SCORE);
        assert_eq!(scores[[1, 3]], MASKED_SCORE);
    }

    #[test]
    fn test_softcap_bounds_scores() {
        let policy = MaskingPolicy::new(false, -1, 5.0);
        let mut scores = Array2::from_elem((1, 2), 1.0e6f32);
        policy.transform_scores(scores.view_mut(), SweepPhase::Bulk, 1.0, 0, 0, 0, 2);
        assert!(scores.iter().all(|&score| score.is_finite() && score <= 5.0 * LOG2_E + 1e-4));
    }
}
