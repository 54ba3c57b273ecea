use itertools::izip;

use super::error::{PreconditionError, TokenAxis};

/// One sequence of a ragged batch, in token offsets of the packed tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceSpan {
    pub q_start: usize,
    pub q_len: usize,
    pub kv_start: usize,
    pub kv_len: usize,
}

impl SequenceSpan {
    /// Keys preceding the first query of the sequence. Negative only for
    /// non-causal calls with fewer keys than queries.
    pub fn history_len(&self) -> isize {
        self.kv_len as isize - self.q_len as isize
    }
}

/// Per-sequence offsets and lengths of a packed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchDescriptor {
    q_start_loc: Vec<usize>,
    q_seqlens: Vec<usize>,
    kv_start_loc: Vec<usize>,
    kv_seqlens: Vec<usize>,
}

impl BatchDescriptor {
    pub fn new(
        q_start_loc: Vec<usize>,
        q_seqlens: Vec<usize>,
        kv_start_loc: Vec<usize>,
        kv_seqlens: Vec<usize>,
    ) -> Result<Self, PreconditionError> {
        let batch_size = q_seqlens.len();
        if q_start_loc.len() != batch_size || kv_start_loc.len() != batch_size || kv_seqlens.len() != batch_size {
            return Err(PreconditionError::BatchLengthMismatch {
                q_start_loc: q_start_loc.len(),
                q_seqlens: q_seqlens.len(),
                kv_start_loc: kv_start_loc.len(),
                kv_seqlens: kv_seqlens.len(),
            });
        }
        Ok(Self {
            q_start_loc,
            q_seqlens,
            kv_start_loc,
            kv_seqlens,
        })
    }

    /// Sequences laid out back to back on both token axes.
    pub fn packed(
        q_seqlens: &[usize],
        kv_seqlens: &[usize],
    ) -> Result<Self, PreconditionError> {
        Self::new(exclusive_prefix_sum(q_seqlens), q_seqlens.to_vec(), exclusive_prefix_sum(kv_seqlens), kv_seqlens.to_vec())
    }

    pub fn len(&self) -> usize {
        self.q_seqlens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q_seqlens.is_empty()
    }

    pub fn q_start_loc(&self) -> &[usize] {
        &self.q_start_loc
    }

    pub fn q_seqlens(&self) -> &[usize] {
        &self.q_seqlens
    }

    pub fn kv_start_loc(&self) -> &[usize] {
        &self.kv_start_loc
    }

    pub fn kv_seqlens(&self) -> &[usize] {
        &self.kv_seqlens
    }

    pub fn sequence(
        &self,
        index: usize,
    ) -> SequenceSpan {
        SequenceSpan {
            q_start: self.q_start_loc[index],
            q_len: self.q_seqlens[index],
            kv_start: self.kv_start_loc[index],
            kv_len: self.kv_seqlens[index],
        }
    }

    pub fn sequences(&self) -> impl Iterator<Item = SequenceSpan> + '_ {
        izip!(&self.q_start_loc, &self.q_seqlens, &self.kv_start_loc, &self.kv_seqlens).map(
            |(&q_start, &q_len, &kv_start, &kv_len)| SequenceSpan {
                q_start,
                q_len,
                kv_start,
                kv_len,
            },
        )
    }

    pub fn max_q_seqlen(&self) -> usize {
        self.q_seqlens.iter().copied().max().unwrap_or(0)
    }

    pub fn total_q_tokens(&self) -> usize {
        self.q_seqlens.iter().sum()
    }

    /// Checks every sequence region against the extents of the packed tensors.
    ///
    /// Running this before dispatch is what keeps key/value reads inside the
    /// declared storage.
    pub fn validate(
        &self,
        q_tokens: usize,
        kv_tokens: usize,
        causal: bool,
    ) -> Result<(), PreconditionError> {
        let total_q_tokens = self.total_q_tokens();
        if total_q_tokens != q_tokens {
            return Err(PreconditionError::TokenCountMismatch {
                expected: total_q_tokens,
                actual: q_tokens,
            });
        }

        for (sequence, span) in self.sequences().enumerate() {
            check_region(TokenAxis::Query, sequence, span.q_start, span.q_len, q_tokens)?;
            check_region(TokenAxis::KeyValue, sequence, span.kv_start, span.kv_len, kv_tokens)?;
            if causal && span.kv_len < span.q_len {
                return Err(PreconditionError::KvShorterThanQuery {
                    sequence,
                    q_seqlen: span.q_len,
                    kv_seqlen: span.kv_len,
                });
            }
        }
        Ok(())
    }
}

fn check_region(
    axis: TokenAxis,
    sequence: usize,
    start: usize,
    len: usize,
    available: usize,
) -> Result<(), PreconditionError> {
    match start.checked_add(len) {
        Some(end) if end <= available => Ok(()),
        end => Err(PreconditionError::SequenceOutOfBounds {
            axis,
            sequence,
            start,
            end: end.unwrap_or(usize::MAX),
            available,
        }),
    }
}

fn exclusive_prefix_sum(lengths: &[usize]) -> Vec<usize> {
    lengths
        .iter()
        .scan(0usize, |offset, &len| {
            let start = *offset;
            *offset += len;
            Some(start)
        })
        .collect()
}
