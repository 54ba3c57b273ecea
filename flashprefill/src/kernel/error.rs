use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAxis {
    Query,
    KeyValue,
}

impl fmt::Display for TokenAxis {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            TokenAxis::Query => write!(f, "query"),
            TokenAxis::KeyValue => write!(f, "key/value"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    #[error(
        "Batch descriptor arrays differ in length: q_start_loc={q_start_loc}, q_seqlens={q_seqlens}, kv_start_loc={kv_start_loc}, kv_seqlens={kv_seqlens}"
    )]
    BatchLengthMismatch {
        q_start_loc: usize,
        q_seqlens: usize,
        kv_start_loc: usize,
        kv_seqlens: usize,
    },
    #[error("Query tensor holds {actual} tokens but query lengths sum to {expected}")]
    TokenCountMismatch {
        expected: usize,
        actual: usize,
    },
    #[error("The {axis} region {start}..{end} of sequence {sequence} exceeds the {available} available tokens")]
    SequenceOutOfBounds {
        axis: TokenAxis,
        sequence: usize,
        start: usize,
        end: usize,
        available: usize,
    },
    #[error("Sequence {sequence} has {kv_seqlen} keys for {q_seqlen} causal queries")]
    KvShorterThanQuery {
        sequence: usize,
        q_seqlen: usize,
        kv_seqlen: usize,
    },
    #[error("max_q_seqlen {declared} is below the longest query length {actual}")]
    MaxSeqLenTooSmall {
        declared: usize,
        actual: usize,
    },
    #[error("Output has shape {actual:?}, expected {expected:?}")]
    OutputShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Log-sum-exp output has shape {actual:?}, expected {expected:?}")]
    LogSumExpShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}
