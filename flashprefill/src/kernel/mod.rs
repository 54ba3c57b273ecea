//! Backend-independent pieces of the varlen prefill attention.

mod accumulator;
mod batch;
mod error;
mod head_dim;
mod mask;
mod merge;
mod options;
mod prefill;
mod schedule;

pub use accumulator::{OnlineSoftmax, SoftmaxOutput};
pub use batch::{BatchDescriptor, SequenceSpan};
pub use error::{PreconditionError, TokenAxis};
pub use head_dim::HeadDimSplit;
pub use mask::{KeyBounds, MASKED_SCORE, MaskMode, MaskingPolicy, SweepPhase};
pub use merge::merge_attention_states;
pub use options::{AttentionOptions, KvLayout};
pub use prefill::{KeySweep, PrefillSweep, SequenceHead};
pub use schedule::{TileGrid, TileIndex};
