//! Layer execution core: phase state machines, dispatch and statistics.

mod core;
mod error;
mod phase;
mod spec;

pub use self::core::{IssueOutcome, Layer, LayerBinding, LayerNotice, NoticeKind};
pub use error::LayerError;
pub use phase::{CompletionOutcome, PhaseMachine, PhaseState};
pub use spec::{LayerSpec, ParallelismPolicy, Phase, PhaseSpec, Roofline};
