//! Handle for one in-flight collective transfer.

use serde::Serialize;
use std::fmt;

use super::collective::ComType;
use crate::sim::Tick;

/// Identifier of an outstanding collective; strictly increasing per layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct OpId(pub u64);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// One issued collective, owned by the layer until its completion is accounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutstandingOp {
    pub id: OpId,
    pub com_type: ComType,
    pub size_bytes: u64,
    pub issued_at: Tick,
    finished_at: Option<Tick>,
}

impl OutstandingOp {
    pub fn new(id: OpId, com_type: ComType, size_bytes: u64, issued_at: Tick) -> Self {
        Self {
            id,
            com_type,
            size_bytes,
            issued_at,
            finished_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn finished_at(&self) -> Option<Tick> {
        self.finished_at
    }

    /// Record completion. Returns `false` if the op was already finished.
    pub fn mark_finished(&mut self, at: Tick) -> bool {
        if self.finished_at.is_some() {
            return false;
        }
        self.finished_at = Some(at);
        true
    }

    /// Modeled duration from issuance to completion, once finished.
    pub fn duration(&self) -> Option<Tick> {
        self.finished_at.map(|done| done.saturating_sub(self.issued_at))
    }
}
