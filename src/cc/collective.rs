//! Collective communication types shared by the layer core and the network model.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type of collective a phase issues after its compute step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ComType {
    #[default]
    None,
    ReduceScatter,
    AllGather,
    AllReduce,
    AllToAll,
    AllReduceAllToAll,
}

impl ComType {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let normalized = raw.trim().to_lowercase();
        let compact: String = normalized
            .chars()
            .filter(|ch| *ch != '_' && *ch != '-' && *ch != ' ')
            .collect();
        let compact = compact.as_str();
        let compact = compact.strip_suffix("async").unwrap_or(compact);
        match compact {
            "" | "none" => Ok(Self::None),
            "reducescatter" => Ok(Self::ReduceScatter),
            "allgather" => Ok(Self::AllGather),
            "allreduce" => Ok(Self::AllReduce),
            "alltoall" => Ok(Self::AllToAll),
            "allreducealltoall" => Ok(Self::AllReduceAllToAll),
            _ => Err(format!("unknown collective type: {raw}")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ReduceScatter => "reduce_scatter",
            Self::AllGather => "all_gather",
            Self::AllReduce => "all_reduce",
            Self::AllToAll => "all_to_all",
            Self::AllReduceAllToAll => "all_reduce_all_to_all",
        }
    }

    /// Whether the phase has any communication at all.
    pub fn is_none(self) -> bool {
        self == Self::None
    }

    /// Number of ring steps the collective needs across `npus` peers.
    pub fn total_steps(self, npus: usize) -> usize {
        let steps = npus.saturating_sub(1);
        match self {
            Self::None => 0,
            Self::AllReduce => steps.saturating_mul(2),
            Self::ReduceScatter | Self::AllGather | Self::AllToAll => steps,
            Self::AllReduceAllToAll => steps.saturating_mul(3),
        }
    }

    /// Bytes moved by one peer in a single step.
    pub fn chunk_bytes(self, comm_bytes: u64, npus: usize) -> u64 {
        match self {
            Self::None => 0,
            // Ring all-gather treats comm_bytes as the per-peer contribution.
            Self::AllGather => comm_bytes,
            Self::ReduceScatter | Self::AllReduce | Self::AllToAll | Self::AllReduceAllToAll => {
                div_ceil(comm_bytes, npus.max(1) as u64)
            }
        }
    }
}

impl TryFrom<String> for ComType {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<ComType> for String {
    fn from(value: ComType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ComType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn div_ceil(n: u64, d: u64) -> u64 {
    if d <= 1 {
        return n;
    }
    n.saturating_add(d.saturating_sub(1)) / d
}

/// Hint for how the network orders a transfer among the others it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPolicy {
    /// Queue behind traffic already occupying the involved dimensions.
    #[default]
    Fifo,
    /// Start immediately; later FIFO traffic queues behind it.
    Lifo,
    /// Start immediately without touching dimension occupancy.
    None,
}

/// Which topology dimensions a collective crosses.
///
/// The length is fixed at construction and must match the dimensionality of
/// the network the collective is issued on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvolvedDims(Box<[bool]>);

impl InvolvedDims {
    pub fn new(mask: impl Into<Box<[bool]>>) -> Self {
        Self(mask.into())
    }

    /// Mask crossing every one of `dims` dimensions.
    pub fn all(dims: usize) -> Self {
        Self(vec![true; dims].into_boxed_slice())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_involved(&self, dim: usize) -> bool {
        self.0.get(dim).copied().unwrap_or(false)
    }

    /// Indices of the crossed dimensions, in order.
    pub fn involved(&self) -> impl Iterator<Item = usize> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, on)| on.then_some(i))
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }
}

impl fmt::Display for InvolvedDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, on) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(if *on { "1" } else { "0" })?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_com_type_aliases() {
        assert_eq!(ComType::parse("ALLREDUCE").unwrap(), ComType::AllReduce);
        assert_eq!(ComType::parse("all_reduce").unwrap(), ComType::AllReduce);
        assert_eq!(ComType::parse("allreduce_async").unwrap(), ComType::AllReduce);
        assert_eq!(ComType::parse("reduce-scatter").unwrap(), ComType::ReduceScatter);
        assert_eq!(ComType::parse("ALLGATHER").unwrap(), ComType::AllGather);
        assert_eq!(ComType::parse("all_to_all").unwrap(), ComType::AllToAll);
        assert_eq!(
            ComType::parse("ALLREDUCEALLTOALL").unwrap(),
            ComType::AllReduceAllToAll
        );
        assert_eq!(ComType::parse("NONE").unwrap(), ComType::None);
        assert_eq!(ComType::parse("").unwrap(), ComType::None);
        assert!(ComType::parse("mystery").is_err());
    }

    #[test]
    fn involved_dims_lists_crossed_dimensions() {
        let dims = InvolvedDims::new(vec![true, false, true]);
        assert_eq!(dims.involved().collect::<Vec<_>>(), vec![0, 2]);
        assert!(!dims.is_involved(1));
        assert!(!dims.is_involved(7));
        assert_eq!(dims.to_string(), "[1,0,1]");
    }
}
