//! 仿真时间类型
//!
//! 定义仿真时钟（tick）及其单位转换。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 仿真时钟（纳秒）。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Tick(pub u64);

impl Tick {
    pub const ZERO: Tick = Tick(0);

    pub fn from_micros(us: u64) -> Tick {
        Tick(us.saturating_mul(1_000))
    }
    pub fn from_millis(ms: u64) -> Tick {
        Tick(ms.saturating_mul(1_000_000))
    }
    pub fn from_secs(s: u64) -> Tick {
        Tick(s.saturating_mul(1_000_000_000))
    }

    pub fn saturating_add(self, d: Tick) -> Tick {
        Tick(self.0.saturating_add(d.0))
    }

    /// `self - earlier`，不会下溢。
    pub fn saturating_sub(self, earlier: Tick) -> Tick {
        Tick(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}
