//! 可回调实体
//!
//! 调度器只认识 `EntityId`；真正的处理逻辑由实现 `Callable` 的实体
//! （`Layer`、`Workload`）提供。

use super::simulator::Simulator;
use crate::cc::{CollectiveIssuer, OpId};
use crate::error::SimError;
use crate::layer::{LayerNotice, Phase};

/// 调度器可以寻址的实体。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityId {
    /// 第 `rank` 个参与者上的第 `index` 层
    Layer { rank: usize, index: usize },
    /// 训练流程驱动者
    Workload,
}

/// 回调的事件种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    General,
    ComputeFinished,
    CommFinished,
    BarrierReleased,
}

/// 回调负载
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallData {
    None,
    Phase(Phase),
    Comm { phase: Phase, op: OpId },
    Notice(LayerNotice),
}

/// 每次回调拿到的系统上下文：调度器 + 网络层。
pub struct SysCtx<'a> {
    pub sim: &'a mut Simulator,
    pub net: &'a mut dyn CollectiveIssuer,
}

impl SysCtx<'_> {
    pub fn now(&self) -> super::Tick {
        self.sim.now()
    }
}

/// 能被调度器按身份调用的实体。
pub trait Callable {
    fn call(
        &mut self,
        event: EventType,
        data: CallData,
        cx: &mut SysCtx<'_>,
    ) -> Result<(), SimError>;
}
