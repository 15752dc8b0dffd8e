//! 事件 trait
//!
//! 定义仿真事件接口，以及把回调路由到实体的 `CallbackEvent`。

use super::callable::{CallData, EntityId, EventType};
use super::simulator::Simulator;
use super::world::World;
use crate::workload::TrainWorld;
use tracing::{error, trace};

/// 事件：可被调度执行。使用 `self: Box<Self>` 以支持 move/所有权转移。
pub trait Event: Send + 'static {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World);
}

/// 在指定时刻调用某个实体的 `Callable::call`。
///
/// 计算定时器、集合通信完成、屏障释放以及发给 workload 的通知都走这条路径。
#[derive(Debug, Clone)]
pub struct CallbackEvent {
    pub target: EntityId,
    pub event: EventType,
    pub data: CallData,
}

impl Event for CallbackEvent {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let CallbackEvent {
            target,
            event,
            data,
        } = *self;
        let w = world
            .as_any_mut()
            .downcast_mut::<TrainWorld>()
            .expect("world must be TrainWorld");

        trace!(now = ?sim.now(), ?target, ?event, "分发回调");
        if let Err(err) = w.dispatch(target, event, data, sim) {
            // 协议违例意味着调度器与网络层不同步，继续运行只会污染统计。
            error!(now = ?sim.now(), ?target, ?event, %err, "fatal protocol violation");
            panic!("simulation aborted at {}: {err}", sim.now());
        }
    }
}
