//! 仿真核心模块
//!
//! 此模块包含事件驱动仿真的核心组件：仿真时间、事件、可回调实体、世界和仿真器。

// 子模块声明
mod callable;
mod event;
mod scheduled_event;
mod simulator;
mod time;
mod world;

// 重新导出公共接口
pub use callable::{CallData, Callable, EntityId, EventType, SysCtx};
pub use event::{CallbackEvent, Event};
pub use scheduled_event::ScheduledEvent;
pub use simulator::Simulator;
pub use time::Tick;
pub use world::World;
