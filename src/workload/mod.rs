//! 训练 workload：配置文件、驱动流程与仿真世界。

mod driver;
mod spec;
mod world;

pub use driver::Workload;
pub use spec::{
    BarrierMode, SystemSpec, WorkloadDefaults, WorkloadError, WorkloadMeta, WorkloadSpec,
};
pub use world::TrainWorld;
