//! Runtime orchestration: schedulers, startup and shutdown

pub mod lifecycle;
pub mod scheduler;

pub use lifecycle::{build_line, start_line, start_status_task, BuildOptions, LineBuild, LineRuntime};
pub use scheduler::{CycleReport, StationScheduler};
