//! Line services basic library
//!
//! Provides the bootstrap pieces shared by every line service:
//! - logging initialization (console + daily rolling file)
//! - graceful shutdown signal handling

pub mod logging;
pub mod shutdown;

pub use logging::{init_with_config, LogConfig};
pub use shutdown::{wait_for_shutdown, ShutdownSignal};
