//! Log and result sinks
//!
//! Both are fire-and-forget from the engine's point of view: a failing
//! repository is logged and never changes what is written back to the PLC.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn, Level};

use crate::error::Result;
use crate::mes::UploadResult;

/// Station event log
pub trait LogSink: Send + Sync {
    fn record(&self, level: Level, message: &str);
}

/// Forwards station events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn record(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => error!("{}", message),
            Level::WARN => warn!("{}", message),
            Level::INFO => info!("{}", message),
            Level::DEBUG => debug!("{}", message),
            Level::TRACE => trace!("{}", message),
        }
    }
}

/// Receives every finished upload cycle
#[async_trait]
pub trait ResultRepository: Send + Sync {
    async fn save(&self, result: UploadResult) -> Result<()>;
}

/// Keeps results in memory
#[derive(Debug, Default)]
pub struct MemoryRepository {
    results: Mutex<Vec<UploadResult>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<UploadResult> {
        self.results.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }
}

#[async_trait]
impl ResultRepository for MemoryRepository {
    async fn save(&self, result: UploadResult) -> Result<()> {
        self.results.lock().push(result);
        Ok(())
    }
}
