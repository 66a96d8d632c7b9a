//! The backend abstraction the probe engine orchestrates.

use super::types::{ProgressSink, ServerDescriptor, TestOptions, TestType};
use crate::core::store::models::NewSpeedTestResult;
use crate::error::Result;
use async_trait::async_trait;

/// One measurement backend.
///
/// A runner executes a complete test against its own kind of server and
/// reports live progress through the injected sink. Runners never persist
/// anything; the engine owns the result row and the terminal frame.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Which `test_type` this backend serves.
    fn kind(&self) -> TestType;

    /// Servers available to this backend.
    async fn servers(&self) -> Result<Vec<ServerDescriptor>>;

    /// Execute one run. Phases must be emitted in ping → download → upload
    /// order; skipped phases are fine, reordered ones are not.
    async fn run(
        &self,
        options: &TestOptions,
        sink: &dyn ProgressSink,
    ) -> Result<NewSpeedTestResult>;
}
