//! Scheduling actions: the configured orchestrations of one session
//!
//! Actions never fail the cycle: errors are logged, statements are
//! discarded, and the session always closes cleanly.

pub mod allocate;
pub mod backfill;
pub mod enqueue;
pub mod preempt;
pub mod reclaim;
pub mod shuffle;

use async_trait::async_trait;

use gangway_core::Result;

use crate::framework::Session;

#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(&self, ssn: &mut Session) -> Result<()>;
}
