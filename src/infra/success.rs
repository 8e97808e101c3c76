//! Minute-bucketed success counters with retention pruning.

use std::sync::Arc;

use chrono::Utc;

use super::{Result, SuccessLogStore};

/// Log kind for group events.
pub const GROUP_LOG: &str = "group";

/// Records per-minute success counts and prunes old buckets.
///
/// Pruning piggybacks on recording: it runs only while the current bucket's
/// total is still small, so at most a handful of writers per minute pay the
/// delete.
pub struct SuccessRecorder {
    store: Arc<dyn SuccessLogStore>,
    retention_days: i64,
}

impl SuccessRecorder {
    pub fn new(store: Arc<dyn SuccessLogStore>, retention_days: i64) -> Self {
        Self {
            store,
            retention_days,
        }
    }

    /// Record events against the current minute bucket.
    pub async fn record(&self, kind: &str, count: u32) -> Result<()> {
        let minute = Utc::now().timestamp() / 60;
        self.record_at(kind, minute, count).await
    }

    /// Record against an explicit minute bucket.
    pub async fn record_at(&self, kind: &str, minute: i64, count: u32) -> Result<()> {
        let total = self.store.increment(kind, minute, count).await?;
        if total <= 5 {
            let cutoff = minute - self.retention_days * 24 * 60;
            self.store.prune_older_than(kind, cutoff).await?;
        }
        Ok(())
    }
}
