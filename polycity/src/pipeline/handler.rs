//! Stage handler contract

use crate::error::StageResult;
use async_trait::async_trait;
use polycity_common::models::{Job, Stage, WorkItem};

/// What a handler did with an item
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Enriched item for the next stage's queue
    Forward(Stage, WorkItem),
    /// Terminal stage finished the item; its footprint feature joins the
    /// job's index and the item counts as completed
    Completed { footprint: serde_json::Value },
}

/// One queue-fed transformation step
///
/// Handlers must tolerate running twice on the same item (deliveries are
/// at-least-once) and must not touch the job's counters themselves; the
/// worker runtime does the accounting based on the returned outcome.
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn stage(&self) -> Stage;

    async fn handle(&self, job: &Job, item: WorkItem) -> StageResult<StageOutcome>;
}
