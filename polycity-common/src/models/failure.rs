//! Failure ledger records

use super::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One permanently failed item, appended to the job's failure ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub item_id: String,
    /// Stage that isolated the item
    pub stage: Stage,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(item_id: impl Into<String>, stage: Stage, error: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            stage,
            error: error.into(),
            failed_at: Utc::now(),
        }
    }
}
