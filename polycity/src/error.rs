//! Error types for polycity
//!
//! Stage handlers sort every failure into one of two kinds:
//! - **Isolable**: a defect of one building (bad geometry, failed conversion,
//!   an external service that answered badly). Recorded in the job's failure
//!   ledger; the job carries on.
//! - **Fatal**: the worker can no longer uphold the pipeline's accounting
//!   (store or queue unreachable). The worker process exits.

use crate::capabilities::CapabilityError;
use crate::citygml::CitygmlError;
use polycity_common::models::PayloadError;
use thiserror::Error;

/// Outcome of a failed stage handler
#[derive(Debug, Error)]
pub enum StageError {
    /// Per-item failure, recorded and counted
    #[error("{0}")]
    Isolable(String),

    /// Infrastructure failure, escalated to process termination
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl StageError {
    pub fn isolable(message: impl Into<String>) -> Self {
        StageError::Isolable(message.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StageError::Fatal(_))
    }
}

impl From<CapabilityError> for StageError {
    fn from(err: CapabilityError) -> Self {
        StageError::Isolable(err.to_string())
    }
}

impl From<CitygmlError> for StageError {
    fn from(err: CitygmlError) -> Self {
        StageError::Isolable(err.to_string())
    }
}

impl From<PayloadError> for StageError {
    fn from(err: PayloadError) -> Self {
        StageError::Isolable(err.to_string())
    }
}

impl From<polycity_common::Error> for StageError {
    fn from(err: polycity_common::Error) -> Self {
        StageError::Fatal(anyhow::Error::new(err))
    }
}

pub type StageResult<T> = std::result::Result<T, StageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_are_fatal() {
        let err: StageError = polycity_common::Error::Internal("store gone".to_string()).into();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_capability_errors_are_isolable() {
        let err: StageError = CapabilityError::Api(503, "busy".to_string()).into();
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_payload_errors_are_isolable() {
        let err: StageError = PayloadError::Missing("mesh").into();
        assert!(matches!(err, StageError::Isolable(msg) if msg.contains("mesh")));
    }
}
