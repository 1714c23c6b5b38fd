//! Pipeline runtime
//!
//! - [`registry`]: job records and the active-job list
//! - [`accounting`]: completion and failure counting, job completion
//! - [`aggregate`]: footprint index and failure report
//! - [`handler`]: the contract every queue-fed stage implements
//! - [`worker`]: pull/handle/forward-or-isolate/ack loop
//! - [`supervisor`]: per-stage worker pools

pub mod accounting;
pub mod aggregate;
pub mod handler;
pub mod registry;
pub mod supervisor;
pub mod worker;

pub use accounting::Accounting;
pub use handler::{StageHandler, StageOutcome};
pub use registry::JobRegistry;
pub use supervisor::{ProcessLauncher, TaskLauncher, WorkerExit, WorkerLauncher, WorkerPools};
pub use worker::StageWorker;
