//! Shared data model

pub mod failure;
pub mod job;
pub mod stage;
pub mod work_item;

pub use failure::FailureRecord;
pub use job::{fields, Job, JobConfig, JobProgress, ServiceEndpoint};
pub use stage::Stage;
pub use work_item::{
    Anchor, ConversionOutput, ElevationSource, ExportOutput, MeshOutput, PayloadError, Point3,
    RepairOutput, Ring, Triangle, WorkItem,
};
