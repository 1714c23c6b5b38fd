//! Export stage: primary model file

use super::{file_stem, item_dir};
use crate::capabilities::{CapabilityError, ExportRequest, ModelExporter};
use crate::error::StageResult;
use crate::pipeline::{StageHandler, StageOutcome};
use async_trait::async_trait;
use polycity_common::models::{ExportOutput, Job, Stage, WorkItem};
use std::sync::Arc;
use tracing::debug;

pub struct ExportHandler {
    exporter: Arc<dyn ModelExporter>,
}

impl ExportHandler {
    pub fn new(exporter: Arc<dyn ModelExporter>) -> Self {
        Self { exporter }
    }
}

#[async_trait]
impl StageHandler for ExportHandler {
    fn stage(&self) -> Stage {
        Stage::Export
    }

    async fn handle(&self, job: &Job, item: WorkItem) -> StageResult<StageOutcome> {
        let repair = item.require_repair()?;
        let mesh = item.require_mesh()?;
        let anchor = item.require_anchor()?;

        let dir = item_dir(&job.config.output_path, &item.id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(CapabilityError::from)?;
        let model_path = dir.join(format!("{}.{}", file_stem(&item.id), self.exporter.extension()));

        self.exporter
            .export(
                ExportRequest {
                    item_id: &item.id,
                    polygons: &repair.polygons,
                    faces: &mesh.faces,
                    origin: anchor.origin,
                },
                &model_path,
            )
            .await?;
        debug!(item_id = %item.id, path = %model_path.display(), "Exported model");

        Ok(StageOutcome::Forward(
            Stage::Convert,
            item.with_export(ExportOutput { model_path })?,
        ))
    }
}
