//! Convert stage: extra formats and metadata injection

use crate::capabilities::metadata::{self, ModelMetadata};
use crate::capabilities::ModelConverter;
use crate::error::StageResult;
use crate::pipeline::{StageHandler, StageOutcome};
use async_trait::async_trait;
use polycity_common::models::{ConversionOutput, Job, Stage, WorkItem};
use std::sync::Arc;
use tracing::debug;

pub struct ConvertHandler {
    converter: Arc<dyn ModelConverter>,
}

impl ConvertHandler {
    pub fn new(converter: Arc<dyn ModelConverter>) -> Self {
        Self { converter }
    }
}

fn metadata_for(job: &Job, item: &WorkItem) -> StageResult<ModelMetadata> {
    let anchor = item.require_anchor()?;
    Ok(ModelMetadata {
        id: item.id.clone(),
        id_original: item.original_id.clone(),
        origin: anchor.origin_geographic,
        elevation: anchor.elevation,
        places: item.places.clone(),
        attribution: job.config.attribution.clone(),
        license: job.config.license.clone(),
    })
}

#[async_trait]
impl StageHandler for ConvertHandler {
    fn stage(&self) -> Stage {
        Stage::Convert
    }

    async fn handle(&self, job: &Job, item: WorkItem) -> StageResult<StageOutcome> {
        let primary = item.require_export()?.model_path.clone();

        let mut converted_paths = Vec::new();
        for format in self.converter.formats() {
            let output = primary.with_extension(format);
            if output == primary {
                continue;
            }
            self.converter.convert(&primary, &output).await?;
            converted_paths.push(output);
        }

        let metadata = metadata_for(job, &item)?;
        for path in std::iter::once(&primary).chain(&converted_paths) {
            let injected = metadata::inject(path, &metadata).await?;
            debug!(item_id = %item.id, path = %path.display(), injected, "Metadata pass");
        }

        Ok(StageOutcome::Forward(
            Stage::Index,
            item.with_conversion(ConversionOutput { converted_paths })?,
        ))
    }
}
