//! Place-lookup stage (only routed to when the job has a gazetteer)

use crate::capabilities::Gazetteer;
use crate::error::StageResult;
use crate::pipeline::{StageHandler, StageOutcome};
use async_trait::async_trait;
use polycity_common::models::{Job, Stage, WorkItem};
use std::sync::Arc;

pub struct PlaceLookupHandler {
    gazetteer: Arc<dyn Gazetteer>,
}

impl PlaceLookupHandler {
    pub fn new(gazetteer: Arc<dyn Gazetteer>) -> Self {
        Self { gazetteer }
    }
}

#[async_trait]
impl StageHandler for PlaceLookupHandler {
    fn stage(&self) -> Stage {
        Stage::PlaceLookup
    }

    async fn handle(&self, job: &Job, item: WorkItem) -> StageResult<StageOutcome> {
        let Some(endpoint) = &job.config.places else {
            return Ok(StageOutcome::Forward(Stage::Export, item));
        };

        let lon_lat = item.require_anchor()?.origin_geographic;
        let places = self.gazetteer.lookup(endpoint, lon_lat).await?;
        Ok(StageOutcome::Forward(Stage::Export, item.with_places(places)?))
    }
}
