//! Triangulate stage

use crate::capabilities::Triangulator;
use crate::error::{StageError, StageResult};
use crate::pipeline::{StageHandler, StageOutcome};
use async_trait::async_trait;
use polycity_common::models::{Job, MeshOutput, RepairOutput, Stage, WorkItem};
use std::collections::HashSet;
use std::sync::Arc;

pub struct TriangulateHandler {
    triangulator: Arc<dyn Triangulator>,
}

impl TriangulateHandler {
    pub fn new(triangulator: Arc<dyn Triangulator>) -> Self {
        Self { triangulator }
    }

    /// Triangles for every polygon, winding reversed on flipped polygons
    pub fn mesh(&self, repair: &RepairOutput) -> StageResult<MeshOutput> {
        let flip: HashSet<usize> = repair.flip_faces.iter().copied().collect();

        let faces = repair
            .polygons
            .iter()
            .enumerate()
            .map(|(index, ring)| {
                let mut triangles = self
                    .triangulator
                    .triangulate(ring)
                    .map_err(|e| StageError::isolable(format!("polygon {}: {}", index, e)))?;
                if flip.contains(&index) {
                    for triangle in &mut triangles {
                        triangle.swap(1, 2);
                    }
                }
                Ok(triangles)
            })
            .collect::<StageResult<Vec<_>>>()?;

        Ok(MeshOutput { faces })
    }
}

#[async_trait]
impl StageHandler for TriangulateHandler {
    fn stage(&self) -> Stage {
        Stage::Triangulate
    }

    async fn handle(&self, _job: &Job, item: WorkItem) -> StageResult<StageOutcome> {
        let mesh = self.mesh(item.require_repair()?)?;
        Ok(StageOutcome::Forward(Stage::Elevation, item.with_mesh(mesh)?))
    }
}
