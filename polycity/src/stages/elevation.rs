//! Elevation stage: anchor origin, reprojection and terrain height

use crate::capabilities::{ElevationLookup, Projection};
use crate::citygml::parse_building;
use crate::error::{StageError, StageResult};
use crate::pipeline::{StageHandler, StageOutcome};
use async_trait::async_trait;
use polycity_common::models::{
    Anchor, ElevationSource, Job, Point3, Ring, Stage, Triangle, WorkItem,
};
use std::sync::Arc;
use tracing::debug;

/// Lowest mesh vertex; ties broken by x, then y
///
/// Only vertices referenced by a triangle count. The order is total, so
/// the result does not depend on polygon or triangle order.
pub fn anchor_origin(polygons: &[Ring], faces: &[Vec<Triangle>]) -> Option<Point3> {
    faces
        .iter()
        .zip(polygons)
        .flat_map(|(triangles, ring)| {
            triangles
                .iter()
                .flat_map(|t| t.iter())
                .filter_map(move |&i| ring.get(i).copied())
        })
        .min_by(|a, b| {
            a[2].total_cmp(&b[2])
                .then(a[0].total_cmp(&b[0]))
                .then(a[1].total_cmp(&b[1]))
        })
}

pub struct ElevationHandler {
    lookup: Arc<dyn ElevationLookup>,
}

impl ElevationHandler {
    pub fn new(lookup: Arc<dyn ElevationLookup>) -> Self {
        Self { lookup }
    }

    async fn anchor(&self, job: &Job, item: &WorkItem) -> StageResult<Anchor> {
        let repair = item.require_repair()?;
        let mesh = item.require_mesh()?;

        let origin = anchor_origin(&repair.polygons, &mesh.faces)
            .ok_or_else(|| StageError::isolable("mesh has no vertices"))?;
        let projection = Projection::from_proj4(&job.config.proj4)?;
        let origin_geographic = projection.to_geographic([origin[0], origin[1]])?;

        // Embedded ground height wins over a service round trip
        let ground = parse_building(&item.source)?.max_ground_elevation();
        let (elevation, elevation_source) = match ground {
            Some(height) => (height, ElevationSource::GroundSurface),
            None => {
                let endpoint = job.config.elevation.as_ref().ok_or_else(|| {
                    StageError::isolable("no ground surface and no elevation service configured")
                })?;
                let height = self.lookup.height(endpoint, origin_geographic).await?;
                (height, ElevationSource::Service)
            }
        };

        debug!(item_id = %item.id, ?origin, elevation, source = ?elevation_source, "Anchored building");

        Ok(Anchor {
            origin,
            origin_geographic,
            elevation,
            elevation_source,
        })
    }
}

#[async_trait]
impl StageHandler for ElevationHandler {
    fn stage(&self) -> Stage {
        Stage::Elevation
    }

    async fn handle(&self, job: &Job, item: WorkItem) -> StageResult<StageOutcome> {
        let anchor = self.anchor(job, &item).await?;
        let next = if job.config.places.is_some() {
            Stage::PlaceLookup
        } else {
            Stage::Export
        };
        Ok(StageOutcome::Forward(next, item.with_anchor(anchor)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_tie_break_on_x() {
        let polygons = vec![
            vec![[5.0, 0.0, 1.0], [3.0, 9.0, 1.0], [4.0, 4.0, 7.0]],
            vec![[2.0, 8.0, 1.0], [9.0, 9.0, 1.0], [1.0, 1.0, 3.0]],
        ];
        let faces = vec![vec![[0, 1, 2]], vec![[0, 1, 2]]];

        assert_eq!(anchor_origin(&polygons, &faces), Some([2.0, 8.0, 1.0]));

        // Same vertices, reversed order
        let reversed: Vec<Ring> = polygons
            .iter()
            .rev()
            .map(|ring| ring.iter().rev().copied().collect())
            .collect();
        assert_eq!(anchor_origin(&reversed, &faces), Some([2.0, 8.0, 1.0]));
    }

    #[test]
    fn test_unreferenced_vertices_ignored() {
        let polygons = vec![vec![
            [0.0, 0.0, 5.0],
            [1.0, 0.0, 5.0],
            [1.0, 1.0, 5.0],
            [0.0, 0.0, -100.0],
        ]];
        let faces = vec![vec![[0, 1, 2]]];
        assert_eq!(anchor_origin(&polygons, &faces), Some([0.0, 0.0, 5.0]));
    }

    #[test]
    fn test_empty_mesh_has_no_origin() {
        assert_eq!(anchor_origin(&[vec![[0.0; 3]]], &[vec![]]), None);
    }
}
