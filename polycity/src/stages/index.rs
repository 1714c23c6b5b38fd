//! Index stage: per-building footprint
//!
//! Ground-surface rings are reprojected to longitude/latitude and merged
//! into one footprint: a Polygon when the surfaces touch or overlap, a
//! MultiPolygon only for disjoint parts. Buildings without usable ground
//! rings fall back to a Point at the anchor origin. The worker appends the feature to
//! the job's footprint list and counts the item as completed.

use super::{file_stem, item_dir};
use crate::capabilities::{CapabilityError, Projection};
use crate::citygml::parse_building;
use crate::error::StageResult;
use crate::pipeline::{StageHandler, StageOutcome};
use async_trait::async_trait;
use geo::{Area, BooleanOps, LineString, MultiPolygon, Polygon};
use polycity_common::models::{Job, Ring, Stage, WorkItem};
use serde_json::{json, Map, Value};
use tracing::debug;

pub struct IndexHandler;

/// `[lon, lat]` rings, closed; `None` when any point fails to reproject
fn geographic_rings(rings: &[Ring], projection: &Projection) -> Option<Vec<Vec<[f64; 2]>>> {
    let mut result = Vec::with_capacity(rings.len());
    for ring in rings {
        let mut points = ring
            .iter()
            .map(|p| projection.to_geographic([p[0], p[1]]))
            .collect::<Result<Vec<_>, CapabilityError>>()
            .ok()?;
        if points.len() < 3 {
            continue;
        }
        if points.first() != points.last() {
            points.push(points[0]);
        }
        result.push(points);
    }
    Some(result)
}

/// Union of the ground rings; zero-area rings are dropped
fn merge_rings(rings: Vec<Vec<[f64; 2]>>) -> MultiPolygon<f64> {
    rings
        .into_iter()
        .map(|ring| Polygon::new(LineString::from(ring), vec![]))
        .filter(|polygon| polygon.unsigned_area() > 0.0)
        .map(|polygon| MultiPolygon::new(vec![polygon]))
        .reduce(|merged, next| merged.union(&next))
        .unwrap_or_else(|| MultiPolygon::new(vec![]))
}

fn polygon_coordinates(polygon: &Polygon<f64>) -> Vec<Vec<[f64; 2]>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(|ring| ring.coords().map(|c| [c.x, c.y]).collect())
        .collect()
}

fn footprint_geometry(rings: Option<Vec<Vec<[f64; 2]>>>, origin: [f64; 2]) -> Value {
    let merged = rings.map(merge_rings).unwrap_or_else(|| MultiPolygon::new(vec![]));
    match merged.0.as_slice() {
        [] => json!({"type": "Point", "coordinates": origin}),
        [polygon] => json!({
            "type": "Polygon",
            "coordinates": polygon_coordinates(polygon),
        }),
        parts => json!({
            "type": "MultiPolygon",
            "coordinates": parts.iter().map(polygon_coordinates).collect::<Vec<_>>(),
        }),
    }
}

/// Footprint feature for a fully processed item
pub fn footprint(job: &Job, item: &WorkItem) -> StageResult<Value> {
    let anchor = item.require_anchor()?;
    let geometry = parse_building(&item.source)?;
    let projection = Projection::from_proj4(&job.config.proj4)?;

    let rings = geographic_rings(&geometry.ground_surfaces, &projection);
    if rings.is_none() {
        debug!(item_id = %item.id, "Ground surface does not reproject, using origin point");
    }

    let output = &job.config.output_path;
    let models: Vec<String> = item
        .model_paths()
        .iter()
        .map(|path| {
            path.strip_prefix(output)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();

    let mut properties = Map::new();
    properties.insert("id".to_string(), json!(item.id));
    properties.insert("idOriginal".to_string(), json!(item.original_id));
    properties.insert("origin".to_string(), json!(anchor.origin_geographic));
    properties.insert("elevation".to_string(), json!(anchor.elevation));
    properties.insert("models".to_string(), json!(models));
    if let Some(places) = &item.places {
        properties.insert("places".to_string(), json!(places));
    }
    if let Some(attribution) = &job.config.attribution {
        properties.insert("attribution".to_string(), json!(attribution));
    }
    if let Some(license) = &job.config.license {
        properties.insert("license".to_string(), json!(license));
    }

    Ok(json!({
        "type": "Feature",
        "geometry": footprint_geometry(rings, anchor.origin_geographic),
        "properties": properties,
    }))
}

#[async_trait]
impl StageHandler for IndexHandler {
    fn stage(&self) -> Stage {
        Stage::Index
    }

    async fn handle(&self, job: &Job, item: WorkItem) -> StageResult<StageOutcome> {
        let footprint = footprint(job, &item)?;

        let dir = item_dir(&job.config.output_path, &item.id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(CapabilityError::from)?;
        let path = dir.join(format!("{}.geojson", file_stem(&item.id)));
        tokio::fs::write(&path, footprint.to_string())
            .await
            .map_err(CapabilityError::from)?;

        Ok(StageOutcome::Completed { footprint })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn longlat() -> Projection {
        Projection::from_proj4("+proj=longlat +datum=WGS84 +no_defs").unwrap()
    }

    #[test]
    fn test_single_ring_is_closed_polygon() {
        let rings = vec![vec![[7.0, 51.0, 0.0], [7.1, 51.0, 0.0], [7.1, 51.1, 0.0]]];
        let geometry = footprint_geometry(geographic_rings(&rings, &longlat()), [0.0, 0.0]);

        assert_eq!(geometry["type"], "Polygon");
        let ring = geometry["coordinates"][0].as_array().unwrap();
        assert_eq!(ring.len(), 4);
        assert_eq!(ring[0], ring[3]);
    }

    fn square(x0: f64) -> Ring {
        vec![
            [x0, 51.0, 0.0],
            [x0 + 0.1, 51.0, 0.0],
            [x0 + 0.1, 51.1, 0.0],
            [x0, 51.1, 0.0],
        ]
    }

    fn x_extent(ring: &Value) -> (f64, f64) {
        ring.as_array()
            .unwrap()
            .iter()
            .map(|p| p[0].as_f64().unwrap())
            .fold((f64::MAX, f64::MIN), |(lo, hi), x| (lo.min(x), hi.max(x)))
    }

    #[test]
    fn test_adjacent_ground_surfaces_merge_into_one_polygon() {
        // Two surfaces tiling one footprint, sharing the edge x = 7.1
        let geometry = footprint_geometry(
            geographic_rings(&[square(7.0), square(7.1)], &longlat()),
            [0.0, 0.0],
        );

        assert_eq!(geometry["type"], "Polygon");
        let rings = geometry["coordinates"].as_array().unwrap();
        assert_eq!(rings.len(), 1);
        let (min_x, max_x) = x_extent(&rings[0]);
        assert!((min_x - 7.0).abs() < 1e-9);
        assert!((max_x - 7.2).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_ground_surfaces_are_multipolygon() {
        let geometry = footprint_geometry(
            geographic_rings(&[square(7.0), square(7.5)], &longlat()),
            [0.0, 0.0],
        );
        assert_eq!(geometry["type"], "MultiPolygon");
        assert_eq!(geometry["coordinates"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_ground_surface_collapses() {
        let geometry = footprint_geometry(
            geographic_rings(&[square(7.0), square(7.0)], &longlat()),
            [0.0, 0.0],
        );
        assert_eq!(geometry["type"], "Polygon");
    }

    #[test]
    fn test_no_ground_falls_back_to_point() {
        let geometry = footprint_geometry(geographic_rings(&[], &longlat()), [7.0, 51.0]);
        assert_eq!(geometry, json!({"type": "Point", "coordinates": [7.0, 51.0]}));
        assert_eq!(footprint_geometry(None, [7.0, 51.0])["type"], "Point");

        // Collinear ring has no area
        let flat = vec![[7.0, 51.0, 0.0], [7.1, 51.0, 0.0], [7.2, 51.0, 0.0]];
        let geometry = footprint_geometry(geographic_rings(&[flat], &longlat()), [7.0, 51.0]);
        assert_eq!(geometry["type"], "Point");
    }
}
