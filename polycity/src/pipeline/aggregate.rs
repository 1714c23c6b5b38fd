//! Footprint index assembly
//!
//! Pure functions over the persisted footprint list. Aggregation may run
//! more than once for a job (two workers observing completion together),
//! so the output depends only on the list contents.

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::warn;

/// Bounding extent `[min_lon, min_lat, max_lon, max_lat]`
pub type BBox = [f64; 4];

/// Extent of every position in a GeoJSON geometry
pub fn geometry_bbox(geometry: &Value) -> Option<BBox> {
    let mut bbox: Option<BBox> = None;
    if let Some(coordinates) = geometry.get("coordinates") {
        extend_positions(coordinates, &mut bbox);
    }
    bbox
}

fn extend_positions(value: &Value, bbox: &mut Option<BBox>) {
    let Some(array) = value.as_array() else {
        return;
    };

    // A position is an array of numbers; anything else nests positions
    if let (Some(x), Some(y)) = (
        array.first().and_then(Value::as_f64),
        array.get(1).and_then(Value::as_f64),
    ) {
        *bbox = Some(match *bbox {
            None => [x, y, x, y],
            Some([min_x, min_y, max_x, max_y]) => {
                [min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y)]
            }
        });
        return;
    }

    for child in array {
        extend_positions(child, bbox);
    }
}

fn union(a: Option<BBox>, b: Option<BBox>) -> Option<BBox> {
    match (a, b) {
        (Some(a), Some(b)) => Some([a[0].min(b[0]), a[1].min(b[1]), a[2].max(b[2]), a[3].max(b[3])]),
        (a, None) => a,
        (None, b) => b,
    }
}

fn feature_id(feature: &Value) -> Option<&str> {
    feature.get("properties")?.get("id")?.as_str()
}

/// Merge serialized footprint features into one feature collection
///
/// Entries that fail to parse are skipped with a warning. A redelivered
/// item may have appended its footprint twice; features sharing a
/// `properties.id` collapse to the first occurrence.
pub fn build_index(footprints: &[String]) -> Value {
    let mut features: Vec<Value> = Vec::with_capacity(footprints.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for raw in footprints {
        let feature: Value = match serde_json::from_str(raw) {
            Ok(feature) => feature,
            Err(e) => {
                warn!("Skipping unreadable footprint entry: {}", e);
                continue;
            }
        };

        if let Some(id) = feature_id(&feature) {
            if positions.contains_key(id) {
                continue;
            }
            positions.insert(id.to_string(), features.len());
        }
        features.push(feature);
    }

    let bbox = features
        .iter()
        .filter_map(|f| f.get("geometry").and_then(geometry_bbox))
        .fold(None, |acc, b| union(acc, Some(b)));

    let mut collection = Map::new();
    collection.insert("type".to_string(), json!("FeatureCollection"));
    if let Some(bbox) = bbox {
        collection.insert("bbox".to_string(), json!(bbox));
    }
    collection.insert("features".to_string(), Value::Array(features));
    Value::Object(collection)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(id: &str, geometry: Value) -> String {
        json!({"type": "Feature", "geometry": geometry, "properties": {"id": id}}).to_string()
    }

    #[test]
    fn test_polygon_and_point_extent() {
        let index = build_index(&[
            feature(
                "a",
                json!({"type": "Polygon", "coordinates": [[[1.0, 2.0], [3.0, 2.0], [3.0, 5.0], [1.0, 2.0]]]}),
            ),
            feature("b", json!({"type": "Point", "coordinates": [-1.0, 4.0]})),
        ]);

        assert_eq!(index["type"], "FeatureCollection");
        assert_eq!(index["features"].as_array().unwrap().len(), 2);
        assert_eq!(index["bbox"], json!([-1.0, 2.0, 3.0, 5.0]));
    }

    #[test]
    fn test_multipolygon_extent() {
        let geometry = json!({
            "type": "MultiPolygon",
            "coordinates": [
                [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]],
                [[[5.0, 5.0], [6.0, 5.0], [6.0, 7.0], [5.0, 5.0]]]
            ]
        });
        assert_eq!(geometry_bbox(&geometry), Some([0.0, 0.0, 6.0, 7.0]));
    }

    #[test]
    fn test_duplicate_footprints_collapse() {
        let point = json!({"type": "Point", "coordinates": [1.0, 1.0]});
        let index = build_index(&[
            feature("a", point.clone()),
            feature("a", point.clone()),
            "not json".to_string(),
            feature("b", point),
        ]);
        assert_eq!(index["features"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_empty_collection_has_no_bbox() {
        let index = build_index(&[]);
        assert!(index.get("bbox").is_none());
        assert!(index["features"].as_array().unwrap().is_empty());
    }
}
