//! Per-building work item carried through the stage queues
//!
//! The payload is append-only: each stage contributes exactly one section
//! through a `with_*` builder that consumes the item and refuses to
//! overwrite a section that is already present. Stages read the sections
//! of earlier stages through the `require_*` accessors.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Cartesian point in the job's source coordinate system
pub type Point3 = [f64; 3];

/// Closed polygon ring (first point repeated at the end is tolerated)
pub type Ring = Vec<Point3>;

/// Triangle as three indices into its source ring
pub type Triangle = [usize; 3];

/// Payload section errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Payload section '{0}' already written")]
    AlreadyWritten(&'static str),

    #[error("Payload section '{0}' missing (earlier stage output not present)")]
    Missing(&'static str),
}

/// Repair stage output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairOutput {
    /// Exterior rings of every boundary polygon, uncorrected
    pub polygons: Vec<Ring>,
    /// Polygon indices whose triangles must have their winding reversed
    pub flip_faces: Vec<usize>,
}

/// Triangulate stage output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshOutput {
    /// Triangles per polygon, parallel to [`RepairOutput::polygons`]
    pub faces: Vec<Vec<Triangle>>,
}

/// Where the anchor elevation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElevationSource {
    /// Highest ground-surface vertex embedded in the source fragment
    GroundSurface,
    /// External elevation service
    Service,
}

/// Elevation stage output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    /// Origin in the source coordinate system
    pub origin: Point3,
    /// Origin as `[longitude, latitude]`
    pub origin_geographic: [f64; 2],
    pub elevation: f64,
    pub elevation_source: ElevationSource,
}

/// Export stage output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportOutput {
    pub model_path: PathBuf,
}

/// Convert stage output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionOutput {
    pub converted_paths: Vec<PathBuf>,
}

/// One building threaded through every stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Final identifier (prefix applied); stable across resume
    pub id: String,
    /// Identifier as found in (or generated for) the source element
    pub original_id: String,
    pub job_id: String,
    /// Raw CityGML building fragment
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repair: Option<RepairOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh: Option<MeshOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<Anchor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub places: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion: Option<ConversionOutput>,
}

macro_rules! section {
    ($with:ident, $require:ident, $field:ident, $ty:ty, $name:literal) => {
        pub fn $with(mut self, value: $ty) -> Result<Self, PayloadError> {
            if self.$field.is_some() {
                return Err(PayloadError::AlreadyWritten($name));
            }
            self.$field = Some(value);
            Ok(self)
        }

        pub fn $require(&self) -> Result<&$ty, PayloadError> {
            self.$field.as_ref().ok_or(PayloadError::Missing($name))
        }
    };
}

impl WorkItem {
    /// Fresh item as produced by the Split stage
    pub fn new(
        job_id: impl Into<String>,
        id: impl Into<String>,
        original_id: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            original_id: original_id.into(),
            job_id: job_id.into(),
            source: source.into(),
            repair: None,
            mesh: None,
            anchor: None,
            places: None,
            export: None,
            conversion: None,
        }
    }

    section!(with_repair, require_repair, repair, RepairOutput, "repair");
    section!(with_mesh, require_mesh, mesh, MeshOutput, "mesh");
    section!(with_anchor, require_anchor, anchor, Anchor, "anchor");
    section!(with_places, require_places, places, Vec<serde_json::Value>, "places");
    section!(with_export, require_export, export, ExportOutput, "export");
    section!(with_conversion, require_conversion, conversion, ConversionOutput, "conversion");

    /// Every model file produced for this item (primary first)
    pub fn model_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(export) = &self.export {
            paths.push(export.model_path.clone());
        }
        if let Some(conversion) = &self.conversion {
            paths.extend(conversion.converted_paths.iter().cloned());
        }
        paths
    }
}
