//! Primary model export (Wavefront OBJ)

use super::CapabilityError;
use async_trait::async_trait;
use polycity_common::models::{Point3, Ring, Triangle};
use std::fmt::Write as _;
use std::path::Path;

/// Geometry handed to an exporter
#[derive(Debug, Clone, Copy)]
pub struct ExportRequest<'a> {
    pub item_id: &'a str,
    pub polygons: &'a [Ring],
    /// Triangles per polygon, already corrected for orientation
    pub faces: &'a [Vec<Triangle>],
    /// Anchor origin in source coordinates; becomes the model's local origin
    pub origin: Point3,
}

#[async_trait]
pub trait ModelExporter: Send + Sync {
    /// File extension of the produced model
    fn extension(&self) -> &'static str;

    async fn export(&self, request: ExportRequest<'_>, path: &Path) -> Result<(), CapabilityError>;
}

/// Y-up OBJ writer with vertices relative to the anchor origin
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjExporter;

impl ObjExporter {
    pub fn render(request: &ExportRequest<'_>) -> Result<String, CapabilityError> {
        if request.polygons.len() != request.faces.len() {
            return Err(CapabilityError::Geometry(format!(
                "{} polygons but {} face lists",
                request.polygons.len(),
                request.faces.len()
            )));
        }

        let [ox, oy, oz] = request.origin;
        let mut obj = String::new();
        // Writing to a String cannot fail
        let _ = writeln!(obj, "o {}", request.item_id);

        for ring in request.polygons {
            for p in ring {
                // Source is Z-up; OBJ consumers expect Y-up
                let _ = writeln!(obj, "v {} {} {}", p[0] - ox, p[2] - oz, -(p[1] - oy));
            }
        }

        let mut base = 1usize;
        for (ring, triangles) in request.polygons.iter().zip(request.faces) {
            for t in triangles {
                if t.iter().any(|&i| i >= ring.len()) {
                    return Err(CapabilityError::Geometry(format!(
                        "triangle {:?} indexes past a ring of {} points",
                        t,
                        ring.len()
                    )));
                }
                let _ = writeln!(obj, "f {} {} {}", base + t[0], base + t[1], base + t[2]);
            }
            base += ring.len();
        }

        Ok(obj)
    }
}

#[async_trait]
impl ModelExporter for ObjExporter {
    fn extension(&self) -> &'static str {
        "obj"
    }

    async fn export(&self, request: ExportRequest<'_>, path: &Path) -> Result<(), CapabilityError> {
        let obj = Self::render(&request)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, obj).await?;
        Ok(())
    }
}
