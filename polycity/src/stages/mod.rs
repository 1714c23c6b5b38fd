//! Stage handlers
//!
//! Split reads the input document and feeds Repair; every later stage is a
//! [`StageHandler`] driven by a [`crate::pipeline::StageWorker`]:
//!
//! Repair → Triangulate → Elevation → (PlaceLookup) → Export → Convert → Index

pub mod convert;
pub mod elevation;
pub mod export;
pub mod index;
pub mod place_lookup;
pub mod repair;
pub mod split;
pub mod triangulate;

use crate::capabilities::Capabilities;
use crate::pipeline::StageHandler;
use polycity_common::models::Stage;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use convert::ConvertHandler;
pub use elevation::ElevationHandler;
pub use export::ExportHandler;
pub use index::IndexHandler;
pub use place_lookup::PlaceLookupHandler;
pub use repair::RepairHandler;
pub use split::Splitter;
pub use triangulate::TriangulateHandler;

/// Handler for one queue-fed stage
pub fn handler_for(stage: Stage, capabilities: &Capabilities) -> Arc<dyn StageHandler> {
    match stage {
        Stage::Repair => Arc::new(RepairHandler::new(capabilities.validator.clone())),
        Stage::Triangulate => Arc::new(TriangulateHandler::new(capabilities.triangulator.clone())),
        Stage::Elevation => Arc::new(ElevationHandler::new(capabilities.elevation.clone())),
        Stage::PlaceLookup => Arc::new(PlaceLookupHandler::new(capabilities.gazetteer.clone())),
        Stage::Export => Arc::new(ExportHandler::new(capabilities.exporter.clone())),
        Stage::Convert => Arc::new(ConvertHandler::new(capabilities.converter.clone())),
        Stage::Index => Arc::new(IndexHandler),
    }
}

/// Hex digits of the id digest appended to rewritten stems
const STEM_HASH_LEN: usize = 8;

/// Identifier reduced to a safe file name
///
/// Ids that had to be rewritten get a short digest of the original id
/// appended, so `a/b` and `a:b` do not share an output directory.
pub fn file_stem(item_id: &str) -> String {
    let stem: String = item_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let stem = if stem.chars().all(|c| c == '.') {
        format!("_{}", stem)
    } else {
        stem
    };
    if stem == item_id {
        return stem;
    }

    let digest = Sha256::digest(item_id.as_bytes());
    let hash: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}-{}", stem, &hash[..STEM_HASH_LEN])
}

/// Per-building output directory
pub fn item_dir(output_path: &Path, item_id: &str) -> PathBuf {
    output_path.join(file_stem(item_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem_replaces_separators() {
        assert_eq!(file_stem("DEBY_LOD2_4959457"), "DEBY_LOD2_4959457");
        assert_eq!(file_stem("berlin-B1.2"), "berlin-B1.2");
        assert!(file_stem("a/b:c d").starts_with("a_b_c_d-"));
        assert!(file_stem("..").starts_with("_..-"));
        assert!(file_stem("").starts_with("_-"));
    }

    #[test]
    fn test_rewritten_ids_do_not_collide() {
        let slash = file_stem("a/b");
        let colon = file_stem("a:b");
        assert_ne!(slash, colon);
        assert_ne!(slash, file_stem("a_b"));
        assert_eq!(slash.len(), "a_b".len() + 1 + STEM_HASH_LEN);
        // Stable across calls
        assert_eq!(slash, file_stem("a/b"));
    }

    #[test]
    fn test_item_dir_stays_inside_output() {
        let dir = item_dir(Path::new("/out"), "../escape");
        assert_eq!(dir.parent(), Some(Path::new("/out")));
        assert!(dir.to_string_lossy().starts_with("/out/.._escape-"));
    }
}
