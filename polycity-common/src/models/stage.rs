//! Pipeline stages and their queue names

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A queue-fed pipeline stage
///
/// Split is not listed: it reads the input document directly and only
/// produces work for [`Stage::Repair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Repair,
    Triangulate,
    Elevation,
    PlaceLookup,
    Export,
    Convert,
    Index,
}

impl Stage {
    /// Every queue-fed stage in pipeline order
    pub const ALL: [Stage; 7] = [
        Stage::Repair,
        Stage::Triangulate,
        Stage::Elevation,
        Stage::PlaceLookup,
        Stage::Export,
        Stage::Convert,
        Stage::Index,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Repair => "repair",
            Stage::Triangulate => "triangulate",
            Stage::Elevation => "elevation",
            Stage::PlaceLookup => "place_lookup",
            Stage::Export => "export",
            Stage::Convert => "convert",
            Stage::Index => "index",
        }
    }

    /// Durable queue feeding this stage
    pub fn queue_name(&self) -> &'static str {
        match self {
            Stage::Repair => "repair_building_queue",
            Stage::Triangulate => "triangulate_building_queue",
            Stage::Elevation => "building_elevation_queue",
            Stage::PlaceLookup => "place_lookup_queue",
            Stage::Export => "building_export_queue",
            Stage::Convert => "convert_model_queue",
            Stage::Index => "footprint_index_queue",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidInput(format!("Unknown stage: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_name_parses_back() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
    }

    #[test]
    fn test_queue_names_are_distinct() {
        let mut names: Vec<_> = Stage::ALL.iter().map(|s| s.queue_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Stage::ALL.len());
    }

    #[test]
    fn test_unknown_stage_rejected() {
        assert!("split".parse::<Stage>().is_err());
    }
}
