//! Repair stage: shell validation and flip instructions

use crate::capabilities::ShellValidator;
use crate::citygml::parse_building;
use crate::error::{StageError, StageResult};
use crate::pipeline::{StageHandler, StageOutcome};
use async_trait::async_trait;
use polycity_common::models::{Job, RepairOutput, Stage, WorkItem};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

pub struct RepairHandler {
    validator: Arc<dyn ShellValidator>,
}

impl RepairHandler {
    pub fn new(validator: Arc<dyn ShellValidator>) -> Self {
        Self { validator }
    }

    /// Polygon rings plus the indices of polygons to flip downstream
    ///
    /// Rings are passed on unmodified: orientation defects become flip
    /// instructions for the triangulator. Other defects are logged only.
    pub fn repair(&self, item: &WorkItem) -> StageResult<RepairOutput> {
        let geometry = parse_building(&item.source)?;
        if geometry.polygons.is_empty() {
            return Err(StageError::isolable("building has no polygons"));
        }

        let mut flip = BTreeSet::new();
        for issue in self.validator.validate(&geometry.polygons) {
            if issue.kind.is_orientation() {
                flip.extend(issue.polygons.iter().copied());
            } else {
                debug!(item_id = %item.id, kind = ?issue.kind, polygons = ?issue.polygons, "Shell defect left as is");
            }
        }

        Ok(RepairOutput {
            polygons: geometry.polygons,
            flip_faces: flip.into_iter().collect(),
        })
    }
}

#[async_trait]
impl StageHandler for RepairHandler {
    fn stage(&self) -> Stage {
        Stage::Repair
    }

    async fn handle(&self, _job: &Job, item: WorkItem) -> StageResult<StageOutcome> {
        let repair = self.repair(&item)?;
        Ok(StageOutcome::Forward(Stage::Triangulate, item.with_repair(repair)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{NormalShellValidator, ShellErrorKind, ShellIssue};
    use polycity_common::models::Ring;

    struct Reports(Vec<ShellIssue>);

    impl ShellValidator for Reports {
        fn validate(&self, _polygons: &[Ring]) -> Vec<ShellIssue> {
            self.0.clone()
        }
    }

    const SQUARE: &str = r#"<bldg:Building xmlns:bldg="http://www.opengis.net/citygml/building/2.0" xmlns:gml="http://www.opengis.net/gml" gml:id="b1">
        <gml:Polygon><gml:exterior><gml:LinearRing>
            <gml:posList>0 0 0 1 0 0 1 1 0 0 1 0 0 0 0</gml:posList>
        </gml:LinearRing></gml:exterior></gml:Polygon>
        <gml:Polygon><gml:exterior><gml:LinearRing>
            <gml:posList>0 0 1 1 0 1 1 1 1 0 1 1 0 0 1</gml:posList>
        </gml:LinearRing></gml:exterior></gml:Polygon>
    </bldg:Building>"#;

    #[test]
    fn test_only_orientation_issues_become_flips() {
        let handler = RepairHandler::new(Arc::new(Reports(vec![
            ShellIssue {
                kind: ShellErrorKind::PolygonWrongOrientation,
                polygons: vec![1, 1],
            },
            ShellIssue {
                kind: ShellErrorKind::NonPlanarOrDegenerate,
                polygons: vec![0],
            },
            ShellIssue {
                kind: ShellErrorKind::AllPolygonsWrongOrientation,
                polygons: vec![0],
            },
        ])));

        let item = WorkItem::new("j", "b1", "b1", SQUARE);
        let output = handler.repair(&item).unwrap();
        assert_eq!(output.polygons.len(), 2);
        assert_eq!(output.polygons[0].len(), 4);
        assert_eq!(output.flip_faces, vec![0, 1]);
    }

    #[test]
    fn test_building_without_polygons_is_isolated() {
        let handler = RepairHandler::new(Arc::new(NormalShellValidator::default()));
        let item = WorkItem::new("j", "b1", "b1", r#"<bldg:Building xmlns:bldg="x"/>"#);
        assert!(matches!(handler.repair(&item), Err(StageError::Isolable(_))));
    }
}
