//! Polyhedral shell validation
//!
//! Reports defects of a building's boundary polygons. Orientation is judged
//! against the shell's centroid: an outward-facing polygon's normal points
//! away from it. The check is meant for the roughly convex solids typical
//! of LOD1/LOD2 buildings.

use polycity_common::models::{Point3, Ring};
use serde::{Deserialize, Serialize};

/// Validation failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShellErrorKind {
    /// Some polygons face inward
    PolygonWrongOrientation,
    /// Every polygon faces inward (the whole shell is inverted)
    AllPolygonsWrongOrientation,
    TooFewPoints,
    NonPlanarOrDegenerate,
}

impl ShellErrorKind {
    /// Orientation defects are corrected downstream by flipping triangles
    pub fn is_orientation(&self) -> bool {
        matches!(
            self,
            ShellErrorKind::PolygonWrongOrientation | ShellErrorKind::AllPolygonsWrongOrientation
        )
    }
}

/// One validation failure and the polygons it affects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellIssue {
    pub kind: ShellErrorKind,
    pub polygons: Vec<usize>,
}

pub trait ShellValidator: Send + Sync {
    fn validate(&self, polygons: &[Ring]) -> Vec<ShellIssue>;
}

/// Newell-normal based validator
#[derive(Debug, Clone)]
pub struct NormalShellValidator {
    /// Allowed distance of a vertex from its polygon's plane, relative to
    /// the polygon's extent
    pub planarity_tolerance: f64,
}

impl Default for NormalShellValidator {
    fn default() -> Self {
        Self {
            planarity_tolerance: 0.01,
        }
    }
}

/// Newell's method; length is twice the polygon area
pub(crate) fn newell_normal(ring: &[Point3]) -> Point3 {
    let mut normal = [0.0; 3];
    for (i, current) in ring.iter().enumerate() {
        let next = ring[(i + 1) % ring.len()];
        normal[0] += (current[1] - next[1]) * (current[2] + next[2]);
        normal[1] += (current[2] - next[2]) * (current[0] + next[0]);
        normal[2] += (current[0] - next[0]) * (current[1] + next[1]);
    }
    normal
}

pub(crate) fn length(v: Point3) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

fn centroid<'a>(points: impl Iterator<Item = &'a Point3>) -> Option<Point3> {
    let mut sum = [0.0; 3];
    let mut count = 0usize;
    for p in points {
        sum[0] += p[0];
        sum[1] += p[1];
        sum[2] += p[2];
        count += 1;
    }
    (count > 0).then(|| [sum[0] / count as f64, sum[1] / count as f64, sum[2] / count as f64])
}

fn extent(ring: &[Point3]) -> f64 {
    let mut max = 0.0f64;
    for a in ring {
        for b in ring {
            max = max.max(length([a[0] - b[0], a[1] - b[1], a[2] - b[2]]));
        }
    }
    max
}

impl NormalShellValidator {
    fn is_planar(&self, ring: &[Point3], normal: Point3) -> bool {
        let unit = {
            let len = length(normal);
            [normal[0] / len, normal[1] / len, normal[2] / len]
        };
        let origin = ring[0];
        let tolerance = self.planarity_tolerance * extent(ring);
        ring.iter().all(|p| {
            let d = (p[0] - origin[0]) * unit[0]
                + (p[1] - origin[1]) * unit[1]
                + (p[2] - origin[2]) * unit[2];
            d.abs() <= tolerance
        })
    }
}

impl ShellValidator for NormalShellValidator {
    fn validate(&self, polygons: &[Ring]) -> Vec<ShellIssue> {
        let mut too_few = Vec::new();
        let mut degenerate = Vec::new();
        let mut inward = Vec::new();
        let mut oriented = 0usize;

        let Some(shell_center) = centroid(polygons.iter().flatten()) else {
            return Vec::new();
        };

        for (index, ring) in polygons.iter().enumerate() {
            if ring.len() < 3 {
                too_few.push(index);
                continue;
            }
            let normal = newell_normal(ring);
            let scale = extent(ring);
            if length(normal) <= f64::EPSILON * scale * scale || !self.is_planar(ring, normal) {
                degenerate.push(index);
                continue;
            }

            let Some(center) = centroid(ring.iter()) else {
                continue;
            };
            let outward = [
                center[0] - shell_center[0],
                center[1] - shell_center[1],
                center[2] - shell_center[2],
            ];
            let facing = normal[0] * outward[0] + normal[1] * outward[1] + normal[2] * outward[2];
            oriented += 1;
            if facing < 0.0 {
                inward.push(index);
            }
        }

        let mut issues = Vec::new();
        if !inward.is_empty() {
            let kind = if inward.len() == oriented {
                ShellErrorKind::AllPolygonsWrongOrientation
            } else {
                ShellErrorKind::PolygonWrongOrientation
            };
            issues.push(ShellIssue {
                kind,
                polygons: inward,
            });
        }
        if !too_few.is_empty() {
            issues.push(ShellIssue {
                kind: ShellErrorKind::TooFewPoints,
                polygons: too_few,
            });
        }
        if !degenerate.is_empty() {
            issues.push(ShellIssue {
                kind: ShellErrorKind::NonPlanarOrDegenerate,
                polygons: degenerate,
            });
        }
        issues
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Unit cube with outward-facing (counter-clockwise from outside) faces
    pub(crate) fn cube() -> Vec<Ring> {
        vec![
            vec![[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0], [1.0, 0.0, 0.0]], // bottom
            vec![[0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [1.0, 1.0, 1.0], [0.0, 1.0, 1.0]], // top
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 1.0], [0.0, 0.0, 1.0]], // front
            vec![[0.0, 1.0, 0.0], [0.0, 1.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, 0.0]], // back
            vec![[0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 1.0], [0.0, 1.0, 0.0]], // left
            vec![[1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [1.0, 1.0, 1.0], [1.0, 0.0, 1.0]], // right
        ]
    }

    #[test]
    fn test_valid_cube_has_no_issues() {
        assert!(NormalShellValidator::default().validate(&cube()).is_empty());
    }

    #[test]
    fn test_single_inverted_face_reported() {
        let mut polygons = cube();
        polygons[1].reverse();
        let issues = NormalShellValidator::default().validate(&polygons);
        assert_eq!(
            issues,
            vec![ShellIssue {
                kind: ShellErrorKind::PolygonWrongOrientation,
                polygons: vec![1],
            }]
        );
    }

    #[test]
    fn test_fully_inverted_shell() {
        let polygons: Vec<Ring> = cube()
            .into_iter()
            .map(|mut ring| {
                ring.reverse();
                ring
            })
            .collect();
        let issues = NormalShellValidator::default().validate(&polygons);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, ShellErrorKind::AllPolygonsWrongOrientation);
        assert_eq!(issues[0].polygons.len(), 6);
    }

    #[test]
    fn test_degenerate_polygons_are_not_orientation_issues() {
        let mut polygons = cube();
        polygons.push(vec![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]]);
        polygons.push(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]]);
        let issues = NormalShellValidator::default().validate(&polygons);

        let kinds: Vec<_> = issues.iter().map(|i| i.kind).collect();
        assert!(kinds.contains(&ShellErrorKind::TooFewPoints));
        assert!(kinds.contains(&ShellErrorKind::NonPlanarOrDegenerate));
        assert!(issues.iter().all(|i| !i.kind.is_orientation()));
    }
}
