//! Polygon triangulation by ear clipping
//!
//! The ring is projected onto the coordinate plane its normal is most
//! aligned with. Output triangles index into the ring and keep the ring's
//! own winding, so flipping a polygon's triangles flips its facing.

use super::shell::{length, newell_normal};
use super::CapabilityError;
use polycity_common::models::{Point3, Triangle};

pub trait Triangulator: Send + Sync {
    fn triangulate(&self, ring: &[Point3]) -> Result<Vec<Triangle>, CapabilityError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EarClipping;

type Point2 = [f64; 2];

fn cross(a: Point2, b: Point2, c: Point2) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

fn project(ring: &[Point3], normal: Point3) -> Vec<Point2> {
    let abs = normal.map(f64::abs);
    // Drop the axis the normal is most aligned with; keep the remaining
    // pair in cyclic order so projected winding matches the normal's sign
    let (u, v, sign) = if abs[2] >= abs[0] && abs[2] >= abs[1] {
        (0, 1, normal[2].signum())
    } else if abs[0] >= abs[1] {
        (1, 2, normal[0].signum())
    } else {
        (2, 0, normal[1].signum())
    };
    ring.iter().map(|p| [p[u], p[v] * sign]).collect()
}

impl Triangulator for EarClipping {
    fn triangulate(&self, ring: &[Point3]) -> Result<Vec<Triangle>, CapabilityError> {
        if ring.len() < 3 {
            return Err(CapabilityError::Geometry(format!(
                "ring has {} points, at least 3 required",
                ring.len()
            )));
        }

        let normal = newell_normal(ring);
        if length(normal) == 0.0 || !length(normal).is_finite() {
            return Err(CapabilityError::Geometry("ring has zero area".to_string()));
        }

        // Projected counter-clockwise by construction of `project`
        let points = project(ring, normal);
        let scale = points
            .iter()
            .flat_map(|p| p.iter())
            .fold(0.0f64, |m, v| m.max(v.abs()))
            .max(1.0);
        let epsilon = 1e-12 * scale * scale;

        let mut remaining: Vec<usize> = (0..ring.len()).collect();
        let mut triangles = Vec::with_capacity(ring.len() - 2);

        while remaining.len() > 3 {
            let n = remaining.len();
            let ear = (0..n).find(|&i| {
                let (a, b, c) = (remaining[(i + n - 1) % n], remaining[i], remaining[(i + 1) % n]);
                let (pa, pb, pc) = (points[a], points[b], points[c]);
                if cross(pa, pb, pc) <= epsilon {
                    return false;
                }
                !remaining.iter().any(|&p| {
                    p != a
                        && p != b
                        && p != c
                        && cross(pa, pb, points[p]) >= -epsilon
                        && cross(pb, pc, points[p]) >= -epsilon
                        && cross(pc, pa, points[p]) >= -epsilon
                })
            });

            match ear {
                Some(i) => {
                    let (a, b, c) = (remaining[(i + n - 1) % n], remaining[i], remaining[(i + 1) % n]);
                    triangles.push([a, b, c]);
                    remaining.remove(i);
                }
                None => {
                    // Collinear vertices contribute no area; drop one and retry
                    let collinear = (0..n).find(|&i| {
                        let (a, b, c) =
                            (remaining[(i + n - 1) % n], remaining[i], remaining[(i + 1) % n]);
                        cross(points[a], points[b], points[c]).abs() <= epsilon
                    });
                    match collinear {
                        Some(i) => {
                            remaining.remove(i);
                        }
                        None => {
                            return Err(CapabilityError::Geometry(
                                "ring could not be triangulated (self-intersecting?)".to_string(),
                            ))
                        }
                    }
                }
            }
        }

        let (a, b, c) = (remaining[0], remaining[1], remaining[2]);
        if cross(points[a], points[b], points[c]).abs() > epsilon {
            triangles.push([a, b, c]);
        }
        if triangles.is_empty() {
            return Err(CapabilityError::Geometry("ring has zero area".to_string()));
        }
        Ok(triangles)
    }
}
