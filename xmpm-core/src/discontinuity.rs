//! Embedded discontinuity surfaces and their level sets.
//!
//! A surface is a lower-dimensional mesh inside the domain: line segments in
//! 2D, triangles in 3D. Its level set is the signed distance to the nearest
//! surface element.
//!
//! - [`DiscontinuityType::Crack`]: an open surface. The sign comes from the
//!   normal of the nearest element, so particles on the side the normals
//!   point to are positive.
//! - [`DiscontinuityType::Interface`]: a closed surface enclosing a region.
//!   Points outside are positive, inside negative, decided by winding
//!   number.

use crate::error::{Error, Result};
use crate::types::Vector;
use nalgebra::{Vector2, Vector3};
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;

/// Surface representation, selected by the `type` tag of the input record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscontinuityType {
    Crack,
    Interface,
}

impl FromStr for DiscontinuityType {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "crack" => Ok(DiscontinuityType::Crack),
            "interface" => Ok(DiscontinuityType::Interface),
            _ => Err(Error::Discontinuity(format!(
                "unknown discontinuity type '{tag}'"
            ))),
        }
    }
}

/// One entry of `analysis.discontinuity`.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscontinuityConfig {
    #[serde(rename = "type")]
    pub discontinuity_type: String,
    pub id: usize,
    pub io_type: String,
    pub file: String,
    #[serde(default)]
    pub frictional_coefficient: f64,
}

/// Closest point on a surface element and the element's unit normal.
struct Projection {
    distance: f64,
    closest: Vector,
    normal: Vector,
}

/// An embedded surface.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscontinuitySurface {
    id: usize,
    kind: DiscontinuityType,
    dim: usize,
    points: Vec<Vector>,
    cells: Vec<Vec<usize>>,
    frictional_coefficient: f64,
}

impl DiscontinuitySurface {
    pub fn new(id: usize, kind: DiscontinuityType, dim: usize) -> Self {
        Self {
            id,
            kind,
            dim,
            points: Vec::new(),
            cells: Vec::new(),
            frictional_coefficient: 0.0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn kind(&self) -> DiscontinuityType {
        self.kind
    }

    pub fn frictional_coefficient(&self) -> f64 {
        self.frictional_coefficient
    }

    pub fn nelements(&self) -> usize {
        self.cells.len()
    }

    /// Build the geometry.
    ///
    /// Cells must have `dim` vertices (segments in 2D, triangles in 3D) that
    /// index into `points`. An interface must additionally be closed: every
    /// vertex (2D) or edge (3D) is shared by exactly two cells.
    pub fn initialize(&mut self, points: Vec<Vector>, cells: Vec<Vec<usize>>) -> Result<()> {
        if self.dim != 2 && self.dim != 3 {
            return Err(Error::Discontinuity(format!(
                "discontinuity {}: unsupported dimension {}",
                self.id, self.dim
            )));
        }
        if cells.is_empty() {
            return Err(Error::Discontinuity(format!(
                "discontinuity {}: surface has no cells",
                self.id
            )));
        }
        if let Some(p) = points.iter().find(|p| p.len() != self.dim) {
            return Err(Error::Discontinuity(format!(
                "discontinuity {}: point {} is not {}-dimensional",
                self.id, p, self.dim
            )));
        }
        for (c, cell) in cells.iter().enumerate() {
            if cell.len() != self.dim {
                return Err(Error::Discontinuity(format!(
                    "discontinuity {}: cell {c} has {} vertices, expected {}",
                    self.id,
                    cell.len(),
                    self.dim
                )));
            }
            if let Some(v) = cell.iter().find(|v| **v >= points.len()) {
                return Err(Error::Discontinuity(format!(
                    "discontinuity {}: cell {c} references missing point {v}",
                    self.id
                )));
            }
        }
        if self.kind == DiscontinuityType::Interface && !is_closed(&cells) {
            return Err(Error::Discontinuity(format!(
                "discontinuity {}: interface surface is not closed",
                self.id
            )));
        }
        self.points = points;
        self.cells = cells;
        Ok(())
    }

    pub fn set_frictional_coef(&mut self, coefficient: f64) {
        self.frictional_coefficient = coefficient;
    }

    fn vertex(&self, cell: usize, local: usize) -> &Vector {
        &self.points[self.cells[cell][local]]
    }

    fn project(&self, cell: usize, x: &Vector) -> Projection {
        if self.dim == 2 {
            let a = Vector2::new(self.vertex(cell, 0)[0], self.vertex(cell, 0)[1]);
            let b = Vector2::new(self.vertex(cell, 1)[0], self.vertex(cell, 1)[1]);
            let p = Vector2::new(x[0], x[1]);
            let ab = b - a;
            let t = if ab.norm_squared() > 0.0 {
                ((p - a).dot(&ab) / ab.norm_squared()).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let closest = a + ab * t;
            let normal = Vector2::new(-ab.y, ab.x)
                .try_normalize(0.0)
                .unwrap_or_else(Vector2::zeros);
            Projection {
                distance: (p - closest).norm(),
                closest: Vector::from_column_slice(closest.as_slice()),
                normal: Vector::from_column_slice(normal.as_slice()),
            }
        } else {
            let v = |i| {
                let q = self.vertex(cell, i);
                Vector3::new(q[0], q[1], q[2])
            };
            let (a, b, c) = (v(0), v(1), v(2));
            let p = Vector3::new(x[0], x[1], x[2]);
            let closest = closest_point_on_triangle(&p, &a, &b, &c);
            let normal = (b - a)
                .cross(&(c - a))
                .try_normalize(0.0)
                .unwrap_or_else(Vector3::zeros);
            Projection {
                distance: (p - closest).norm(),
                closest: Vector::from_column_slice(closest.as_slice()),
                normal: Vector::from_column_slice(normal.as_slice()),
            }
        }
    }

    fn nearest(&self, x: &Vector) -> Option<Projection> {
        (0..self.cells.len())
            .map(|c| self.project(c, x))
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    /// Winding number of the closed surface around `x`.
    fn winding_number(&self, x: &Vector) -> f64 {
        if self.dim == 2 {
            let mut winding = 0i32;
            for c in 0..self.cells.len() {
                let (x1, y1) = (self.vertex(c, 0)[0], self.vertex(c, 0)[1]);
                let (x2, y2) = (self.vertex(c, 1)[0], self.vertex(c, 1)[1]);
                let cross = (x2 - x1) * (x[1] - y1) - (x[0] - x1) * (y2 - y1);
                if y1 <= x[1] {
                    if y2 > x[1] && cross > 0.0 {
                        winding += 1;
                    }
                } else if y2 <= x[1] && cross < 0.0 {
                    winding -= 1;
                }
            }
            f64::from(winding)
        } else {
            let p = Vector3::new(x[0], x[1], x[2]);
            let mut solid_angle = 0.0;
            for c in 0..self.cells.len() {
                let v = |i| {
                    let q = self.vertex(c, i);
                    Vector3::new(q[0], q[1], q[2]) - p
                };
                let (a, b, cc) = (v(0), v(1), v(2));
                let (la, lb, lc) = (a.norm(), b.norm(), cc.norm());
                let numerator = a.dot(&b.cross(&cc));
                let denominator = la * lb * lc + a.dot(&b) * lc + b.dot(&cc) * la + cc.dot(&a) * lb;
                solid_angle += 2.0 * numerator.atan2(denominator);
            }
            solid_angle / (4.0 * std::f64::consts::PI)
        }
    }

    fn signed(&self, x: &Vector, projection: &Projection) -> (f64, Vector) {
        let offset = x - &projection.closest;
        match self.kind {
            DiscontinuityType::Crack => {
                let sign = if offset.dot(&projection.normal) < 0.0 { -1.0 } else { 1.0 };
                (sign * projection.distance, projection.normal.clone())
            }
            DiscontinuityType::Interface => {
                let inside = self.winding_number(x).abs() > 0.5;
                let sign = if inside { -1.0 } else { 1.0 };
                let normal = if projection.distance > f64::EPSILON {
                    offset * (sign / projection.distance)
                } else {
                    projection.normal.clone()
                };
                (sign * projection.distance, normal)
            }
        }
    }

    /// Signed distance at each point. Pure query.
    pub fn compute_levelset(&self, coordinates: &[Vector]) -> Vec<f64> {
        coordinates
            .iter()
            .map(|x| match self.nearest(x) {
                Some(projection) => self.signed(x, &projection).0,
                None => f64::INFINITY,
            })
            .collect()
    }

    /// Unit direction of increasing level set at each point.
    pub fn compute_normals(&self, coordinates: &[Vector]) -> Vec<Vector> {
        coordinates
            .iter()
            .map(|x| match self.nearest(x) {
                Some(projection) => self.signed(x, &projection).1,
                None => Vector::zeros(self.dim),
            })
            .collect()
    }
}

/// Every facet (vertex in 2D, edge in 3D) of a closed surface is shared by
/// exactly two cells.
fn is_closed(cells: &[Vec<usize>]) -> bool {
    let mut facets: HashMap<Vec<usize>, usize> = HashMap::new();
    for cell in cells {
        let n = cell.len();
        for i in 0..n {
            let facet = if n == 2 {
                vec![cell[i]]
            } else {
                let (a, b) = (cell[i], cell[(i + 1) % n]);
                vec![a.min(b), a.max(b)]
            };
            *facets.entry(facet).or_insert(0) += 1;
        }
    }
    facets.values().all(|count| *count == 2)
}

/// Closest point to `p` on triangle `abc` (Voronoi-region walk).
fn closest_point_on_triangle(
    p: &Vector3<f64>,
    a: &Vector3<f64>,
    b: &Vector3<f64>,
    c: &Vector3<f64>,
) -> Vector3<f64> {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return *a;
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return *b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        return a + ab * (d1 / (d1 - d3));
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return *c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        return a + ac * (d2 / (d2 - d6));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        return b + (c - b) * ((d4 - d3) / ((d4 - d3) + (d5 - d6)));
    }

    let denom = 1.0 / (va + vb + vc);
    a + ab * (vb * denom) + ac * (vc * denom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn v(values: &[f64]) -> Vector {
        Vector::from_column_slice(values)
    }

    fn horizontal_crack() -> DiscontinuitySurface {
        let mut crack = DiscontinuitySurface::new(0, DiscontinuityType::Crack, 2);
        crack
            .initialize(vec![v(&[1.0, 0.5]), v(&[0.0, 0.5])], vec![vec![0, 1]])
            .unwrap();
        crack
    }

    fn unit_square_interface() -> DiscontinuitySurface {
        let mut interface = DiscontinuitySurface::new(1, DiscontinuityType::Interface, 2);
        interface
            .initialize(
                vec![v(&[0.0, 0.0]), v(&[1.0, 0.0]), v(&[1.0, 1.0]), v(&[0.0, 1.0])],
                vec![vec![0, 1], vec![1, 2], vec![2, 3], vec![3, 0]],
            )
            .unwrap();
        interface
    }

    #[test]
    fn test_type_tags() {
        assert_eq!("Crack".parse::<DiscontinuityType>().unwrap(), DiscontinuityType::Crack);
        assert_eq!(
            "interface".parse::<DiscontinuityType>().unwrap(),
            DiscontinuityType::Interface
        );
        assert!("fault".parse::<DiscontinuityType>().is_err());
    }

    #[test]
    fn test_crack_levelset_sign_follows_normal() {
        // Segment from (1, 0.5) to (0, 0.5): left normal points to -y.
        let crack = horizontal_crack();
        let phi = crack.compute_levelset(&[v(&[0.5, 0.8]), v(&[0.5, 0.2]), v(&[0.5, 0.5])]);
        assert_relative_eq!(phi[0], -0.3, epsilon = 1e-12);
        assert_relative_eq!(phi[1], 0.3, epsilon = 1e-12);
        assert_relative_eq!(phi[2], 0.0);

        let normals = crack.compute_normals(&[v(&[0.5, 0.8])]);
        assert_relative_eq!(normals[0][1], -1.0);
    }

    #[test]
    fn test_crack_distance_beyond_tip() {
        let crack = horizontal_crack();
        let phi = crack.compute_levelset(&[v(&[2.0, 0.5])]);
        assert_relative_eq!(phi[0].abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_levelset_is_pure() {
        let crack = horizontal_crack();
        let points = [v(&[0.3, 0.9]), v(&[0.7, 0.1])];
        let before = crack.clone();
        let first = crack.compute_levelset(&points);
        let second = crack.compute_levelset(&points);
        assert_eq!(first, second);
        assert_eq!(crack, before);
    }

    #[test]
    fn test_interface_inside_is_negative() {
        let interface = unit_square_interface();
        let phi = interface.compute_levelset(&[v(&[0.5, 0.5]), v(&[1.5, 0.5]), v(&[0.9, 0.5])]);
        assert_relative_eq!(phi[0], -0.5, epsilon = 1e-12);
        assert_relative_eq!(phi[1], 0.5, epsilon = 1e-12);
        assert_relative_eq!(phi[2], -0.1, epsilon = 1e-12);

        // Gradient of the level set points outward.
        let normals = interface.compute_normals(&[v(&[0.9, 0.5]), v(&[1.5, 0.5])]);
        assert_relative_eq!(normals[0][0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(normals[1][0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_open_interface_rejected() {
        let mut interface = DiscontinuitySurface::new(1, DiscontinuityType::Interface, 2);
        let result = interface.initialize(
            vec![v(&[0.0, 0.0]), v(&[1.0, 0.0]), v(&[1.0, 1.0])],
            vec![vec![0, 1], vec![1, 2]],
        );
        assert!(matches!(result, Err(Error::Discontinuity(_))));
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        let mut crack = DiscontinuitySurface::new(0, DiscontinuityType::Crack, 2);
        assert!(crack.initialize(vec![v(&[0.0, 0.0])], vec![vec![0, 3]]).is_err());
        assert!(crack.initialize(vec![v(&[0.0, 0.0])], vec![]).is_err());
        assert!(crack
            .initialize(vec![v(&[0.0, 0.0]), v(&[1.0, 0.0])], vec![vec![0, 1, 1]])
            .is_err());
    }

    #[test]
    fn test_triangle_crack_3d() {
        let mut crack = DiscontinuitySurface::new(2, DiscontinuityType::Crack, 3);
        crack
            .initialize(
                vec![v(&[0.0, 0.0, 0.5]), v(&[2.0, 0.0, 0.5]), v(&[0.0, 2.0, 0.5])],
                vec![vec![0, 1, 2]],
            )
            .unwrap();
        let phi = crack.compute_levelset(&[v(&[0.2, 0.2, 0.9]), v(&[0.2, 0.2, 0.1])]);
        assert_relative_eq!(phi[0], 0.4, epsilon = 1e-12);
        assert_relative_eq!(phi[1], -0.4, epsilon = 1e-12);
        // Beyond the hypotenuse the closest point lies on the edge.
        let phi = crack.compute_levelset(&[v(&[2.0, 2.0, 0.5])]);
        assert_relative_eq!(phi[0].abs(), 2.0f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_closed_tetrahedron_interface_3d() {
        let mut interface = DiscontinuitySurface::new(3, DiscontinuityType::Interface, 3);
        interface
            .initialize(
                vec![
                    v(&[0.0, 0.0, 0.0]),
                    v(&[1.0, 0.0, 0.0]),
                    v(&[0.0, 1.0, 0.0]),
                    v(&[0.0, 0.0, 1.0]),
                ],
                vec![vec![0, 2, 1], vec![0, 1, 3], vec![0, 3, 2], vec![1, 2, 3]],
            )
            .unwrap();
        let phi = interface.compute_levelset(&[v(&[0.1, 0.1, 0.1]), v(&[1.0, 1.0, 1.0])]);
        assert!(phi[0] < 0.0);
        assert!(phi[1] > 0.0);
    }
}
