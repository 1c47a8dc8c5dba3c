//! Axis-aligned bounding box with an explicit empty state.

use nalgebra::{Point3, Vector3};

/// Axis-aligned box in R^3.
///
/// Invariants:
/// - Empty iff `min.x > max.x` (the state produced by `Aabb3::empty`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb3 {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Default for Aabb3 {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb3 {
    #[inline]
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    pub fn from_points<'a, I>(points: I) -> Self
    where
        I: IntoIterator<Item = &'a Point3<f64>>,
    {
        let mut b = Self::empty();
        for p in points {
            b.union_point(p);
        }
        b
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    #[inline]
    pub fn union_point(&mut self, p: &Point3<f64>) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    /// Center of the box; `None` if empty.
    pub fn centroid(&self) -> Option<Point3<f64>> {
        if self.is_empty() {
            None
        } else {
            Some(nalgebra::center(&self.min, &self.max))
        }
    }

    /// Extent along each axis (zero vector for an empty box).
    pub fn extent(&self) -> Vector3<f64> {
        if self.is_empty() {
            Vector3::zeros()
        } else {
            self.max - self.min
        }
    }

    #[inline]
    pub fn contains(&self, p: &Point3<f64>) -> bool {
        !self.is_empty()
            && (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }
}
