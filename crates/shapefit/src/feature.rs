//! Feature records: localized geometric descriptors owned by one shape.
//!
//! Positions and normals are stored in the owning shape's intrinsic frame;
//! the shape's `current` transform maps them to the world frame.

use nalgebra::{Point3, Vector3};

use crate::cfg::NORMAL_EPS;
use crate::geom::Affine3;
use crate::shape::ShapeId;

/// Index of a feature in `Reconstruction::features`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureId(pub usize);

#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    pub position: Point3<f64>,
    /// Surface normal; zero when the feature has no orientation.
    pub normal: Vector3<f64>,
    pub radius: f64,
    /// Descriptor channels, compared channel by channel.
    pub descriptor: Vec<f64>,
    pub boundary: bool,
    pub distinction: f64,
    pub salience: f64,
    pub(crate) shape: Option<ShapeId>,
}

impl Feature {
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            normal: Vector3::zeros(),
            radius: 0.0,
            descriptor: Vec::new(),
            boundary: false,
            distinction: 0.0,
            salience: 0.0,
            shape: None,
        }
    }

    pub fn with_normal(mut self, normal: Vector3<f64>) -> Self {
        self.normal = normal;
        self
    }

    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_descriptor(mut self, descriptor: Vec<f64>) -> Self {
        self.descriptor = descriptor;
        self
    }

    pub fn with_boundary(mut self, boundary: bool) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn with_scores(mut self, distinction: f64, salience: f64) -> Self {
        self.distinction = distinction;
        self.salience = salience;
        self
    }

    /// Owning shape, if inserted into one.
    #[inline]
    pub fn shape(&self) -> Option<ShapeId> {
        self.shape
    }

    #[inline]
    pub fn transformed_position(&self, t: &Affine3) -> Point3<f64> {
        t.apply_point(&self.position)
    }

    /// Normal mapped by the linear part and renormalized; `None` if degenerate.
    pub fn transformed_normal(&self, t: &Affine3) -> Option<Vector3<f64>> {
        let n = t.apply_vector(&self.normal);
        let len = n.norm();
        if len > NORMAL_EPS && len.is_finite() {
            Some(n / len)
        } else {
            None
        }
    }

    /// True when every bounded channel differs by at most its bound.
    ///
    /// Channels past the end of `max_distances` are unconstrained. A bounded
    /// channel missing on either descriptor fails.
    pub fn descriptor_within(&self, other: &Feature, max_distances: &[f64]) -> bool {
        max_distances.iter().enumerate().all(|(i, bound)| {
            match (self.descriptor.get(i), other.descriptor.get(i)) {
                (Some(a), Some(b)) => (a - b).abs() <= *bound,
                _ => false,
            }
        })
    }
}
