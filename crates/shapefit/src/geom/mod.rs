//! Geometry vocabulary: affine maps and bounding boxes in R^3.
//!
//! Points are `nalgebra::Point3<f64>`, directions `nalgebra::Vector3<f64>`.

mod affine;
mod bbox;

pub use affine::Affine3;
pub use bbox::Aabb3;

#[cfg(test)]
mod tests;
