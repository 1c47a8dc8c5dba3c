//! Per-shape data and geometry model for multi-view alignment.
//!
//! A `Shape` is one posable unit (a scan or view). It owns three affine
//! transforms, a position in a parent/child DAG, a set of features indexed by
//! a kd-tree over their world-frame positions, and a binding of its nine
//! transform DOFs to slots of a global solver vector.
//!
//! Layout
//! - `geom`: `Affine3` and `Aabb3`, the small geometry vocabulary.
//! - `expr`: symbolic expressions handed to an external least-squares solver.
//! - `feature`, `matching`: the collaborator records a shape references.
//! - `shape`: the core entity (transforms, feature search, variables, I/O).
//! - `reconstruction`: the arena that owns every table and keeps links symmetric.
//!
//! Links between records are typed indices (`ShapeId`, `FeatureId`, `MatchId`,
//! `SequenceId`) into the owning `Reconstruction`, never aliasing references.

pub mod cfg;
mod codec;
pub mod error;
pub mod expr;
pub mod feature;
pub mod geom;
pub mod matching;
pub mod reconstruction;
pub mod shape;

/// Library version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use error::{FormatError, ShapeError, VariableError};
pub use expr::Expr;
pub use feature::{Feature, FeatureId};
pub use geom::{Aabb3, Affine3};
pub use matching::{Match, MatchId};
pub use reconstruction::{Reconstruction, Sequence, SequenceId};
pub use shape::{Dof, FeatureQuery, Shape, ShapeId, TransformKind};

/// Common exports for quick imports in callers.
pub mod prelude {
    pub use crate::expr::Expr;
    pub use crate::feature::{Feature, FeatureId};
    pub use crate::geom::{Aabb3, Affine3};
    pub use crate::matching::{Match, MatchId};
    pub use crate::reconstruction::{Reconstruction, SequenceId};
    pub use crate::shape::{Dof, FeatureQuery, Shape, ShapeId, TransformKind};
    pub use nalgebra::{Point3, Vector3};
}
