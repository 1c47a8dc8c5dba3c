//! Shape: one posable unit of a reconstruction.
//!
//! Purpose
//! - Own the three transforms (`current`, `initial`, `ground_truth`) and the
//!   intrinsic-frame geometry (viewpoint, towards, up, origin).
//! - Hold non-owning links: parents/children in a DAG, features, matches.
//! - Keep lazily rebuilt caches (bounding box, kd-tree) over world-frame
//!   feature positions, invalidated by every mutation of features or `current`.
//!
//! Split
//! - `mod.rs`: state, accessors, transforms, hierarchy links.
//! - `features.rs`: feature membership, caches, and correspondence search.
//! - `variables.rs`: DOF binding to solver slots and symbolic coordinates.
//! - `io.rs`: ascii/binary records.
//!
//! Links are ids into the owning `Reconstruction`; the shape-level methods
//! that touch two records take the other record explicitly so callers can
//! split borrows. `Reconstruction` wraps them with id-based entry points.

mod features;
mod io;
mod variables;

pub use features::FeatureQuery;
pub use variables::{Dof, NUM_DOFS};

use nalgebra::{Point3, Vector3};
use rand::Rng;

use crate::error::ShapeError;
use crate::feature::FeatureId;
use crate::geom::{Aabb3, Affine3};
use crate::matching::MatchId;
use crate::reconstruction::SequenceId;

use features::FeatureTree;

/// Index of a shape in `Reconstruction::shapes`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeId(pub usize);

/// Which of the stored transforms to read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransformKind {
    Current,
    Initial,
    GroundTruth,
    /// Identity; "no transformation".
    None,
}

/// A scan or view and everything the aligner needs to pose it.
///
/// Invariants:
/// - `viewpoint`, `towards`, `up`, `origin` are stored untransformed; the
///   public getters map them through `current`.
/// - `bbox`/`kdtree` are `None` whenever they could be stale.
/// - `variable_index[i]` is `None` for locked DOFs.
pub struct Shape {
    pub(crate) reconstruction_index: Option<usize>,
    pub(crate) sequence: Option<SequenceId>,
    pub(crate) sequence_index: Option<usize>,

    pub(crate) parents: Vec<ShapeId>,
    pub(crate) children: Vec<ShapeId>,

    pub(crate) features: Vec<FeatureId>,
    pub(crate) matches: Vec<MatchId>,

    pub(crate) initial: Affine3,
    pub(crate) current: Affine3,
    pub(crate) ground_truth: Affine3,

    pub(crate) variable_inertias: [f64; NUM_DOFS],
    pub(crate) variable_index: [Option<usize>; NUM_DOFS],

    pub(crate) viewpoint: Point3<f64>,
    pub(crate) towards: Vector3<f64>,
    pub(crate) up: Vector3<f64>,
    pub(crate) origin: Option<Point3<f64>>,

    pub(crate) name: Option<String>,

    pub(crate) bbox: Option<Aabb3>,
    pub(crate) kdtree: Option<FeatureTree>,
}

impl Default for Shape {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shape")
            .field("reconstruction_index", &self.reconstruction_index)
            .field("name", &self.name)
            .field("parents", &self.parents)
            .field("children", &self.children)
            .field("features", &self.features.len())
            .field("matches", &self.matches.len())
            .field("current", &self.current)
            .field("variable_index", &self.variable_index)
            .finish()
    }
}

impl Shape {
    /// Detached shape with identity transforms, free DOFs, and no features.
    pub fn new() -> Self {
        Self {
            reconstruction_index: None,
            sequence: None,
            sequence_index: None,
            parents: Vec::new(),
            children: Vec::new(),
            features: Vec::new(),
            matches: Vec::new(),
            initial: Affine3::identity(),
            current: Affine3::identity(),
            ground_truth: Affine3::identity(),
            variable_inertias: [0.0; NUM_DOFS],
            variable_index: [None; NUM_DOFS],
            viewpoint: Point3::origin(),
            towards: Vector3::new(0.0, 0.0, -1.0),
            up: Vector3::new(0.0, 1.0, 0.0),
            origin: None,
            name: None,
            bbox: None,
            kdtree: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Copy transforms, inertias, geometry, and name; links are not copied.
    ///
    /// Features, matches, and hierarchy edges have a single owner, so the
    /// copy starts detached and empty.
    pub fn duplicate(&self) -> Self {
        Self {
            initial: self.initial,
            current: self.current,
            ground_truth: self.ground_truth,
            variable_inertias: self.variable_inertias,
            viewpoint: self.viewpoint,
            towards: self.towards,
            up: self.up,
            origin: self.origin,
            name: self.name.clone(),
            ..Self::new()
        }
    }

    // ---- identity ----

    /// Id in the owning reconstruction; `None` while detached.
    #[inline]
    pub fn id(&self) -> Option<ShapeId> {
        self.reconstruction_index.map(ShapeId)
    }

    #[inline]
    pub fn reconstruction_index(&self) -> Option<usize> {
        self.reconstruction_index
    }

    #[inline]
    pub fn sequence(&self) -> Option<SequenceId> {
        self.sequence
    }

    #[inline]
    pub fn sequence_index(&self) -> Option<usize> {
        self.sequence_index
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: Option<&str>) {
        self.name = name.map(str::to_owned);
    }

    // ---- hierarchy ----

    #[inline]
    pub fn n_parents(&self) -> usize {
        self.parents.len()
    }

    #[inline]
    pub fn parent(&self, k: usize) -> Option<ShapeId> {
        self.parents.get(k).copied()
    }

    #[inline]
    pub fn parents(&self) -> &[ShapeId] {
        &self.parents
    }

    #[inline]
    pub fn n_children(&self) -> usize {
        self.children.len()
    }

    #[inline]
    pub fn child(&self, k: usize) -> Option<ShapeId> {
        self.children.get(k).copied()
    }

    #[inline]
    pub fn children(&self) -> &[ShapeId] {
        &self.children
    }

    /// Link `child` under `self`, updating both sides.
    ///
    /// Both shapes must be attached. A repeated insert is rejected.
    pub fn insert_child(&mut self, child: &mut Shape) -> Result<(), ShapeError> {
        let parent_id = self.id().ok_or(ShapeError::Detached)?;
        let child_id = child.id().ok_or(ShapeError::Detached)?;
        if parent_id == child_id {
            return Err(ShapeError::SelfChild(parent_id));
        }
        if self.children.contains(&child_id) {
            return Err(ShapeError::DuplicateChild {
                parent: parent_id,
                child: child_id,
            });
        }
        self.children.push(child_id);
        child.parents.push(parent_id);
        tracing::debug!(parent = parent_id.0, child = child_id.0, "insert_child");
        Ok(())
    }

    /// Unlink `child` from `self`; a no-op if it is not a child.
    pub fn remove_child(&mut self, child: &mut Shape) -> Result<(), ShapeError> {
        let parent_id = self.id().ok_or(ShapeError::Detached)?;
        let child_id = child.id().ok_or(ShapeError::Detached)?;
        self.children.retain(|c| *c != child_id);
        child.parents.retain(|p| *p != parent_id);
        Ok(())
    }

    // ---- matches ----

    #[inline]
    pub fn n_matches(&self) -> usize {
        self.matches.len()
    }

    #[inline]
    pub fn match_at(&self, k: usize) -> Option<MatchId> {
        self.matches.get(k).copied()
    }

    #[inline]
    pub fn matches(&self) -> &[MatchId] {
        &self.matches
    }

    // ---- transforms ----

    /// The requested transform; `TransformKind::None` is the identity.
    pub fn transformation(&self, kind: TransformKind) -> Affine3 {
        match kind {
            TransformKind::Current => self.current,
            TransformKind::Initial => self.initial,
            TransformKind::GroundTruth => self.ground_truth,
            TransformKind::None => Affine3::identity(),
        }
    }

    /// Replace `current` outright and drop caches built from it.
    pub fn set_transformation(&mut self, transformation: Affine3) {
        self.current = transformation;
        self.invalidate_bbox();
        self.invalidate_kdtree();
    }

    pub fn set_initial_transformation(&mut self, transformation: Affine3) {
        self.initial = transformation;
    }

    pub fn set_ground_truth_transformation(&mut self, transformation: Affine3) {
        self.ground_truth = transformation;
    }

    pub fn reset_transformation(&mut self) {
        self.set_transformation(Affine3::identity());
    }

    /// Compose a random rigid motion onto `current`.
    ///
    /// The translation has length at most `translation_magnitude` in a uniform
    /// direction; the rotation turns by at most `rotation_magnitude` radians
    /// about a uniform axis through the pivot. Deterministic for a seeded `rng`.
    pub fn perturb_transformation<R: Rng + ?Sized>(
        &mut self,
        translation_magnitude: f64,
        rotation_magnitude: f64,
        rng: &mut R,
    ) {
        let dir = random_unit_vector(rng);
        let axis = random_unit_vector(rng);
        let dist = translation_magnitude.abs() * rng.gen::<f64>();
        let angle = rotation_magnitude.abs() * rng.gen::<f64>();
        let rot = nalgebra::Rotation3::from_axis_angle(&nalgebra::Unit::new_normalize(axis), angle);
        let delta = Affine3::about(&self.pivot(), rot.into_inner(), dir * dist);
        tracing::trace!(dist, angle, "perturb_transformation");
        self.set_transformation(delta.compose(&self.current));
    }

    /// Map an intrinsic point to the world frame through `current`.
    #[inline]
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        self.current.apply_point(p)
    }

    #[inline]
    pub fn transform_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.current.apply_vector(v)
    }

    /// Inverse of `transform_point`; `None` if `current` is singular.
    pub fn inverse_transform_point(&self, p: &Point3<f64>) -> Option<Point3<f64>> {
        self.current.inverse().map(|inv| inv.apply_point(p))
    }

    pub fn inverse_transform_vector(&self, v: &Vector3<f64>) -> Option<Vector3<f64>> {
        self.current.inverse().map(|inv| inv.apply_vector(v))
    }

    // ---- intrinsic geometry (exposed in the world frame) ----

    pub fn viewpoint(&self) -> Point3<f64> {
        self.transform_point(&self.viewpoint)
    }

    pub fn towards(&self) -> Vector3<f64> {
        self.transform_vector(&self.towards)
    }

    pub fn up(&self) -> Vector3<f64> {
        self.transform_vector(&self.up)
    }

    /// Store a world-frame viewpoint in the intrinsic frame.
    ///
    /// With a singular `current` the value is stored as given.
    pub fn set_viewpoint(&mut self, viewpoint: Point3<f64>) {
        self.viewpoint = self.inverse_transform_point(&viewpoint).unwrap_or_else(|| {
            tracing::warn!("set_viewpoint: current transformation is singular");
            viewpoint
        });
    }

    pub fn set_towards(&mut self, towards: Vector3<f64>) {
        self.towards = self.inverse_transform_vector(&towards).unwrap_or_else(|| {
            tracing::warn!("set_towards: current transformation is singular");
            towards
        });
    }

    pub fn set_up(&mut self, up: Vector3<f64>) {
        self.up = self.inverse_transform_vector(&up).unwrap_or_else(|| {
            tracing::warn!("set_up: current transformation is singular");
            up
        });
    }

    /// Stored (intrinsic) origin, if set or already resolved.
    #[inline]
    pub fn stored_origin(&self) -> Option<Point3<f64>> {
        self.origin
    }

    /// Set the intrinsic-frame origin.
    pub fn set_origin(&mut self, origin: Point3<f64>) {
        self.origin = Some(origin);
    }

    /// Forget the origin so the next `origin` query recomputes it.
    pub fn reset_origin(&mut self) {
        self.origin = None;
    }

    /// World-frame point that rotation and scale DOFs act about.
    ///
    /// An unresolved origin counts as the intrinsic zero point; call
    /// `Shape::origin` first to pin it to the centroid.
    pub fn pivot(&self) -> Point3<f64> {
        self.transform_point(&self.origin.unwrap_or_else(Point3::origin))
    }
}

fn random_unit_vector<R: Rng + ?Sized>(rng: &mut R) -> Vector3<f64> {
    loop {
        let v = Vector3::new(
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
        );
        let n: f64 = v.norm();
        if n > 1e-6 && n <= 1.0 {
            return v / n;
        }
    }
}
