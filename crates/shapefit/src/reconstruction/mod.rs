//! Reconstruction: the arena that owns shapes, features, matches, sequences.
//!
//! Purpose
//! - Hand out typed ids and keep both sides of every link in sync.
//! - Split borrows so shape methods can see the feature table (or a second
//!   shape) while mutating one shape.
//! - Drive the per-pass solver protocol across all shapes: assign slots,
//!   seed the solver vector, fold solved values back along the hierarchy.
//!
//! Hierarchy
//! - A shape's transform chain follows primary parents (`parents[0]`) up to
//!   a root. `update_variable_values` applies
//!   `D_root ∘ … ∘ D_parent ∘ D_self` to each shape's `current`, the same
//!   composition `compute_transformed_point_coordinates` expresses.
//!
//! Records are never removed from the tables, so ids stay stable.

mod io;

pub use io::Encoding;

use nalgebra::{Point3, Vector3};

use crate::error::{ShapeError, VariableError};
use crate::expr::Expr;
use crate::feature::{Feature, FeatureId};
use crate::geom::{Aabb3, Affine3};
use crate::matching::{Match, MatchId};
use crate::shape::{FeatureQuery, Shape, ShapeId};

/// Index of a sequence in `Reconstruction::sequences`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceId(pub usize);

/// Ordered group of shapes (e.g. frames of one capture).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sequence {
    pub name: Option<String>,
    pub(crate) shapes: Vec<ShapeId>,
}

impl Sequence {
    #[inline]
    pub fn shapes(&self) -> &[ShapeId] {
        &self.shapes
    }
}

#[derive(Debug, Default)]
pub struct Reconstruction {
    pub(crate) shapes: Vec<Shape>,
    pub(crate) features: Vec<Feature>,
    pub(crate) matches: Vec<Match>,
    pub(crate) sequences: Vec<Sequence>,
}

impl Reconstruction {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- tables ----

    #[inline]
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    #[inline]
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    #[inline]
    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    #[inline]
    pub fn sequences(&self) -> &[Sequence] {
        &self.sequences
    }

    pub fn shape(&self, id: ShapeId) -> Result<&Shape, ShapeError> {
        self.shapes.get(id.0).ok_or(ShapeError::UnknownShape(id))
    }

    /// Mutable shape access for edits that do not touch links.
    pub fn shape_mut(&mut self, id: ShapeId) -> Result<&mut Shape, ShapeError> {
        self.shapes.get_mut(id.0).ok_or(ShapeError::UnknownShape(id))
    }

    pub fn feature(&self, id: FeatureId) -> Result<&Feature, ShapeError> {
        self.features.get(id.0).ok_or(ShapeError::UnknownFeature(id))
    }

    /// Mutable feature access; call `Shape::update_feature_properties` on
    /// the owner after moving it.
    pub fn feature_mut(&mut self, id: FeatureId) -> Result<&mut Feature, ShapeError> {
        self.features.get_mut(id.0).ok_or(ShapeError::UnknownFeature(id))
    }

    pub fn match_record(&self, id: MatchId) -> Result<&Match, ShapeError> {
        self.matches.get(id.0).ok_or(ShapeError::UnknownMatch(id))
    }

    pub fn sequence(&self, id: SequenceId) -> Result<&Sequence, ShapeError> {
        self.sequences.get(id.0).ok_or(ShapeError::UnknownSequence(id))
    }

    // ---- insertion ----

    /// Attach `shape` and return its id.
    ///
    /// Link lists and sequence membership of the incoming shape are dropped;
    /// they are rebuilt through the id-based methods.
    pub fn add_shape(&mut self, mut shape: Shape) -> ShapeId {
        let id = ShapeId(self.shapes.len());
        shape.reconstruction_index = Some(id.0);
        shape.sequence = None;
        shape.sequence_index = None;
        shape.parents.clear();
        shape.children.clear();
        shape.features.clear();
        shape.matches.clear();
        shape.clear_variable_index();
        shape.update_feature_properties();
        self.shapes.push(shape);
        id
    }

    /// Store an unowned feature.
    pub fn add_feature(&mut self, mut feature: Feature) -> FeatureId {
        feature.shape = None;
        self.features.push(feature);
        FeatureId(self.features.len() - 1)
    }

    /// Store a match; both endpoints must exist.
    pub fn add_match(&mut self, m: Match) -> Result<MatchId, ShapeError> {
        for f in m.features {
            self.feature(f)?;
        }
        self.matches.push(m);
        Ok(MatchId(self.matches.len() - 1))
    }

    pub fn add_sequence(&mut self, name: Option<&str>) -> SequenceId {
        self.sequences.push(Sequence {
            name: name.map(str::to_owned),
            shapes: Vec::new(),
        });
        SequenceId(self.sequences.len() - 1)
    }

    /// Append `shape` to `sequence`; a shape belongs to at most one sequence.
    pub fn add_shape_to_sequence(
        &mut self,
        sequence: SequenceId,
        shape: ShapeId,
    ) -> Result<(), ShapeError> {
        let seq = self
            .sequences
            .get_mut(sequence.0)
            .ok_or(ShapeError::UnknownSequence(sequence))?;
        let s = self
            .shapes
            .get_mut(shape.0)
            .ok_or(ShapeError::UnknownShape(shape))?;
        if s.sequence.is_some() {
            return Err(ShapeError::AlreadyInSequence(shape));
        }
        s.sequence = Some(sequence);
        s.sequence_index = Some(seq.shapes.len());
        seq.shapes.push(shape);
        Ok(())
    }

    /// Add a new shape holding `features`; convenience for tests and loaders.
    pub fn add_shape_with_features(
        &mut self,
        shape: Shape,
        features: impl IntoIterator<Item = Feature>,
    ) -> Result<(ShapeId, Vec<FeatureId>), ShapeError> {
        let sid = self.add_shape(shape);
        let mut ids = Vec::new();
        for f in features {
            let fid = self.add_feature(f);
            self.insert_feature(sid, fid)?;
            ids.push(fid);
        }
        Ok((sid, ids))
    }

    // ---- links ----

    fn two_shapes_mut(
        &mut self,
        a: ShapeId,
        b: ShapeId,
    ) -> Result<(&mut Shape, &mut Shape), ShapeError> {
        let n = self.shapes.len();
        if a.0 >= n {
            return Err(ShapeError::UnknownShape(a));
        }
        if b.0 >= n {
            return Err(ShapeError::UnknownShape(b));
        }
        if a == b {
            return Err(ShapeError::SelfChild(a));
        }
        if a.0 < b.0 {
            let (lo, hi) = self.shapes.split_at_mut(b.0);
            Ok((&mut lo[a.0], &mut hi[0]))
        } else {
            let (lo, hi) = self.shapes.split_at_mut(a.0);
            Ok((&mut hi[0], &mut lo[b.0]))
        }
    }

    pub fn insert_child(&mut self, parent: ShapeId, child: ShapeId) -> Result<(), ShapeError> {
        let (p, c) = self.two_shapes_mut(parent, child)?;
        p.insert_child(c)
    }

    pub fn remove_child(&mut self, parent: ShapeId, child: ShapeId) -> Result<(), ShapeError> {
        let (p, c) = self.two_shapes_mut(parent, child)?;
        p.remove_child(c)
    }

    pub fn insert_feature(&mut self, shape: ShapeId, feature: FeatureId) -> Result<(), ShapeError> {
        let f = self
            .features
            .get_mut(feature.0)
            .ok_or(ShapeError::UnknownFeature(feature))?;
        let s = self
            .shapes
            .get_mut(shape.0)
            .ok_or(ShapeError::UnknownShape(shape))?;
        s.insert_feature(feature, f)
    }

    pub fn remove_feature(&mut self, shape: ShapeId, feature: FeatureId) -> Result<(), ShapeError> {
        let f = self
            .features
            .get_mut(feature.0)
            .ok_or(ShapeError::UnknownFeature(feature))?;
        let s = self
            .shapes
            .get_mut(shape.0)
            .ok_or(ShapeError::UnknownShape(shape))?;
        s.remove_feature(feature, f)
    }

    /// Release every feature of `shape`.
    pub fn delete_features(&mut self, shape: ShapeId) -> Result<(), ShapeError> {
        let s = self
            .shapes
            .get_mut(shape.0)
            .ok_or(ShapeError::UnknownShape(shape))?;
        s.delete_features(&mut self.features);
        Ok(())
    }

    pub fn insert_match(&mut self, shape: ShapeId, m: MatchId, k: usize) -> Result<(), ShapeError> {
        let record = self.matches.get(m.0).ok_or(ShapeError::UnknownMatch(m))?;
        let s = self
            .shapes
            .get_mut(shape.0)
            .ok_or(ShapeError::UnknownShape(shape))?;
        s.insert_match(m, record, &self.features, k)
    }

    pub fn remove_match(&mut self, shape: ShapeId, m: MatchId, k: usize) -> Result<(), ShapeError> {
        self.match_record(m)?;
        self.shape_mut(shape)?.remove_match(m, k)
    }

    /// Unlink `shape` from the graph ahead of removal.
    ///
    /// Parents and children drop it from their lists, its features are
    /// released, its match list is emptied, and it leaves its sequence (later
    /// members move up one slot). The record stays in the table, so other ids
    /// remain valid.
    pub fn detach_shape(&mut self, shape: ShapeId) -> Result<(), ShapeError> {
        let (parents, children) = {
            let s = self.shape(shape)?;
            (s.parents.clone(), s.children.clone())
        };
        for c in children {
            self.remove_child(shape, c)?;
        }
        for p in parents {
            self.remove_child(p, shape)?;
        }
        self.delete_features(shape)?;

        let s = self.shape_mut(shape)?;
        s.matches.clear();
        s.clear_variable_index();
        let seq = s.sequence.take();
        s.sequence_index = None;
        if let Some(seq) = seq {
            let members = &mut self
                .sequences
                .get_mut(seq.0)
                .ok_or(ShapeError::UnknownSequence(seq))?
                .shapes;
            members.retain(|&m| m != shape);
            for (k, m) in members.iter().enumerate() {
                if let Some(s) = self.shapes.get_mut(m.0) {
                    s.sequence_index = Some(k);
                }
            }
        }
        tracing::debug!(shape = shape.0, "detached shape");
        Ok(())
    }

    // ---- hierarchy ----

    /// Primary-parent chain of `id`, nearest ancestor first, excluding `id`.
    pub fn transform_chain(&self, id: ShapeId) -> Result<Vec<ShapeId>, VariableError> {
        let mut chain = Vec::new();
        let mut cur = self.shape(id)?;
        while let Some(parent) = cur.parent(0) {
            if parent == id || chain.contains(&parent) {
                return Err(VariableError::CyclicChain(id));
            }
            chain.push(parent);
            cur = self.shape(parent)?;
        }
        Ok(chain)
    }

    fn ancestors(&self, id: ShapeId) -> Result<Vec<&Shape>, VariableError> {
        self.transform_chain(id)?
            .into_iter()
            .map(|a| self.shape(a).map_err(VariableError::from))
            .collect()
    }

    // ---- variables ----

    /// Assign solver slots across all shapes in id order; returns the count.
    ///
    /// Origins are resolved first so pivots stay fixed during the pass.
    pub fn update_variable_index(&mut self) -> usize {
        let mut n = 0;
        for shape in &mut self.shapes {
            shape.origin(&self.features);
            shape.update_variable_index(&mut n);
        }
        tracing::debug!(shapes = self.shapes.len(), variables = n, "update_variable_index");
        n
    }

    /// Neutral starting vector for the slots assigned by `update_variable_index`.
    pub fn initial_variable_values(&self, nvariables: usize) -> Result<Vec<f64>, VariableError> {
        let mut x = vec![0.0; nvariables];
        for shape in &self.shapes {
            shape.initial_variable_values(&mut x)?;
        }
        Ok(x)
    }

    /// Fold solved values into every shape's `current` along its chain.
    ///
    /// All deltas are computed from the pre-update state before any shape
    /// changes, so the result does not depend on shape order.
    pub fn update_variable_values(&mut self, x: &[f64]) -> Result<(), VariableError> {
        let mut updated = Vec::with_capacity(self.shapes.len());
        for (i, shape) in self.shapes.iter().enumerate() {
            let ancestors = self.ancestors(ShapeId(i))?;
            let delta = shape.chain_delta(&ancestors, x)?;
            updated.push(delta.compose(&shape.current));
        }
        for (shape, t) in self.shapes.iter_mut().zip(updated) {
            shape.set_transformation(t);
        }
        Ok(())
    }

    /// World delta of `id` and its ancestors for the solver vector `x`.
    pub fn chain_delta(&self, id: ShapeId, x: &[f64]) -> Result<Affine3, VariableError> {
        let ancestors = self.ancestors(id)?;
        self.shape(id)?.chain_delta(&ancestors, x)
    }

    /// Symbolic world coordinates of an intrinsic point of `id`.
    pub fn compute_transformed_point_coordinates(
        &self,
        id: ShapeId,
        position: &Point3<f64>,
    ) -> Result<[Expr; 3], VariableError> {
        let ancestors = self.ancestors(id)?;
        self.shape(id)?
            .compute_transformed_point_coordinates(&ancestors, position)
    }

    pub fn compute_transformed_vector_coordinates(
        &self,
        id: ShapeId,
        vector: &Vector3<f64>,
    ) -> Result<[Expr; 3], VariableError> {
        let ancestors = self.ancestors(id)?;
        self.shape(id)?
            .compute_transformed_vector_coordinates(&ancestors, vector)
    }

    /// Symbolic world position of a feature through its owner.
    pub fn compute_feature_coordinates(&self, feature: FeatureId) -> Result<[Expr; 3], VariableError> {
        let f = self.feature(feature)?;
        let owner = f.shape.ok_or(ShapeError::UnownedFeature(feature))?;
        self.compute_transformed_point_coordinates(owner, &f.position)
    }

    // ---- geometry and search ----

    pub fn bbox(&mut self, shape: ShapeId) -> Result<Aabb3, ShapeError> {
        let s = self.shapes.get_mut(shape.0).ok_or(ShapeError::UnknownShape(shape))?;
        Ok(s.bbox(&self.features))
    }

    pub fn centroid(&mut self, shape: ShapeId) -> Result<Point3<f64>, ShapeError> {
        let s = self.shapes.get_mut(shape.0).ok_or(ShapeError::UnknownShape(shape))?;
        Ok(s.centroid(&self.features))
    }

    pub fn origin(&mut self, shape: ShapeId) -> Result<Point3<f64>, ShapeError> {
        let s = self.shapes.get_mut(shape.0).ok_or(ShapeError::UnknownShape(shape))?;
        Ok(s.origin(&self.features))
    }

    pub fn average_feature_radius(&self, shape: ShapeId) -> Result<f64, ShapeError> {
        Ok(self.shape(shape)?.average_feature_radius(&self.features))
    }

    /// Nearest feature of `shape` to a world-frame point.
    pub fn find_closest_feature(
        &mut self,
        shape: ShapeId,
        position: &Point3<f64>,
        min_distance: Option<f64>,
        max_distance: Option<f64>,
    ) -> Result<Option<FeatureId>, ShapeError> {
        let s = self.shapes.get_mut(shape.0).ok_or(ShapeError::UnknownShape(shape))?;
        Ok(s.find_closest_feature(&self.features, position, min_distance, max_distance))
    }

    /// World transform of a feature's owner; identity when unowned.
    fn owner_transformation(&self, f: &Feature) -> Affine3 {
        f.shape
            .and_then(|s| self.shapes.get(s.0))
            .map_or_else(Affine3::identity, |s| s.current)
    }

    /// Best feature of `target` for `query_feature` under `query`.
    pub fn find_closest_feature_matching(
        &mut self,
        target: ShapeId,
        query_feature: FeatureId,
        query: &FeatureQuery,
    ) -> Result<Option<FeatureId>, ShapeError> {
        let qf = self.feature(query_feature)?.clone();
        let qt = self.owner_transformation(&qf);
        let s = self.shapes.get_mut(target.0).ok_or(ShapeError::UnknownShape(target))?;
        Ok(s.find_closest_feature_matching(&self.features, &qf, &qt, query))
    }

    /// Every feature of `target` accepted by `query`, nearest first.
    pub fn find_all_features(
        &mut self,
        target: ShapeId,
        query_feature: FeatureId,
        query: &FeatureQuery,
    ) -> Result<Vec<FeatureId>, ShapeError> {
        let qf = self.feature(query_feature)?.clone();
        let qt = self.owner_transformation(&qf);
        let s = self.shapes.get_mut(target.0).ok_or(ShapeError::UnknownShape(target))?;
        Ok(s.find_all_features(&self.features, &qf, &qt, query))
    }

    // ---- validation ----

    /// Check every stored index and the symmetry of every link.
    pub fn validate(&self) -> Result<(), ShapeError> {
        for (i, s) in self.shapes.iter().enumerate() {
            let me = ShapeId(i);
            if s.reconstruction_index != Some(i) {
                return Err(ShapeError::AsymmetricLink(format!(
                    "shape {i} records index {:?}",
                    s.reconstruction_index
                )));
            }
            for &p in &s.parents {
                if !self.shape(p)?.children.contains(&me) {
                    return Err(ShapeError::AsymmetricLink(format!(
                        "shape {i} lists parent {} which does not list it as a child",
                        p.0
                    )));
                }
            }
            for &c in &s.children {
                if !self.shape(c)?.parents.contains(&me) {
                    return Err(ShapeError::AsymmetricLink(format!(
                        "shape {i} lists child {} which does not list it as a parent",
                        c.0
                    )));
                }
            }
            for &f in &s.features {
                self.feature(f)?;
                if !s.owns_feature(me, f, &self.features) {
                    return Err(ShapeError::FeatureNotOwned { feature: f, shape: me });
                }
            }
            for &m in &s.matches {
                if self.match_record(m)?.endpoints_on(me, &self.features).is_empty() {
                    return Err(ShapeError::MatchNotIncident(m));
                }
            }
            match (s.sequence, s.sequence_index) {
                (None, None) => {}
                (Some(seq), Some(k)) => {
                    if self.sequence(seq)?.shapes.get(k) != Some(&me) {
                        return Err(ShapeError::AsymmetricLink(format!(
                            "shape {i} claims slot {k} of sequence {}",
                            seq.0
                        )));
                    }
                }
                _ => {
                    return Err(ShapeError::AsymmetricLink(format!(
                        "shape {i} has a partial sequence link"
                    )))
                }
            }
        }
        for (j, f) in self.features.iter().enumerate() {
            if let Some(owner) = f.shape {
                if !self.shape(owner)?.features.contains(&FeatureId(j)) {
                    return Err(ShapeError::AsymmetricLink(format!(
                        "feature {j} claims owner {} which does not list it",
                        owner.0
                    )));
                }
            }
        }
        for m in &self.matches {
            for f in m.features {
                self.feature(f)?;
            }
        }
        for (q, seq) in self.sequences.iter().enumerate() {
            for (k, &sid) in seq.shapes.iter().enumerate() {
                let s = self.shape(sid)?;
                if s.sequence != Some(SequenceId(q)) || s.sequence_index != Some(k) {
                    return Err(ShapeError::AsymmetricLink(format!(
                        "sequence {q} slot {k} holds shape {} which does not point back",
                        sid.0
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
