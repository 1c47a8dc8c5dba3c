//! Feature membership, world-frame caches, and correspondence search.
//!
//! The kd-tree indexes `current`-transformed feature positions. It is dropped
//! on every feature insert/remove and on every change of `current`, and
//! rebuilt on the next query, so bulk insertion costs one rebuild.
//!
//! Query results come back in increasing distance order (kd-tree order among
//! equal distances); the "closest" searches return the first candidate that
//! passes every filter. Searches without an upper bound widen a `nearest_n`
//! window instead of ranking every feature.

use std::collections::HashSet;

use kiddo::{ImmutableKdTree, SquaredEuclidean};
use nalgebra::{Point3, Vector3};

use super::{Shape, ShapeId};
use crate::error::ShapeError;
use crate::feature::{Feature, FeatureId};
use crate::geom::{Aabb3, Affine3};
use crate::matching::{Match, MatchId};

/// First `nearest_n` window for searches without an upper distance bound;
/// doubled until the visitor stops or every feature was seen.
const UNBOUNDED_WINDOW: usize = 8;

/// Kd-tree over world-frame positions; items are positions in `Shape::features`.
///
/// Built once per cache fill; `None` when the shape has no features.
pub(crate) struct FeatureTree {
    tree: Option<ImmutableKdTree<f64, 3>>,
    len: usize,
}

impl FeatureTree {
    fn build(positions: impl Iterator<Item = Point3<f64>>) -> Self {
        let points: Vec<[f64; 3]> = positions.map(|p| [p.x, p.y, p.z]).collect();
        let tree = (!points.is_empty()).then(|| ImmutableKdTree::new_from_slice(&points));
        Self {
            tree,
            len: points.len(),
        }
    }

    /// Slot of the nearest feature with distance in `[min, max]`.
    fn closest(&self, q: &Point3<f64>, min: Option<f64>, max: Option<f64>) -> Option<usize> {
        if min.map_or(true, |lo| lo <= 0.0) {
            let nn = self.tree.as_ref()?.nearest_one::<SquaredEuclidean>(&[q.x, q.y, q.z]);
            let d = nn.distance.sqrt();
            return max.map_or(true, |hi| d <= hi).then_some(nn.item as usize);
        }
        let mut found = None;
        self.visit(q, min, max, |slot, _| {
            found = Some(slot);
            true
        });
        found
    }

    /// Feed `(slot, distance)` pairs with `min <= distance <= max` to `f`,
    /// nearest first, until it returns `true`.
    fn visit<F>(&self, q: &Point3<f64>, min: Option<f64>, max: Option<f64>, mut f: F)
    where
        F: FnMut(usize, f64) -> bool,
    {
        let Some(tree) = &self.tree else {
            return;
        };
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return;
            }
        }
        let query = [q.x, q.y, q.z];
        let above_min = |d: f64| min.map_or(true, |lo| d >= lo);
        match max {
            Some(hi) if hi < 0.0 => {}
            Some(hi) => {
                for nn in tree.within::<SquaredEuclidean>(&query, hi * hi) {
                    let d = nn.distance.sqrt();
                    if above_min(d) && d <= hi && f(nn.item as usize, d) {
                        return;
                    }
                }
            }
            None => {
                let mut seen = HashSet::new();
                let mut k = UNBOUNDED_WINDOW.min(self.len);
                loop {
                    for nn in tree.nearest_n::<SquaredEuclidean>(&query, k) {
                        let slot = nn.item as usize;
                        if !seen.insert(slot) {
                            continue;
                        }
                        let d = nn.distance.sqrt();
                        if above_min(d) && f(slot, d) {
                            return;
                        }
                    }
                    if k >= self.len {
                        return;
                    }
                    k = (k * 2).min(self.len);
                }
            }
        }
    }
}

/// Filters for correspondence search against another shape's feature.
///
/// Every filter is off by default; `None` bounds are unbounded.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureQuery {
    pub min_distance: Option<f64>,
    pub max_distance: Option<f64>,
    /// Per-channel bound on |descriptor difference|.
    pub max_descriptor_distances: Option<Vec<f64>>,
    /// Radians between (transformed) normals.
    pub max_normal_angle: Option<f64>,
    pub min_distinction: Option<f64>,
    pub min_salience: Option<f64>,
    pub discard_boundaries: bool,
    /// Compare against the flipped query normal.
    pub opposite_facing_normals: bool,
}

impl FeatureQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_distance_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_distance = min;
        self.max_distance = max;
        self
    }

    pub fn with_max_distance(mut self, max: f64) -> Self {
        self.max_distance = Some(max);
        self
    }

    pub fn with_descriptor_bounds(mut self, bounds: Vec<f64>) -> Self {
        self.max_descriptor_distances = Some(bounds);
        self
    }

    pub fn with_max_normal_angle(mut self, radians: f64) -> Self {
        self.max_normal_angle = Some(radians);
        self
    }

    pub fn with_min_distinction(mut self, v: f64) -> Self {
        self.min_distinction = Some(v);
        self
    }

    pub fn with_min_salience(mut self, v: f64) -> Self {
        self.min_salience = Some(v);
        self
    }

    pub fn discarding_boundaries(mut self) -> Self {
        self.discard_boundaries = true;
        self
    }

    pub fn opposite_facing(mut self) -> Self {
        self.opposite_facing_normals = true;
        self
    }

    /// Filters other than distance, for one candidate.
    fn accepts(
        &self,
        query: &Feature,
        query_normal: Option<Vector3<f64>>,
        cand: &Feature,
        cand_t: &Affine3,
    ) -> bool {
        if self.discard_boundaries && cand.boundary {
            return false;
        }
        if self.min_distinction.is_some_and(|m| cand.distinction < m) {
            return false;
        }
        if self.min_salience.is_some_and(|m| cand.salience < m) {
            return false;
        }
        if let Some(bounds) = &self.max_descriptor_distances {
            if !query.descriptor_within(cand, bounds) {
                return false;
            }
        }
        if let Some(max_angle) = self.max_normal_angle {
            let (Some(qn), Some(cn)) = (query_normal, cand.transformed_normal(cand_t)) else {
                return false;
            };
            let qn = if self.opposite_facing_normals { -qn } else { qn };
            let angle = qn.dot(&cn).clamp(-1.0, 1.0).acos();
            if angle > max_angle {
                return false;
            }
        }
        true
    }
}

impl Shape {
    #[inline]
    pub fn n_features(&self) -> usize {
        self.features.len()
    }

    #[inline]
    pub fn feature(&self, k: usize) -> Option<FeatureId> {
        self.features.get(k).copied()
    }

    #[inline]
    pub fn features(&self) -> &[FeatureId] {
        &self.features
    }

    /// Take ownership of `feature` (stored at `id`) and drop caches.
    pub fn insert_feature(
        &mut self,
        id: FeatureId,
        feature: &mut Feature,
    ) -> Result<(), ShapeError> {
        let me = self.id().ok_or(ShapeError::Detached)?;
        if let Some(owner) = feature.shape {
            return Err(ShapeError::FeatureAlreadyOwned { feature: id, owner });
        }
        feature.shape = Some(me);
        self.features.push(id);
        self.update_feature_properties();
        Ok(())
    }

    /// Release `feature`; it must belong to this shape.
    pub fn remove_feature(
        &mut self,
        id: FeatureId,
        feature: &mut Feature,
    ) -> Result<(), ShapeError> {
        let me = self.id().ok_or(ShapeError::Detached)?;
        let pos = self
            .features
            .iter()
            .position(|f| *f == id)
            .filter(|_| feature.shape == Some(me))
            .ok_or(ShapeError::FeatureNotOwned { feature: id, shape: me })?;
        self.features.remove(pos);
        feature.shape = None;
        self.update_feature_properties();
        Ok(())
    }

    /// Release every feature; the records stay in the table, unowned.
    pub fn delete_features(&mut self, table: &mut [Feature]) {
        for id in self.features.drain(..) {
            if let Some(f) = table.get_mut(id.0) {
                f.shape = None;
            }
        }
        self.invalidate_bbox();
        self.invalidate_kdtree();
    }

    /// Drop derived caches after features were edited in place.
    pub fn update_feature_properties(&mut self) {
        self.invalidate_bbox();
        self.invalidate_kdtree();
    }

    // ---- matches ----

    /// Insert `id` at list position `k` (`k <= n_matches`).
    ///
    /// One endpoint of `m` must be a feature of this shape.
    pub fn insert_match(
        &mut self,
        id: MatchId,
        m: &Match,
        table: &[Feature],
        k: usize,
    ) -> Result<(), ShapeError> {
        let me = self.id().ok_or(ShapeError::Detached)?;
        if k > self.matches.len() {
            return Err(ShapeError::MatchPositionOutOfRange {
                position: k,
                len: self.matches.len(),
            });
        }
        if m.endpoints_on(me, table).is_empty() {
            return Err(ShapeError::MatchNotIncident(id));
        }
        self.matches.insert(k, id);
        Ok(())
    }

    /// Remove `id` from list position `k`; the slot must hold `id`.
    pub fn remove_match(&mut self, id: MatchId, k: usize) -> Result<(), ShapeError> {
        match self.matches.get(k) {
            None => Err(ShapeError::MatchPositionOutOfRange {
                position: k,
                len: self.matches.len(),
            }),
            Some(found) if *found != id => Err(ShapeError::MatchMismatch {
                expected: id,
                position: k,
            }),
            Some(_) => {
                self.matches.remove(k);
                Ok(())
            }
        }
    }

    // ---- caches ----

    #[inline]
    pub fn invalidate_bbox(&mut self) {
        self.bbox = None;
    }

    #[inline]
    pub fn invalidate_kdtree(&mut self) {
        self.kdtree = None;
    }

    /// Panics if a feature id of this shape is not in `table`.
    pub fn update_bbox(&mut self, table: &[Feature]) {
        let mut bbox = Aabb3::empty();
        for id in &self.features {
            bbox.union_point(&table[id.0].transformed_position(&self.current));
        }
        self.bbox = Some(bbox);
    }

    /// Panics if a feature id of this shape is not in `table`.
    pub fn update_kdtree(&mut self, table: &[Feature]) {
        let current = self.current;
        let tree = FeatureTree::build(
            self.features
                .iter()
                .map(|id| table[id.0].transformed_position(&current)),
        );
        tracing::debug!(
            shape = ?self.reconstruction_index,
            features = tree.len,
            "rebuilt feature kd-tree"
        );
        self.kdtree = Some(tree);
    }

    /// World-frame bounding box of the features.
    pub fn bbox(&mut self, table: &[Feature]) -> Aabb3 {
        if self.bbox.is_none() {
            self.update_bbox(table);
        }
        self.bbox.unwrap_or_default()
    }

    /// Box center; the zero point when there are no features.
    pub fn centroid(&mut self, table: &[Feature]) -> Point3<f64> {
        self.bbox(table).centroid().unwrap_or_else(Point3::origin)
    }

    /// Intrinsic origin; resolved from the centroid on first use and cached.
    pub fn origin(&mut self, table: &[Feature]) -> Point3<f64> {
        if let Some(o) = self.origin {
            return o;
        }
        let centroid = self.centroid(table);
        let o = self.inverse_transform_point(&centroid).unwrap_or(centroid);
        self.origin = Some(o);
        o
    }

    /// Mean feature radius (intrinsic units); 0 without features.
    pub fn average_feature_radius(&self, table: &[Feature]) -> f64 {
        if self.features.is_empty() {
            return 0.0;
        }
        let total: f64 = self.features.iter().map(|id| table[id.0].radius).sum();
        total / self.features.len() as f64
    }

    fn ensure_kdtree(&mut self, table: &[Feature]) {
        if self.kdtree.is_none() {
            self.update_kdtree(table);
        }
    }

    // ---- search ----

    /// Nearest feature to a world-frame point with distance in `[min, max]`.
    pub fn find_closest_feature(
        &mut self,
        table: &[Feature],
        position: &Point3<f64>,
        min_distance: Option<f64>,
        max_distance: Option<f64>,
    ) -> Option<FeatureId> {
        self.ensure_kdtree(table);
        let slot = self
            .kdtree
            .as_ref()?
            .closest(position, min_distance, max_distance)?;
        Some(self.features[slot])
    }

    /// Nearest feature passing every filter in `query` for `query_feature`
    /// mapped to the world frame by `query_transformation`.
    pub fn find_closest_feature_matching(
        &mut self,
        table: &[Feature],
        query_feature: &Feature,
        query_transformation: &Affine3,
        query: &FeatureQuery,
    ) -> Option<FeatureId> {
        self.search(table, query_feature, query_transformation, query, true)
            .into_iter()
            .next()
    }

    /// Every feature passing the filters, nearest first.
    pub fn find_all_features(
        &mut self,
        table: &[Feature],
        query_feature: &Feature,
        query_transformation: &Affine3,
        query: &FeatureQuery,
    ) -> Vec<FeatureId> {
        self.search(table, query_feature, query_transformation, query, false)
    }

    fn search(
        &mut self,
        table: &[Feature],
        query_feature: &Feature,
        query_transformation: &Affine3,
        query: &FeatureQuery,
        first_only: bool,
    ) -> Vec<FeatureId> {
        if query.discard_boundaries && query_feature.boundary {
            return Vec::new();
        }
        let center = query_feature.transformed_position(query_transformation);
        let query_normal = query_feature.transformed_normal(query_transformation);
        self.ensure_kdtree(table);
        let Some(tree) = self.kdtree.as_ref() else {
            return Vec::new();
        };
        let features = &self.features;
        let current = &self.current;
        let mut out = Vec::new();
        tree.visit(&center, query.min_distance, query.max_distance, |slot, _| {
            let id = features[slot];
            if query.accepts(query_feature, query_normal, &table[id.0], current) {
                out.push(id);
                return first_only;
            }
            false
        });
        out
    }

    /// Owner check used by the reconstruction when validating links.
    pub(crate) fn owns_feature(&self, me: ShapeId, id: FeatureId, table: &[Feature]) -> bool {
        self.features.contains(&id) && table.get(id.0).and_then(|f| f.shape) == Some(me)
    }
}
