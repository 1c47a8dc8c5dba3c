//! Match records: a putative correspondence between two features.

use crate::feature::{Feature, FeatureId};
use crate::shape::ShapeId;

/// Index of a match in `Reconstruction::matches`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatchId(pub usize);

#[derive(Clone, Debug, PartialEq)]
pub struct Match {
    pub features: [FeatureId; 2],
    /// Confidence weight used by the objective; 1 by default.
    pub affinity: f64,
}

impl Match {
    pub fn new(a: FeatureId, b: FeatureId) -> Self {
        Self {
            features: [a, b],
            affinity: 1.0,
        }
    }

    pub fn with_affinity(mut self, affinity: f64) -> Self {
        self.affinity = affinity;
        self
    }

    #[inline]
    pub fn feature(&self, k: usize) -> FeatureId {
        self.features[k]
    }

    /// Endpoint slots (0 and/or 1) whose feature is owned by `shape`.
    pub fn endpoints_on(&self, shape: ShapeId, features: &[Feature]) -> Vec<usize> {
        (0..2)
            .filter(|&k| {
                features
                    .get(self.features[k].0)
                    .and_then(|f| f.shape)
                    == Some(shape)
            })
            .collect()
    }
}
