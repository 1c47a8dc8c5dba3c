//! Error types.
//!
//! Three families:
//! - `ShapeError`: structural misuse of the graph (double insert, unknown id).
//! - `VariableError`: the solver parameterization cannot be built.
//! - `FormatError`: malformed or truncated input during a load.
//!
//! Searches that find nothing are not errors; they return `None` or an empty list.

use thiserror::Error;

use crate::feature::FeatureId;
use crate::matching::MatchId;
use crate::reconstruction::SequenceId;
use crate::shape::{Dof, ShapeId};

/// Structural misuse of shapes, features, matches, or sequences.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeError {
    #[error("unknown shape {0:?}")]
    UnknownShape(ShapeId),

    #[error("unknown feature {0:?}")]
    UnknownFeature(FeatureId),

    #[error("unknown match {0:?}")]
    UnknownMatch(MatchId),

    #[error("unknown sequence {0:?}")]
    UnknownSequence(SequenceId),

    /// The shape is not part of a reconstruction, so it has no id to link with.
    #[error("shape is detached from any reconstruction")]
    Detached,

    #[error("shape {child:?} is already a child of {parent:?}")]
    DuplicateChild { parent: ShapeId, child: ShapeId },

    #[error("shape {0:?} cannot be its own child")]
    SelfChild(ShapeId),

    #[error("feature {feature:?} already belongs to shape {owner:?}")]
    FeatureAlreadyOwned { feature: FeatureId, owner: ShapeId },

    #[error("feature {feature:?} does not belong to shape {shape:?}")]
    FeatureNotOwned { feature: FeatureId, shape: ShapeId },

    #[error("feature {0:?} has no owning shape")]
    UnownedFeature(FeatureId),

    #[error("match position {position} out of range (len {len})")]
    MatchPositionOutOfRange { position: usize, len: usize },

    #[error("match {expected:?} is not stored at position {position}")]
    MatchMismatch { expected: MatchId, position: usize },

    #[error("match {0:?} has no endpoint on this shape")]
    MatchNotIncident(MatchId),

    #[error("shape {0:?} already belongs to a sequence")]
    AlreadyInSequence(ShapeId),

    /// A link recorded on one side is missing on the other (found on load).
    #[error("asymmetric link: {0}")]
    AsymmetricLink(String),
}

/// Failures while binding DOFs to solver slots or building expressions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VariableError {
    /// A free DOF in the transform chain has no slot in the current solve.
    #[error("shape {shape:?} has free DOF {dof:?} without an assigned variable slot")]
    Unassigned { shape: Option<ShapeId>, dof: Dof },

    #[error("variable slot {slot} out of range for a vector of {len} values")]
    SlotOutOfRange { slot: usize, len: usize },

    /// Primary-parent chain loops back on itself.
    #[error("transform chain of shape {0:?} contains a cycle")]
    CyclicChain(ShapeId),

    #[error(transparent)]
    Shape(#[from] ShapeError),
}

/// Malformed input while reading ascii or binary records.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad magic: expected {expected:?}, found {found:?}")]
    BadMagic { expected: String, found: String },

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),

    /// Input ended in the middle of a record.
    #[error("truncated record: {0}")]
    Truncated(String),

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error(transparent)]
    Link(#[from] ShapeError),
}

impl FormatError {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        FormatError::Parse {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        FormatError::InvalidRecord(message.into())
    }
}
