//! Tolerance and format constants (internal).
//!
//! Policy
//! - Defaults are fixed constants; search thresholds that callers tune per
//!   pass live in `shape::FeatureQuery` instead.

/// Smallest |det| for which a linear part is treated as invertible.
pub(crate) const DET_EPS: f64 = 1e-12;
/// Normals shorter than this are treated as "no orientation".
pub(crate) const NORMAL_EPS: f64 = 1e-12;
/// Magic bytes opening a binary shape record.
pub(crate) const SHAPE_MAGIC: &[u8; 4] = b"SHFT";
/// Magic bytes opening a binary reconstruction file.
pub(crate) const GRAPH_MAGIC: &[u8; 4] = b"SHFG";
/// Current on-disk format version (ascii and binary).
pub(crate) const FORMAT_VERSION: u32 = 1;
/// Upper bound on counts read from disk before allocating.
pub(crate) const MAX_RECORD_LEN: usize = 1 << 28;
