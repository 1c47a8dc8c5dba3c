//! Ascii and binary shape records.
//!
//! Field order (both encodings): reconstruction index, sequence id and
//! index, name, `initial`, `current`, `ground_truth` (row-major 4×4), the
//! nine inertias, viewpoint, towards, up, origin (flag + point), then the
//! parent, child, feature and match index lists.
//!
//! A standalone record keeps link indices as read; `Reconstruction` checks
//! them against its tables after a whole-graph load.

use std::io::{BufRead, Read, Write};

use nalgebra::{Point3, Vector3};

use super::{Shape, ShapeId, NUM_DOFS};
use crate::cfg::SHAPE_MAGIC;
use crate::codec::{self, AsciiReader};
use crate::error::FormatError;
use crate::feature::FeatureId;
use crate::geom::Affine3;
use crate::matching::MatchId;
use crate::reconstruction::SequenceId;

const ASCII_HEADER: &str = "shape";

impl Shape {
    /// Write one self-contained ascii record (header line included).
    pub fn write_ascii<W: Write>(&self, w: &mut W) -> Result<(), FormatError> {
        writeln!(w, "{ASCII_HEADER} {}", crate::cfg::FORMAT_VERSION)?;
        self.write_ascii_record(w)
    }

    /// Read a record written by `write_ascii`.
    pub fn read_ascii<R: BufRead>(reader: R) -> Result<Shape, FormatError> {
        let mut rd = AsciiReader::new(reader);
        rd.header(ASCII_HEADER)?;
        Shape::read_ascii_record(&mut rd)
    }

    /// Write one self-contained binary record (magic and version included).
    pub fn write_binary<W: Write>(&self, w: &mut W) -> Result<(), FormatError> {
        codec::write_magic(w, SHAPE_MAGIC)?;
        self.write_binary_record(w)
    }

    pub fn read_binary<R: Read>(reader: &mut R) -> Result<Shape, FormatError> {
        codec::read_magic(reader, SHAPE_MAGIC)?;
        Shape::read_binary_record(reader)
    }

    pub(crate) fn write_ascii_record<W: Write>(&self, w: &mut W) -> Result<(), FormatError> {
        writeln!(
            w,
            "reconstruction {}",
            codec::fmt_opt_index(self.reconstruction_index)
        )?;
        writeln!(
            w,
            "sequence {} {}",
            codec::fmt_opt_index(self.sequence.map(|s| s.0)),
            codec::fmt_opt_index(self.sequence_index)
        )?;
        codec::write_opt_string(w, "name", self.name.as_deref())?;
        codec::write_floats(w, "initial", &self.initial.to_row_major())?;
        codec::write_floats(w, "current", &self.current.to_row_major())?;
        codec::write_floats(w, "ground_truth", &self.ground_truth.to_row_major())?;
        codec::write_floats(w, "inertias", &self.variable_inertias)?;
        codec::write_floats(w, "viewpoint", self.viewpoint.coords.as_slice())?;
        codec::write_floats(w, "towards", self.towards.as_slice())?;
        codec::write_floats(w, "up", self.up.as_slice())?;
        match self.origin {
            Some(o) => codec::write_floats(w, "origin 1", o.coords.as_slice())?,
            None => writeln!(w, "origin 0")?,
        }
        codec::write_index_list(w, "parents", self.parents.iter().map(|s| s.0))?;
        codec::write_index_list(w, "children", self.children.iter().map(|s| s.0))?;
        codec::write_index_list(w, "features", self.features.iter().map(|f| f.0))?;
        codec::write_index_list(w, "matches", self.matches.iter().map(|m| m.0))?;
        writeln!(w, "end")?;
        Ok(())
    }

    pub(crate) fn read_ascii_record<R: BufRead>(
        rd: &mut AsciiReader<R>,
    ) -> Result<Shape, FormatError> {
        let mut shape = Shape::new();

        let toks = rd.tokens("reconstruction")?;
        shape.reconstruction_index = match toks.as_slice() {
            [i] => rd.opt_index(i)?,
            _ => return Err(FormatError::parse(rd.line(), "`reconstruction` needs one index")),
        };
        let toks = rd.tokens("sequence")?;
        (shape.sequence, shape.sequence_index) = match toks.as_slice() {
            [s, i] => (rd.opt_index(s)?.map(SequenceId), rd.opt_index(i)?),
            _ => return Err(FormatError::parse(rd.line(), "`sequence` needs two indices")),
        };
        shape.name = rd.opt_string("name")?;

        shape.initial = read_transform(rd, "initial")?;
        shape.current = read_transform(rd, "current")?;
        shape.ground_truth = read_transform(rd, "ground_truth")?;
        shape.variable_inertias = rd.floats::<NUM_DOFS>("inertias")?;

        shape.viewpoint = Point3::from(rd.floats::<3>("viewpoint")?);
        shape.towards = Vector3::from(rd.floats::<3>("towards")?);
        shape.up = Vector3::from(rd.floats::<3>("up")?);
        let toks = rd.tokens("origin")?;
        shape.origin = match toks.split_first() {
            Some((flag, rest)) if rd.parse_bool(flag)? => {
                let [x, y, z] = rest else {
                    return Err(FormatError::parse(rd.line(), "`origin 1` needs 3 values"));
                };
                Some(Point3::new(
                    rd.parse_f64(x)?,
                    rd.parse_f64(y)?,
                    rd.parse_f64(z)?,
                ))
            }
            Some((_, [])) => None,
            _ => return Err(FormatError::parse(rd.line(), "malformed `origin`")),
        };

        shape.parents = rd.index_list("parents")?.into_iter().map(ShapeId).collect();
        shape.children = rd.index_list("children")?.into_iter().map(ShapeId).collect();
        shape.features = rd.index_list("features")?.into_iter().map(FeatureId).collect();
        shape.matches = rd.index_list("matches")?.into_iter().map(MatchId).collect();
        rd.tokens("end")?;
        Ok(shape)
    }

    pub(crate) fn write_binary_record<W: Write>(&self, w: &mut W) -> Result<(), FormatError> {
        codec::write_opt_index(w, self.reconstruction_index)?;
        codec::write_opt_index(w, self.sequence.map(|s| s.0))?;
        codec::write_opt_index(w, self.sequence_index)?;
        codec::write_opt_string_bin(w, self.name.as_deref())?;
        codec::write_f64s(w, &self.initial.to_row_major())?;
        codec::write_f64s(w, &self.current.to_row_major())?;
        codec::write_f64s(w, &self.ground_truth.to_row_major())?;
        codec::write_f64s(w, &self.variable_inertias)?;
        codec::write_f64s(w, self.viewpoint.coords.as_slice())?;
        codec::write_f64s(w, self.towards.as_slice())?;
        codec::write_f64s(w, self.up.as_slice())?;
        codec::write_bool(w, self.origin.is_some())?;
        if let Some(o) = self.origin {
            codec::write_f64s(w, o.coords.as_slice())?;
        }
        codec::write_index_list_bin(w, self.parents.iter().map(|s| s.0))?;
        codec::write_index_list_bin(w, self.children.iter().map(|s| s.0))?;
        codec::write_index_list_bin(w, self.features.iter().map(|f| f.0))?;
        codec::write_index_list_bin(w, self.matches.iter().map(|m| m.0))?;
        Ok(())
    }

    pub(crate) fn read_binary_record<R: Read>(r: &mut R) -> Result<Shape, FormatError> {
        let mut shape = Shape::new();
        shape.reconstruction_index = codec::read_opt_index(r, "reconstruction")?;
        shape.sequence = codec::read_opt_index(r, "sequence")?.map(SequenceId);
        shape.sequence_index = codec::read_opt_index(r, "sequence index")?;
        shape.name = codec::read_opt_string_bin(r, "name")?;
        shape.initial = transform_from(&codec::read_f64s::<_, 16>(r, "initial")?, "initial")?;
        shape.current = transform_from(&codec::read_f64s::<_, 16>(r, "current")?, "current")?;
        shape.ground_truth = transform_from(
            &codec::read_f64s::<_, 16>(r, "ground_truth")?,
            "ground_truth",
        )?;
        shape.variable_inertias = codec::read_f64s::<_, NUM_DOFS>(r, "inertias")?;
        shape.viewpoint = Point3::from(codec::read_f64s::<_, 3>(r, "viewpoint")?);
        shape.towards = Vector3::from(codec::read_f64s::<_, 3>(r, "towards")?);
        shape.up = Vector3::from(codec::read_f64s::<_, 3>(r, "up")?);
        shape.origin = if codec::read_bool(r, "origin flag")? {
            Some(Point3::from(codec::read_f64s::<_, 3>(r, "origin")?))
        } else {
            None
        };
        shape.parents = codec::read_index_list_bin(r, "parents")?
            .into_iter()
            .map(ShapeId)
            .collect();
        shape.children = codec::read_index_list_bin(r, "children")?
            .into_iter()
            .map(ShapeId)
            .collect();
        shape.features = codec::read_index_list_bin(r, "features")?
            .into_iter()
            .map(FeatureId)
            .collect();
        shape.matches = codec::read_index_list_bin(r, "matches")?
            .into_iter()
            .map(MatchId)
            .collect();
        Ok(shape)
    }
}

fn read_transform<R: BufRead>(rd: &mut AsciiReader<R>, keyword: &str) -> Result<Affine3, FormatError> {
    let v = rd.floats::<16>(keyword)?;
    Affine3::from_row_major(&v)
        .ok_or_else(|| FormatError::parse(rd.line(), format!("`{keyword}` is not affine")))
}

fn transform_from(v: &[f64; 16], what: &str) -> Result<Affine3, FormatError> {
    Affine3::from_row_major(v).ok_or_else(|| FormatError::invalid(format!("{what} is not affine")))
}
