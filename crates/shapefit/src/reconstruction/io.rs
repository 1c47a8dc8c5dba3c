//! Whole-graph files: every table of a reconstruction in one stream.
//!
//! Layout (ascii keywords / binary field order)
//! - header (`graph <version>` or magic `SHFG` + `u32` version)
//! - `features N`, then one `feature` line per record:
//!   owner, position, normal, radius, boundary, distinction, salience,
//!   descriptor (count + values)
//! - `matches N`, then `match a b affinity`
//! - `sequences N`, then per sequence a `sequence` name line and a
//!   `members` index list
//! - `shapes N`, then shape records as written by `Shape::write_ascii`
//!   (without their header)
//!
//! Loading finishes with `Reconstruction::validate`, so a graph that reads
//! back is link-consistent.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use nalgebra::{Point3, Vector3};

use super::{Reconstruction, Sequence};
use crate::cfg::{FORMAT_VERSION, GRAPH_MAGIC};
use crate::codec::{self, AsciiReader};
use crate::error::FormatError;
use crate::feature::{Feature, FeatureId};
use crate::matching::Match;
use crate::shape::{Shape, ShapeId};

const ASCII_HEADER: &str = "graph";

/// On-disk encoding of a graph file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Ascii,
    Binary,
}

impl Reconstruction {
    pub fn write_ascii<W: Write>(&self, w: &mut W) -> Result<(), FormatError> {
        writeln!(w, "{ASCII_HEADER} {FORMAT_VERSION}")?;

        writeln!(w, "features {}", self.features.len())?;
        for f in &self.features {
            write!(
                w,
                "feature {} {:?} {:?} {:?} {:?} {:?} {:?} {:?} {} {:?} {:?} {}",
                codec::fmt_opt_index(f.shape.map(|s| s.0)),
                f.position.x,
                f.position.y,
                f.position.z,
                f.normal.x,
                f.normal.y,
                f.normal.z,
                f.radius,
                u8::from(f.boundary),
                f.distinction,
                f.salience,
                f.descriptor.len(),
            )?;
            for d in &f.descriptor {
                write!(w, " {d:?}")?;
            }
            writeln!(w)?;
        }

        writeln!(w, "matches {}", self.matches.len())?;
        for m in &self.matches {
            writeln!(
                w,
                "match {} {} {:?}",
                m.features[0].0, m.features[1].0, m.affinity
            )?;
        }

        writeln!(w, "sequences {}", self.sequences.len())?;
        for s in &self.sequences {
            codec::write_opt_string(w, "sequence", s.name.as_deref())?;
            codec::write_index_list(w, "members", s.shapes.iter().map(|s| s.0))?;
        }

        writeln!(w, "shapes {}", self.shapes.len())?;
        for s in &self.shapes {
            s.write_ascii_record(w)?;
        }
        Ok(())
    }

    pub fn read_ascii<R: BufRead>(reader: R) -> Result<Reconstruction, FormatError> {
        let mut rd = AsciiReader::new(reader);
        rd.header(ASCII_HEADER)?;
        let mut rec = Reconstruction::new();

        let n = count(&mut rd, "features")?;
        for _ in 0..n {
            rec.features.push(read_feature_ascii(&mut rd)?);
        }

        let n = count(&mut rd, "matches")?;
        for _ in 0..n {
            let toks = rd.tokens("match")?;
            let [a, b, affinity] = toks.as_slice() else {
                return Err(FormatError::parse(rd.line(), "`match` needs 3 values"));
            };
            rec.matches.push(
                Match::new(FeatureId(rd.parse_usize(a)?), FeatureId(rd.parse_usize(b)?))
                    .with_affinity(rd.parse_f64(affinity)?),
            );
        }

        let n = count(&mut rd, "sequences")?;
        for _ in 0..n {
            let name = rd.opt_string("sequence")?;
            let shapes = rd.index_list("members")?.into_iter().map(ShapeId).collect();
            rec.sequences.push(Sequence { name, shapes });
        }

        let n = count(&mut rd, "shapes")?;
        for _ in 0..n {
            rec.shapes.push(Shape::read_ascii_record(&mut rd)?);
        }

        rec.finish_load()
    }

    pub fn write_binary<W: Write>(&self, w: &mut W) -> Result<(), FormatError> {
        codec::write_magic(w, GRAPH_MAGIC)?;

        codec::write_count(w, self.features.len())?;
        for f in &self.features {
            codec::write_opt_index(w, f.shape.map(|s| s.0))?;
            codec::write_f64s(w, f.position.coords.as_slice())?;
            codec::write_f64s(w, f.normal.as_slice())?;
            codec::write_f64s(w, &[f.radius])?;
            codec::write_bool(w, f.boundary)?;
            codec::write_f64s(w, &[f.distinction, f.salience])?;
            codec::write_count(w, f.descriptor.len())?;
            codec::write_f64s(w, &f.descriptor)?;
        }

        codec::write_count(w, self.matches.len())?;
        for m in &self.matches {
            codec::write_u64(w, m.features[0].0)?;
            codec::write_u64(w, m.features[1].0)?;
            codec::write_f64s(w, &[m.affinity])?;
        }

        codec::write_count(w, self.sequences.len())?;
        for s in &self.sequences {
            codec::write_opt_string_bin(w, s.name.as_deref())?;
            codec::write_index_list_bin(w, s.shapes.iter().map(|s| s.0))?;
        }

        codec::write_count(w, self.shapes.len())?;
        for s in &self.shapes {
            s.write_binary_record(w)?;
        }
        Ok(())
    }

    pub fn read_binary<R: Read>(r: &mut R) -> Result<Reconstruction, FormatError> {
        codec::read_magic(r, GRAPH_MAGIC)?;
        let mut rec = Reconstruction::new();

        let n = codec::read_count(r, "features")?;
        for _ in 0..n {
            let owner = codec::read_opt_index(r, "feature owner")?;
            let position = Point3::from(codec::read_f64s::<_, 3>(r, "feature position")?);
            let normal = Vector3::from(codec::read_f64s::<_, 3>(r, "feature normal")?);
            let [radius] = codec::read_f64s::<_, 1>(r, "feature radius")?;
            let boundary = codec::read_bool(r, "feature boundary")?;
            let [distinction, salience] = codec::read_f64s::<_, 2>(r, "feature scores")?;
            let nd = codec::read_count(r, "descriptor")?;
            let descriptor = (0..nd)
                .map(|_| codec::read_f64s::<_, 1>(r, "descriptor").map(|[d]| d))
                .collect::<Result<Vec<_>, _>>()?;
            let mut f = Feature::new(position)
                .with_normal(normal)
                .with_radius(radius)
                .with_descriptor(descriptor)
                .with_boundary(boundary)
                .with_scores(distinction, salience);
            f.shape = owner.map(ShapeId);
            rec.features.push(f);
        }

        let n = codec::read_count(r, "matches")?;
        for _ in 0..n {
            let a = codec::read_index(r, "match endpoint")?;
            let b = codec::read_index(r, "match endpoint")?;
            let [affinity] = codec::read_f64s::<_, 1>(r, "match affinity")?;
            rec.matches
                .push(Match::new(FeatureId(a), FeatureId(b)).with_affinity(affinity));
        }

        let n = codec::read_count(r, "sequences")?;
        for _ in 0..n {
            let name = codec::read_opt_string_bin(r, "sequence name")?;
            let shapes = codec::read_index_list_bin(r, "sequence members")?
                .into_iter()
                .map(ShapeId)
                .collect();
            rec.sequences.push(Sequence { name, shapes });
        }

        let n = codec::read_count(r, "shapes")?;
        for _ in 0..n {
            rec.shapes.push(Shape::read_binary_record(r)?);
        }

        rec.finish_load()
    }

    /// Write to `path` in the given encoding.
    pub fn save(&self, path: impl AsRef<Path>, encoding: Encoding) -> Result<(), FormatError> {
        let mut w = BufWriter::new(File::create(path)?);
        match encoding {
            Encoding::Ascii => self.write_ascii(&mut w)?,
            Encoding::Binary => self.write_binary(&mut w)?,
        }
        w.flush()?;
        Ok(())
    }

    /// Read `path`, detecting the encoding from the leading bytes.
    pub fn load(path: impl AsRef<Path>) -> Result<(Reconstruction, Encoding), FormatError> {
        let mut r = BufReader::new(File::open(path)?);
        let encoding = if r.fill_buf()?.starts_with(GRAPH_MAGIC) {
            Encoding::Binary
        } else {
            Encoding::Ascii
        };
        let rec = match encoding {
            Encoding::Ascii => Reconstruction::read_ascii(r)?,
            Encoding::Binary => Reconstruction::read_binary(&mut r)?,
        };
        Ok((rec, encoding))
    }

    fn finish_load(self) -> Result<Reconstruction, FormatError> {
        self.validate()?;
        tracing::debug!(
            shapes = self.shapes.len(),
            features = self.features.len(),
            matches = self.matches.len(),
            sequences = self.sequences.len(),
            "loaded reconstruction"
        );
        Ok(self)
    }
}

fn count<R: BufRead>(rd: &mut AsciiReader<R>, keyword: &str) -> Result<usize, FormatError> {
    let toks = rd.tokens(keyword)?;
    match toks.as_slice() {
        [n] => rd.parse_usize(n),
        _ => Err(FormatError::parse(rd.line(), format!("`{keyword}` needs a count"))),
    }
}

fn read_feature_ascii<R: BufRead>(rd: &mut AsciiReader<R>) -> Result<Feature, FormatError> {
    let toks = rd.tokens("feature")?;
    if toks.len() < 12 {
        return Err(FormatError::parse(rd.line(), "`feature` needs at least 12 values"));
    }
    let owner = rd.opt_index(&toks[0])?;
    let mut v = [0.0; 7];
    for (o, t) in v.iter_mut().zip(&toks[1..8]) {
        *o = rd.parse_f64(t)?;
    }
    let boundary = rd.parse_bool(&toks[8])?;
    let distinction = rd.parse_f64(&toks[9])?;
    let salience = rd.parse_f64(&toks[10])?;
    let nd = rd.parse_usize(&toks[11])?;
    if toks.len() != 12 + nd {
        return Err(FormatError::parse(
            rd.line(),
            format!("descriptor declares {nd} channels, found {}", toks.len() - 12),
        ));
    }
    let descriptor = toks[12..]
        .iter()
        .map(|t| rd.parse_f64(t))
        .collect::<Result<Vec<_>, _>>()?;
    let mut f = Feature::new(Point3::new(v[0], v[1], v[2]))
        .with_normal(Vector3::new(v[3], v[4], v[5]))
        .with_radius(v[6])
        .with_boundary(boundary)
        .with_scores(distinction, salience)
        .with_descriptor(descriptor);
    f.shape = owner.map(ShapeId);
    Ok(f)
}
