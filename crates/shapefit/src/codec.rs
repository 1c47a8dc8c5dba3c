//! Low-level ascii/binary helpers shared by shape and reconstruction files.
//!
//! Ascii
//! - One record field per line: `keyword value…`, whitespace separated.
//! - Blank lines and lines starting with `#` are skipped.
//! - `f64` uses the shortest representation that parses back to the same
//!   bits (`inf`, `-inf`, `NaN` included), so transforms round-trip exactly.
//! - Optional indices are written as `-1` when absent.
//!
//! Binary
//! - Little-endian throughout (`byteorder`).
//! - Optional indices are `i64` with `-1` for absent; lists are a `u32`
//!   count followed by `u64` items; strings are an `i64` byte length
//!   (`-1` for none) followed by UTF-8 bytes.

use std::io::{self, BufRead, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::cfg::{FORMAT_VERSION, MAX_RECORD_LEN};
use crate::error::FormatError;

// ---- ascii ----

/// Line reader that tracks line numbers for error messages.
pub(crate) struct AsciiReader<R> {
    inner: R,
    line: usize,
    buf: String,
}

impl<R: BufRead> AsciiReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            line: 0,
            buf: String::new(),
        }
    }

    #[inline]
    pub(crate) fn line(&self) -> usize {
        self.line
    }

    /// Next significant line, or `None` at end of input.
    fn next_line(&mut self) -> Result<Option<&str>, FormatError> {
        loop {
            self.buf.clear();
            if self.inner.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line += 1;
            let t = self.buf.trim_end_matches(['\n', '\r']);
            let s = t.trim_start();
            if !s.is_empty() && !s.starts_with('#') {
                break;
            }
        }
        Ok(Some(self.buf.trim_end_matches(['\n', '\r']).trim_start()))
    }

    /// Read the next line, require it to start with `keyword`, and return the
    /// rest of the line (leading single separator removed).
    pub(crate) fn field(&mut self, keyword: &str) -> Result<String, FormatError> {
        let line = match self.next_line()? {
            Some(l) => l.to_owned(),
            None => {
                return Err(FormatError::Truncated(format!(
                    "expected `{keyword}` after line {}",
                    self.line
                )))
            }
        };
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((h, r)) => (h, r),
            None => (line.as_str(), ""),
        };
        if head != keyword {
            return Err(FormatError::parse(
                self.line,
                format!("expected `{keyword}`, found `{head}`"),
            ));
        }
        Ok(rest.to_owned())
    }

    /// Tokens following `keyword` on its line.
    pub(crate) fn tokens(&mut self, keyword: &str) -> Result<Vec<String>, FormatError> {
        Ok(self
            .field(keyword)?
            .split_whitespace()
            .map(str::to_owned)
            .collect())
    }

    /// Exactly `N` floats after `keyword`.
    pub(crate) fn floats<const N: usize>(&mut self, keyword: &str) -> Result<[f64; N], FormatError> {
        let toks = self.tokens(keyword)?;
        if toks.len() != N {
            return Err(FormatError::parse(
                self.line,
                format!("`{keyword}` needs {N} values, found {}", toks.len()),
            ));
        }
        let mut out = [0.0; N];
        for (o, t) in out.iter_mut().zip(&toks) {
            *o = self.parse_f64(t)?;
        }
        Ok(out)
    }

    /// Count-prefixed index list after `keyword`.
    pub(crate) fn index_list(&mut self, keyword: &str) -> Result<Vec<usize>, FormatError> {
        let toks = self.tokens(keyword)?;
        let (count, items) = toks
            .split_first()
            .ok_or_else(|| FormatError::parse(self.line, format!("`{keyword}` needs a count")))?;
        let n = self.parse_usize(count)?;
        if n != items.len() {
            return Err(FormatError::parse(
                self.line,
                format!("`{keyword}` declares {n} items, found {}", items.len()),
            ));
        }
        items.iter().map(|t| self.parse_usize(t)).collect()
    }

    /// `-1` or a non-negative index.
    pub(crate) fn opt_index(&self, tok: &str) -> Result<Option<usize>, FormatError> {
        if tok == "-1" {
            Ok(None)
        } else {
            self.parse_usize(tok).map(Some)
        }
    }

    /// `keyword -1` or `keyword <byte len> <text>`.
    pub(crate) fn opt_string(&mut self, keyword: &str) -> Result<Option<String>, FormatError> {
        let rest = self.field(keyword)?;
        let (len_tok, text) = rest.split_once(' ').unwrap_or((rest.as_str(), ""));
        let Some(len) = self.opt_index(len_tok.trim())? else {
            return Ok(None);
        };
        if text.len() != len {
            return Err(FormatError::parse(
                self.line,
                format!("`{keyword}` declares {len} bytes, found {}", text.len()),
            ));
        }
        Ok(Some(text.to_owned()))
    }

    /// `keyword <version>` with a supported version.
    pub(crate) fn header(&mut self, keyword: &str) -> Result<(), FormatError> {
        let toks = self.tokens(keyword)?;
        let version = match toks.as_slice() {
            [v] => v
                .parse::<u32>()
                .map_err(|_| FormatError::parse(self.line, format!("bad version `{v}`")))?,
            _ => return Err(FormatError::parse(self.line, "header needs one version")),
        };
        if version != FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }
        Ok(())
    }

    pub(crate) fn parse_f64(&self, tok: &str) -> Result<f64, FormatError> {
        tok.parse::<f64>()
            .map_err(|_| FormatError::parse(self.line, format!("bad number `{tok}`")))
    }

    pub(crate) fn parse_usize(&self, tok: &str) -> Result<usize, FormatError> {
        let n = tok
            .parse::<usize>()
            .map_err(|_| FormatError::parse(self.line, format!("bad index `{tok}`")))?;
        if n > MAX_RECORD_LEN {
            return Err(FormatError::parse(self.line, format!("index {n} too large")));
        }
        Ok(n)
    }

    pub(crate) fn parse_bool(&self, tok: &str) -> Result<bool, FormatError> {
        match tok {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(FormatError::parse(self.line, format!("bad flag `{tok}`"))),
        }
    }
}

pub(crate) fn write_floats<W: Write>(w: &mut W, keyword: &str, v: &[f64]) -> io::Result<()> {
    write!(w, "{keyword}")?;
    for x in v {
        write!(w, " {x:?}")?;
    }
    writeln!(w)
}

pub(crate) fn write_index_list<W: Write>(
    w: &mut W,
    keyword: &str,
    items: impl ExactSizeIterator<Item = usize>,
) -> io::Result<()> {
    write!(w, "{keyword} {}", items.len())?;
    for i in items {
        write!(w, " {i}")?;
    }
    writeln!(w)
}

pub(crate) fn fmt_opt_index(i: Option<usize>) -> String {
    i.map_or_else(|| "-1".to_owned(), |i| i.to_string())
}

pub(crate) fn write_opt_string<W: Write>(
    w: &mut W,
    keyword: &str,
    s: Option<&str>,
) -> Result<(), FormatError> {
    match s {
        None => writeln!(w, "{keyword} -1")?,
        Some(s) if s.contains(['\n', '\r']) => {
            return Err(FormatError::invalid(format!(
                "`{keyword}` cannot contain line breaks"
            )))
        }
        Some(s) => writeln!(w, "{keyword} {} {s}", s.len())?,
    }
    Ok(())
}

// ---- binary ----

fn eof_as_truncated(what: &str) -> impl Fn(io::Error) -> FormatError + '_ {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FormatError::Truncated(what.to_owned())
        } else {
            FormatError::Io(e)
        }
    }
}

pub(crate) fn write_magic<W: Write>(w: &mut W, magic: &[u8; 4]) -> io::Result<()> {
    w.write_all(magic)?;
    w.write_u32::<LittleEndian>(FORMAT_VERSION)
}

pub(crate) fn read_magic<R: Read>(r: &mut R, magic: &[u8; 4]) -> Result<(), FormatError> {
    let mut found = [0u8; 4];
    r.read_exact(&mut found).map_err(eof_as_truncated("magic"))?;
    if &found != magic {
        return Err(FormatError::BadMagic {
            expected: String::from_utf8_lossy(magic).into_owned(),
            found: String::from_utf8_lossy(&found).into_owned(),
        });
    }
    let version = r
        .read_u32::<LittleEndian>()
        .map_err(eof_as_truncated("version"))?;
    if version != FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }
    Ok(())
}

pub(crate) fn write_f64s<W: Write>(w: &mut W, v: &[f64]) -> io::Result<()> {
    for x in v {
        w.write_f64::<LittleEndian>(*x)?;
    }
    Ok(())
}

pub(crate) fn read_f64s<R: Read, const N: usize>(r: &mut R, what: &str) -> Result<[f64; N], FormatError> {
    let mut out = [0.0; N];
    for o in out.iter_mut() {
        *o = r.read_f64::<LittleEndian>().map_err(eof_as_truncated(what))?;
    }
    Ok(out)
}

pub(crate) fn write_opt_index<W: Write>(w: &mut W, i: Option<usize>) -> io::Result<()> {
    w.write_i64::<LittleEndian>(i.map_or(-1, |i| i as i64))
}

pub(crate) fn read_opt_index<R: Read>(r: &mut R, what: &str) -> Result<Option<usize>, FormatError> {
    let v = r.read_i64::<LittleEndian>().map_err(eof_as_truncated(what))?;
    match v {
        -1 => Ok(None),
        v if v >= 0 && (v as u64) <= MAX_RECORD_LEN as u64 => Ok(Some(v as usize)),
        v => Err(FormatError::invalid(format!("{what}: bad index {v}"))),
    }
}

pub(crate) fn write_u64<W: Write>(w: &mut W, v: usize) -> io::Result<()> {
    w.write_u64::<LittleEndian>(v as u64)
}

pub(crate) fn read_index<R: Read>(r: &mut R, what: &str) -> Result<usize, FormatError> {
    let v = r.read_u64::<LittleEndian>().map_err(eof_as_truncated(what))?;
    if v > MAX_RECORD_LEN as u64 {
        return Err(FormatError::invalid(format!("{what}: index {v} too large")));
    }
    Ok(v as usize)
}

pub(crate) fn write_count<W: Write>(w: &mut W, n: usize) -> Result<(), FormatError> {
    let n = u32::try_from(n).map_err(|_| FormatError::invalid(format!("count {n} too large")))?;
    w.write_u32::<LittleEndian>(n)?;
    Ok(())
}

pub(crate) fn read_count<R: Read>(r: &mut R, what: &str) -> Result<usize, FormatError> {
    let n = r.read_u32::<LittleEndian>().map_err(eof_as_truncated(what))? as usize;
    if n > MAX_RECORD_LEN {
        return Err(FormatError::invalid(format!("{what}: count {n} too large")));
    }
    Ok(n)
}

pub(crate) fn write_bool<W: Write>(w: &mut W, b: bool) -> io::Result<()> {
    w.write_u8(u8::from(b))
}

pub(crate) fn read_bool<R: Read>(r: &mut R, what: &str) -> Result<bool, FormatError> {
    match r.read_u8().map_err(eof_as_truncated(what))? {
        0 => Ok(false),
        1 => Ok(true),
        b => Err(FormatError::invalid(format!("{what}: bad flag {b}"))),
    }
}

pub(crate) fn write_index_list_bin<W: Write>(
    w: &mut W,
    items: impl ExactSizeIterator<Item = usize>,
) -> Result<(), FormatError> {
    write_count(w, items.len())?;
    for i in items {
        write_u64(w, i)?;
    }
    Ok(())
}

pub(crate) fn read_index_list_bin<R: Read>(r: &mut R, what: &str) -> Result<Vec<usize>, FormatError> {
    let n = read_count(r, what)?;
    (0..n).map(|_| read_index(r, what)).collect()
}

pub(crate) fn write_opt_string_bin<W: Write>(w: &mut W, s: Option<&str>) -> io::Result<()> {
    match s {
        None => w.write_i64::<LittleEndian>(-1),
        Some(s) => {
            w.write_i64::<LittleEndian>(s.len() as i64)?;
            w.write_all(s.as_bytes())
        }
    }
}

pub(crate) fn read_opt_string_bin<R: Read>(r: &mut R, what: &str) -> Result<Option<String>, FormatError> {
    let Some(len) = read_opt_index(r, what)? else {
        return Ok(None);
    };
    // Allocation follows the bytes present, not the declared length.
    let mut bytes = Vec::new();
    Read::take(&mut *r, len as u64)
        .read_to_end(&mut bytes)
        .map_err(eof_as_truncated(what))?;
    if bytes.len() < len {
        return Err(FormatError::Truncated(what.to_owned()));
    }
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|_| FormatError::invalid(format!("{what}: not UTF-8")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_skips_comments_and_counts_lines() {
        let src = "# header\n\nvalue 1.5 -2 inf\n";
        let mut rd = AsciiReader::new(src.as_bytes());
        let v: [f64; 3] = rd.floats("value").unwrap();
        assert_eq!(v[0], 1.5);
        assert_eq!(v[1], -2.0);
        assert!(v[2].is_infinite());
        assert_eq!(rd.line(), 3);
    }

    #[test]
    fn ascii_reports_wrong_keyword_with_line() {
        let mut rd = AsciiReader::new("first 1\nother 2\n".as_bytes());
        let _ = rd.tokens("first").unwrap();
        match rd.tokens("second") {
            Err(FormatError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn ascii_index_list_checks_count() {
        let mut rd = AsciiReader::new("ids 2 4 5\nids 3 1\n".as_bytes());
        assert_eq!(rd.index_list("ids").unwrap(), vec![4, 5]);
        assert!(rd.index_list("ids").is_err());
    }

    #[test]
    fn ascii_strings_keep_inner_spaces() {
        let mut out = Vec::new();
        write_opt_string(&mut out, "name", Some("left  arm")).unwrap();
        write_opt_string(&mut out, "name", None).unwrap();
        let mut rd = AsciiReader::new(out.as_slice());
        assert_eq!(rd.opt_string("name").unwrap().as_deref(), Some("left  arm"));
        assert_eq!(rd.opt_string("name").unwrap(), None);
    }

    #[test]
    fn ascii_truncation_is_reported() {
        let mut rd = AsciiReader::new("".as_bytes());
        assert!(matches!(rd.tokens("x"), Err(FormatError::Truncated(_))));
    }

    #[test]
    fn binary_truncation_and_magic() {
        let mut out = Vec::new();
        write_magic(&mut out, b"TEST").unwrap();
        write_f64s(&mut out, &[1.0]).unwrap();
        let mut r = out.as_slice();
        read_magic(&mut r, b"TEST").unwrap();
        let res: Result<[f64; 2], _> = read_f64s(&mut r, "pair");
        assert!(matches!(res, Err(FormatError::Truncated(_))));

        let mut r = out.as_slice();
        assert!(matches!(
            read_magic(&mut r, b"NOPE"),
            Err(FormatError::BadMagic { .. })
        ));
    }

    #[test]
    fn oversized_string_length_is_truncation() {
        let mut out = Vec::new();
        out.write_i64::<LittleEndian>(200_000_000).unwrap();
        out.extend_from_slice(b"short");
        let mut r = out.as_slice();
        assert!(matches!(
            read_opt_string_bin(&mut r, "name"),
            Err(FormatError::Truncated(_))
        ));

        let mut out = Vec::new();
        write_opt_string_bin(&mut out, Some("scan")).unwrap();
        let mut r = out.as_slice();
        assert_eq!(read_opt_string_bin(&mut r, "name").unwrap().as_deref(), Some("scan"));
    }

    #[test]
    fn float_text_is_bit_exact() {
        let vals = [0.1, 1.0 / 3.0, -0.0, 1e-300, f64::MAX, f64::INFINITY];
        let mut out = Vec::new();
        write_floats(&mut out, "v", &vals).unwrap();
        let mut rd = AsciiReader::new(out.as_slice());
        let back: [f64; 6] = rd.floats("v").unwrap();
        for (a, b) in vals.iter().zip(back.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }
}
