//! Archive naming templates.
//!
//! A pattern is a file name template containing one `%d` date placeholder
//! (optionally `%d{FORMAT}` with a chrono strftime format, default
//! `%Y-%m-%d`) and at most one `%i` sequence placeholder. A trailing `.gz`
//! or `.zip` extension selects the compression format for rotated files; a
//! pattern without either extension means rotated files are kept
//! uncompressed, just renamed. A literal directory prefix is allowed
//! (e.g. `archive/app-%d.%i.log.gz`), resolved relative to the active file's
//! directory.

use {
    chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime},
    regex::Regex,
    std::path::Path,
};

use crate::error::{Error, Result};

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Compression format for rotated files, derived from the pattern extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    /// Gzip (`.gz` extension), via flate2.
    Gzip,
    /// Zip (`.zip` extension), a single-entry archive.
    Zip,
}

impl CompressionFormat {
    pub(crate) fn extension(&self) -> &'static str {
        match self {
            CompressionFormat::Gzip => "gz",
            CompressionFormat::Zip => "zip",
        }
    }
}

/// The calendar granularity of a pattern's date placeholder, derived from the
/// finest strftime specifier it contains. Determines how often the time
/// trigger can fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Granularity {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Date,
    Sequence,
}

/// Sort key extracted from an archive file name: the bucket timestamp plus
/// the per-bucket sequence index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct ArchiveKey {
    pub bucket: NaiveDateTime,
    pub seq: u64,
}

/// A parsed archive naming template.
#[derive(Debug, Clone)]
pub(crate) struct ArchivePattern {
    raw: String,
    /// Literal directory prefix of the template, possibly empty.
    dir: String,
    segments: Vec<Segment>,
    date_format: String,
    compression: Option<CompressionFormat>,
    granularity: Granularity,
    has_sequence: bool,
    /// Matches both the final archive name and the uncompressed staging name
    /// (final name minus the compression extension).
    matcher: Regex,
}

impl ArchivePattern {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::Config("archive pattern must not be empty".into()));
        }

        let (stem, compression) = if let Some(stem) = raw.strip_suffix(".gz") {
            (stem, Some(CompressionFormat::Gzip))
        } else if let Some(stem) = raw.strip_suffix(".zip") {
            (stem, Some(CompressionFormat::Zip))
        } else {
            (raw, None)
        };

        let (dir, name) = match stem.rfind('/') {
            Some(idx) => (&stem[..idx], &stem[idx + 1..]),
            None => ("", stem),
        };
        if dir.contains('%') {
            return Err(Error::Config(format!(
                "archive pattern '{raw}': placeholders are not allowed in the directory part"
            )));
        }
        if name.is_empty() {
            return Err(Error::Config(format!(
                "archive pattern '{raw}' has no file name part"
            )));
        }

        let (segments, date_format) = tokenize(name, raw)?;
        let dates = segments.iter().filter(|s| **s == Segment::Date).count();
        let sequences = segments.iter().filter(|s| **s == Segment::Sequence).count();
        if dates != 1 {
            return Err(Error::Config(format!(
                "archive pattern '{raw}' must contain exactly one %d date placeholder"
            )));
        }
        if sequences > 1 {
            return Err(Error::Config(format!(
                "archive pattern '{raw}' must contain at most one %i sequence placeholder"
            )));
        }

        let granularity = derive_granularity(&date_format, raw)?;
        let matcher = build_matcher(&segments, &date_format, compression)?;

        Ok(ArchivePattern {
            raw: raw.to_string(),
            dir: dir.to_string(),
            segments,
            date_format,
            compression,
            granularity,
            has_sequence: sequences == 1,
            matcher,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn compression(&self) -> Option<CompressionFormat> {
        self.compression
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn has_sequence(&self) -> bool {
        self.has_sequence
    }

    pub fn date_format(&self) -> &str {
        &self.date_format
    }

    /// Render the time bucket a timestamp falls into, e.g. `2024-01-15` for
    /// day granularity. Two timestamps are in the same bucket iff they render
    /// identically.
    pub fn format_bucket(&self, ts: &DateTime<FixedOffset>) -> String {
        ts.format(&self.date_format).to_string()
    }

    /// Parse a rendered bucket string back into its sort-key timestamp.
    pub fn bucket_key(&self, bucket: &str) -> Option<NaiveDateTime> {
        parse_bucket(&self.date_format, bucket)
    }

    /// The final archive file name (with compression extension, if any).
    pub fn final_name(&self, bucket: &str, seq: u64) -> String {
        let mut name = self.render_stem(bucket, seq);
        if let Some(compression) = self.compression {
            name.push('.');
            name.push_str(compression.extension());
        }
        name
    }

    /// The pre-compression staging name: the final name minus the compression
    /// extension. Identical to the final name for uncompressed patterns.
    pub fn staging_name(&self, bucket: &str, seq: u64) -> String {
        self.render_stem(bucket, seq)
    }

    fn render_stem(&self, bucket: &str, seq: u64) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(lit) => out.push_str(lit),
                Segment::Date => out.push_str(bucket),
                Segment::Sequence => out.push_str(&seq.to_string()),
            }
        }
        out
    }

    /// Match an archive file name (final or staging form) and extract its
    /// sort key. Returns `None` for files not produced by this pattern.
    pub fn match_file(&self, file_name: &str) -> Option<ArchiveKey> {
        let captures = self.matcher.captures(file_name)?;
        let bucket = parse_bucket(&self.date_format, captures.name("d")?.as_str())?;
        let seq = match captures.name("i") {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };
        Some(ArchiveKey { bucket, seq })
    }

    /// Resolve the directory archives live in, relative to the active file's
    /// directory.
    pub fn archive_dir(&self, base: &Path) -> std::path::PathBuf {
        if self.dir.is_empty() {
            base.to_path_buf()
        } else {
            base.join(&self.dir)
        }
    }
}

/// Split the file-name part of a template into literal/date/sequence
/// segments, extracting the date format.
fn tokenize(name: &str, raw: &str) -> Result<(Vec<Segment>, String)> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut date_format = None;
    let mut chars = name.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            literal.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => literal.push('%'),
            Some('d') => {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                let format = if chars.peek() == Some(&'{') {
                    chars.next();
                    let mut format = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => format.push(c),
                            None => {
                                return Err(Error::Config(format!(
                                    "archive pattern '{raw}' has an unterminated %d{{…}} format"
                                )))
                            }
                        }
                    }
                    format
                } else {
                    DEFAULT_DATE_FORMAT.to_string()
                };
                date_format = Some(format);
                segments.push(Segment::Date);
            }
            Some('i') => {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Sequence);
            }
            other => {
                return Err(Error::Config(format!(
                    "archive pattern '{raw}' contains unknown placeholder '%{}'",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    Ok((segments, date_format.unwrap_or_default()))
}

/// Finest calendar unit named by the date format. Rejects specifiers other
/// than `%Y %m %d %H %M %S` so the format stays round-trippable.
fn derive_granularity(format: &str, raw: &str) -> Result<Granularity> {
    let mut granularity = None;
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            continue;
        }
        let unit = match chars.next() {
            Some('Y') => Granularity::Year,
            Some('m') => Granularity::Month,
            Some('d') => Granularity::Day,
            Some('H') => Granularity::Hour,
            Some('M') => Granularity::Minute,
            Some('S') => Granularity::Second,
            Some('%') => continue,
            other => {
                return Err(Error::Config(format!(
                    "archive pattern '{raw}': unsupported date specifier '%{}'",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        };
        granularity = Some(granularity.map_or(unit, |g: Granularity| g.max(unit)));
    }
    granularity.ok_or_else(|| {
        Error::Config(format!(
            "archive pattern '{raw}': date format contains no date specifier"
        ))
    })
}

fn build_matcher(
    segments: &[Segment],
    date_format: &str,
    compression: Option<CompressionFormat>,
) -> Result<Regex> {
    let mut source = String::from("^");
    for segment in segments {
        match segment {
            Segment::Literal(lit) => source.push_str(&regex::escape(lit)),
            Segment::Date => {
                source.push_str("(?P<d>");
                source.push_str(&date_regex(date_format));
                source.push(')');
            }
            Segment::Sequence => source.push_str(r"(?P<i>\d+)"),
        }
    }
    if let Some(compression) = compression {
        source.push_str(&format!(r"(?:\.{})?", compression.extension()));
    }
    source.push('$');
    Regex::new(&source).map_err(|err| Error::Config(format!("archive pattern regex: {err}")))
}

fn date_regex(format: &str) -> String {
    let mut out = String::new();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push_str(&regex::escape(&c.to_string()));
            continue;
        }
        match chars.next() {
            Some('Y') => out.push_str(r"\d{4}"),
            Some('m') | Some('d') | Some('H') | Some('M') | Some('S') => out.push_str(r"\d{2}"),
            Some('%') => out.push_str(&regex::escape("%")),
            // Unreachable after derive_granularity validation.
            _ => {}
        }
    }
    out
}

/// Walk the format and a rendered bucket string in lockstep, extracting the
/// fixed-width date fields. Missing fields default to the start of their
/// period (Jan 1, midnight).
fn parse_bucket(format: &str, s: &str) -> Option<NaiveDateTime> {
    let bytes = s.as_bytes();
    let mut pos = 0;
    let mut fields = [1970u32, 1, 1, 0, 0, 0];

    let take = |pos: &mut usize, width: usize| -> Option<u32> {
        let end = *pos + width;
        let slice = bytes.get(*pos..end)?;
        *pos = end;
        std::str::from_utf8(slice).ok()?.parse().ok()
    };

    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            if !s[pos..].starts_with(c) {
                return None;
            }
            pos += c.len_utf8();
            continue;
        }
        match chars.next() {
            Some('Y') => fields[0] = take(&mut pos, 4)?,
            Some('m') => fields[1] = take(&mut pos, 2)?,
            Some('d') => fields[2] = take(&mut pos, 2)?,
            Some('H') => fields[3] = take(&mut pos, 2)?,
            Some('M') => fields[4] = take(&mut pos, 2)?,
            Some('S') => fields[5] = take(&mut pos, 2)?,
            Some('%') => {
                if bytes.get(pos) != Some(&b'%') {
                    return None;
                }
                pos += 1;
            }
            _ => return None,
        }
    }
    if pos != bytes.len() {
        return None;
    }

    NaiveDate::from_ymd_opt(fields[0] as i32, fields[1], fields[2])?
        .and_hms_opt(fields[3], fields[4], fields[5])
}
