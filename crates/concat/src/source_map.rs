//! Whole-rebuild concatenation with a v3 source map
//!
//! Every input file gets one source entry and a line-for-line mapping:
//! its first line maps to column 0 of the original, every following line
//! to the next original line (`AACA`). A file whose `sourceMappingURL`
//! resolves to a valid map has that map folded in instead, so positions
//! keep pointing at the sources it was compiled from.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, warn};

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Base64 VLQ encoding of one signed value
pub fn vlq(value: i64) -> String {
    let mut rest = if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    };
    let mut out = String::new();
    loop {
        let mut digit = (rest & 0b11111) as usize;
        rest >>= 5;
        if rest > 0 {
            digit |= 0b100000;
        }
        out.push(BASE64[digit] as char);
        if rest == 0 {
            break;
        }
    }
    out
}

/// Decode the base64 VLQ values of one segment
pub fn vlq_decode(text: &str) -> Result<Vec<i64>, MapError> {
    let mut values = Vec::new();
    let mut acc: i64 = 0;
    let mut shift = 0u32;
    for c in text.bytes() {
        let digit = BASE64
            .iter()
            .position(|b| *b == c)
            .ok_or(MapError::Digit(c as char))? as i64;
        if shift > 30 {
            return Err(MapError::Overflow);
        }
        acc |= (digit & 0b11111) << shift;
        if digit & 0b100000 != 0 {
            shift += 5;
            continue;
        }
        values.push(if acc & 1 == 1 { -(acc >> 1) } else { acc >> 1 });
        acc = 0;
        shift = 0;
    }
    if shift != 0 {
        return Err(MapError::Truncated);
    }
    Ok(values)
}

/// Reasons an upstream map is ignored
#[derive(Debug, Error)]
pub enum MapError {
    #[error("invalid base64 digit {0:?} in mappings")]
    Digit(char),

    #[error("mapping value out of range")]
    Overflow,

    #[error("mapping value cut short")]
    Truncated,

    #[error("segment with {0} fields")]
    Fields(usize),

    #[error("negative position in mappings")]
    Negative,

    #[error("source index {0} out of range")]
    Source(i64),

    #[error("name index {0} out of range")]
    Name(i64),

    #[error("unsupported map url {0:?}")]
    Url(String),

    #[error("{path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Position in an original source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Original {
    pub source: i64,
    pub line: i64,
    pub column: i64,
    pub name: Option<i64>,
}

/// One mapping segment; `original` is absent for 1-field segments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Segment {
    pub generated_column: i64,
    pub original: Option<Original>,
}

#[derive(Debug, Clone, Copy, Default)]
struct CoderState {
    generated_column: i64,
    source: i64,
    line: i64,
    column: i64,
    name: i64,
}

/// Delta coder for mapping segments
#[derive(Debug, Clone, Default)]
pub struct Coder {
    prev: CoderState,
}

impl Coder {
    /// Encode `segment` relative to the previous one
    pub fn encode(&mut self, segment: Segment) -> String {
        let mut out = vlq(segment.generated_column - self.prev.generated_column);
        self.prev.generated_column = segment.generated_column;
        if let Some(original) = segment.original {
            out.push_str(&vlq(original.source - self.prev.source));
            out.push_str(&vlq(original.line - self.prev.line));
            out.push_str(&vlq(original.column - self.prev.column));
            self.prev.source = original.source;
            self.prev.line = original.line;
            self.prev.column = original.column;
            if let Some(name) = original.name {
                out.push_str(&vlq(name - self.prev.name));
                self.prev.name = name;
            }
        }
        out
    }

    /// Decode one segment relative to the previous one
    pub fn decode(&mut self, text: &str) -> Result<Segment, MapError> {
        let values = vlq_decode(text)?;
        let (generated, original) = match values.as_slice() {
            [generated] => (*generated, None),
            [generated, rest @ ..] if rest.len() == 3 || rest.len() == 4 => (*generated, Some(rest)),
            other => return Err(MapError::Fields(other.len())),
        };

        self.prev.generated_column += generated;
        let mut segment = Segment {
            generated_column: self.prev.generated_column,
            original: None,
        };
        if let Some(deltas) = original {
            self.prev.source += deltas[0];
            self.prev.line += deltas[1];
            self.prev.column += deltas[2];
            let name = deltas.get(3).map(|delta| {
                self.prev.name += delta;
                self.prev.name
            });
            segment.original = Some(Original {
                source: self.prev.source,
                line: self.prev.line,
                column: self.prev.column,
                name,
            });
        }
        Ok(segment)
    }

    /// Generated columns restart on every line
    pub fn reset_column(&mut self) {
        self.prev.generated_column = 0;
    }

    /// Account for original lines advanced by literal `AACA` segments
    pub fn adjust_line(&mut self, lines: i64) {
        self.prev.line += lines;
    }
}

/// Source map v3 document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    pub version: u8,
    pub sources: Vec<String>,
    pub sources_content: Vec<Option<String>>,
    pub names: Vec<String>,
    pub mappings: String,
    pub file: String,
}

/// A map produced by an earlier tool
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputMap {
    #[serde(default)]
    sources: Vec<String>,
    sources_content: Option<Vec<Option<String>>>,
    #[serde(default)]
    names: Vec<String>,
    mappings: String,
}

impl InputMap {
    /// Absolute segments per generated line, checked against the map's
    /// own sources and names
    fn decode(&self) -> Result<Vec<Vec<Segment>>, MapError> {
        let mut coder = Coder::default();
        let mut lines = Vec::new();
        for line in self.mappings.split(';') {
            coder.reset_column();
            let mut segments = Vec::new();
            for text in line.split(',').filter(|t| !t.is_empty()) {
                let segment = coder.decode(text)?;
                if segment.generated_column < 0 {
                    return Err(MapError::Negative);
                }
                if let Some(original) = segment.original {
                    if original.source < 0 || original.source as usize >= self.sources.len() {
                        return Err(MapError::Source(original.source));
                    }
                    if original.line < 0 || original.column < 0 {
                        return Err(MapError::Negative);
                    }
                    if let Some(name) = original.name {
                        if name < 0 || name as usize >= self.names.len() {
                            return Err(MapError::Name(name));
                        }
                    }
                }
                segments.push(segment);
            }
            lines.push(segments);
        }
        Ok(lines)
    }
}

/// Style of the trailing `sourceMappingURL` comment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MapCommentType {
    #[default]
    Line,
    Block,
}

fn count_newlines(s: &str) -> usize {
    s.bytes().filter(|b| *b == b'\n').count()
}

/// Columns are counted in UTF-16 code units, as browsers do
fn column_width(s: &str) -> i64 {
    s.encode_utf16().count() as i64
}

/// Width of the text after the last newline
fn last_line_width(s: &str) -> Option<i64> {
    s.rfind('\n').map(|i| column_width(&s[i + 1..]))
}

fn map_url_comment() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*(?://[#@] sourceMappingURL=([^\s'\x22]*)|/\*[#@] sourceMappingURL=([^\s'\x22]*)\s*\*/)[ \t]*\r?\n?")
            .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
    })
}

fn data_uri() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^data:.+?;base64,").unwrap_or_else(|e| unreachable!("static pattern: {e}"))
    })
}

/// URL of the last `sourceMappingURL` comment in `source`
fn map_url(source: &str) -> Option<&str> {
    map_url_comment()
        .captures_iter(source)
        .last()
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str())
        .filter(|url| !url.is_empty())
}

/// Builds one output file and its source map
#[derive(Debug)]
pub struct SourceMapConcat {
    out: String,
    map: SourceMap,
    coder: Coder,
    column: i64,
    next_needs_comma: bool,
    /// Directory file names are relative to
    base_dir: Option<PathBuf>,
    sizes: BTreeMap<String, u64>,
}

impl SourceMapConcat {
    /// `file` is the output file name recorded in the map
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            out: String::new(),
            map: SourceMap {
                version: 3,
                sources: Vec::new(),
                sources_content: Vec::new(),
                names: Vec::new(),
                mappings: String::new(),
                file: file.into(),
            },
            coder: Coder::default(),
            column: 0,
            next_needs_comma: false,
            base_dir: None,
            sizes: BTreeMap::new(),
        }
    }

    /// Resolve file names, and the map URLs inside them, from `dir`
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    fn resolve(&self, name: &str) -> PathBuf {
        match &self.base_dir {
            Some(base) => base.join(name),
            None => PathBuf::from(name),
        }
    }

    fn push_segment(&mut self, segment: Segment) {
        if self.next_needs_comma {
            self.map.mappings.push(',');
        }
        let encoded = self.coder.encode(segment);
        self.map.mappings.push_str(&encoded);
        self.next_needs_comma = true;
    }

    fn push_line_break(&mut self) {
        self.map.mappings.push(';');
        self.coder.reset_column();
        self.next_needs_comma = false;
    }

    /// Unmapped text that still moves the line/column position
    pub fn add_space(&mut self, text: &str) {
        self.out.push_str(text);
        let lines = count_newlines(text);
        for _ in 0..lines {
            self.push_line_break();
        }
        self.column = match last_line_width(text) {
            Some(width) => width,
            None => self.column + column_width(text),
        };
    }

    /// Append a file, folding in its own source map when it has a valid one
    pub fn add_file_source(&mut self, name: &str, source: &str) {
        self.sizes.insert(name.to_string(), source.len() as u64);
        if source.is_empty() {
            return;
        }

        let upstream = map_url(source).and_then(|url| match self.load_map(name, url) {
            Ok(loaded) => Some(loaded),
            Err(e) => {
                warn!("ignoring source map {url:?} of {name}: {e}");
                None
            }
        });
        let source = map_url_comment().replace_all(source, "");

        match upstream {
            Some((map, lines)) => {
                let source = self.assimilate(name, map, &lines, &source);
                self.out.push_str(&source);
            }
            None => {
                debug!("generating new map: {name}");
                self.map.sources.push(name.to_string());
                self.map.sources_content.push(Some(source.to_string()));
                self.generate_new_map(&source);
                self.out.push_str(&source);
            }
        }
    }

    fn load_map(&self, name: &str, url: &str) -> Result<(InputMap, Vec<Vec<Segment>>), MapError> {
        let raw = self.read_map(name, url)?;
        let map: InputMap = serde_json::from_slice(&raw)?;
        let lines = map.decode()?;
        Ok((map, lines))
    }

    fn read_map(&self, name: &str, url: &str) -> Result<Vec<u8>, MapError> {
        if let Some(prefix) = data_uri().find(url) {
            let payload = &url[prefix.end()..];
            return match STANDARD.decode(payload) {
                Ok(bytes) => Ok(bytes),
                Err(_) => Ok(STANDARD_NO_PAD.decode(payload)?),
            };
        }
        if url.starts_with("data:") {
            return Err(MapError::Url(url.to_string()));
        }

        let path = match (&self.base_dir, url.strip_prefix('/')) {
            (Some(base), Some(rooted)) => base.join(rooted),
            _ => {
                let file = self.resolve(name);
                file.parent().unwrap_or_else(|| Path::new("")).join(url)
            }
        };
        std::fs::read(&path).map_err(|source| MapError::Read { path, source })
    }

    /// Original sources named by an upstream map without inline content,
    /// read next to the file that referenced them
    fn read_sources_content(&self, name: &str, sources: &[String]) -> Vec<Option<String>> {
        let file = self.resolve(name);
        let dir = file.parent().unwrap_or_else(|| Path::new(""));
        sources
            .iter()
            .map(|source| {
                let path = dir.join(source);
                match std::fs::read(&path) {
                    Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                    Err(e) => {
                        debug!("no content for {}: {e}", path.display());
                        None
                    }
                }
            })
            .collect()
    }

    /// Source names are kept relative to the base directory
    fn relative_source(&self, source: String) -> String {
        let base = self.base_dir.as_deref().and_then(Path::to_str).filter(|b| !b.is_empty());
        match base.and_then(|b| source.strip_prefix(b)) {
            Some(rest) => rest.trim_start_matches('/').to_string(),
            None => source,
        }
    }

    /// Re-encode an upstream map at the current position. Returns the
    /// source, padded when the map covers more lines than it has.
    fn assimilate(&mut self, name: &str, map: InputMap, lines: &[Vec<Segment>], source: &str) -> String {
        let sources_offset = self.map.sources.len() as i64;
        let names_offset = self.map.names.len() as i64;

        let mut contents = match map.sources_content {
            Some(contents) => contents,
            None => self.read_sources_content(name, &map.sources),
        };
        contents.resize(map.sources.len(), None);
        for source in map.sources {
            let source = self.relative_source(source);
            self.map.sources.push(source);
        }
        self.map.sources_content.extend(contents);
        self.map.names.extend(map.names);

        for (index, line) in lines.iter().enumerate() {
            if index > 0 {
                self.push_line_break();
            }
            let offset = if index == 0 { self.column } else { 0 };
            for segment in line {
                self.push_segment(Segment {
                    generated_column: segment.generated_column + offset,
                    original: segment.original.map(|o| Original {
                        source: o.source + sources_offset,
                        name: o.name.map(|n| n + names_offset),
                        ..o
                    }),
                });
            }
        }

        // Upstream maps that are too short or too long for their code
        let mapped = lines.len().saturating_sub(1);
        let mut have = count_newlines(source);
        for _ in mapped..have {
            self.push_line_break();
        }
        let mut source = source.to_string();
        while have < mapped {
            source.push('\n');
            have += 1;
        }

        self.column = match last_line_width(&source) {
            Some(width) => width,
            None => self.column + column_width(&source),
        };
        source
    }

    fn generate_new_map(&mut self, source: &str) {
        let lines = count_newlines(source) as i64;
        self.push_segment(Segment {
            generated_column: self.column,
            original: Some(Original {
                source: self.map.sources.len() as i64 - 1,
                ..Original::default()
            }),
        });

        if lines == 0 {
            self.column += column_width(source);
            return;
        }

        self.push_line_break();
        self.coder.adjust_line(lines - 1);
        for _ in 1..lines {
            self.map.mappings.push_str("AACA;");
        }
        self.column = last_line_width(source).unwrap_or(0);
    }

    /// Per-file byte sizes
    pub fn sizes(&self) -> &BTreeMap<String, u64> {
        &self.sizes
    }

    pub fn is_empty(&self) -> bool {
        self.map.sources.is_empty() && self.out.is_empty()
    }

    /// Finish with the `sourceMappingURL` comment
    pub fn end(mut self, map_url: &str, comment: MapCommentType) -> (String, SourceMap) {
        if !self.out.is_empty() && !self.out.ends_with('\n') {
            self.add_space("\n");
        }
        match comment {
            MapCommentType::Line => {
                self.out.push_str(&format!("//# sourceMappingURL={map_url}\n"));
            }
            MapCommentType::Block => {
                self.out.push_str(&format!("/*# sourceMappingURL={map_url} */\n"));
            }
        }
        (self.out, self.map)
    }
}
