//! Sidecar header parsing.
//!
//! Headers are line-oriented `key = value` text. Values are parsed as:
//!
//! - `{a, b, c}`: a list, each token parsed as a number when it has a numeric
//!   prefix and kept as text otherwise
//! - `{text}` (no comma): the brace-stripped text, *not* a one-element list
//! - anything else: a number when it has a numeric prefix, otherwise text
//!
//! A brace value left open on its line continues over the following lines
//! until a line containing `}`.
//!
//! ```rust,ignore
//! let metadata = Metadata::parse("samples = 4\nlines = 4\nbands = 8\ndata type = 12");
//! let dims = metadata.dimensions()?;
//! ```

use std::collections::BTreeMap;

use serde::Serialize;

use crate::constants::{BYTES_PER_SAMPLE, DATA_TYPE_U16};
use crate::error::{HsiError, Result};

/// One entry of a brace list that mixes numbers and text.
#[derive(Debug, Clone, PartialEq)]
pub enum ListItem {
    Number(f64),
    Text(String),
}

/// A parsed header value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Number(f64),
    Text(String),
    NumberList(Vec<f64>),
    TextList(Vec<String>),
    /// Brace list with both numeric and non-numeric tokens.
    MixedList(Vec<ListItem>),
}

impl MetadataValue {
    /// Parse a trimmed value string.
    fn parse(value: &str) -> Self {
        if value.len() >= 2 && value.starts_with('{') && value.ends_with('}') {
            let inner = &value[1..value.len() - 1];
            if inner.contains(',') {
                return Self::from_items(inner.split(',').map(|token| {
                    let token = token.trim();
                    match parse_float_prefix(token) {
                        Some(n) => ListItem::Number(n),
                        None => ListItem::Text(token.to_string()),
                    }
                }));
            }
            return Self::Text(inner.to_string());
        }

        match parse_float_prefix(value) {
            Some(n) => Self::Number(n),
            None => Self::Text(value.to_string()),
        }
    }

    fn from_items(items: impl Iterator<Item = ListItem>) -> Self {
        let items: Vec<ListItem> = items.collect();
        if items.iter().all(|i| matches!(i, ListItem::Number(_))) {
            Self::NumberList(
                items
                    .into_iter()
                    .filter_map(|i| match i {
                        ListItem::Number(n) => Some(n),
                        ListItem::Text(_) => None,
                    })
                    .collect(),
            )
        } else if items.iter().all(|i| matches!(i, ListItem::Text(_))) {
            Self::TextList(
                items
                    .into_iter()
                    .filter_map(|i| match i {
                        ListItem::Text(t) => Some(t),
                        ListItem::Number(_) => None,
                    })
                    .collect(),
            )
        } else {
            Self::MixedList(items)
        }
    }

    /// Name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Text(_) => "string",
            Self::NumberList(_) => "number list",
            Self::TextList(_) => "string list",
            Self::MixedList(_) => "mixed list",
        }
    }
}

/// Parse the longest numeric prefix of `text`, the way browsers' `parseFloat` does.
///
/// Returns `None` when no digits lead the string.
pub fn parse_float_prefix(text: &str) -> Option<f64> {
    let s = text.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    if s[end..].starts_with("Infinity") {
        return s[..end + "Infinity".len()].parse().ok();
    }

    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut mantissa_digits = end - int_start;

    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        mantissa_digits += frac_end - frac_start;
        if mantissa_digits > 0 {
            end = frac_end;
        }
    }
    if mantissa_digits == 0 {
        return None;
    }

    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && matches!(bytes[exp_end], b'+' | b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    s[..end].parse().ok()
}

/// Split `key = value` if the key is made of word characters separated by whitespace.
fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || value.is_empty() {
        return None;
    }
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    if !key.chars().all(|c| is_word(c) || c == ' ' || c == '\t') {
        return None;
    }
    Some((key, value.trim()))
}

/// Join the lines following an open `{` up to the one that closes it.
///
/// Returns `None` when an assignment or the end of input comes first, in
/// which case the opening line keeps its own text.
fn continue_brace<'a>(
    first: &str,
    mut lines: std::str::Lines<'a>,
) -> Option<(String, std::str::Lines<'a>)> {
    let mut value = first.to_string();
    loop {
        let next = lines.next()?;
        if split_assignment(next.trim_start()).is_some() {
            return None;
        }
        value.push(' ');
        value.push_str(next.trim());
        if next.contains('}') {
            return Some((value, lines));
        }
    }
}

/// Cube dimensions declared by the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    /// Spatial width (pixels per line)
    pub samples: usize,
    /// Spatial height (scan lines)
    pub lines: usize,
    /// Spectral depth
    pub bands: usize,
}

impl Dimensions {
    /// Create dimensions, rejecting zero sizes and overflowing products.
    pub fn new(samples: usize, lines: usize, bands: usize) -> Result<Self> {
        if samples == 0 || lines == 0 || bands == 0 {
            return Err(HsiError::invalid_metadata(format!(
                "zero-sized cube {samples}x{lines}x{bands}"
            )));
        }
        samples
            .checked_mul(lines)
            .and_then(|n| n.checked_mul(bands))
            .and_then(|n| n.checked_mul(BYTES_PER_SAMPLE))
            .ok_or_else(|| {
                HsiError::invalid_metadata(format!(
                    "cube {samples}x{lines}x{bands} does not fit in memory addressing"
                ))
            })?;
        Ok(Self {
            samples,
            lines,
            bands,
        })
    }

    /// Total raw element count (`samples * lines * bands`).
    pub fn voxel_count(&self) -> usize {
        self.samples * self.lines * self.bands
    }

    /// Element count of one band plane.
    pub fn plane_len(&self) -> usize {
        self.samples * self.lines
    }

    /// Bytes occupied by one scan line across all bands.
    pub fn bytes_per_line(&self) -> usize {
        self.samples * self.bands * BYTES_PER_SAMPLE
    }

    /// Bytes occupied by the whole cube.
    pub fn byte_len(&self) -> u64 {
        (self.voxel_count() * BYTES_PER_SAMPLE) as u64
    }

    /// Linear index of a voxel in band-interleaved-by-line order.
    #[inline]
    pub fn linear_index(&self, line: usize, band: usize, sample: usize) -> usize {
        line * self.bands * self.samples + band * self.samples + sample
    }

    /// Index of a pixel inside a sample-major band plane.
    #[inline]
    pub fn plane_index(&self, line: usize, sample: usize) -> usize {
        sample * self.lines + line
    }

    /// Whether `(line, sample)` lies inside the cube.
    pub fn contains(&self, line: i64, sample: i64) -> bool {
        line >= 0 && sample >= 0 && (line as usize) < self.lines && (sample as usize) < self.samples
    }

    /// Validate a band index.
    pub fn check_band(&self, band: usize) -> Result<()> {
        if band < self.bands {
            Ok(())
        } else {
            Err(HsiError::invalid_index("band", band as i64, self.bands))
        }
    }

    /// Validate a pixel coordinate and convert it to unsigned indices.
    pub fn check_pixel(&self, line: i64, sample: i64) -> Result<(usize, usize)> {
        if line < 0 || line as usize >= self.lines {
            return Err(HsiError::invalid_index("line", line, self.lines));
        }
        if sample < 0 || sample as usize >= self.samples {
            return Err(HsiError::invalid_index("sample", sample, self.samples));
        }
        Ok((line as usize, sample as usize))
    }
}

/// Header fields keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    fields: BTreeMap<String, MetadataValue>,
}

impl Metadata {
    /// Parse header text. Lines that are not assignments are skipped.
    pub fn parse(text: &str) -> Self {
        let mut fields = BTreeMap::new();
        let mut lines = text.lines();

        while let Some(line) = lines.next() {
            let Some((key, value)) = split_assignment(line.trim_start()) else {
                continue;
            };

            let mut value = value.to_string();
            if value.starts_with('{') && !value.contains('}') {
                if let Some((joined, rest)) = continue_brace(&value, lines.clone()) {
                    value = joined;
                    lines = rest;
                }
            }

            fields.insert(key.to_string(), MetadataValue::parse(value.trim()));
        }

        log::debug!("Header parsed: {} fields", fields.len());
        Self { fields }
    }

    /// Raw access to a field.
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.fields.get(key)
    }

    /// Iterate over all fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of parsed fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no field was parsed.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn require(&self, key: &str) -> Result<&MetadataValue> {
        self.fields
            .get(key)
            .ok_or_else(|| HsiError::missing_field(key))
    }

    /// Numeric field.
    pub fn number(&self, key: &str) -> Result<f64> {
        match self.require(key)? {
            MetadataValue::Number(n) => Ok(*n),
            _ => Err(HsiError::metadata_type(key, "number")),
        }
    }

    /// Text field.
    pub fn text(&self, key: &str) -> Result<&str> {
        match self.require(key)? {
            MetadataValue::Text(s) => Ok(s),
            _ => Err(HsiError::metadata_type(key, "string")),
        }
    }

    /// Numeric list field.
    pub fn number_list(&self, key: &str) -> Result<&[f64]> {
        match self.require(key)? {
            MetadataValue::NumberList(v) => Ok(v),
            _ => Err(HsiError::metadata_type(key, "number list")),
        }
    }

    /// Text list field.
    pub fn text_list(&self, key: &str) -> Result<&[String]> {
        match self.require(key)? {
            MetadataValue::TextList(v) => Ok(v),
            _ => Err(HsiError::metadata_type(key, "string list")),
        }
    }

    fn dimension(&self, key: &str) -> Result<usize> {
        let value = match self.number(key) {
            Ok(n) => n,
            Err(HsiError::MissingField { .. }) => {
                return Err(HsiError::invalid_metadata(format!("missing dimension '{key}'")));
            }
            Err(_) => {
                return Err(HsiError::invalid_metadata(format!(
                    "dimension '{key}' is not a number"
                )));
            }
        };
        if !value.is_finite() || value < 1.0 || value.fract() != 0.0 {
            return Err(HsiError::invalid_metadata(format!(
                "dimension '{key}' must be a positive integer, got {value}"
            )));
        }
        Ok(value as usize)
    }

    /// Cube dimensions from `samples`, `lines` and `bands`.
    ///
    /// A `data type` other than 12 only produces a warning; the cube is
    /// always read as unsigned 16-bit samples.
    pub fn dimensions(&self) -> Result<Dimensions> {
        let dims = Dimensions::new(
            self.dimension("samples")?,
            self.dimension("lines")?,
            self.dimension("bands")?,
        )?;

        match self.get("data type") {
            Some(MetadataValue::Number(n)) if *n == DATA_TYPE_U16 as f64 => {}
            other => log::warn!("Unexpected data type: {:?}, assuming uint16", other),
        }

        Ok(dims)
    }

    /// Band centre wavelengths, empty when the header has none.
    ///
    /// A single-band `{value}` list is stored as text and is parsed back here.
    pub fn wavelengths(&self) -> Vec<f64> {
        match self.get("wavelength") {
            Some(MetadataValue::NumberList(v)) => v.clone(),
            Some(MetadataValue::MixedList(items)) => items
                .iter()
                .filter_map(|i| match i {
                    ListItem::Number(n) => Some(*n),
                    ListItem::Text(_) => None,
                })
                .collect(),
            Some(MetadataValue::Number(n)) => vec![*n],
            Some(MetadataValue::Text(s)) => parse_float_prefix(s).into_iter().collect(),
            _ => Vec::new(),
        }
    }

    /// The `default bands` triple, if present with exactly three numbers.
    pub fn default_bands(&self) -> Option<[f64; 3]> {
        match self.get("default bands") {
            Some(MetadataValue::NumberList(v)) if v.len() == 3 => Some([v[0], v[1], v[2]]),
            _ => None,
        }
    }
}
