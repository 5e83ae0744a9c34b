//! Dark/white reference calibration.
//!
//! Every calibrated value, whether precomputed over a resident cube or
//! computed lazily for an on-demand band or spectrum, goes through
//! [`calibrate_voxel`], so both paths agree bit for bit.

use ndarray::Array3;

use crate::band::BandPlane;
use crate::error::Result;
use crate::header::Dimensions;
use crate::reader::decode_le_u16;

/// Which reference frame a file provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Detector offset frame
    Dark,
    /// Response normalization frame
    White,
}

impl ReferenceKind {
    /// Lowercase name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ReferenceKind::Dark => "dark",
            ReferenceKind::White => "white",
        }
    }
}

/// A dark or white reference frame.
///
/// A field with exactly `bands` values is spectral: one value per band,
/// broadcast over every pixel. Any other length is read per voxel in the
/// cube's own layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceField {
    values: Vec<u16>,
}

impl ReferenceField {
    /// Wrap decoded reference values.
    pub fn new(values: Vec<u16>) -> Self {
        Self { values }
    }

    /// Decode a raw little-endian reference file. A trailing odd byte is dropped.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let even = bytes.len() - bytes.len() % 2;
        if even != bytes.len() {
            log::warn!(
                "Calibration file has odd byte length: {}, trimming last byte",
                bytes.len()
            );
        }
        Ok(Self::new(decode_le_u16(&bytes[..even])?))
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the field is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether the field holds one value per band.
    pub fn is_spectral(&self, bands: usize) -> bool {
        self.values.len() == bands
    }

    /// Reference value for a voxel; missing per-voxel entries read as zero.
    #[inline]
    pub fn value(&self, band: usize, linear: usize, bands: usize) -> f32 {
        let index = if self.is_spectral(bands) { band } else { linear };
        self.values.get(index).copied().map_or(0.0, f32::from)
    }
}

/// Calibrate one value.
///
/// `dark` and `white` are `Some` only when that correction is active.
/// Dark subtraction clamps at zero; white normalization divides by
/// `white - dark` and is skipped when that is not positive.
#[inline]
pub fn calibrate_voxel(raw: f32, dark: Option<f32>, white: Option<f32>) -> f32 {
    let mut value = raw;
    if let Some(dark) = dark {
        value = (value - dark).max(0.0);
    }
    if let Some(white) = white {
        let denominator = white - dark.unwrap_or(0.0);
        if denominator > 0.0 {
            value /= denominator;
        }
    }
    value
}

/// Loaded reference fields and the active correction flags.
#[derive(Debug, Clone)]
pub struct Calibration {
    bands: usize,
    dark: Option<ReferenceField>,
    white: Option<ReferenceField>,
    use_dark: bool,
    use_white: bool,
}

impl Calibration {
    /// No references, no correction.
    pub fn new(bands: usize) -> Self {
        Self {
            bands,
            dark: None,
            white: None,
            use_dark: false,
            use_white: false,
        }
    }

    /// Install a reference field. Flags are left untouched.
    pub fn set_reference(&mut self, kind: ReferenceKind, field: ReferenceField) {
        log::info!(
            "{} field loaded: {} values ({})",
            kind.name(),
            field.len(),
            if field.is_spectral(self.bands) {
                "spectral"
            } else {
                "per-voxel"
            }
        );
        match kind {
            ReferenceKind::Dark => self.dark = Some(field),
            ReferenceKind::White => self.white = Some(field),
        }
    }

    /// Reference field of the given kind, if loaded.
    pub fn reference(&self, kind: ReferenceKind) -> Option<&ReferenceField> {
        match kind {
            ReferenceKind::Dark => self.dark.as_ref(),
            ReferenceKind::White => self.white.as_ref(),
        }
    }

    /// Request corrections; each is enabled only if its field is loaded.
    pub fn set_flags(&mut self, use_dark: bool, use_white: bool) {
        self.use_dark = use_dark && self.dark.is_some();
        self.use_white = use_white && self.white.is_some();
    }

    /// Whether dark subtraction is active.
    pub fn use_dark(&self) -> bool {
        self.use_dark
    }

    /// Whether white normalization is active.
    pub fn use_white(&self) -> bool {
        self.use_white
    }

    /// Whether any correction is active.
    pub fn is_active(&self) -> bool {
        self.use_dark || self.use_white
    }

    /// Calibrate one voxel given its band and linear BIL index.
    #[inline]
    pub fn voxel(&self, raw: f32, band: usize, linear: usize) -> f32 {
        let reference = |field: &Option<ReferenceField>, active: bool| {
            field
                .as_ref()
                .filter(|_| active)
                .map(|f| f.value(band, linear, self.bands))
        };
        calibrate_voxel(
            raw,
            reference(&self.dark, self.use_dark),
            reference(&self.white, self.use_white),
        )
    }

    /// Calibrated copy of a resident cube, or `None` when no correction is active.
    pub fn calibrate_cube(&self, raw: &Array3<u16>, dims: &Dimensions) -> Option<Array3<f32>> {
        if !self.is_active() {
            return None;
        }
        Some(Array3::from_shape_fn(raw.dim(), |(line, band, sample)| {
            self.voxel(
                f32::from(raw[[line, band, sample]]),
                band,
                dims.linear_index(line, band, sample),
            )
        }))
    }

    /// Calibrate a raw band plane lazily.
    pub fn calibrate_band(
        &self,
        raw: &BandPlane<u16>,
        band: usize,
        dims: &Dimensions,
    ) -> BandPlane<f32> {
        if !self.is_active() {
            return raw.mapv(f32::from);
        }
        BandPlane::from_shape_fn(raw.dim(), |(sample, line)| {
            self.voxel(
                f32::from(raw[[sample, line]]),
                band,
                dims.linear_index(line, band, sample),
            )
        })
    }

    /// Calibrate a single-pixel spectrum in place.
    ///
    /// Coordinates are clamped into the cube for per-voxel lookups.
    pub fn calibrate_spectrum(
        &self,
        values: &mut [f32],
        line: usize,
        sample: usize,
        dims: &Dimensions,
    ) {
        if !self.is_active() {
            return;
        }
        let line = line.min(dims.lines - 1);
        let sample = sample.min(dims.samples - 1);
        for (band, value) in values.iter_mut().enumerate() {
            *value = self.voxel(*value, band, dims.linear_index(line, band, sample));
        }
    }
}
