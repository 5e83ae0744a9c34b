//! The cube engine.
//!
//! [`HsiCube`] owns everything derived from one header and raw file: the
//! parsed metadata, either the resident raw cube or an on-demand reader
//! with its band cache, the calibration references and, in full-load mode,
//! the precomputed calibrated cube. A new header means a new `HsiCube`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ndarray::{Array3, Axis, Zip};
use serde::Serialize;
use web_time::Instant;

use crate::band::{BandCache, BandPlane};
use crate::calibration::{Calibration, ReferenceField, ReferenceKind};
use crate::config::EngineConfig;
use crate::constants::FALLBACK_RGB_BANDS;
use crate::error::{HsiError, Result};
use crate::header::{Dimensions, Metadata};
use crate::reader::{ChunkPlan, ChunkedReader, decode_le_u16};
use crate::source::{ByteSource, MemorySource};

/// Snapshot of cache activity, for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Band cache hits
    pub band_hits: u64,
    /// Band cache misses
    pub band_misses: u64,
    /// Resident band planes, oldest first
    pub resident_bands: Vec<usize>,
    /// Resident line chunks, oldest first
    pub resident_chunks: Vec<usize>,
}

enum Storage<S> {
    Full {
        raw: Array3<u16>,
        calibrated: Option<Array3<f32>>,
    },
    OnDemand {
        reader: ChunkedReader<S>,
        bands: BandCache,
    },
}

static NEXT_CUBE_ID: AtomicU64 = AtomicU64::new(0);

/// A loaded hyperspectral cube.
pub struct HsiCube<S> {
    id: u64,
    metadata: Metadata,
    dims: Dimensions,
    wavelengths: Vec<f64>,
    storage: Storage<S>,
    calibration: Calibration,
    revision: u64,
}

/// Decode a complete raw buffer into a `(lines, bands, samples)` cube.
///
/// Extra trailing samples beyond the declared size are ignored.
fn decode_cube(bytes: &[u8], dims: &Dimensions) -> Result<Array3<u16>> {
    let mut values = decode_le_u16(bytes)?;
    let expected = dims.voxel_count();
    if values.len() < expected {
        return Err(HsiError::malformed_buffer(format!(
            "expected {expected} samples for {}x{}x{}, buffer holds {}",
            dims.samples,
            dims.lines,
            dims.bands,
            values.len()
        )));
    }
    values.truncate(expected);
    Array3::from_shape_vec((dims.lines, dims.bands, dims.samples), values)
        .map_err(|e| HsiError::malformed_buffer(e.to_string()))
}

/// Fill one sample-major plane per requested band in a single pass over the lines.
fn batch_planes<T: Copy + Into<f32>>(
    cube: &Array3<T>,
    bands: &[usize],
    dims: &Dimensions,
) -> Vec<BandPlane<f32>> {
    let mut planes = vec![BandPlane::<f32>::zeros((dims.samples, dims.lines)); bands.len()];
    for (line, line_view) in cube.outer_iter().enumerate() {
        for (plane, &band) in planes.iter_mut().zip(bands) {
            Zip::from(plane.column_mut(line))
                .and(line_view.row(band))
                .for_each(|out, &value| *out = value.into());
        }
    }
    planes
}

impl HsiCube<MemorySource> {
    /// Load a cube fully from an in-memory buffer.
    pub fn from_bytes(metadata: Metadata, bytes: &[u8]) -> Result<Self> {
        let dims = metadata.dimensions()?;
        let raw = decode_cube(bytes, &dims)?;
        Ok(Self::with_storage(
            metadata,
            dims,
            Storage::Full {
                raw,
                calibrated: None,
            },
        ))
    }
}

impl<S: ByteSource> HsiCube<S> {
    fn with_storage(metadata: Metadata, dims: Dimensions, storage: Storage<S>) -> Self {
        let wavelengths = metadata.wavelengths();
        if !wavelengths.is_empty() && wavelengths.len() != dims.bands {
            log::warn!(
                "Header lists {} wavelengths for {} bands",
                wavelengths.len(),
                dims.bands
            );
        }
        Self {
            id: NEXT_CUBE_ID.fetch_add(1, Ordering::Relaxed),
            calibration: Calibration::new(dims.bands),
            metadata,
            dims,
            wavelengths,
            storage,
            revision: 0,
        }
    }

    /// Open a cube, choosing full-load or on-demand mode from the source size.
    pub async fn open(metadata: Metadata, source: S, config: &EngineConfig) -> Result<Self> {
        let dims = metadata.dimensions()?;
        let size = source.size();

        let storage = if size >= config.large_file_threshold {
            if size < dims.byte_len() {
                return Err(HsiError::malformed_buffer(format!(
                    "source holds {size} bytes, cube needs {}",
                    dims.byte_len()
                )));
            }
            let plan = ChunkPlan::adaptive(size, &dims)
                .with_overrides(config.chunk_lines, config.max_line_chunks);
            Storage::OnDemand {
                reader: ChunkedReader::new(source, dims, plan),
                bands: BandCache::new(config.max_band_cache),
            }
        } else {
            let started = Instant::now();
            let bytes = source.read_all().await?;
            let raw = decode_cube(&bytes, &dims)?;
            log::info!(
                "Full-load mode: {:.1} MB decoded in {:?}",
                bytes.len() as f64 / (1024.0 * 1024.0),
                started.elapsed()
            );
            Storage::Full {
                raw,
                calibrated: None,
            }
        };

        Ok(Self::with_storage(metadata, dims, storage))
    }

    /// Parsed header.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Cube dimensions.
    pub fn dimensions(&self) -> Dimensions {
        self.dims
    }

    /// Band centre wavelengths as listed in the header.
    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    /// Wavelength of one band, if listed.
    pub fn wavelength(&self, band: usize) -> Option<f64> {
        self.wavelengths.get(band).copied()
    }

    /// X axis for spectra: wavelengths when every band has one, band indices otherwise.
    pub fn spectral_axis(&self) -> Vec<f64> {
        if self.wavelengths.len() == self.dims.bands {
            self.wavelengths.clone()
        } else {
            (0..self.dims.bands).map(|b| b as f64).collect()
        }
    }

    /// Whether the cube is read on demand rather than held in memory.
    pub fn is_on_demand(&self) -> bool {
        matches!(self.storage, Storage::OnDemand { .. })
    }

    /// Active calibration state.
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Identifier unique to this cube within the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Counter bumped whenever calibrated values may have changed.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Band triple for an RGB preview, clamped into the cube.
    pub fn default_rgb_bands(&self) -> [usize; 3] {
        let last = self.dims.bands - 1;
        match self.metadata.default_bands() {
            Some(bands) => bands.map(|b| (b.max(0.0) as usize).min(last)),
            None => FALLBACK_RGB_BANDS.map(|b| b.min(last)),
        }
    }

    /// Band whose wavelength is nearest to `target`.
    pub fn closest_band(&self, target: f64) -> Option<usize> {
        self.wavelengths
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (*a - target).abs().total_cmp(&(*b - target).abs()))
            .map(|(band, _)| band)
    }

    /// Cache activity; all zero in full-load mode.
    pub fn cache_stats(&self) -> CacheStats {
        match &self.storage {
            Storage::Full { .. } => CacheStats::default(),
            Storage::OnDemand { reader, bands } => CacheStats {
                band_hits: bands.hits(),
                band_misses: bands.misses(),
                resident_bands: bands.resident(),
                resident_chunks: reader.resident_chunks(),
            },
        }
    }

    /// Load a dark or white reference from raw little-endian bytes.
    ///
    /// Active flags stay as they are; a resident calibrated cube is rebuilt.
    pub fn load_reference(&mut self, bytes: &[u8], kind: ReferenceKind) -> Result<()> {
        let field = ReferenceField::from_bytes(bytes)?;
        self.calibration.set_reference(kind, field);
        self.refresh_calibrated();
        Ok(())
    }

    /// Enable or disable dark and white correction.
    ///
    /// A flag only takes effect if its reference is loaded. In full-load mode
    /// the calibrated cube is recomputed from scratch.
    pub fn apply_calibration(&mut self, use_dark: bool, use_white: bool) {
        self.calibration.set_flags(use_dark, use_white);
        log::info!(
            "Calibration applied: dark={}, white={}",
            self.calibration.use_dark(),
            self.calibration.use_white()
        );
        self.refresh_calibrated();
    }

    fn refresh_calibrated(&mut self) {
        self.revision += 1;
        if let Storage::Full { raw, calibrated } = &mut self.storage {
            let started = Instant::now();
            *calibrated = self.calibration.calibrate_cube(raw, &self.dims);
            if calibrated.is_some() {
                log::debug!("Calibrated cube rebuilt in {:?}", started.elapsed());
            }
        }
    }

    /// Raw band plane.
    pub async fn band_data(&mut self, band: usize) -> Result<Arc<BandPlane<u16>>> {
        self.dims.check_band(band)?;
        match &mut self.storage {
            Storage::Full { raw, .. } => {
                let mut plane = BandPlane::<u16>::zeros((self.dims.samples, self.dims.lines));
                plane.assign(&raw.index_axis(Axis(1), band).t());
                Ok(Arc::new(plane))
            }
            Storage::OnDemand { reader, bands } => bands.load_band_on_demand(reader, band).await,
        }
    }

    /// Band plane with the active calibration applied.
    pub async fn band_data_calibrated(&mut self, band: usize) -> Result<BandPlane<f32>> {
        let mut planes = self.band_data_batch(&[band]).await?;
        planes
            .pop()
            .ok_or_else(|| HsiError::invalid_index("band", band as i64, self.dims.bands))
    }

    /// Several calibrated band planes.
    ///
    /// In full-load mode all planes are filled in one pass over the cube.
    /// On demand, bands are reconstructed one after another in request order.
    pub async fn band_data_batch(&mut self, bands: &[usize]) -> Result<Vec<BandPlane<f32>>> {
        for &band in bands {
            self.dims.check_band(band)?;
        }
        let dims = self.dims;

        match &mut self.storage {
            Storage::Full { raw, calibrated } => Ok(match calibrated.as_ref() {
                Some(calibrated) => batch_planes(calibrated, bands, &dims),
                None => batch_planes(&*raw, bands, &dims),
            }),
            Storage::OnDemand { reader, bands: cache } => {
                let mut planes = Vec::with_capacity(bands.len());
                for &band in bands {
                    let raw = cache.load_band_on_demand(reader, band).await?;
                    planes.push(self.calibration.calibrate_band(&raw, band, &dims));
                }
                Ok(planes)
            }
        }
    }

    /// Calibrated spectrum of one pixel from a single line chunk.
    ///
    /// Only available on demand; resident cubes go through band planes.
    pub async fn point_spectrum_fast(&mut self, line: usize, sample: usize) -> Result<Vec<f32>> {
        match &mut self.storage {
            Storage::Full { .. } => Err(HsiError::UninitializedState(
                "no line-chunk reader in full-load mode".to_string(),
            )),
            Storage::OnDemand { reader, .. } => {
                let mut values = reader.point_spectrum(line, sample).await?;
                self.calibration
                    .calibrate_spectrum(&mut values, line, sample, &self.dims);
                Ok(values)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn header(samples: usize, lines: usize, bands: usize) -> Metadata {
        let wavelengths: Vec<String> = (0..bands).map(|b| format!("{}", 400 + 10 * b)).collect();
        Metadata::parse(&format!(
            "ENVI\nsamples = {samples}\nlines = {lines}\nbands = {bands}\ndata type = 12\n\
             interleave = bil\nwavelength = {{{}}}\n",
            wavelengths.join(", ")
        ))
    }

    /// Raw bytes whose values encode a distinct number per voxel.
    pub(crate) fn synthetic_bytes(dims: &Dimensions) -> Vec<u8> {
        (0..dims.voxel_count())
            .flat_map(|i| ((i * 7 % 1000) as u16 + 50).to_le_bytes())
            .collect()
    }

    pub(crate) fn open(
        samples: usize,
        lines: usize,
        bands: usize,
        on_demand: bool,
    ) -> HsiCube<MemorySource> {
        let metadata = header(samples, lines, bands);
        let dims = metadata.dimensions().unwrap();
        let config = EngineConfig {
            large_file_threshold: if on_demand { 0 } else { u64::MAX },
            chunk_lines: Some(2),
            max_line_chunks: Some(2),
            ..EngineConfig::default()
        };
        let source = MemorySource::new(synthetic_bytes(&dims));
        pollster::block_on(HsiCube::open(metadata, source, &config)).unwrap()
    }

    #[test]
    fn test_mode_selection() {
        assert!(!open(4, 4, 8, false).is_on_demand());
        assert!(open(4, 4, 8, true).is_on_demand());
        let cube = HsiCube::from_bytes(header(2, 2, 2), &[0; 16]).unwrap();
        assert!(!cube.is_on_demand());
    }

    #[test]
    fn test_threshold_boundary() {
        let metadata = header(4, 4, 8);
        let dims = metadata.dimensions().unwrap();
        let source = MemorySource::new(synthetic_bytes(&dims));
        let size = source.size();

        let at = EngineConfig {
            large_file_threshold: size,
            ..EngineConfig::default()
        };
        let cube = pollster::block_on(HsiCube::open(metadata.clone(), source, &at)).unwrap();
        assert!(cube.is_on_demand());

        let above = EngineConfig {
            large_file_threshold: size + 1,
            ..EngineConfig::default()
        };
        let source = MemorySource::new(synthetic_bytes(&dims));
        let cube = pollster::block_on(HsiCube::open(metadata, source, &above)).unwrap();
        assert!(!cube.is_on_demand());
    }

    #[test]
    fn test_short_buffer_rejected() {
        let metadata = header(4, 4, 8);
        let dims = metadata.dimensions().unwrap();
        let mut bytes = synthetic_bytes(&dims);
        bytes.truncate(bytes.len() - 2);

        assert!(matches!(
            HsiCube::from_bytes(metadata.clone(), &bytes),
            Err(HsiError::MalformedBuffer { .. })
        ));
        let config = EngineConfig {
            large_file_threshold: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            pollster::block_on(HsiCube::open(metadata.clone(), MemorySource::new(bytes), &config)),
            Err(HsiError::MalformedBuffer { .. })
        ));

        // Odd length and oversize buffers
        let mut odd = synthetic_bytes(&dims);
        odd.push(0);
        assert!(HsiCube::from_bytes(metadata.clone(), &odd).is_err());
        let mut longer = synthetic_bytes(&dims);
        longer.extend_from_slice(&[1, 0, 2, 0]);
        assert!(HsiCube::from_bytes(metadata, &longer).is_ok());
    }

    #[test]
    fn test_missing_dimensions() {
        let metadata = Metadata::parse("samples = 4\nlines = 4\n");
        assert!(matches!(
            HsiCube::from_bytes(metadata, &[]),
            Err(HsiError::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn test_band_plane_layout() {
        let mut cube = open(4, 3, 5, false);
        let dims = cube.dimensions();
        let bytes = synthetic_bytes(&dims);
        let raw = decode_le_u16(&bytes).unwrap();

        let plane = pollster::block_on(cube.band_data(2)).unwrap();
        let flat = plane.as_slice().unwrap();
        for line in 0..dims.lines {
            for sample in 0..dims.samples {
                assert_eq!(
                    flat[dims.plane_index(line, sample)],
                    raw[dims.linear_index(line, 2, sample)]
                );
            }
        }
    }

    #[test]
    fn test_modes_agree_on_bands_and_points() {
        let mut full = open(4, 4, 8, false);
        let mut lazy = open(4, 4, 8, true);

        for band in 0..8 {
            let a = pollster::block_on(full.band_data_calibrated(band)).unwrap();
            let b = pollster::block_on(lazy.band_data_calibrated(band)).unwrap();
            assert_eq!(a, b);
        }

        for line in 0..4 {
            for sample in 0..4 {
                let fast = pollster::block_on(lazy.point_spectrum_fast(line, sample)).unwrap();
                for (band, value) in fast.iter().enumerate() {
                    let plane = pollster::block_on(full.band_data_calibrated(band)).unwrap();
                    assert_eq!(*value, plane[[sample, line]]);
                }
            }
        }
        assert!(matches!(
            pollster::block_on(full.point_spectrum_fast(0, 0)),
            Err(HsiError::UninitializedState(_))
        ));
    }

    #[test]
    fn test_batch_matches_single_bands() {
        for on_demand in [false, true] {
            let mut cube = open(3, 5, 6, on_demand);
            let batch = pollster::block_on(cube.band_data_batch(&[5, 0, 3])).unwrap();
            assert_eq!(batch.len(), 3);
            for (plane, band) in batch.iter().zip([5, 0, 3]) {
                assert_eq!(*plane, pollster::block_on(cube.band_data_calibrated(band)).unwrap());
            }
        }
    }

    #[test]
    fn test_invalid_band_index() {
        let mut cube = open(4, 4, 8, true);
        assert!(matches!(
            pollster::block_on(cube.band_data(8)),
            Err(HsiError::InvalidIndex { kind: "band", .. })
        ));
        assert!(pollster::block_on(cube.band_data_batch(&[1, 9])).is_err());
    }

    #[test]
    fn test_dark_calibration_in_both_modes() {
        let dark: Vec<u8> = (0..8u16).flat_map(|b| (100 + b * 20).to_le_bytes()).collect();

        for on_demand in [false, true] {
            let mut cube = open(4, 4, 8, on_demand);
            let raw: Vec<_> = (0..8)
                .map(|b| pollster::block_on(cube.band_data(b)).unwrap())
                .collect();

            cube.load_reference(&dark, ReferenceKind::Dark).unwrap();
            cube.apply_calibration(true, false);
            for (band, raw) in raw.iter().enumerate() {
                let calibrated = pollster::block_on(cube.band_data_calibrated(band)).unwrap();
                let expected = raw.mapv(|v| (f32::from(v) - f32::from(100 + band as u16 * 20)).max(0.0));
                assert_eq!(calibrated, expected);
            }

            // Turning calibration off restores raw values
            cube.apply_calibration(false, false);
            cube.apply_calibration(false, false);
            assert!(!cube.calibration().is_active());
            for (band, raw) in raw.iter().enumerate() {
                let plane = pollster::block_on(cube.band_data_calibrated(band)).unwrap();
                assert_eq!(plane, raw.mapv(f32::from));
            }
        }
    }

    #[test]
    fn test_white_without_reference_is_ignored() {
        let mut cube = open(2, 2, 3, false);
        let before = cube.revision();
        cube.apply_calibration(false, true);
        assert!(!cube.calibration().use_white());
        assert!(cube.revision() > before);
    }

    #[test]
    fn test_wavelength_helpers() {
        let cube = open(2, 2, 4, false);
        assert_eq!(cube.wavelengths(), &[400.0, 410.0, 420.0, 430.0]);
        assert_eq!(cube.wavelength(1), Some(410.0));
        assert_eq!(cube.wavelength(4), None);
        assert_eq!(cube.spectral_axis(), vec![400.0, 410.0, 420.0, 430.0]);
        assert_eq!(cube.closest_band(426.0), Some(3));
        assert_eq!(cube.closest_band(0.0), Some(0));

        let bare = HsiCube::from_bytes(Metadata::parse("samples = 1\nlines = 1\nbands = 3\n"), &[0; 6])
            .unwrap();
        assert_eq!(bare.spectral_axis(), vec![0.0, 1.0, 2.0]);
        assert_eq!(bare.closest_band(500.0), None);
    }

    #[test]
    fn test_default_rgb_bands() {
        assert_eq!(open(2, 2, 8, false).default_rgb_bands(), [7, 7, 7]);
        assert_eq!(open(2, 2, 200, false).default_rgb_bands(), [123, 67, 25]);

        let metadata = Metadata::parse("samples = 1\nlines = 1\nbands = 6\ndefault bands = {5, 3, 9}\n");
        let cube = HsiCube::from_bytes(metadata, &[0; 12]).unwrap();
        assert_eq!(cube.default_rgb_bands(), [5, 3, 5]);
    }

    #[test]
    fn test_cache_stats() {
        let mut cube = open(4, 4, 8, true);
        pollster::block_on(cube.band_data(1)).unwrap();
        pollster::block_on(cube.band_data(1)).unwrap();
        let stats = cube.cache_stats();
        assert_eq!(stats.band_hits, 1);
        assert_eq!(stats.band_misses, 1);
        assert_eq!(stats.resident_bands, vec![1]);
        assert_eq!(stats.resident_chunks, vec![0, 1]);

        assert_eq!(open(4, 4, 8, false).cache_stats(), CacheStats::default());
    }
}
