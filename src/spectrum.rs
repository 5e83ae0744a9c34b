//! Spectrum extraction for points and annotated regions.

use serde::Serialize;

use crate::annotation::{Annotation, Pixel, Shape, sample_pixels};
use crate::cache::{EvictionPolicy, FifoCache};
use crate::config::EngineConfig;
use crate::constants::{BAND_PROGRESS_STRIDE, PIXEL_PROGRESS_STRIDE};
use crate::cube::HsiCube;
use crate::error::{HsiError, Result};
use crate::header::Dimensions;
use crate::source::ByteSource;

/// Per-band values aligned with a spectral axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spectrum {
    /// Wavelength (or band index) of each value
    pub wavelengths: Vec<f64>,
    /// One value per band
    pub values: Vec<f64>,
}

impl Spectrum {
    /// Number of bands.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the spectrum has no bands.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Centred moving average over `2 * level + 1` bands, narrowed at the edges.
    pub fn smoothed(&self, level: usize) -> Spectrum {
        if level == 0 {
            return self.clone();
        }
        let n = self.values.len();
        let values = (0..n)
            .map(|i| {
                let window = &self.values[i.saturating_sub(level)..(i + level + 1).min(n)];
                window.iter().sum::<f64>() / window.len() as f64
            })
            .collect();
        Spectrum {
            wavelengths: self.wavelengths.clone(),
            values,
        }
    }
}

type Progress<'a> = Option<&'a mut dyn FnMut(f64)>;

fn report(progress: &mut Progress<'_>, fraction: f64) {
    if let Some(callback) = progress {
        callback(fraction);
    }
}

/// Cache key for a pixel set.
///
/// Regions are fingerprinted by their first, middle and last pixel plus the
/// pixel count, so distinct sets sharing those collide.
pub fn cache_key(pixels: &[Pixel]) -> String {
    match pixels {
        [] => "empty".to_string(),
        [(line, sample)] => format!("point_{line}_{sample}"),
        _ => {
            let first = pixels[0];
            let middle = pixels[pixels.len() / 2];
            let last = pixels[pixels.len() - 1];
            format!(
                "region_{}_{}_{}_{}_{}_{}_{}",
                first.0,
                first.1,
                middle.0,
                middle.1,
                last.0,
                last.1,
                pixels.len()
            )
        }
    }
}

/// Turns points and annotations into spectra and memoizes the results.
///
/// The extractor is attached to one cube at a time. Cached spectra are
/// dropped when a different cube is passed or the cube's calibration
/// revision changes.
#[derive(Debug)]
pub struct SpectrumExtractor {
    cache: FifoCache<String, Spectrum>,
    max_region_samples: usize,
    attached: Option<(u64, u64)>,
}

impl SpectrumExtractor {
    /// Create an unattached extractor.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            cache: FifoCache::new(config.max_spectrum_cache, EvictionPolicy::Oldest),
            max_region_samples: config.max_region_samples,
            attached: None,
        }
    }

    /// Point the extractor at a cube, dropping cached spectra.
    pub fn attach<S: ByteSource>(&mut self, cube: &HsiCube<S>) {
        self.attached = Some((cube.id(), cube.revision()));
        self.cache.clear();
    }

    /// Number of cached spectra.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Drop every cached spectrum.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
        log::debug!("Spectrum cache cleared");
    }

    fn sync<S: ByteSource>(&mut self, cube: &HsiCube<S>) -> Result<Dimensions> {
        let Some((id, revision)) = self.attached else {
            return Err(HsiError::UninitializedState(
                "spectrum extractor is not attached to a cube".to_string(),
            ));
        };
        if id != cube.id() {
            log::debug!(
                "Extractor moved from cube {} to cube {}, dropping {} cached spectra",
                id,
                cube.id(),
                self.cache.len()
            );
            self.attach(cube);
        } else if revision != cube.revision() {
            log::debug!(
                "Cube revision changed ({} -> {}), dropping {} cached spectra",
                revision,
                cube.revision(),
                self.cache.len()
            );
            self.attach(cube);
        }
        Ok(cube.dimensions())
    }

    fn remember(&mut self, key: String, spectrum: &Spectrum) {
        for evicted in self.cache.insert(key.clone(), spectrum.clone()) {
            log::debug!("Spectrum cache full, removed: {}", evicted);
        }
        log::debug!("Cached spectrum: {} (cache size: {})", key, self.cache.len());
    }

    /// Spectrum of a single pixel.
    pub async fn point_spectrum<S: ByteSource>(
        &mut self,
        cube: &mut HsiCube<S>,
        line: i64,
        sample: i64,
    ) -> Result<Spectrum> {
        let dims = self.sync(cube)?;
        let (line, sample) = dims.check_pixel(line, sample)?;
        let key = cache_key(&[(line as i64, sample as i64)]);
        if let Some(spectrum) = self.cache.get(&key) {
            log::debug!("Spectrum cache hit: {}", key);
            return Ok(spectrum.clone());
        }

        let values = if cube.is_on_demand() {
            cube.point_spectrum_fast(line, sample)
                .await?
                .into_iter()
                .map(f64::from)
                .collect()
        } else {
            let mut values = Vec::with_capacity(dims.bands);
            for band in 0..dims.bands {
                let plane = cube.band_data_calibrated(band).await?;
                values.push(f64::from(plane[[sample, line]]));
            }
            values
        };

        let spectrum = Spectrum {
            wavelengths: cube.spectral_axis(),
            values,
        };
        self.remember(key, &spectrum);
        Ok(spectrum)
    }

    /// Mean spectrum over a set of in-cube pixels.
    ///
    /// On demand, each pixel is read with one line-chunk lookup; a resident
    /// cube is walked once per band. `on_progress` receives the completed
    /// fraction at coarse strides and `1.0` at the end.
    pub async fn region_spectrum<S: ByteSource>(
        &mut self,
        cube: &mut HsiCube<S>,
        pixels: &[Pixel],
        mut on_progress: Progress<'_>,
    ) -> Result<Spectrum> {
        let dims = self.sync(cube)?;
        if pixels.is_empty() {
            return Err(HsiError::EmptyRegion {
                label: "region".to_string(),
            });
        }
        let coords = pixels
            .iter()
            .map(|&(line, sample)| dims.check_pixel(line, sample))
            .collect::<Result<Vec<_>>>()?;

        let key = cache_key(pixels);
        if let Some(spectrum) = self.cache.get(&key) {
            log::debug!("Spectrum cache hit: region with {} pixels", pixels.len());
            return Ok(spectrum.clone());
        }

        log::debug!("Extracting spectrum for region with {} pixels", pixels.len());
        let count = coords.len() as f64;
        let values = if cube.is_on_demand() {
            let mut sums = vec![0.0f64; dims.bands];
            for (index, &(line, sample)) in coords.iter().enumerate() {
                let spectrum = cube.point_spectrum_fast(line, sample).await?;
                for (sum, value) in sums.iter_mut().zip(spectrum) {
                    *sum += f64::from(value);
                }
                if index % PIXEL_PROGRESS_STRIDE == 0 {
                    report(&mut on_progress, (index + 1) as f64 / count);
                }
            }
            sums.into_iter().map(|sum| sum / count).collect()
        } else {
            let mut means = Vec::with_capacity(dims.bands);
            for band in 0..dims.bands {
                let plane = cube.band_data_calibrated(band).await?;
                let sum: f64 = coords
                    .iter()
                    .map(|&(line, sample)| f64::from(plane[[sample, line]]))
                    .sum();
                means.push(sum / count);
                if band % BAND_PROGRESS_STRIDE == 0 {
                    report(&mut on_progress, (band + 1) as f64 / dims.bands as f64);
                }
            }
            means
        };
        report(&mut on_progress, 1.0);

        let spectrum = Spectrum {
            wavelengths: cube.spectral_axis(),
            values,
        };
        self.remember(key, &spectrum);
        Ok(spectrum)
    }

    /// Spectrum of an annotation.
    ///
    /// Points take the single-pixel path. Regions are clipped to the cube and
    /// down-sampled before averaging.
    pub async fn annotation_spectrum<S: ByteSource>(
        &mut self,
        cube: &mut HsiCube<S>,
        annotation: &Annotation,
        on_progress: Progress<'_>,
    ) -> Result<Spectrum> {
        let dims = self.sync(cube)?;
        let empty = || HsiError::EmptyRegion {
            label: annotation.label.clone(),
        };

        if let Shape::Point { .. } = annotation.shape {
            let (line, sample) = annotation.pixels().first().copied().ok_or_else(empty)?;
            return self.point_spectrum(cube, line, sample).await;
        }

        let pixels = annotation.pixels_within(&dims);
        if pixels.is_empty() {
            return Err(empty());
        }
        let pixels = sample_pixels(pixels, self.max_region_samples);
        log::debug!(
            "Annotation \"{}\" has {} pixels",
            annotation.label,
            pixels.len()
        );
        self.region_spectrum(cube, &pixels, on_progress).await
    }
}
