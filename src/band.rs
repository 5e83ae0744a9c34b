//! Band plane reconstruction and caching for on-demand mode.

use std::sync::Arc;

use ndarray::{Array2, Axis, Slice};
use web_time::Instant;

use crate::cache::{EvictionPolicy, FifoCache};
use crate::constants::{BAND_CACHE_EVICT_FRACTION, BAND_HIT_LOG_INTERVAL};
use crate::error::Result;
use crate::reader::ChunkedReader;
use crate::source::ByteSource;

/// One band across the whole image, shaped `(samples, lines)`.
///
/// Standard layout, so the flat buffer is sample-major
/// (`index = sample * lines + line`), transposed relative to the file.
pub type BandPlane<T> = Array2<T>;

/// Reconstructed raw band planes, evicted in batches of the oldest entries.
#[derive(Debug)]
pub struct BandCache {
    bands: FifoCache<usize, Arc<BandPlane<u16>>>,
    hits: u64,
    misses: u64,
}

impl BandCache {
    /// Create a cache holding at most `max_bands` planes.
    pub fn new(max_bands: usize) -> Self {
        let batch = (max_bands as f64 * BAND_CACHE_EVICT_FRACTION).floor() as usize;
        Self {
            bands: FifoCache::new(max_bands, EvictionPolicy::OldestBatch(batch)),
            hits: 0,
            misses: 0,
        }
    }

    /// Cache hits since creation.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Cache misses since creation.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Resident band indices, oldest first.
    pub fn resident(&self) -> Vec<usize> {
        self.bands.keys().copied().collect()
    }

    fn lookup(&mut self, band: usize) -> Option<Arc<BandPlane<u16>>> {
        let plane = Arc::clone(self.bands.get(&band)?);
        self.hits += 1;
        if self.hits % BAND_HIT_LOG_INTERVAL == 0 {
            log::debug!(
                "Band cache hits: {}, misses: {}, hit rate: {:.1}%",
                self.hits,
                self.misses,
                self.hits as f64 / (self.hits + self.misses) as f64 * 100.0
            );
        }
        Some(plane)
    }

    /// Raw plane for `band`, reconstructed from line chunks on a miss.
    ///
    /// Chunks already resident in the reader are reused; the rest are read
    /// in index order.
    pub async fn load_band_on_demand<S: ByteSource>(
        &mut self,
        reader: &mut ChunkedReader<S>,
        band: usize,
    ) -> Result<Arc<BandPlane<u16>>> {
        let dims = reader.dims();
        dims.check_band(band)?;

        if let Some(plane) = self.lookup(band) {
            return Ok(plane);
        }
        self.misses += 1;

        let started = Instant::now();
        let plan = reader.plan();
        let mut plane = BandPlane::<u16>::zeros((dims.samples, dims.lines));

        for index in 0..plan.chunk_count(dims.lines) {
            let chunk = reader.chunk(index).await?;
            let lines = plan.line_range(index, dims.lines);
            // (lines, samples) -> (samples, lines)
            let band_rows = chunk.index_axis(Axis(1), band);
            plane
                .slice_axis_mut(Axis(1), Slice::from(lines))
                .assign(&band_rows.t());
        }

        let plane = Arc::new(plane);
        let evicted = self.bands.insert(band, Arc::clone(&plane));
        if !evicted.is_empty() {
            log::debug!(
                "Band cache full ({}), removed {} oldest bands. Current size: {}",
                self.bands.capacity(),
                evicted.len(),
                self.bands.len()
            );
        }
        log::debug!("Band {} reconstructed in {:?}", band, started.elapsed());

        Ok(plane)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Dimensions;
    use crate::reader::ChunkPlan;
    use crate::source::MemorySource;

    fn reader(dims: Dimensions, chunk_lines: usize) -> ChunkedReader<MemorySource> {
        let bytes: Vec<u8> = (0..dims.voxel_count())
            .flat_map(|i| (i as u16).to_le_bytes())
            .collect();
        ChunkedReader::new(
            MemorySource::new(bytes),
            dims,
            ChunkPlan {
                chunk_lines,
                max_chunks: 2,
            },
        )
    }

    #[test]
    fn test_reconstruct_transposed_plane() {
        let dims = Dimensions::new(3, 5, 4).unwrap();
        let mut reader = reader(dims, 2);
        let mut cache = BandCache::new(10);

        let plane = pollster::block_on(cache.load_band_on_demand(&mut reader, 2)).unwrap();
        assert_eq!(plane.dim(), (3, 5));
        let flat = plane.as_slice().unwrap();
        for line in 0..dims.lines {
            for sample in 0..dims.samples {
                assert_eq!(
                    flat[dims.plane_index(line, sample)],
                    dims.linear_index(line, 2, sample) as u16
                );
            }
        }
    }

    #[test]
    fn test_hits_and_misses() {
        let dims = Dimensions::new(2, 2, 3).unwrap();
        let mut reader = reader(dims, 1);
        let mut cache = BandCache::new(10);

        pollster::block_on(cache.load_band_on_demand(&mut reader, 0)).unwrap();
        pollster::block_on(cache.load_band_on_demand(&mut reader, 0)).unwrap();
        pollster::block_on(cache.load_band_on_demand(&mut reader, 1)).unwrap();
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 2);
        assert!(pollster::block_on(cache.load_band_on_demand(&mut reader, 3)).is_err());
    }

    #[test]
    fn test_batch_eviction_of_oldest_bands() {
        let dims = Dimensions::new(2, 2, 12).unwrap();
        let mut reader = reader(dims, 2);
        let mut cache = BandCache::new(10);

        for band in 0..11 {
            pollster::block_on(cache.load_band_on_demand(&mut reader, band)).unwrap();
        }
        // Inserting the 11th band drops the oldest 20% of 10
        assert_eq!(cache.resident(), (2..11).collect::<Vec<_>>());
    }
}
