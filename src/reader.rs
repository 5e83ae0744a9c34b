//! On-demand line-chunk reader.
//!
//! In on-demand mode the cube is never materialized. Contiguous runs of scan
//! lines are read with a single ranged read, decoded, and kept in a small
//! insertion-ordered cache. Because the file is band-interleaved-by-line, one
//! chunk holds every band of its pixels, so a full pixel spectrum needs at
//! most one chunk load.

use std::ops::Range;
use std::sync::Arc;

use ndarray::{Array3, Axis};
use web_time::Instant;

use crate::cache::{EvictionPolicy, FifoCache};
use crate::constants::{BYTES_PER_GIB, BYTES_PER_SAMPLE, MIN_CHUNK_LINES};
use crate::error::{HsiError, Result};
use crate::header::Dimensions;
use crate::source::ByteSource;

/// A decoded run of lines, shaped `(lines, bands, samples)`.
pub type LineChunk = Arc<Array3<u16>>;

/// Decode little-endian unsigned 16-bit samples.
pub fn decode_le_u16(bytes: &[u8]) -> Result<Vec<u16>> {
    if bytes.len() % BYTES_PER_SAMPLE != 0 {
        return Err(HsiError::malformed_buffer(format!(
            "{} bytes is not a multiple of {}",
            bytes.len(),
            BYTES_PER_SAMPLE
        )));
    }
    Ok(bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Lines per chunk and number of resident chunks for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Scan lines decoded together
    pub chunk_lines: usize,
    /// Chunks kept resident before the oldest is evicted
    pub max_chunks: usize,
}

impl ChunkPlan {
    /// Size chunks from the file size.
    ///
    /// Larger files get fewer resident chunks so the cache footprint stays
    /// roughly bounded:
    /// - 5 GiB and up: 2 chunks of one GiB worth of lines
    /// - 2 GiB and up: 3 chunks of half that
    /// - otherwise: 4 chunks of a quarter
    pub fn adaptive(file_size: u64, dims: &Dimensions) -> Self {
        let lines_per_gib = (BYTES_PER_GIB / dims.bytes_per_line() as u64) as usize;
        let file_gib = file_size as f64 / BYTES_PER_GIB as f64;

        let (chunk_lines, max_chunks) = if file_gib >= 5.0 {
            (lines_per_gib, 2)
        } else if file_gib >= 2.0 {
            (lines_per_gib / 2, 3)
        } else {
            (lines_per_gib / 4, 4)
        };

        Self {
            chunk_lines: chunk_lines.max(MIN_CHUNK_LINES),
            max_chunks,
        }
    }

    /// Replace the adaptive values with configured ones where given.
    pub fn with_overrides(self, chunk_lines: Option<usize>, max_chunks: Option<usize>) -> Self {
        Self {
            chunk_lines: chunk_lines.unwrap_or(self.chunk_lines).max(1),
            max_chunks: max_chunks.unwrap_or(self.max_chunks),
        }
    }

    /// Number of chunks covering `lines`.
    pub fn chunk_count(&self, lines: usize) -> usize {
        lines.div_ceil(self.chunk_lines)
    }

    /// Chunk that owns `line`.
    pub fn chunk_of(&self, line: usize) -> usize {
        line / self.chunk_lines
    }

    /// Lines `[start, end)` of chunk `index`, clipped to the cube.
    pub fn line_range(&self, index: usize, lines: usize) -> Range<usize> {
        let start = (index * self.chunk_lines).min(lines);
        let end = (start + self.chunk_lines).min(lines);
        start..end
    }
}

/// Reads and caches line chunks from a [`ByteSource`].
#[derive(Debug)]
pub struct ChunkedReader<S> {
    source: S,
    dims: Dimensions,
    plan: ChunkPlan,
    chunks: FifoCache<usize, LineChunk>,
}

impl<S: ByteSource> ChunkedReader<S> {
    /// Create a reader; nothing is read until a chunk is requested.
    pub fn new(source: S, dims: Dimensions, plan: ChunkPlan) -> Self {
        let chunk_mb = (plan.chunk_lines * dims.bytes_per_line()) as f64 / (1024.0 * 1024.0);
        log::info!(
            "On-demand mode: {} lines/chunk ({:.0} MB), {} chunks total, {} cached (~{:.0} MB)",
            plan.chunk_lines,
            chunk_mb,
            plan.chunk_count(dims.lines),
            plan.max_chunks,
            chunk_mb * plan.max_chunks as f64
        );
        Self {
            source,
            dims,
            plan,
            chunks: FifoCache::new(plan.max_chunks, EvictionPolicy::Oldest),
        }
    }

    /// The chunk plan in use.
    pub fn plan(&self) -> ChunkPlan {
        self.plan
    }

    /// Cube dimensions the reader decodes against.
    pub fn dims(&self) -> Dimensions {
        self.dims
    }

    /// Backing source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Indices of resident chunks, oldest first.
    pub fn resident_chunks(&self) -> Vec<usize> {
        self.chunks.keys().copied().collect()
    }

    /// Read chunk `index` from the source and cache it.
    ///
    /// Always issues a read, even when the chunk is already resident; use
    /// [`ChunkedReader::chunk`] to reuse cached data.
    pub async fn load_line_chunk(&mut self, index: usize) -> Result<LineChunk> {
        let total = self.plan.chunk_count(self.dims.lines);
        if index >= total {
            return Err(HsiError::invalid_index("chunk", index as i64, total));
        }

        let lines = self.plan.line_range(index, self.dims.lines);
        let bytes_per_line = self.dims.bytes_per_line() as u64;
        let start_byte = lines.start as u64 * bytes_per_line;
        let end_byte = lines.end as u64 * bytes_per_line;

        log::debug!(
            "Loading line-chunk {}: lines {}-{} ({:.1} MB)",
            index,
            lines.start,
            lines.end,
            (end_byte - start_byte) as f64 / (1024.0 * 1024.0)
        );
        let started = Instant::now();

        let bytes = self.source.read_range(start_byte, end_byte).await?;
        let samples = decode_le_u16(&bytes)?;
        let shape = (lines.len(), self.dims.bands, self.dims.samples);
        let expected = shape.0 * shape.1 * shape.2;
        if samples.len() != expected {
            return Err(HsiError::malformed_buffer(format!(
                "chunk {index}: expected {expected} samples, source returned {}",
                samples.len()
            )));
        }
        let chunk = Arc::new(
            Array3::from_shape_vec(shape, samples)
                .map_err(|e| HsiError::malformed_buffer(e.to_string()))?,
        );

        for evicted in self.chunks.insert(index, Arc::clone(&chunk)) {
            log::debug!(
                "Line-chunk cache full, evicted chunk {}. Current size: {}",
                evicted,
                self.chunks.len()
            );
        }
        log::debug!("Line-chunk {} decoded in {:?}", index, started.elapsed());

        Ok(chunk)
    }

    /// Resident chunk `index`, loading it if absent.
    pub async fn chunk(&mut self, index: usize) -> Result<LineChunk> {
        if let Some(chunk) = self.chunks.get(&index) {
            return Ok(Arc::clone(chunk));
        }
        self.load_line_chunk(index).await
    }

    /// Raw values of every band at one pixel, from a single chunk.
    pub async fn point_spectrum(&mut self, line: usize, sample: usize) -> Result<Vec<f32>> {
        self.dims.check_pixel(line as i64, sample as i64)?;
        let chunk = self.chunk(self.plan.chunk_of(line)).await?;
        let line_in_chunk = line % self.plan.chunk_lines;
        Ok(chunk
            .index_axis(Axis(0), line_in_chunk)
            .index_axis_move(Axis(1), sample)
            .iter()
            .map(|&v| f32::from(v))
            .collect())
    }
}
