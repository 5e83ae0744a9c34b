//! Global constants for the cube engine

/// Bytes per stored sample (unsigned 16-bit, little-endian).
pub const BYTES_PER_SAMPLE: usize = 2;

/// ENVI `data type` code for unsigned 16-bit integers.
pub const DATA_TYPE_U16: i64 = 12;

/// Files at or above this size are read on demand instead of fully loaded.
pub const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 64 * 1024 * 1024;

/// Maximum reconstructed band planes kept in the band cache.
pub const DEFAULT_MAX_BAND_CACHE: usize = 100;

/// Maximum spectra kept in the extractor cache.
pub const DEFAULT_MAX_SPECTRUM_CACHE: usize = 20;

/// Maximum pixels aggregated for one region spectrum.
pub const DEFAULT_MAX_REGION_SAMPLES: usize = 1000;

/// Fraction of the band cache dropped in one eviction batch.
pub const BAND_CACHE_EVICT_FRACTION: f64 = 0.2;

/// Smallest line chunk the adaptive planner will choose.
pub const MIN_CHUNK_LINES: usize = 50;

/// One gibibyte, the unit of the adaptive chunk planner.
pub const BYTES_PER_GIB: u64 = 1024 * 1024 * 1024;

/// Band triple used for false-colour previews when the header has none.
pub const FALLBACK_RGB_BANDS: [usize; 3] = [123, 67, 25];

/// Log band cache statistics every this many hits.
pub const BAND_HIT_LOG_INTERVAL: u64 = 100;

/// Progress is reported every this many pixels in on-demand aggregation.
pub const PIXEL_PROGRESS_STRIDE: usize = 25;

/// Progress is reported every this many bands in full-load aggregation.
pub const BAND_PROGRESS_STRIDE: usize = 10;
