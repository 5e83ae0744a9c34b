//! hsicube - Hyperspectral cube engine
//!
//! Loads band-interleaved-by-line (BIL) cubes of unsigned 16-bit samples
//! described by an ENVI-style text header, either fully into memory or on
//! demand in line chunks, applies dark/white reference calibration and
//! extracts band planes and point or region spectra.
//!
//! ```no_run
//! # async fn demo() -> hsicube::Result<()> {
//! use hsicube::{EngineConfig, FileSource, HsiCube, Metadata, SpectrumExtractor};
//!
//! let config = EngineConfig::default();
//! let metadata = Metadata::parse(&std::fs::read_to_string("scene.hdr")?);
//! let mut cube = HsiCube::open(metadata, FileSource::open("scene.raw")?, &config).await?;
//!
//! let mut extractor = SpectrumExtractor::new(&config);
//! extractor.attach(&cube);
//! let spectrum = extractor.point_spectrum(&mut cube, 10, 20).await?;
//! # Ok(())
//! # }
//! ```

pub mod annotation;
pub mod band;
pub mod cache;
pub mod calibration;
pub mod config;
pub mod constants;
pub mod cube;
pub mod error;
pub mod header;
pub mod reader;
pub mod source;
pub mod spectrum;

pub use annotation::{Annotation, AnnotationRecord, Pixel, Shape};
pub use calibration::{Calibration, ReferenceField, ReferenceKind};
pub use config::{ConfigError, EngineConfig, LogLevel};
pub use cube::{CacheStats, HsiCube};
pub use error::{HsiError, Result};
pub use header::{Dimensions, Metadata, MetadataValue};
pub use source::{ByteSource, FileSource, MemorySource};
pub use spectrum::{Spectrum, SpectrumExtractor};
