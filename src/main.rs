/// Command-line inspector for native builds.
///
/// Loads a header and raw cube, optionally calibrates it and prints the
/// dimensions and requested spectra as JSON.
#[cfg(not(target_arch = "wasm32"))]
fn main() -> std::process::ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = match cli::Options::parse(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{message}\n\n{}", cli::USAGE);
            return std::process::ExitCode::from(2);
        }
    };

    match cli::run(&options) {
        Ok(report) => {
            println!("{report}");
            std::process::ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

// WASM builds use the library directly
#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
mod cli {
    use std::path::{Path, PathBuf};

    use hsicube::{
        Annotation, ConfigError, EngineConfig, FileSource, HsiCube, HsiError, Metadata,
        ReferenceKind, SpectrumExtractor,
    };
    use serde_json::{Value, json};

    pub const USAGE: &str = "Usage: hsicube-inspect <header> <raw> [--dark FILE] [--white FILE] \
                             [--point LINE SAMPLE] [--annotations FILE.json] [--config FILE.json]";

    #[derive(Debug, thiserror::Error)]
    pub enum CliError {
        #[error(transparent)]
        Cube(#[from] HsiError),
        #[error(transparent)]
        Config(#[from] ConfigError),
        #[error("{path:?}: {source}")]
        Read {
            path: PathBuf,
            source: std::io::Error,
        },
    }

    #[derive(Debug, Default)]
    pub struct Options {
        header: PathBuf,
        raw: PathBuf,
        dark: Option<PathBuf>,
        white: Option<PathBuf>,
        point: Option<(i64, i64)>,
        annotations: Option<PathBuf>,
        config: Option<PathBuf>,
    }

    impl Options {
        pub fn parse(args: &[String]) -> Result<Self, String> {
            let mut options = Options::default();
            let mut positional = Vec::new();
            let mut iter = args.iter();

            while let Some(arg) = iter.next() {
                let mut value = |flag: &str| {
                    iter.next()
                        .cloned()
                        .ok_or_else(|| format!("{flag} needs a value"))
                };
                match arg.as_str() {
                    "--dark" => options.dark = Some(value("--dark")?.into()),
                    "--white" => options.white = Some(value("--white")?.into()),
                    "--annotations" => options.annotations = Some(value("--annotations")?.into()),
                    "--config" => options.config = Some(value("--config")?.into()),
                    "--point" => {
                        let line = value("--point")?;
                        let sample = value("--point")?;
                        let parse = |s: &str| {
                            s.parse::<i64>()
                                .map_err(|_| format!("--point expects integers, got {s:?}"))
                        };
                        options.point = Some((parse(&line)?, parse(&sample)?));
                    }
                    flag if flag.starts_with("--") => return Err(format!("unknown option {flag}")),
                    path => positional.push(PathBuf::from(path)),
                }
            }

            let [header, raw]: [PathBuf; 2] = positional
                .try_into()
                .map_err(|p: Vec<_>| format!("expected <header> <raw>, got {} paths", p.len()))?;
            options.header = header;
            options.raw = raw;
            Ok(options)
        }
    }

    fn read(path: &Path) -> Result<Vec<u8>, CliError> {
        std::fs::read(path).map_err(|source| CliError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn run(options: &Options) -> Result<Value, CliError> {
        let config = match &options.config {
            Some(path) => EngineConfig::load_from_path(path)?,
            None => EngineConfig::load_from_default_path().unwrap_or_default(),
        };
        env_logger::Builder::new()
            .filter_level(config.log_level.to_level_filter())
            .parse_default_env()
            .init();

        let header = String::from_utf8_lossy(&read(&options.header)?).into_owned();
        let metadata = Metadata::parse(&header);
        let source = FileSource::open(&options.raw).map_err(|source| CliError::Read {
            path: options.raw.clone(),
            source,
        })?;
        let mut cube = pollster::block_on(HsiCube::open(metadata, source, &config))?;

        if let Some(path) = &options.dark {
            cube.load_reference(&read(path)?, ReferenceKind::Dark)?;
        }
        if let Some(path) = &options.white {
            cube.load_reference(&read(path)?, ReferenceKind::White)?;
        }
        cube.apply_calibration(options.dark.is_some(), options.white.is_some());

        let mut extractor = SpectrumExtractor::new(&config);
        extractor.attach(&cube);

        let point = match options.point {
            Some((line, sample)) => Some(pollster::block_on(
                extractor.point_spectrum(&mut cube, line, sample),
            )?),
            None => None,
        };

        let mut regions = Vec::new();
        if let Some(path) = &options.annotations {
            let json = String::from_utf8_lossy(&read(path)?).into_owned();
            for annotation in Annotation::from_json_list(&json)? {
                let mut progress = |fraction: f64| {
                    log::info!("{}: {:.0}%", annotation.label, fraction * 100.0);
                };
                let spectrum = pollster::block_on(extractor.annotation_spectrum(
                    &mut cube,
                    &annotation,
                    Some(&mut progress),
                ))?;
                regions.push(json!({
                    "label": annotation.label,
                    "type": annotation.shape.name(),
                    "spectrum": spectrum,
                }));
            }
        }

        Ok(json!({
            "dimensions": cube.dimensions(),
            "on_demand": cube.is_on_demand(),
            "wavelengths": cube.wavelengths(),
            "default_rgb_bands": cube.default_rgb_bands(),
            "calibration": {
                "dark": cube.calibration().use_dark(),
                "white": cube.calibration().use_white(),
            },
            "point": point,
            "annotations": regions,
            "cache": cube.cache_stats(),
            "log_level": config.log_level.name(),
        }))
    }

}
