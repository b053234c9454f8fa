use clap::{Parser, Subcommand};
use imgset::catalog::Catalog;
use imgset::config::{self, Overrides, SiteConfig};
use imgset::fingerprint::{self, Fingerprints};
use imgset::imaging::{RustTranscoder, supported_input_extensions};
use imgset::pipeline::{self, BuildStats, Pipeline, PipelineError, SourceImage};
use imgset::{output, scan};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, mpsc};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Flags that override `imgset.toml` for one run.
#[derive(clap::Args, Clone, Default)]
struct BuildArgs {
    /// Log what would be written without touching the disk
    #[arg(long)]
    dry_run: bool,

    /// Produce variants wider than the source
    #[arg(long)]
    allow_upscale: bool,

    /// Generate one thumbnail per format
    #[arg(long)]
    thumbnails: bool,
}

impl BuildArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            dry_run: self.dry_run.then_some(true),
            allow_upscale: self.allow_upscale.then_some(true),
            thumbnails: self.thumbnails.then_some(true),
        }
    }
}

#[derive(Parser)]
#[command(name = "imgset")]
#[command(about = "Responsive image variants with a persistent catalog")]
#[command(long_about = "\
Responsive image variants with a persistent catalog

Every tracked image under the site root is resized to a ladder of widths and
re-encoded to the formats configured for its extension. Generated files go to
the output directory inside the site, and the catalog records what exists so
templates can build srcset attributes:

  site/
  ├── imgset.toml                        # Optional config (see gen-config)
  ├── .generatedImages.json              # Catalog: source → variants
  ├── blog/cat.jpg                       # Source
  └── assets/_generatedImages/
      └── blog/
          ├── cat-480.webp               # {fn}-{width}.{ext}
          └── cat-480.jpeg

Sources are also copied unchanged into --output, mirroring the site layout.
Unchanged sources (by content hash) are skipped on the next build.

Run 'imgset gen-config' to generate a documented imgset.toml.")]
#[command(version)]
struct Cli {
    /// Site root holding the source images
    #[arg(long, default_value = ".", global = true)]
    site: PathBuf,

    /// Directory that receives copies of the sources
    #[arg(long, default_value = "dist", global = true)]
    output: PathBuf,

    /// More log output (-v info, -vv debug, -vvv trace). RUST_LOG wins.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate variants for every tracked image under the site root
    Build {
        #[command(flatten)]
        args: BuildArgs,

        /// Ignore fingerprints and process every source
        #[arg(long)]
        force: bool,

        /// Number of sources processed at once
        #[arg(long, default_value_t = 1)]
        jobs: usize,
    },
    /// Generate variants for specific images
    Process {
        #[command(flatten)]
        args: BuildArgs,

        /// Only copy the sources, leaving their catalog entries alone
        #[arg(long)]
        skip: bool,

        /// Source images
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Print the catalog entry of a source as JSON
    Lookup {
        /// Source path relative to the site root, e.g. /blog/cat.jpg
        source: String,
    },
    /// Compare the catalog with the sources and generated files on disk
    Check {
        /// Drop catalog entries whose source no longer exists
        #[arg(long)]
        fix: bool,
    },
    /// Print a stock imgset.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Command::Build { args, force, jobs } => {
            let site = std::fs::canonicalize(&cli.site)?;
            let output = std::path::absolute(&cli.output)?;
            let config = config::load_config(&site, args.overrides())?;
            init_thread_pool(&config.processing);

            println!("==> Scanning {}", site.display());
            let sources = scan::find_sources(&site, &config, &[output.clone()]);
            println!("==> Processing {} images", sources.len());

            let stats = run_build(config, &site, &output, &sources, *force, *jobs)?;
            println!("==> Build complete: {}", stats);
        }
        Command::Process { args, skip, paths } => {
            let site = std::fs::canonicalize(&cli.site)?;
            let output = std::path::absolute(&cli.output)?;
            let config = config::load_config(&site, args.overrides())?;
            init_thread_pool(&config.processing);

            // Missing paths go through as given so the failure names them
            let paths: Vec<PathBuf> = paths
                .iter()
                .map(|p| {
                    std::fs::canonicalize(p)
                        .or_else(|_| std::path::absolute(p))
                        .unwrap_or_else(|_| p.clone())
                })
                .collect();
            let (pipeline, printer) = open_pipeline(config, &site, &output)?;
            let result = pipeline.process_all(&paths, *skip);
            drop(pipeline);
            printer.join().ok();
            println!("==> {}", result?);
        }
        Command::Lookup { source } => {
            let site = std::fs::canonicalize(&cli.site)?;
            let config = config::load_config(&site, Overrides::default())?;
            let catalog = Catalog::load(pipeline::catalog_store(&config, &site).as_deref())?;
            let key = if source.starts_with('/') {
                source.clone()
            } else {
                format!("/{source}")
            };
            let entry = catalog.lookup(&key)?;
            println!("{}", serde_json::to_string_pretty(entry)?);
        }
        Command::Check { fix } => {
            let site = std::fs::canonicalize(&cli.site)?;
            let output = std::path::absolute(&cli.output)?;
            let config = config::load_config(&site, Overrides::default())?;
            warn_undecodable(&config);

            println!("==> Checking {}", site.display());
            let mut catalog = Catalog::load(pipeline::catalog_store(&config, &site).as_deref())?;
            let sources: Vec<String> = scan::find_sources(&site, &config, &[output])
                .iter()
                .filter_map(|p| SourceImage::new(&site, p).ok())
                .map(|s| s.relative)
                .collect();
            if *fix {
                let removed = catalog.prune(&sources);
                if !removed.is_empty() {
                    catalog.save()?;
                    println!("==> Dropped {} orphaned entries", removed.len());
                }
            }
            let report = catalog.audit(&site, &sources);
            output::print_audit(&report);
            if !output::audit_is_clean(&report) {
                return Err("catalog is out of date, run 'imgset build'".into());
            }
            println!("==> Catalog is complete");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Log to stderr so stdout stays the progress listing.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("imgset={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores: config can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

/// Pipeline with a printer thread listening to its events. The printer
/// finishes once the pipeline is dropped.
fn open_pipeline(
    config: SiteConfig,
    site: &Path,
    output: &Path,
) -> Result<(Pipeline<RustTranscoder>, std::thread::JoinHandle<()>), Box<dyn std::error::Error>> {
    let (tx, rx) = mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            for line in output::format_process_event(&event) {
                println!("{}", line);
            }
        }
    });
    let pipeline = Pipeline::open(config, site, output, RustTranscoder::new())?.with_events(tx);
    Ok((pipeline, printer))
}

/// Process every source, `jobs` at a time, skipping unchanged ones.
///
/// Stops at the first fatal error. Image-level errors are counted and the
/// build moves on.
fn run_build(
    config: SiteConfig,
    site: &Path,
    output: &Path,
    sources: &[PathBuf],
    force: bool,
    jobs: usize,
) -> Result<BuildStats, Box<dyn std::error::Error>> {
    let dry_run = config.processing.dry_run;
    let prints_path = config
        .catalog
        .persist
        .then(|| site.join(&config.catalog.fingerprints_file));
    let config_hash = fingerprint::hash_config(&config);
    let prints = match (&prints_path, force) {
        (Some(path), false) => Fingerprints::load(path, &config_hash),
        _ => Fingerprints::empty(config_hash.as_str()),
    };

    let (pipeline, printer) = open_pipeline(config, site, output)?;
    let prints = Mutex::new(prints);
    let stats = Mutex::new(BuildStats::default());
    let fatal: Mutex<Option<PipelineError>> = Mutex::new(None);
    let abort = AtomicBool::new(false);
    let next = AtomicUsize::new(0);

    let worker = || {
        while !abort.load(Ordering::Relaxed) {
            let Some(path) = sources.get(next.fetch_add(1, Ordering::Relaxed)) else {
                break;
            };
            let key = SourceImage::new(site, path).map(|s| s.relative).ok();
            let hash = fingerprint::hash_file(path).ok();
            let unchanged = match (&key, &hash) {
                (Some(key), Some(hash)) => {
                    let known = lock(&prints).is_unchanged(key, hash);
                    known && pipeline.catalog().get(key).is_some()
                }
                _ => false,
            };

            match pipeline.process(path, unchanged) {
                Ok(report) => {
                    lock(&stats).record(&report);
                    if let (Some(key), Some(hash)) = (key, hash)
                        && !dry_run
                    {
                        if report.failures().next().is_none() {
                            lock(&prints).record(key, hash);
                        } else {
                            lock(&prints).forget(&key);
                        }
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "aborting build");
                    abort.store(true, Ordering::Relaxed);
                    lock(&fatal).get_or_insert(e);
                }
                Err(e) => {
                    error!(source = %path.display(), error = %e, "image failed");
                    lock(&stats).record_failure();
                    if let Some(key) = key {
                        lock(&prints).forget(&key);
                    }
                }
            }
        }
    };

    std::thread::scope(|scope| {
        for _ in 1..jobs.max(1) {
            scope.spawn(worker);
        }
        worker();
    });

    drop(pipeline);
    printer.join().ok();

    if let Some(e) = into_inner(fatal) {
        return Err(e.into());
    }
    if let Some(path) = prints_path
        && !dry_run
        && let Err(e) = into_inner(prints).save(&path)
    {
        warn!(path = %path.display(), error = %e, "cannot save fingerprints");
    }
    Ok(into_inner(stats))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn into_inner<T>(mutex: Mutex<T>) -> T {
    mutex
        .into_inner()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Tracked extensions whose sources cannot be decoded by this build.
fn warn_undecodable(config: &SiteConfig) {
    let decodable = supported_input_extensions();
    for ext in config.images.tracked_extensions() {
        if !decodable.contains(&ext.as_str()) {
            warn!(extension = %ext, "tracked extension has no decoder, its sources will fail");
        }
    }
}
