//! Barforge CLI: stage runs, artifact scanning, inspection and driver scripts.
//!
//! Commands:
//! - `stage1` / `stage2` / `run`: transform a source file from a TOML config or flags
//! - `scan`: list artifact families in a stage directory
//! - `inspect`: summarize a single data file
//! - `script`: write a config record plus a shell driver for it
//! - `prune`: delete artifact families beyond a retention count

use anyhow::{bail, Context, Result};
use barforge_core::{
    CompressionPolicy, PipelineConfig, Role, RuntimeOptions, Timeframe, TimeframeMode, TypeMode,
    WindowName,
};
use barforge_runner::{
    write_driver, ArtifactDescriptor, CancelToken, Engine, RetentionPolicy, RunReport, Scanner,
};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "barforge",
    version,
    about = "Barforge: OHLCV transformation and persistence engine"
)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG wins.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter the source to its window and write the Stage-1 artifacts.
    Stage1 {
        #[command(flatten)]
        pipeline: PipelineArgs,
        #[command(flatten)]
        runtime: RuntimeArgs,
    },
    /// Resample the selection into every configured timeframe.
    Stage2 {
        #[command(flatten)]
        pipeline: PipelineArgs,
        #[command(flatten)]
        runtime: RuntimeArgs,
    },
    /// Stage-1 then Stage-2 on the same selection.
    Run {
        #[command(flatten)]
        pipeline: PipelineArgs,
        #[command(flatten)]
        runtime: RuntimeArgs,
    },
    /// List artifact families in a stage directory. Never writes.
    Scan {
        dir: PathBuf,

        /// Report only the newest N per (asset, window, timeframes).
        #[arg(long)]
        keep_latest: Option<usize>,

        /// Print descriptors as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Load a data file and report its shape, frequency and integrity.
    Inspect {
        file: PathBuf,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Write a config record and a shell driver that runs it.
    Script {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Directory receiving the driver files.
        #[arg(long)]
        out: PathBuf,
    },
    /// Delete artifact families beyond the newest N per identity.
    Prune {
        dir: PathBuf,

        #[arg(long)]
        keep_latest: usize,

        /// Actually delete (without this flag, only previews what would be removed).
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
}

/// A pipeline config from `--config`, a source path, or both. Flags override
/// values read from the file.
#[derive(Args)]
struct PipelineArgs {
    /// Path to a TOML pipeline config.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Source data file (required without --config).
    #[arg(long)]
    source: Option<PathBuf>,

    #[arg(long)]
    asset: Option<String>,

    /// Lookback window: 1Week, 1Month, 3Months, 6Months, 1Year, 2Years, 3Years, AllData.
    #[arg(long)]
    window: Option<WindowName>,

    /// Explicit start (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS).
    #[arg(long, value_parser = parse_time)]
    start: Option<NaiveDateTime>,

    #[arg(long, value_parser = parse_time)]
    end: Option<NaiveDateTime>,

    /// Target timeframe; repeat for several.
    #[arg(long = "timeframe", short = 't')]
    timeframes: Vec<Timeframe>,

    /// Resample into every listed timeframe.
    #[arg(long, default_value_t = false)]
    multi: bool,

    /// Output role; repeat for several. Empty means the stage defaults.
    #[arg(long = "role")]
    roles: Vec<Role>,

    /// auto, none, lz4, zstd or blosc.
    #[arg(long)]
    compression: Option<CompressionPolicy>,

    /// precision or memory.
    #[arg(long)]
    type_mode: Option<TypeMode>,

    #[arg(long)]
    output: Option<PathBuf>,

    /// Keep each resampled open as aggregated instead of chaining it.
    #[arg(long, default_value_t = false)]
    no_gapless: bool,
}

#[derive(Args)]
struct RuntimeArgs {
    /// Run Stage-2 timeframes on the worker pool.
    #[arg(long, default_value_t = false)]
    parallel: bool,

    /// Worker pool size. Defaults to min(cpus, 8).
    #[arg(long)]
    workers: Option<usize>,

    /// Write object artifacts as plain JSON dumps.
    #[arg(long, default_value_t = false)]
    plain_objects: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Stage1 { pipeline, runtime } => run_stage_cmd(StageCmd::One, pipeline, runtime),
        Commands::Stage2 { pipeline, runtime } => run_stage_cmd(StageCmd::Two, pipeline, runtime),
        Commands::Run { pipeline, runtime } => run_stage_cmd(StageCmd::Both, pipeline, runtime),
        Commands::Scan {
            dir,
            keep_latest,
            json,
        } => run_scan(&dir, keep_latest, json),
        Commands::Inspect { file, json } => run_inspect(&file, json),
        Commands::Script { pipeline, out } => run_script(pipeline, &out),
        Commands::Prune {
            dir,
            keep_latest,
            confirm,
        } => run_prune(&dir, keep_latest, confirm),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

// ── Pipeline commands ────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum StageCmd {
    One,
    Two,
    Both,
}

fn run_stage_cmd(cmd: StageCmd, args: PipelineArgs, runtime: RuntimeArgs) -> Result<()> {
    let config = args.into_config()?;
    let options = RuntimeOptions {
        parallel_timeframes: runtime.parallel,
        max_workers: runtime.workers,
        plain_object_dump: runtime.plain_objects,
        ..RuntimeOptions::default()
    };
    let engine = Engine::new(options).with_progress(|p| {
        let tf = p.timeframe.map(|tf| tf.label()).unwrap_or("-");
        log::info!("{} {tf}: {}/{}", p.stage.dir_name(), p.completed, p.total);
    });
    let cancel = CancelToken::new();

    let report = match cmd {
        StageCmd::One => engine.run_stage1(&config, &cancel),
        StageCmd::Two => engine.run_stage2(&config, &cancel),
        StageCmd::Both => engine.run(&config, &cancel),
    }
    .with_context(|| format!("processing {}", config.source_path.display()))?;

    print_report(&report);
    if !report.errors.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

impl PipelineArgs {
    fn into_config(self) -> Result<PipelineConfig> {
        let mut config = match (&self.config, &self.source) {
            (Some(path), _) => PipelineConfig::from_toml_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            (None, Some(source)) => PipelineConfig::new(source.clone()),
            (None, None) => bail!("one of --config or --source is required"),
        };

        if let (Some(_), Some(source)) = (&self.config, self.source) {
            config.source_path = source;
        }
        if let Some(asset) = self.asset {
            config.asset_override = Some(asset);
        }
        if let Some(window) = self.window {
            config.window_name = window;
        }
        if self.start.is_some() {
            config.start = self.start;
        }
        if self.end.is_some() {
            config.end = self.end;
        }
        if !self.timeframes.is_empty() {
            config.timeframes = self.timeframes;
        }
        if self.multi {
            config.timeframe_mode = TimeframeMode::Multi;
        }
        if !self.roles.is_empty() {
            config.role_set = self.roles;
        }
        if let Some(policy) = self.compression {
            config.compression_policy = policy;
        }
        if let Some(mode) = self.type_mode {
            config.type_mode = mode;
        }
        if let Some(output) = self.output {
            config.output_directory = output;
        }
        if self.no_gapless {
            config.gapless = false;
        }
        Ok(config)
    }
}

fn parse_time(s: &str) -> std::result::Result<NaiveDateTime, String> {
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(ts);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| format!("'{s}' is not YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS"))
}

fn print_report(report: &RunReport) {
    println!();
    println!("=== Run Report ===");
    println!("Files written:  {}", report.paths.len());
    for path in &report.paths {
        println!("  {}", path.display());
    }
    for warning in &report.warnings {
        println!("WARNING: {warning}");
    }
    for err in &report.errors {
        let tf = err.timeframe.as_deref().unwrap_or("-");
        println!("ERROR [{}/{tf}] {}: {}", err.stage, err.code, err.message);
    }
    if report.cancelled {
        println!("Run was cancelled; later units were skipped.");
    }
    println!();
}

// ── Inventory commands ───────────────────────────────────────────────

fn run_scan(dir: &Path, keep_latest: Option<usize>, json: bool) -> Result<()> {
    let retention = keep_latest.map_or(RetentionPolicy::KeepAll, RetentionPolicy::KeepLatest);
    let descriptors = Scanner::default()
        .with_retention(retention)
        .scan(dir)
        .with_context(|| format!("scanning {}", dir.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(());
    }
    if descriptors.is_empty() {
        println!("No artifacts in {}", dir.display());
        return Ok(());
    }

    println!(
        "{:<48} {:<8} {:<9} {:<10} {:<20} {:>10}",
        "Stem", "Asset", "Window", "Timeframes", "Created", "Size"
    );
    println!("{}", "-".repeat(110));
    for d in &descriptors {
        print_descriptor(d);
    }
    let invalid = descriptors.iter().filter(|d| !d.valid).count();
    println!();
    println!("{} artifact(s), {invalid} invalid", descriptors.len());
    Ok(())
}

fn print_descriptor(d: &ArtifactDescriptor) {
    let timeframes = if d.timeframes.is_empty() {
        "-".to_string()
    } else {
        d.timeframes.join(",")
    };
    println!(
        "{:<48} {:<8} {:<9} {:<10} {:<20} {:>10}",
        d.stem,
        d.asset,
        d.window,
        timeframes,
        d.created_at.format("%Y-%m-%d %H:%M:%S"),
        format_size(d.total_size)
    );
    for problem in &d.problems {
        println!("    ! {problem}");
    }
}

fn run_inspect(file: &Path, json: bool) -> Result<()> {
    let engine = Engine::new(RuntimeOptions::default());
    let inspection = engine
        .inspect(file)
        .with_context(|| format!("inspecting {}", file.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&inspection)?);
    } else {
        println!("{inspection}");
    }
    Ok(())
}

fn run_script(args: PipelineArgs, out: &Path) -> Result<()> {
    let config = args.into_config()?;
    let paths = write_driver(&config, out)
        .with_context(|| format!("writing driver to {}", out.display()))?;
    println!("Config: {}", paths.config.display());
    println!("Driver: {}", paths.script.display());
    Ok(())
}

fn run_prune(dir: &Path, keep_latest: usize, confirm: bool) -> Result<()> {
    let candidates = Scanner::default()
        .with_retention(RetentionPolicy::KeepLatest(keep_latest))
        .prune_candidates(dir)
        .with_context(|| format!("scanning {}", dir.display()))?;

    if candidates.is_empty() {
        println!("Nothing beyond the newest {keep_latest} per identity.");
        return Ok(());
    }

    println!("Found {} artifact(s) to remove:", candidates.len());
    for d in &candidates {
        println!("  {} ({})", d.stem, format_size(d.total_size));
    }

    if !confirm {
        println!();
        println!("Dry run; pass --confirm to actually delete.");
        return Ok(());
    }

    for d in &candidates {
        for path in d.paths() {
            std::fs::remove_file(&path)
                .with_context(|| format!("removing {}", path.display()))?;
        }
        println!("Removed: {}", d.stem);
    }
    println!("Done. Removed {} artifact(s).", candidates.len());
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
