//! CLI entry point for Image Squisher
//!
//! Parses command line arguments, sets up logging, scans the folder and runs
//! the orchestrator.

use clap::Parser;
use image_squisher::config::normalize_extension;
use image_squisher::notify::{AlertSink, DesktopNotifier};
use image_squisher::watchdog::ALERT_TITLE;
use image_squisher::{
    detect_formats, format_bytes, scan_folder, sweep_orphans, Config, Orchestrator, RunSummary,
};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Image Squisher - keep the smallest of JPEG XL, lossless WebP and the original
#[derive(Parser, Debug)]
#[command(name = "image-squisher")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Folder to process
    #[arg(required_unless_present = "write_default_config")]
    folder: Option<PathBuf>,

    /// Path to the configuration file (defaults to ./image-squisher.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only process the top level of the folder
    #[arg(long)]
    no_recursive: bool,

    /// Number of images processed in parallel
    #[arg(short, long)]
    threads: Option<u32>,

    /// Scan and report the formats found without converting anything
    #[arg(long)]
    dry_run: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Write the default configuration to this path and exit
    #[arg(long, value_name = "PATH")]
    write_default_config: Option<PathBuf>,

    /// Also append log output to this file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// Exit with a failure status if any image failed
    #[arg(long)]
    fail_on_error: bool,

    /// Use the format learner to pick which encoder starts first
    #[arg(long)]
    learning: bool,

    /// Extensions to skip, in addition to the configured ones
    #[arg(long, value_delimiter = ',', value_name = "EXT")]
    skip: Vec<String>,
}

fn default_level(args: &Args) -> &'static str {
    if args.verbose {
        "debug"
    } else if args.quiet {
        "warn"
    } else {
        "info"
    }
}

/// Initialize logging. `RUST_LOG` takes precedence over the flags.
fn init_tracing(level: &str, log_file: Option<&Path>) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = match log_file {
        Some(path) => {
            let file: File = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    Ok(())
}

/// Load the configuration and fold the command line overrides into it.
fn build_config(args: &Args) -> Result<Config, String> {
    let mut config = Config::load_or_default(args.config.as_deref()).map_err(|e| e.to_string())?;

    if let Some(threads) = args.threads {
        config.processing.threads = Some(threads);
    }
    if args.no_recursive {
        config.processing.recursive = false;
    }
    if args.learning {
        config.learning.enabled = true;
    }
    config
        .processing
        .skip_extensions
        .extend(args.skip.iter().map(|ext| normalize_extension(ext)));

    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn write_default_config(path: &Path) -> ExitCode {
    let written = Config::default_toml()
        .map_err(|e| e.to_string())
        .and_then(|toml| std::fs::write(path, toml).map_err(|e| e.to_string()));
    match written {
        Ok(()) => {
            println!("Wrote default configuration to {}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to write {}: {}", path.display(), e);
            ExitCode::FAILURE
        }
    }
}

fn notify_finished(summary: &RunSummary) {
    let (title, message) = if summary.has_errors() {
        (
            format!("{} - Completed with Errors", ALERT_TITLE),
            format!(
                "{} of {} images failed. Check the log for details.",
                summary.errors, summary.processed
            ),
        )
    } else {
        (
            format!("{} - Completed", ALERT_TITLE),
            format!(
                "Processed {} images, saved {}",
                summary.processed,
                format_bytes(summary.bytes_saved().max(0) as u64)
            ),
        )
    };
    DesktopNotifier.alert(&title, &message);
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Some(path) = &args.write_default_config {
        return write_default_config(path);
    }

    if let Err(e) = init_tracing(default_level(&args), args.log_file.as_deref()) {
        eprintln!("Failed to open log file: {}", e);
        return ExitCode::FAILURE;
    }

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let Some(folder) = args.folder.as_deref() else {
        eprintln!("No folder given");
        return ExitCode::FAILURE;
    };
    if !folder.is_dir() {
        eprintln!("Not a directory: {}", folder.display());
        return ExitCode::FAILURE;
    }

    let recursive = config.processing.recursive;
    if !args.dry_run {
        let removed = sweep_orphans(folder, recursive);
        if !removed.is_empty() {
            info!(count = removed.len(), "cleaned up temp files from an earlier run");
        }
    }

    let candidates = scan_folder(folder, recursive, &config.processing.skip_extensions);
    let formats = detect_formats(&candidates);
    info!(
        images = candidates.len(),
        formats = %formats.iter().cloned().collect::<Vec<_>>().join(", "),
        "scan complete"
    );

    if args.dry_run {
        if args.json {
            let paths: Vec<_> = candidates.iter().map(|c| &c.path).collect();
            match serde_json::to_string_pretty(&serde_json::json!({
                "images": paths,
                "formats": formats,
            })) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Failed to encode scan result: {}", e),
            }
        } else {
            println!("Found {} images in {}", candidates.len(), folder.display());
            for format in &formats {
                let count = candidates.iter().filter(|c| &c.extension == format).count();
                println!("  {:<6} {}", format, count);
            }
        }
        return ExitCode::SUCCESS;
    }

    let notifications = config.notifications.enabled;
    let orchestrator = match Orchestrator::new(config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("Failed to start: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing images in progress");
            stop.stop();
        }
    });

    let sources = candidates.into_iter().map(|c| c.path).collect();
    let summary = orchestrator.run(sources).await;

    if args.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to encode summary: {}", e),
        }
    } else {
        println!("{}", summary);
    }

    if notifications && summary.processed > 0 {
        notify_finished(&summary);
    }

    if args.fail_on_error && summary.has_errors() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
