//! onecopy - command-line front end for the copy engine.
//!
//! Plans the copy, runs it on a worker thread, and draws aggregate progress
//! on stderr. Destinations the current user cannot write are handled by
//! re-running the whole batch through the privileged helper.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use engine::{
    elevation::DEFAULT_LAUNCHER, plan_sources, spawn_batch, BatchEvent, BatchSummary,
    ChecksumAlgorithm, LauncherExecutor, OnConflict, PrivilegedExecutor, ProgressEvent,
    TransferOptions, TransferResult,
};

/// Copy files and folders with progress, verification, and automatic elevation
#[derive(Parser, Debug)]
#[command(name = "onecopy")]
#[command(version)]
#[command(about = "Copy files and folders with progress, verification, and automatic elevation")]
struct Args {
    /// Sources to copy, followed by the destination
    #[arg(value_name = "PATH", required = true, num_args = 2..)]
    paths: Vec<PathBuf>,

    /// Copy permission bits onto the destination (default)
    #[arg(long, overrides_with = "no_preserve_mode")]
    preserve_mode: bool,

    /// Do not copy permission bits onto the destination
    #[arg(long, overrides_with = "preserve_mode")]
    no_preserve_mode: bool,

    /// Compute a digest of every destination file after writing it
    #[arg(long)]
    hash: bool,

    /// Digest algorithm: md5, sha256, sha512, blake3
    #[arg(long, value_name = "ALGORITHM", default_value = "sha256")]
    hash_algorithm: ChecksumAlgorithm,

    /// What to do with existing destinations: overwrite, skip, or fail
    #[arg(long, value_name = "POLICY", default_value = "overwrite")]
    on_conflict: OnConflict,

    /// Fail instead of requesting elevated privileges
    #[arg(long)]
    no_elevate: bool,

    /// Program used to run the helper with elevated privileges
    #[arg(long, value_name = "PROGRAM", env = "ONECOPY_LAUNCHER", default_value = DEFAULT_LAUNCHER)]
    launcher: String,

    /// Path of the privileged helper (default: onecopy-elevated next to this binary)
    #[arg(long, value_name = "PATH", env = "ONECOPY_HELPER")]
    helper: Option<PathBuf>,

    /// Print every file as it completes
    #[arg(short, long)]
    verbose: bool,
}

/// Renders aggregate progress on stderr
struct CliProgress {
    verbose: bool,
    start_time: Instant,
    last_update: Option<Instant>,
}

impl CliProgress {
    const MIN_INTERVAL: Duration = Duration::from_millis(200);

    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            start_time: Instant::now(),
            last_update: None,
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn progress_bar(percent: u32) -> String {
        let filled = (percent.min(100) / 5) as usize;
        format!("[{}{}] {:3}%", "=".repeat(filled), " ".repeat(20 - filled), percent)
    }

    fn on_progress(&mut self, event: &ProgressEvent) {
        let finished = event.aggregate_bytes_copied >= event.aggregate_bytes_total;
        if let Some(last) = self.last_update {
            if !finished && last.elapsed() < Self::MIN_INTERVAL {
                return;
            }
        }
        self.last_update = Some(Instant::now());

        eprint!(
            "\r{} ({}) {} | {}/{}   ",
            Self::progress_bar(event.percent()),
            event.item_index + 1,
            event.item_display_name,
            Self::format_bytes(event.aggregate_bytes_copied),
            Self::format_bytes(event.aggregate_bytes_total)
        );
    }

    fn on_item_done(&self, index: usize, result: &TransferResult) {
        if !self.verbose {
            return;
        }
        let status = if result.skipped { "Skipped" } else { "Done" };
        match &result.digest {
            Some(digest) => eprintln!(
                "\n[{:3}] {}: {} {}",
                index,
                status,
                result.destination.display(),
                digest
            ),
            None => eprintln!("\n[{:3}] {}: {}", index, status, result.destination.display()),
        }
    }

    fn on_done(&self, summary: &BatchSummary) {
        eprintln!();
        eprintln!(
            "Copy complete. Files: {} | Bytes: {} | Skipped: {} | Elapsed: {:.1}s",
            summary.item_count,
            summary.total_bytes,
            summary.skipped_count,
            self.start_time.elapsed().as_secs_f64()
        );
    }
}

fn main() {
    let args = Args::parse();
    onecopy_cli::init_logging(args.verbose);

    let exit_code = match run_cli(&args) {
        Ok(_) => 0,
        Err(msg) => {
            eprintln!("\nError: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

fn helper_path(args: &Args) -> Result<PathBuf, String> {
    if let Some(helper) = &args.helper {
        return Ok(helper.clone());
    }
    let exe = std::env::current_exe().map_err(|e| format!("Cannot locate onecopy: {}", e))?;
    Ok(exe.with_file_name(format!("onecopy-elevated{}", std::env::consts::EXE_SUFFIX)))
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<BatchSummary, String> {
    let (destination, sources) = args
        .paths
        .split_last()
        .ok_or_else(|| "Give at least one source and a destination".to_string())?;

    for source in sources {
        if !source.exists() {
            return Err(format!("Source does not exist: {}", source.display()));
        }
    }

    let items = plan_sources(sources, destination).map_err(|e| format!("Planning failed: {}", e))?;
    if items.is_empty() {
        return Err("Nothing to copy".to_string());
    }

    let options = TransferOptions {
        preserve_mode: !args.no_preserve_mode,
        compute_digest: args.hash,
        digest_algorithm: args.hash_algorithm,
        on_conflict: args.on_conflict,
    };

    let executor: Option<Box<dyn PrivilegedExecutor + Send>> = if args.no_elevate {
        None
    } else {
        let helper = helper_path(args)?;
        Some(Box::new(LauncherExecutor::new(args.launcher.as_str(), [helper])))
    };

    let mut progress = CliProgress::new(args.verbose);
    let handle = spawn_batch(items, options, executor);

    let mut outcome = Err("Copy worker stopped without a result".to_string());
    for event in handle.events().iter() {
        match event {
            BatchEvent::Progress(event) => progress.on_progress(&event),
            BatchEvent::ItemDone { index, result } => progress.on_item_done(index, &result),
            BatchEvent::Elevating { destination } => eprintln!(
                "{} requires elevated permissions. Requesting authorization...",
                destination.display()
            ),
            BatchEvent::Done(summary) => {
                progress.on_done(&summary);
                outcome = Ok(summary);
            }
            BatchEvent::Failed(e) => outcome = Err(format!("Copy failed: {}", e)),
        }
    }

    handle
        .join()
        .map_err(|_| "Copy worker panicked".to_string())?;
    outcome
}
