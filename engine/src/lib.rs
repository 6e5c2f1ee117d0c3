//! # onecopy engine - batch copy library
//!
//! Copies files and directory trees with aggregate progress, optional
//! digest verification, and whole-batch re-execution under elevated
//! privileges when a destination is not writable.
//!
//! ## Overview
//!
//! - Directory sources are flattened into (source, destination) items
//! - Items are copied strictly in order in 1 MiB blocks
//! - Progress is reported against a byte total fixed before copying starts
//! - The first failing item aborts the batch
//! - Cancellation is cooperative, checked after every block
//! - Unwritable destinations send the whole batch, as a JSON manifest, to a
//!   privileged helper process
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{execute_batch, plan_sources, LauncherExecutor, TransferOptions};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let items = plan_sources(&["/home/me/photos"], Path::new("/srv/share"))?;
//! let options = TransferOptions {
//!     compute_digest: true,
//!     ..TransferOptions::default()
//! };
//!
//! let helper = LauncherExecutor::pkexec("/usr/libexec/onecopy-elevated");
//! let summary = execute_batch(&items, &options, None, Some(&helper))?;
//! println!("copied {} files, {} bytes", summary.item_count, summary.total_bytes);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: items, options, results, summaries, progress events
//! - **error**: `EngineError` and its flat `ErrorKind`
//! - **checksums**: streaming digests
//! - **fs_ops**: tree expansion and single-file transfer
//! - **job**: planning, the batch orchestrator, elevation dispatch
//! - **elevation**: write probes and privileged executors
//! - **manifest**: the JSON protocol spoken with the privileged helper
//! - **progress**: progress callback trait and cancellation flag
//! - **worker**: running a batch on a background thread

pub mod checksums;
pub mod elevation;
pub mod error;
pub mod fs_ops;
pub mod job;
pub mod manifest;
pub mod model;
pub mod progress;
pub mod worker;

pub use checksums::{compute_file_checksum, ChecksumAlgorithm, ChecksumValue};
pub use elevation::{first_unwritable, needs_elevation, LauncherExecutor, PrivilegedExecutor};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use fs_ops::{expand_tree, transfer_file, BLOCK_SIZE};
pub use job::{execute_batch, plan_sources, run_batch};
pub use manifest::{handle_manifest, Manifest, ManifestForm, Response};
pub use model::{
    BatchSummary, OnConflict, ProgressEvent, TransferItem, TransferOptions, TransferResult,
};
pub use progress::{CancelFlag, ProgressCallback};
pub use worker::{spawn_batch, spawn_batch_with_cancel, BatchEvent, BatchHandle};
