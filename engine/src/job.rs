//! Batch orchestration.
//!
//! - Planning a batch from the user's source list
//! - Running a batch in-process with aggregate progress
//! - Dispatching a batch either in-process or through a privileged executor

use std::fs;
use std::ops::ControlFlow;
use std::path::{is_separator, Path, PathBuf};

use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::elevation::{self, PrivilegedExecutor};
use crate::error::{EngineError, EngineResult};
use crate::fs_ops;
use crate::manifest::Manifest;
use crate::model::{
    BatchSummary, OnConflict, ProgressEvent, TransferItem, TransferOptions, TransferResult,
};
use crate::progress::ProgressCallback;

/// Turn a list of sources and a destination into transfer items.
///
/// A lone file source may be renamed: unless `destination` is an existing
/// directory or ends with a path separator, it is taken as the final file
/// path. In every other case `destination` is a directory root; files land
/// at `root/<name>` and directories are expanded under `root/<dir name>`.
///
/// Relative paths are resolved against the current directory so the items
/// stay valid when handed to another process.
///
/// # Errors
/// `InvalidInput` for an empty source list or destination, `NotFound` for a
/// missing source.
pub fn plan_sources<P: AsRef<Path>>(
    sources: &[P],
    destination: &Path,
) -> EngineResult<Vec<TransferItem>> {
    if sources.is_empty() {
        return Err(EngineError::InvalidInput {
            reason: "no sources given".to_string(),
        });
    }
    if destination.as_os_str().is_empty() {
        return Err(EngineError::InvalidInput {
            reason: "destination path is empty".to_string(),
        });
    }

    let dest_is_dir_hint = destination.is_dir()
        || destination
            .to_string_lossy()
            .chars()
            .last()
            .is_some_and(is_separator);
    let destination = absolutize(destination)?;

    if let [only] = sources {
        let source = absolutize(only.as_ref())?;
        let metadata =
            fs::metadata(&source).map_err(|e| EngineError::from_io("inspect", &source, e))?;
        if !metadata.is_dir() {
            let target = if dest_is_dir_hint {
                destination.join(source_name(&source)?)
            } else {
                destination
            };
            return Ok(vec![TransferItem::new(source, target)]);
        }
    }

    let mut items = Vec::new();
    for source in sources {
        let source = absolutize(source.as_ref())?;
        let metadata =
            fs::metadata(&source).map_err(|e| EngineError::from_io("inspect", &source, e))?;
        let target = destination.join(source_name(&source)?);
        if metadata.is_dir() {
            items.extend(fs_ops::expand_tree(&source, &target)?);
        } else {
            items.push(TransferItem::new(source, target));
        }
    }

    Ok(items)
}

fn absolutize(path: &Path) -> EngineResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| EngineError::from_io("resolve", path, e))?;
    Ok(cwd.join(path))
}

fn source_name(source: &Path) -> EngineResult<PathBuf> {
    if let Some(name) = source.file_name() {
        return Ok(PathBuf::from(name));
    }
    // Paths like `..` have no final component until resolved
    let resolved =
        fs::canonicalize(source).map_err(|e| EngineError::from_io("resolve", source, e))?;
    resolved
        .file_name()
        .map(PathBuf::from)
        .ok_or_else(|| EngineError::InvalidInput {
            reason: format!("{} has no file name", source.display()),
        })
}

/// Run a batch in-process.
///
/// Source sizes are captured before the first byte is copied; their sum is
/// the fixed aggregate total. Items run strictly in order. Progress from
/// each block is reported as `bytes before this item + bytes of this item`
/// (clamped to the captured size), and the aggregate advances by the
/// captured size once the item completes.
///
/// # Errors
/// - `NotFound` / I/O failure from the pre-flight size scan, before any copy
/// - `Batch { index, .. }` for the first failing item; later items are not
///   attempted and earlier ones stay on disk
/// - `Cancelled` when the callback breaks; no cleanup is performed
pub fn run_batch(
    items: &[TransferItem],
    options: &TransferOptions,
    progress: Option<&dyn ProgressCallback>,
) -> EngineResult<BatchSummary> {
    let batch_id = Uuid::new_v4();
    let span = info_span!("batch", %batch_id, items = items.len());
    let _guard = span.enter();

    let sizes = measure_sources(items)?;
    let total_bytes: u64 = sizes.iter().sum();
    info!(total_bytes, "starting batch");

    let mut aggregate: u64 = 0;
    let mut skipped_count = 0;

    for (index, (item, &size)) in items.iter().zip(&sizes).enumerate() {
        let before = aggregate;
        let name = item.display_name();
        let report = |copied: u64| match progress {
            Some(callback) => callback.on_progress(&ProgressEvent {
                aggregate_bytes_copied: before + copied.min(size),
                aggregate_bytes_total: total_bytes,
                item_index: index,
                item_display_name: name.clone(),
            }),
            None => ControlFlow::Continue(()),
        };

        let skip = check_conflict(item, options.on_conflict)
            .map_err(|e| EngineError::Batch {
                index,
                source: Box::new(e),
            })?;

        let result = if skip {
            debug!(index, dst = %item.destination.display(), "destination exists; skipping");
            skipped_count += 1;
            if report(size).is_break() {
                return Err(EngineError::Cancelled);
            }
            TransferResult {
                bytes_transferred: 0,
                digest: None,
                destination: item.destination.clone(),
                skipped: true,
            }
        } else {
            match fs_ops::transfer_file(item, options, &mut |copied, _| report(copied)) {
                Ok(result) => result,
                Err(EngineError::Cancelled) => {
                    info!(index, "batch cancelled");
                    return Err(EngineError::Cancelled);
                }
                Err(e) => {
                    warn!(index, error = %e, "item failed; aborting batch");
                    return Err(EngineError::Batch {
                        index,
                        source: Box::new(e),
                    });
                }
            }
        };

        aggregate = before + size;
        if let Some(callback) = progress {
            callback.on_item_done(index, &result);
        }
    }

    info!(total_bytes, skipped_count, "batch complete");
    Ok(BatchSummary {
        total_bytes,
        item_count: items.len(),
        skipped_count,
    })
}

/// Stat every source up front.
fn measure_sources(items: &[TransferItem]) -> EngineResult<Vec<u64>> {
    items
        .iter()
        .map(|item| {
            let metadata = fs::metadata(&item.source)
                .map_err(|e| EngineError::from_io("inspect", &item.source, e))?;
            if metadata.is_dir() {
                return Err(EngineError::InvalidInput {
                    reason: format!("{} is a directory", item.source.display()),
                });
            }
            Ok(metadata.len())
        })
        .collect()
}

/// Returns `Ok(true)` when the item should be skipped.
fn check_conflict(item: &TransferItem, policy: OnConflict) -> EngineResult<bool> {
    if policy == OnConflict::Overwrite {
        return Ok(false);
    }

    match fs::symlink_metadata(&item.destination) {
        Ok(_) => match policy {
            OnConflict::Skip => Ok(true),
            _ => Err(EngineError::DestinationExists {
                path: item.destination.clone(),
            }),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(EngineError::from_io("inspect", &item.destination, e)),
    }
}

/// Run a batch, elevating the whole batch if any destination needs it.
///
/// Without elevation the batch runs in-process with live progress. With
/// elevation the items and options travel as one manifest to `executor`
/// and only the final summary comes back; `progress` sees no events.
///
/// # Errors
/// `PermissionDenied` when elevation is needed but no executor is given;
/// otherwise whatever the chosen path reports.
pub fn execute_batch(
    items: &[TransferItem],
    options: &TransferOptions,
    progress: Option<&dyn ProgressCallback>,
    executor: Option<&dyn PrivilegedExecutor>,
) -> EngineResult<BatchSummary> {
    let Some(blocked) = elevation::first_unwritable(items) else {
        return run_batch(items, options, progress);
    };

    let Some(executor) = executor else {
        warn!(dst = %blocked.display(), "destination is not writable and elevation is disabled");
        return Err(EngineError::PermissionDenied {
            path: blocked,
            source: None,
        });
    };

    info!(
        dst = %blocked.display(),
        items = items.len(),
        "destination requires elevation; handing batch to privileged executor"
    );
    if let Some(callback) = progress {
        callback.on_elevation(&blocked);
    }
    let manifest = Manifest::batch(items.to_vec(), *options);
    executor.run_batch_privileged(&manifest)
}
