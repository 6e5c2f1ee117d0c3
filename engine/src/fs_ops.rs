//! Filesystem operations.
//!
//! - Expanding a directory tree into transfer items
//! - Copying a single file in fixed-size blocks with progress
//! - Creating destination directories recursively

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::ops::ControlFlow;
use std::path::Path;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::checksums::compute_file_checksum;
use crate::error::{EngineError, EngineResult};
use crate::model::{TransferItem, TransferOptions, TransferResult};

/// Copy and hash block size (1 MiB).
pub const BLOCK_SIZE: usize = 1024 * 1024;

/// Expand a source directory into one transfer item per regular file.
///
/// Destinations are `destination_root` joined with each file's path
/// relative to `source`. Order follows the directory walk and is not sorted.
///
/// Symlinks are never descended into. A symlink that resolves to a regular
/// file is emitted like a file (its contents get copied); symlinks to
/// directories, broken symlinks and special files are skipped with a
/// warning.
///
/// # Errors
/// `NotFound` if `source` is missing, `InvalidInput` if it is not a
/// directory, an I/O failure if the walk cannot read a directory.
pub fn expand_tree(source: &Path, destination_root: &Path) -> EngineResult<Vec<TransferItem>> {
    let metadata = fs::metadata(source).map_err(|e| EngineError::from_io("inspect", source, e))?;
    if !metadata.is_dir() {
        return Err(EngineError::InvalidInput {
            reason: format!("{} is not a directory", source.display()),
        });
    }

    let mut items = Vec::new();
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            EngineError::from_io("walk", &path, io::Error::from(e))
        })?;

        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }

        let entry_path = entry.path();
        let copyable = if file_type.is_file() {
            true
        } else if file_type.is_symlink() {
            match fs::metadata(entry_path) {
                Ok(target) if target.is_file() => true,
                Ok(_) => {
                    warn!(path = %entry_path.display(), "skipping symlink that does not point to a regular file");
                    false
                }
                Err(_) => {
                    warn!(path = %entry_path.display(), "skipping broken symlink");
                    false
                }
            }
        } else {
            warn!(path = %entry_path.display(), "skipping special file");
            false
        };

        if !copyable {
            continue;
        }

        let relative = entry_path
            .strip_prefix(source)
            .map_err(|_| EngineError::InvalidInput {
                reason: format!(
                    "{} is outside {}",
                    entry_path.display(),
                    source.display()
                ),
            })?;
        items.push(TransferItem::new(entry_path, destination_root.join(relative)));
    }

    debug!(source = %source.display(), files = items.len(), "expanded directory");
    Ok(items)
}

/// Copy one file in `BLOCK_SIZE` blocks.
///
/// `on_progress(copied, total)` runs after each block is written; `total`
/// is the source size read before the copy starts. Returning `Break`
/// aborts with `Cancelled` and leaves the partial destination in place.
///
/// Permission bits are copied only after the last block is written, and
/// the digest (if requested) is computed over the destination.
pub fn transfer_file(
    item: &TransferItem,
    options: &TransferOptions,
    on_progress: &mut dyn FnMut(u64, u64) -> ControlFlow<()>,
) -> EngineResult<TransferResult> {
    let src = item.source.as_path();
    let dst = item.destination.as_path();

    let mut src_file = File::open(src).map_err(|e| EngineError::from_io("open", src, e))?;
    let src_metadata = src_file
        .metadata()
        .map_err(|e| EngineError::from_io("inspect", src, e))?;
    if src_metadata.is_dir() {
        return Err(EngineError::InvalidInput {
            reason: format!("{} is a directory", src.display()),
        });
    }
    let total = src_metadata.len();

    // Creating the destination would truncate the source before it is read
    if is_same_file(src, &src_metadata, dst) {
        return Err(EngineError::InvalidInput {
            reason: format!("{} and {} are the same file", src.display(), dst.display()),
        });
    }

    ensure_parent_dir_exists(dst)?;

    debug!(src = %src.display(), dst = %dst.display(), bytes = total, "copying file");

    let mut dst_file = File::create(dst).map_err(|e| EngineError::from_io("create", dst, e))?;
    let mut buffer = vec![0u8; BLOCK_SIZE];
    let mut copied: u64 = 0;

    loop {
        let n = read_block(&mut src_file, &mut buffer)
            .map_err(|e| EngineError::from_io("read", src, e))?;
        if n == 0 {
            break;
        }

        dst_file
            .write_all(&buffer[..n])
            .map_err(|e| EngineError::from_io("write", dst, e))?;
        copied += n as u64;

        if on_progress(copied, total).is_break() {
            debug!(dst = %dst.display(), copied, "copy cancelled");
            return Err(EngineError::Cancelled);
        }
    }

    dst_file
        .flush()
        .map_err(|e| EngineError::from_io("write", dst, e))?;
    drop(dst_file);

    if options.preserve_mode {
        fs::set_permissions(dst, src_metadata.permissions())
            .map_err(|e| EngineError::from_io("set permissions on", dst, e))?;
    }

    let digest = if options.compute_digest {
        Some(compute_file_checksum(dst, options.digest_algorithm)?.into_hex())
    } else {
        None
    };

    Ok(TransferResult {
        bytes_transferred: copied,
        digest,
        destination: dst.to_path_buf(),
        skipped: false,
    })
}

/// True if `dst` already exists and is the file behind `src`, including
/// through a hard link or a different spelling of the same path.
#[cfg(unix)]
fn is_same_file(_src: &Path, src_metadata: &fs::Metadata, dst: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    fs::metadata(dst)
        .is_ok_and(|dst| dst.dev() == src_metadata.dev() && dst.ino() == src_metadata.ino())
}

#[cfg(not(unix))]
fn is_same_file(src: &Path, _src_metadata: &fs::Metadata, dst: &Path) -> bool {
    match (fs::canonicalize(src), fs::canonicalize(dst)) {
        (Ok(src), Ok(dst)) => src == dst,
        _ => false,
    }
}

/// Fill `buffer` from `reader`, stopping early only at end of file.
fn read_block(reader: &mut impl Read, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Ensure the parent directory of a path exists, creating missing
/// ancestors.
///
/// # Errors
/// Fails if the parent exists but is not a directory, or if creation fails.
pub fn ensure_parent_dir_exists(path: &Path) -> EngineResult<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => return Ok(()),
    };

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::Io {
            operation: "create directory",
            path: parent.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::AlreadyExists,
                "parent path exists but is not a directory",
            ),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(parent)
            .map_err(|e| EngineError::from_io("create directory", parent, e)),
        Err(e) => Err(EngineError::from_io("create directory", parent, e)),
    }
}
