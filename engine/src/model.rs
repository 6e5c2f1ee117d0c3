//! Core data model for copy batches.
//!
//! - TransferItem: one (source, destination) file pair
//! - TransferOptions: options applied uniformly to every item of a batch
//! - TransferResult / BatchSummary: per-item and per-batch outcomes
//! - ProgressEvent: aggregate progress notification

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::checksums::ChecksumAlgorithm;

/// A single file to copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferItem {
    /// Full source path
    #[serde(rename = "src")]
    pub source: PathBuf,

    /// Full destination path
    #[serde(rename = "dst")]
    pub destination: PathBuf,
}

impl TransferItem {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        TransferItem {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Base name of the source, used in progress notifications.
    pub fn display_name(&self) -> String {
        display_name(&self.source)
    }
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Options applied to every item of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    /// Copy the source's permission bits onto the destination
    pub preserve_mode: bool,

    /// Compute a digest of each destination after it is written
    pub compute_digest: bool,

    /// Algorithm used when `compute_digest` is set
    pub digest_algorithm: ChecksumAlgorithm,

    /// What to do when a destination already exists
    pub on_conflict: OnConflict,
}

impl Default for TransferOptions {
    fn default() -> Self {
        TransferOptions {
            preserve_mode: true,
            compute_digest: false,
            digest_algorithm: ChecksumAlgorithm::default(),
            on_conflict: OnConflict::default(),
        }
    }
}

/// Policy for destinations that already exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnConflict {
    /// Replace the existing file
    #[default]
    Overwrite,
    /// Leave the existing file alone and move on
    Skip,
    /// Abort the batch
    Fail,
}

impl fmt::Display for OnConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnConflict::Overwrite => write!(f, "overwrite"),
            OnConflict::Skip => write!(f, "skip"),
            OnConflict::Fail => write!(f, "fail"),
        }
    }
}

impl FromStr for OnConflict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "overwrite" => Ok(OnConflict::Overwrite),
            "skip" => Ok(OnConflict::Skip),
            "fail" => Ok(OnConflict::Fail),
            other => Err(format!(
                "invalid conflict policy '{}'; expected overwrite, skip, or fail",
                other
            )),
        }
    }
}

/// Outcome of one completed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    /// Bytes written to the destination
    #[serde(rename = "bytes")]
    pub bytes_transferred: u64,

    /// Hex digest of the destination, when requested
    #[serde(rename = "hash")]
    pub digest: Option<String>,

    #[serde(rename = "dst")]
    pub destination: PathBuf,

    /// True when the conflict policy left an existing destination untouched
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

/// Terminal aggregate of a batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Sum of source sizes captured before the first byte was copied
    #[serde(rename = "bytes")]
    pub total_bytes: u64,

    #[serde(rename = "count")]
    pub item_count: usize,

    #[serde(rename = "skipped", default)]
    pub skipped_count: usize,
}

/// Aggregate progress across a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub aggregate_bytes_copied: u64,
    pub aggregate_bytes_total: u64,
    pub item_index: usize,
    pub item_display_name: String,
}

impl ProgressEvent {
    /// `floor(100 * copied / max(1, total))`.
    pub fn percent(&self) -> u32 {
        let total = self.aggregate_bytes_total.max(1) as u128;
        (100 * self.aggregate_bytes_copied as u128 / total) as u32
    }
}
