//! Manifest and response encoding for the privilege boundary.
//!
//! The unprivileged side writes one manifest to the helper's stdin; the
//! helper runs the batch and writes one response object to stdout.
//!
//! Batch manifest:
//!
//! ```json
//! {"items": [{"src": "/a", "dst": "/b"}], "preserve_mode": true, "calc_hash": false}
//! ```
//!
//! A lone file may use the single form, with `src` and `dst` at the top
//! level instead of `items`. Option fields are optional on input; fields
//! that are present override the helper's command-line defaults.

use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::checksums::ChecksumAlgorithm;
use crate::error::{EngineError, EngineResult};
use crate::job::run_batch;
use crate::model::{
    BatchSummary, OnConflict, ProgressEvent, TransferItem, TransferOptions, TransferResult,
};
use crate::progress::ProgressCallback;

/// How a manifest is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestForm {
    /// `{"items": [...], ...}`
    Batch,
    /// `{"src": ..., "dst": ..., ...}`
    Single,
}

/// A batch serialized for the privileged helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub items: Vec<TransferItem>,
    pub options: TransferOptions,
    pub form: ManifestForm,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ManifestWire {
    #[serde(skip_serializing_if = "Option::is_none")]
    items: Option<Vec<TransferItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    src: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dst: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preserve_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    calc_hash: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash_algorithm: Option<ChecksumAlgorithm>,
    #[serde(skip_serializing_if = "Option::is_none")]
    on_conflict: Option<OnConflict>,
}

impl Manifest {
    pub fn batch(items: Vec<TransferItem>, options: TransferOptions) -> Self {
        Manifest {
            items,
            options,
            form: ManifestForm::Batch,
        }
    }

    pub fn single(item: TransferItem, options: TransferOptions) -> Self {
        Manifest {
            items: vec![item],
            options,
            form: ManifestForm::Single,
        }
    }

    /// Serialize to JSON. Every option is written explicitly.
    ///
    /// A `Single` manifest that does not hold exactly one item is written
    /// in batch form.
    pub fn encode(&self) -> EngineResult<String> {
        let mut wire = ManifestWire {
            preserve_mode: Some(self.options.preserve_mode),
            calc_hash: Some(self.options.compute_digest),
            hash_algorithm: Some(self.options.digest_algorithm),
            on_conflict: Some(self.options.on_conflict),
            ..ManifestWire::default()
        };

        match (self.form, self.items.as_slice()) {
            (ManifestForm::Single, [item]) => {
                wire.src = Some(item.source.clone());
                wire.dst = Some(item.destination.clone());
            }
            _ => wire.items = Some(self.items.clone()),
        }

        serde_json::to_string(&wire).map_err(|e| EngineError::Corrupt {
            reason: "manifest paths cannot be encoded".to_string(),
            source: Some(e),
        })
    }

    /// Parse a manifest, filling absent options from `defaults`.
    ///
    /// # Errors
    /// `Corrupt` when the text is not JSON of the expected shape, or when it
    /// holds neither `items` nor both `src` and `dst`.
    pub fn decode(text: &str, defaults: &TransferOptions) -> EngineResult<Self> {
        let wire: ManifestWire = serde_json::from_str(text).map_err(|e| EngineError::Corrupt {
            reason: e.to_string(),
            source: Some(e),
        })?;

        let options = TransferOptions {
            preserve_mode: wire.preserve_mode.unwrap_or(defaults.preserve_mode),
            compute_digest: wire.calc_hash.unwrap_or(defaults.compute_digest),
            digest_algorithm: wire.hash_algorithm.unwrap_or(defaults.digest_algorithm),
            on_conflict: wire.on_conflict.unwrap_or(defaults.on_conflict),
        };

        match (wire.items, wire.src, wire.dst) {
            (Some(items), None, None) => Ok(Manifest::batch(items, options)),
            (None, Some(src), Some(dst)) => Ok(Manifest::single(TransferItem::new(src, dst), options)),
            (Some(_), _, _) => Err(corrupt("manifest mixes `items` with `src`/`dst`")),
            (None, _, _) => Err(corrupt("manifest needs `items` or both `src` and `dst`")),
        }
    }
}

fn corrupt(reason: &str) -> EngineError {
    EngineError::Corrupt {
        reason: reason.to_string(),
        source: None,
    }
}

/// The helper's single reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// A batch manifest completed
    Summary(BatchSummary),
    /// A single-form transfer completed. `summary` is what the batch path
    /// reports for the same item, so a skipped file still counts its size.
    Result {
        result: TransferResult,
        summary: BatchSummary,
    },
    /// Anything failed; carries the message shown to the user
    Error(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct ResponseWire {
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<BatchSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<TransferResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Response {
    pub fn encode(&self) -> String {
        let wire = match self {
            Response::Summary(summary) => ResponseWire {
                ok: true,
                summary: Some(*summary),
                result: None,
                error: None,
            },
            Response::Result { result, summary } => ResponseWire {
                ok: true,
                summary: Some(*summary),
                result: Some(result.clone()),
                error: None,
            },
            Response::Error(message) => ResponseWire {
                ok: false,
                summary: None,
                result: None,
                error: Some(message.clone()),
            },
        };

        serde_json::to_string(&wire).unwrap_or_else(|e| {
            serde_json::json!({ "ok": false, "error": format!("cannot encode response: {}", e) })
                .to_string()
        })
    }

    /// Parse the helper's stdout.
    ///
    /// # Errors
    /// `ElevationFailure` when the text is not a well-formed response.
    pub fn decode(text: &str) -> EngineResult<Self> {
        let wire: ResponseWire =
            serde_json::from_str(text.trim()).map_err(|e| EngineError::ElevationFailure {
                message: format!("malformed helper output: {}", e),
            })?;

        match wire {
            ResponseWire { ok: false, error, .. } => Ok(Response::Error(
                error.unwrap_or_else(|| "elevated copy failed".to_string()),
            )),
            ResponseWire {
                result: Some(result),
                summary,
                ..
            } => Ok(Response::Result {
                summary: summary.unwrap_or(BatchSummary {
                    total_bytes: result.bytes_transferred,
                    item_count: 1,
                    skipped_count: usize::from(result.skipped),
                }),
                result,
            }),
            ResponseWire {
                summary: Some(summary),
                ..
            } => Ok(Response::Summary(summary)),
            _ => Err(EngineError::ElevationFailure {
                message: "helper reported success without a summary".to_string(),
            }),
        }
    }

    /// Process exit code the helper should use for this response.
    pub fn exit_code(&self) -> i32 {
        match self {
            Response::Summary(_) | Response::Result { .. } => 0,
            Response::Error(_) => 1,
        }
    }

    /// Collapse into the summary shape used by the in-process path.
    pub fn into_summary(self) -> EngineResult<BatchSummary> {
        match self {
            Response::Summary(summary) => Ok(summary),
            Response::Result { summary, .. } => Ok(summary),
            Response::Error(message) => Err(EngineError::ElevationFailure { message }),
        }
    }
}

/// Decode `text` and run it, as the privileged helper does.
pub fn handle_manifest(text: &str, defaults: &TransferOptions) -> Response {
    match Manifest::decode(text, defaults) {
        Ok(manifest) => run_manifest(&manifest),
        Err(e) => Response::Error(e.to_string()),
    }
}

/// Run a decoded manifest through the batch orchestrator.
pub fn run_manifest(manifest: &Manifest) -> Response {
    match manifest.form {
        ManifestForm::Batch => match run_batch(&manifest.items, &manifest.options, None) {
            Ok(summary) => Response::Summary(summary),
            Err(e) => Response::Error(e.to_string()),
        },
        ManifestForm::Single => {
            let last = LastResult::default();
            match run_batch(&manifest.items, &manifest.options, Some(&last)) {
                Ok(summary) => match last.0.into_inner().ok().flatten() {
                    Some(result) => Response::Result { result, summary },
                    None => Response::Summary(summary),
                },
                Err(e) => Response::Error(e.to_string()),
            }
        }
    }
}

#[derive(Default)]
struct LastResult(Mutex<Option<TransferResult>>);

impl ProgressCallback for LastResult {
    fn on_progress(&self, _event: &ProgressEvent) -> std::ops::ControlFlow<()> {
        std::ops::ControlFlow::Continue(())
    }

    fn on_item_done(&self, _index: usize, result: &TransferResult) {
        if let Ok(mut last) = self.0.lock() {
            *last = Some(result.clone());
        }
    }
}
