//! Deciding when a batch needs elevated privileges, and running it that way.
//!
//! Writability is decided by a probe: create a uniquely named marker file
//! in the directory the destination will be written into, then remove it.
//! A batch is elevated as a whole as soon as any destination fails the
//! probe.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::manifest::{Manifest, Response};
use crate::model::{BatchSummary, TransferItem};

const PROBE_PREFIX: &str = ".onecopy-probe-";

/// Default privilege launcher.
pub const DEFAULT_LAUNCHER: &str = "pkexec";

/// Exit codes pkexec uses when the prompt is dismissed or authorization
/// fails before the helper runs.
const LAUNCHER_DECLINED_CODES: [i32; 2] = [126, 127];

/// True if the current process cannot write where `destination` will be
/// created.
pub fn needs_elevation(destination: &Path) -> bool {
    !probe_writable(&probe_dir(destination))
}

/// The directory a write to `destination` lands in: the destination itself
/// if it is an existing directory, otherwise the nearest existing ancestor
/// (missing directories will be created there).
pub fn probe_dir(destination: &Path) -> PathBuf {
    if destination.is_dir() {
        return destination.to_path_buf();
    }

    let mut candidate = destination.parent();
    while let Some(dir) = candidate {
        if dir.as_os_str().is_empty() {
            break;
        }
        if dir.is_dir() {
            return dir.to_path_buf();
        }
        candidate = dir.parent();
    }
    PathBuf::from(".")
}

/// Create and remove a marker file in `dir`.
///
/// Removal is attempted whether or not the write succeeded, so the probe
/// leaves nothing behind.
pub fn probe_writable(dir: &Path) -> bool {
    let marker = dir.join(format!("{}{}", PROBE_PREFIX, Uuid::new_v4().simple()));

    let written = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&marker)
        .and_then(|mut file| file.write_all(b"ok"));

    match fs::remove_file(&marker) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(marker = %marker.display(), error = %e, "could not remove write probe"),
    }

    if let Err(e) = &written {
        debug!(dir = %dir.display(), error = %e, "write probe failed");
    }
    written.is_ok()
}

/// First destination in `items` that needs elevation, probing each
/// directory once.
pub fn first_unwritable(items: &[TransferItem]) -> Option<PathBuf> {
    let mut probed: HashMap<PathBuf, bool> = HashMap::new();

    items.iter().find_map(|item| {
        let dir = probe_dir(&item.destination);
        let writable = *probed
            .entry(dir)
            .or_insert_with_key(|dir| probe_writable(dir));
        (!writable).then(|| item.destination.clone())
    })
}

/// Runs a whole batch with elevated privileges.
///
/// Implementations receive the full manifest and report only the final
/// summary; no progress crosses the boundary.
pub trait PrivilegedExecutor {
    fn run_batch_privileged(&self, manifest: &Manifest) -> EngineResult<BatchSummary>;
}

/// Re-invokes the helper binary through an external launcher:
/// `<launcher> <helper...> --manifest`, manifest on stdin, response on
/// stdout.
#[derive(Debug, Clone)]
pub struct LauncherExecutor {
    launcher: OsString,
    helper: Vec<OsString>,
}

impl LauncherExecutor {
    /// `helper` is the argument vector that starts the helper, usually just
    /// its absolute path.
    pub fn new<I, S>(launcher: impl Into<OsString>, helper: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        LauncherExecutor {
            launcher: launcher.into(),
            helper: helper.into_iter().map(Into::into).collect(),
        }
    }

    /// Launch `helper` through pkexec.
    pub fn pkexec(helper: impl Into<OsString>) -> Self {
        Self::new(DEFAULT_LAUNCHER, [helper.into()])
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.launcher);
        command
            .args(&self.helper)
            .arg("--manifest")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

impl PrivilegedExecutor for LauncherExecutor {
    fn run_batch_privileged(&self, manifest: &Manifest) -> EngineResult<BatchSummary> {
        let payload = manifest.encode()?;
        let launcher = PathBuf::from(&self.launcher);

        let mut child = self.command().spawn().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                EngineError::ElevationDeclined {
                    reason: format!("launcher {} is not available", launcher.display()),
                }
            } else {
                EngineError::ElevationFailure {
                    message: format!("failed to start {}: {}", launcher.display(), e),
                }
            }
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A helper that exits early closes the pipe; its output explains why
            if let Err(e) = stdin.write_all(payload.as_bytes()) {
                if e.kind() != io::ErrorKind::BrokenPipe {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(EngineError::ElevationFailure {
                        message: format!("failed to send manifest: {}", e),
                    });
                }
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| EngineError::ElevationFailure {
                message: format!("failed to read helper output: {}", e),
            })?;

        debug!(status = ?output.status, "privileged helper exited");
        interpret_output(
            output.status.code(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        )
    }
}

/// Turn the helper's exit code and output into a summary or error.
fn interpret_output(code: Option<i32>, stdout: &str, stderr: &str) -> EngineResult<BatchSummary> {
    let stderr = stderr.trim();

    match Response::decode(stdout) {
        Ok(response @ Response::Error(_)) => response.into_summary(),
        Ok(response) if code == Some(0) => response.into_summary(),
        Ok(_) => Err(EngineError::ElevationFailure {
            message: format!("helper reported success but exited with {:?}", code),
        }),
        Err(_) if code.is_some_and(|c| LAUNCHER_DECLINED_CODES.contains(&c)) => {
            Err(EngineError::ElevationDeclined {
                reason: if stderr.is_empty() {
                    "authorization was dismissed or denied".to_string()
                } else {
                    stderr.to_string()
                },
            })
        }
        Err(e) => Err(EngineError::ElevationFailure {
            message: if stderr.is_empty() {
                match code {
                    Some(code) => format!("helper exited with status {}", code),
                    None => e.to_string(),
                }
            } else {
                stderr.to_string()
            },
        }),
    }
}
