//! Job claim registry: filesystem-atomic claiming over a shared token
//! directory.
//!
//! The token file is the only cross-process state. Exclusive creation
//! (`O_EXCL`) is the synchronization primitive, so the protocol holds on
//! any filesystem that honors it, including NFS and SMB mounts.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Suffix a failed job's token is renamed to, preserving the log for
/// inspection while freeing the claim name.
pub const ERROR_LOG_SUFFIX: &str = ".error_log";

/// Error type for claim operations.
#[derive(Debug, Error)]
pub enum ClaimError {
    /// IO error touching the token or scratch file.
    #[error("Claim IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This worker owns the job; the token and scratch prefix are live.
    Claimed {
        token_path: PathBuf,
        scratch_prefix: PathBuf,
    },
    /// The output already exists; an empty token was touched as an
    /// idempotent done-marker.
    AlreadyDone,
    /// Another worker holds the token.
    Held,
}

/// Registry bound to the shared token directory and the local scratch
/// directory.
#[derive(Debug, Clone)]
pub struct ClaimRegistry {
    token_dir: PathBuf,
    scratch_dir: PathBuf,
}

impl ClaimRegistry {
    pub fn new(token_dir: &Path, scratch_dir: &Path) -> Self {
        Self {
            token_dir: token_dir.to_path_buf(),
            scratch_dir: scratch_dir.to_path_buf(),
        }
    }

    /// Token path for an input: `<token_dir>/<input_basename>.token`.
    pub fn token_path(&self, input: &Path) -> PathBuf {
        let basename = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());
        self.token_dir.join(format!("{basename}.token"))
    }

    /// Attempt to claim an input.
    ///
    /// If the output already exists the claim short-circuits: the token is
    /// touched (created empty if absent, never truncated) and no work is
    /// taken. Otherwise exclusive creation of the token decides ownership.
    pub fn claim(&self, input: &Path, output: &Path) -> Result<ClaimOutcome, ClaimError> {
        let token_path = self.token_path(input);

        if output.exists() {
            OpenOptions::new()
                .write(true)
                .create(true)
                .open(&token_path)?;
            return Ok(ClaimOutcome::AlreadyDone);
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&token_path)
        {
            Ok(mut token) => {
                writeln!(
                    token,
                    "Claimed by PID {} at {}",
                    std::process::id(),
                    epoch_secs()
                )?;
                let scratch_prefix = self.create_scratch_file(input)?;
                Ok(ClaimOutcome::Claimed {
                    token_path,
                    scratch_prefix,
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(ClaimOutcome::Held),
            Err(e) => Err(ClaimError::Io(e)),
        }
    }

    /// Release after failure. The driver normally renames the token to its
    /// error-log name first; if the token still exists under its active
    /// name, delete it so other workers may retry the input later.
    pub fn release_failed(&self, token_path: &Path) -> Result<(), ClaimError> {
        match std::fs::remove_file(token_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ClaimError::Io(e)),
        }
    }

    fn create_scratch_file(&self, input: &Path) -> Result<PathBuf, ClaimError> {
        let stem = input
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "job".to_string());
        let scratch = self
            .scratch_dir
            .join(format!("{stem}.{}", Uuid::new_v4().simple()));
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&scratch)?;
        Ok(scratch)
    }
}

/// Error-log path for a token: `<token>.error_log`.
pub fn error_log_path(token_path: &Path) -> PathBuf {
    let mut renamed = token_path.as_os_str().to_owned();
    renamed.push(ERROR_LOG_SUFFIX);
    PathBuf::from(renamed)
}

/// Remove every file sharing the scratch prefix (`<prefix>*`): the scratch
/// marker itself plus encoder stats files derived from it.
pub fn remove_scratch_files(scratch_prefix: &Path) -> std::io::Result<()> {
    let Some(dir) = scratch_prefix.parent() else {
        return Ok(());
    };
    let Some(prefix_name) = scratch_prefix.file_name().map(|n| n.to_string_lossy().into_owned())
    else {
        return Ok(());
    };

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix_name) {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
