//! Preflight checks: verify the external toolchain before any job is
//! claimed, so a misconfigured worker never consumes a token.

use crate::process::{self, ProcessError};
use std::time::Duration;
use thiserror::Error;

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for startup checks.
#[derive(Debug, Error)]
pub enum StartupError {
    /// A required external tool is missing or not runnable.
    #[error("Required tool '{tool}' is unavailable: {detail}")]
    DependencyMissing { tool: String, detail: String },
}

async fn check_tool(tool: &str) -> Result<(), StartupError> {
    let argv = vec![tool.to_string(), "-version".to_string()];
    match process::run(&argv, Some(VERSION_CHECK_TIMEOUT)).await {
        Ok(_) => Ok(()),
        Err(ProcessError::ProcessFailed { code, .. }) => Err(StartupError::DependencyMissing {
            tool: tool.to_string(),
            detail: format!("-version exited with status {code}"),
        }),
        Err(e) => Err(StartupError::DependencyMissing {
            tool: tool.to_string(),
            detail: e.to_string(),
        }),
    }
}

/// Verify both configured toolchain binaries respond to `-version`.
pub async fn check_toolchain(ffmpeg: &str, ffprobe: &str) -> Result<(), StartupError> {
    check_tool(ffmpeg).await?;
    check_tool(ffprobe).await?;
    Ok(())
}
