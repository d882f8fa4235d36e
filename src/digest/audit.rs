use crate::digest::paths::DigestPaths;
use crate::digest::util::now_epoch_secs;
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub at_epoch_secs: u64,
    pub phase: String,
    pub status: String,
    pub message: String,
}

pub fn audit_log_path(paths: &DigestPaths) -> PathBuf {
    paths.logs_dir.join("audit.log")
}

/// Append one JSON line; concurrent runs serialize on an exclusive file lock.
pub fn append_event(paths: &DigestPaths, phase: &str, status: &str, message: &str) -> Result<()> {
    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("failed to create {}", paths.logs_dir.display()))?;
    let event = AuditEvent {
        at_epoch_secs: now_epoch_secs()?,
        phase: phase.to_string(),
        status: status.to_string(),
        message: message.to_string(),
    };

    let line = format!("{}\n", serde_json::to_string(&event)?);
    let path = audit_log_path(paths);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.lock_exclusive()
        .with_context(|| format!("failed to lock {}", path.display()))?;
    let written = file.write_all(line.as_bytes());
    let _ = FileExt::unlock(&file);
    written?;
    Ok(())
}
