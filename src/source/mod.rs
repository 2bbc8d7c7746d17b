//! Source tree refresh: keeps the local definition checkout current.

pub mod git;

use crate::core::discovery::SourceLayout;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("`{command}` exited with code {exit_code}: {stderr}")]
    Failed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("`{command}` timed out after {}s", timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    #[error("cannot prepare {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Output of a refresh command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Brings the source tree up to date before a pass.
#[async_trait]
pub trait SourceRefresher: Send + Sync {
    async fn refresh(&self) -> Result<(), SourceError>;

    /// Layout of the tree a pass reads from.
    fn layout(&self) -> SourceLayout;
}

/// A plain directory that is maintained out of band.
#[derive(Debug, Clone)]
pub struct LocalSource {
    dir: PathBuf,
}

impl LocalSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SourceRefresher for LocalSource {
    async fn refresh(&self) -> Result<(), SourceError> {
        tracing::debug!(dir = %self.dir.display(), "local source, nothing to refresh");
        Ok(())
    }

    fn layout(&self) -> SourceLayout {
        SourceLayout::new(&self.dir)
    }
}
