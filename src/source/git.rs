//! Git-backed source: clone on first use, fast-forward pull afterwards.

use super::{ExecOutput, SourceError, SourceRefresher};
use crate::core::discovery::SourceLayout;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// A definition tree checked out from a git remote.
#[derive(Debug, Clone)]
pub struct GitSource {
    url: String,
    dir: PathBuf,
    timeout: Duration,
}

impl GitSource {
    pub fn new(url: impl Into<String>, dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            dir: dir.into(),
            timeout,
        }
    }

    /// Whether the working directory already holds a checkout.
    pub fn is_checkout(&self) -> bool {
        self.dir.join(".git").exists()
    }

    /// Arguments for the next refresh.
    fn refresh_args(&self) -> Vec<String> {
        if self.is_checkout() {
            vec!["pull".into(), "--ff-only".into()]
        } else {
            vec![
                "clone".into(),
                self.url.clone(),
                self.dir.to_string_lossy().into_owned(),
            ]
        }
    }
}

#[async_trait]
impl SourceRefresher for GitSource {
    async fn refresh(&self) -> Result<(), SourceError> {
        let args = self.refresh_args();
        let cwd = if self.is_checkout() {
            self.dir.clone()
        } else {
            if let Some(parent) = self.dir.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| SourceError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            PathBuf::from(".")
        };

        tracing::info!(url = %self.url, dir = %self.dir.display(), action = %args[0], "refreshing source");
        let output = run_git(&args, &cwd, self.timeout).await?;
        if !output.success() {
            return Err(SourceError::Failed {
                command: format!("git {}", args.join(" ")),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        tracing::debug!(stdout = %output.stdout.trim(), "git finished");
        Ok(())
    }

    fn layout(&self) -> SourceLayout {
        SourceLayout::new(&self.dir)
    }
}

/// Run git with a deadline. The child is killed when the deadline passes.
pub async fn run_git(args: &[String], cwd: &Path, limit: Duration) -> Result<ExecOutput, SourceError> {
    let child = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| SourceError::Spawn {
            program: "git".into(),
            source,
        })?;

    match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }),
        Ok(Err(source)) => Err(SourceError::Spawn {
            program: "git".into(),
            source,
        }),
        Err(_) => Err(SourceError::Timeout {
            command: format!("git {}", args.join(" ")),
            timeout: limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_when_no_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let source = GitSource::new(
            "https://example.invalid/catalog.git",
            dir.path().join("catalog"),
            Duration::from_secs(5),
        );
        assert!(!source.is_checkout());
        let args = source.refresh_args();
        assert_eq!(args[0], "clone");
        assert_eq!(args[1], "https://example.invalid/catalog.git");
    }

    #[test]
    fn test_pull_when_checkout_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let source = GitSource::new("unused", dir.path(), Duration::from_secs(5));
        assert_eq!(source.refresh_args(), vec!["pull", "--ff-only"]);
        assert_eq!(source.layout().root(), dir.path());
    }

    #[tokio::test]
    async fn test_clone_from_missing_remote_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = GitSource::new(
            dir.path().join("no-such-remote").to_string_lossy(),
            dir.path().join("catalog"),
            Duration::from_secs(30),
        );
        // Either git is absent (spawn error) or the clone fails.
        let err = source.refresh().await.unwrap_err();
        assert!(matches!(
            err,
            SourceError::Failed { .. } | SourceError::Spawn { .. }
        ));
        assert!(!source.is_checkout());
    }
}
