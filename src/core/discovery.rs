//! Source tree layout, definition discovery and positional identity.
//!
//! Each kind lives under its own subdirectory of the source root and is
//! discovered by recursive walk. Identity comes from the path: for versioned
//! kinds `<kind dir>/<name>/<version>/<file>`, for endpoints
//! `<kind dir>/<name>/endpoint.yaml`. Definition files at any other depth are
//! rejected, so each identity maps to exactly one path.

use super::types::{EntityKind, Identity};
use std::path::{Path, PathBuf};

/// A checked-out definition tree.
#[derive(Debug, Clone)]
pub struct SourceLayout {
    root: PathBuf,
}

impl SourceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every definition of `kind`.
    pub fn kind_root(&self, kind: EntityKind) -> PathBuf {
        self.root.join(kind.source_dir())
    }

    /// Expected definition file for an identity.
    pub fn definition_path(&self, kind: EntityKind, identity: &Identity) -> PathBuf {
        let mut path = self.kind_root(kind).join(&identity.name);
        if let Some(version) = &identity.version {
            path.push(version);
        }
        path.join(kind.file_name())
    }

    /// Whether a definition file exists for an identity.
    pub fn contains(&self, kind: EntityKind, identity: &Identity) -> bool {
        self.definition_path(kind, identity).is_file()
    }
}

/// A definition file found on disk, with identity resolved.
#[derive(Debug, Clone)]
pub struct Discovered {
    pub kind: EntityKind,
    pub path: PathBuf,
    pub identity: Identity,
}

impl Discovered {
    /// Directory containing the definition file.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// A definition file that was found but cannot be reconciled.
#[derive(Debug, Clone)]
pub struct Rejected {
    pub kind: EntityKind,
    pub path: PathBuf,
    pub reason: String,
}

/// Everything found for one kind.
#[derive(Debug, Default)]
pub struct Discovery {
    pub found: Vec<Discovered>,
    pub rejected: Vec<Rejected>,
}

/// Path components below the kind directory, file name included.
fn expected_depth(kind: EntityKind) -> usize {
    if kind.is_versioned() {
        3
    } else {
        2
    }
}

/// Derive identity from a definition file path.
pub fn identity_from_path(kind: EntityKind, path: &Path) -> Result<Identity, String> {
    let mut segments = path
        .parent()
        .into_iter()
        .flat_map(|p| p.components().rev())
        .filter_map(|c| c.as_os_str().to_str());

    let invalid = || format!("cannot derive {} identity from {}", kind, path.display());

    if kind.is_versioned() {
        let version = segments.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let name = segments.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        Ok(Identity::versioned(name, version))
    } else {
        let name = segments.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        Ok(Identity::unversioned(name))
    }
}

/// Find every definition of `kind` under the layout, sorted by path.
pub fn discover(layout: &SourceLayout, kind: EntityKind) -> Result<Discovery, String> {
    let base = layout.kind_root(kind);
    let mut discovery = Discovery::default();
    if !base.is_dir() {
        return Ok(discovery);
    }
    let pattern = format!(
        "{}/**/{}",
        glob::Pattern::escape(&base.to_string_lossy()),
        kind.file_name()
    );
    let entries =
        glob::glob(&pattern).map_err(|e| format!("invalid discovery pattern {}: {}", pattern, e))?;

    for entry in entries {
        let path = entry.map_err(|e| format!("cannot walk {}: {}", base.display(), e))?;
        if !path.is_file() {
            continue;
        }
        let relative = path.strip_prefix(&base).unwrap_or(&path);
        let identity = if relative.components().count() == expected_depth(kind) {
            identity_from_path(kind, relative)
        } else {
            let shape = if kind.is_versioned() {
                "<name>/<version>"
            } else {
                "<name>"
            };
            Err(format!(
                "{} is not at {}/{}/{}",
                path.display(),
                base.display(),
                shape,
                kind.file_name()
            ))
        };
        match identity {
            Ok(identity) => discovery.found.push(Discovered {
                kind,
                path,
                identity,
            }),
            Err(reason) => {
                tracing::warn!(%kind, path = %path.display(), %reason, "rejecting definition");
                discovery.rejected.push(Rejected { kind, path, reason });
            }
        }
    }
    discovery.found.sort_by(|a, b| a.path.cmp(&b.path));
    discovery.rejected.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(discovery)
}
