//! Error taxonomy for per-item and per-pass failures.
//!
//! Every variant except `SourceRefresh` is scoped to a single definition: the
//! item is logged and skipped, the pass continues. `SourceRefresh` aborts the
//! pass and shortens the retry delay.

use super::parser::ValidationError;
use super::resolver::ResolveError;
use super::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// Malformed or incomplete definition.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Parent, recipe or template reference not found.
    #[error("unresolved reference: {message}")]
    Reference { message: String },

    /// Referenced recipes share no base image.
    #[error("incompatible recipes: {message}")]
    Compatibility { message: String },

    /// Persistence operation failed.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    /// Source tree could not be refreshed.
    #[error("source refresh failed: {message}")]
    SourceRefresh { message: String },
}

impl CatalogError {
    pub fn reference(message: impl Into<String>) -> Self {
        Self::Reference {
            message: message.into(),
        }
    }

    /// Short category name used in log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Reference { .. } => "reference",
            Self::Compatibility { .. } => "compatibility",
            Self::Store(_) => "store",
            Self::SourceRefresh { .. } => "source_refresh",
        }
    }
}

impl From<ResolveError> for CatalogError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NoBaseImage { .. } => Self::Validation(ValidationError {
                message: err.to_string(),
            }),
            ResolveError::ParentNotFound { .. } | ResolveError::CyclicParent { .. } => {
                Self::Reference {
                    message: err.to_string(),
                }
            }
            ResolveError::NoCommonImage { .. } => Self::Compatibility {
                message: err.to_string(),
            },
            ResolveError::Store(store) => Self::Store(store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_error_categories() {
        let no_base: CatalogError = ResolveError::NoBaseImage {
            recipe: "a/v1".into(),
        }
        .into();
        assert_eq!(no_base.category(), "validation");

        let missing: CatalogError = ResolveError::ParentNotFound {
            recipe: "b/v1".into(),
            parent: "a/v1".into(),
        }
        .into();
        assert_eq!(missing.category(), "reference");
        assert!(missing.to_string().contains("a/v1"));

        let cyclic: CatalogError = ResolveError::CyclicParent {
            chain: vec!["a/v1".into(), "b/v1".into(), "a/v1".into()],
        }
        .into();
        assert_eq!(cyclic.category(), "reference");

        let disjoint: CatalogError = ResolveError::NoCommonImage {
            recipes: vec!["a/v1".into(), "b/v1".into()],
        }
        .into();
        assert_eq!(disjoint.category(), "compatibility");
    }

    #[test]
    fn test_validation_error_wraps() {
        let err: CatalogError = ValidationError {
            message: "missing license".into(),
        }
        .into();
        assert_eq!(err.to_string(), "validation failed: missing license");
    }
}
