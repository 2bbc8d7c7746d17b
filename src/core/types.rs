//! Catalog types: definition files, persisted records, identity keys.
//!
//! Definition types mirror the YAML files found in the source tree. Record
//! types are what the store persists. All types derive Serialize/Deserialize.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Deserialize a field that may be absent or explicitly `null` into its
/// empty default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// Entity kinds and identity
// ============================================================================

/// The four catalog entity kinds, in reconciliation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Recipe,
    Template,
    Endpoint,
    Application,
}

impl EntityKind {
    /// Reconciliation order within a pass.
    pub const ORDER: [EntityKind; 4] = [
        EntityKind::Recipe,
        EntityKind::Template,
        EntityKind::Endpoint,
        EntityKind::Application,
    ];

    /// Well-known definition file name for this kind.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Recipe => "recipe.yaml",
            Self::Template => "template.yaml",
            Self::Endpoint => "endpoint.yaml",
            Self::Application => "app.yaml",
        }
    }

    /// Source tree subdirectory holding this kind.
    pub fn source_dir(self) -> &'static str {
        match self {
            Self::Recipe => "recipes",
            Self::Template => "templates",
            Self::Endpoint => "endpoints",
            Self::Application => "apps",
        }
    }

    /// Whether identity carries a version segment.
    pub fn is_versioned(self) -> bool {
        !matches!(self, Self::Endpoint)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recipe => write!(f, "recipe"),
            Self::Template => write!(f, "template"),
            Self::Endpoint => write!(f, "endpoint"),
            Self::Application => write!(f, "application"),
        }
    }
}

/// Identity of a definition, derived from its position in the source tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl Identity {
    pub fn versioned(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: Some(version.to_string()),
        }
    }

    pub fn unversioned(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: None,
        }
    }

    /// Symbolic reference string (`name/version`, or `name` for endpoints).
    pub fn reference(&self) -> String {
        match &self.version {
            Some(v) => format!("{}/{}", self.name, v),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference())
    }
}

/// Natural key of a persisted record: namespace plus identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub namespace: String,
    pub identity: Identity,
}

impl EntityKey {
    pub fn new(namespace: &str, identity: Identity) -> Self {
        Self {
            namespace: namespace.to_string(),
            identity,
        }
    }
}

// ============================================================================
// Definition files
// ============================================================================

/// `recipe.yaml` root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeFile {
    pub recipe: RecipeDefinition,
}

/// A recipe: a provisioning script plus base images or a parent recipe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipeDefinition {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub inputs: IndexMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    /// Explicit base images
    #[serde(default, rename = "base", deserialize_with = "null_as_default")]
    pub base_images: Vec<String>,
    /// Parent recipe reference (`name/version`)
    #[serde(default, deserialize_with = "null_as_default")]
    pub parent: String,
}

/// `template.yaml` root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateFile {
    pub template: TemplateDefinition,
}

/// A template: per-platform deployment files and the recipe variables it expects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateDefinition {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub inputs: IndexMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    /// Platform → file name, relative to `<template dir>/<platform>/`
    #[serde(default, deserialize_with = "null_as_default")]
    pub files: IndexMap<String, String>,
    /// Recipe variables, in declaration order
    #[serde(default, rename = "recipes", deserialize_with = "null_as_default")]
    pub variables: Vec<String>,
}

/// `endpoint.yaml` root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointFile {
    pub endpoint: EndpointDefinition,
}

/// A target environment description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointDefinition {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub features: IndexMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub inputs: IndexMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub config: IndexMap<String, String>,
    /// Catalog image → endpoint-specific image id
    #[serde(default, deserialize_with = "null_as_default")]
    pub images: IndexMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
}

/// `app.yaml` root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationFile {
    pub application: ApplicationDefinition,
}

/// A composition of one template and recipes per template variable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationDefinition {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Template reference (`name/version`)
    #[serde(default)]
    pub template: String,
    /// Template variable → recipe references (`name/version`)
    #[serde(default, deserialize_with = "null_as_default")]
    pub recipes: IndexMap<String, Vec<String>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
}

// ============================================================================
// Persisted records
// ============================================================================

/// Persisted recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default)]
    pub id: String,
    pub namespace: String,
    pub remote: String,
    pub remote_version: String,
    pub name: String,
    pub description: String,
    pub author: String,
    pub license: String,
    pub base_images: Vec<String>,
    /// Symbolic parent (`name/version`), empty when none
    pub parent: String,
    /// Generated id of the parent recipe, empty when none
    pub parent_recipe: String,
    pub inputs: IndexMap<String, String>,
    pub tags: Vec<String>,
    pub script: String,
    pub public: bool,
    pub timestamp: i64,
}

/// Persisted template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(default)]
    pub id: String,
    pub namespace: String,
    pub remote: String,
    pub remote_version: String,
    pub name: String,
    pub description: String,
    pub author: String,
    pub license: String,
    pub inputs: IndexMap<String, String>,
    pub tags: Vec<String>,
    /// Platform → file body
    pub data: IndexMap<String, String>,
    pub variables: Vec<String>,
    pub public: bool,
    pub timestamp: i64,
}

/// Persisted endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(default)]
    pub id: String,
    pub namespace: String,
    pub remote: String,
    pub name: String,
    pub description: String,
    pub kind: String,
    pub features: IndexMap<String, String>,
    pub inputs: IndexMap<String, String>,
    pub config: IndexMap<String, String>,
    pub images: IndexMap<String, String>,
    pub tags: Vec<String>,
    pub public: bool,
    pub timestamp: i64,
}

/// Persisted application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    #[serde(default)]
    pub id: String,
    pub namespace: String,
    pub remote: String,
    pub remote_version: String,
    pub name: String,
    pub description: String,
    /// Generated id of the template
    pub template: String,
    /// Template variable → generated recipe ids
    pub recipes: IndexMap<String, Vec<String>>,
    /// Base images shared by every referenced recipe
    pub image: Vec<String>,
    pub tags: Vec<String>,
    pub public: bool,
    pub timestamp: i64,
}

/// A record type that maps onto one store collection.
pub trait Record: Serialize + serde::de::DeserializeOwned {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    fn key(&self) -> EntityKey;

    fn set_timestamp(&mut self, timestamp: i64);
}

macro_rules! versioned_record {
    ($ty:ty, $kind:expr) => {
        impl Record for $ty {
            const KIND: EntityKind = $kind;

            fn id(&self) -> &str {
                &self.id
            }

            fn set_id(&mut self, id: String) {
                self.id = id;
            }

            fn key(&self) -> EntityKey {
                EntityKey::new(
                    &self.namespace,
                    Identity::versioned(&self.remote, &self.remote_version),
                )
            }

            fn set_timestamp(&mut self, timestamp: i64) {
                self.timestamp = timestamp;
            }
        }
    };
}

versioned_record!(Recipe, EntityKind::Recipe);
versioned_record!(Template, EntityKind::Template);
versioned_record!(Application, EntityKind::Application);

impl Record for Endpoint {
    const KIND: EntityKind = EntityKind::Endpoint;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn key(&self) -> EntityKey {
        EntityKey::new(&self.namespace, Identity::unversioned(&self.remote))
    }

    fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }
}

// ============================================================================
// Reconciliation outcome
// ============================================================================

/// What the reconciler did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Created,
    Updated,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::Updated => write!(f, "UPDATED"),
        }
    }
}

/// Generated id plus the action taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub id: String,
    pub action: Action,
}

/// Per-kind counts for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindReport {
    pub created: u32,
    pub updated: u32,
    pub skipped: u32,
}

impl KindReport {
    pub fn record(&mut self, action: Action) {
        match action {
            Action::Created => self.created += 1,
            Action::Updated => self.updated += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.created + self.updated + self.skipped
    }
}

impl fmt::Display for KindReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} skipped",
            self.created, self.updated, self.skipped
        )
    }
}

/// Result of one complete pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub recipes: KindReport,
    pub templates: KindReport,
    pub endpoints: KindReport,
    pub applications: KindReport,
}

impl PassReport {
    pub fn kind_mut(&mut self, kind: EntityKind) -> &mut KindReport {
        match kind {
            EntityKind::Recipe => &mut self.recipes,
            EntityKind::Template => &mut self.templates,
            EntityKind::Endpoint => &mut self.endpoints,
            EntityKind::Application => &mut self.applications,
        }
    }

    pub fn kind(&self, kind: EntityKind) -> KindReport {
        match kind {
            EntityKind::Recipe => self.recipes,
            EntityKind::Template => self.templates,
            EntityKind::Endpoint => self.endpoints,
            EntityKind::Application => self.applications,
        }
    }

    pub fn skipped(&self) -> u32 {
        EntityKind::ORDER.iter().map(|k| self.kind(*k).skipped).sum()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipe_definition_parse() {
        let yaml = r#"
recipe:
  name: nginx
  author: ops
  license: Apache-2.0
  description: "web server"
  base: ["ubuntu:20.04", "centos:8"]
  inputs:
    port: "listen port"
  tags: [web]
"#;
        let file: RecipeFile = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(file.recipe.name, "nginx");
        assert_eq!(file.recipe.base_images, vec!["ubuntu:20.04", "centos:8"]);
        assert!(file.recipe.parent.is_empty());
        assert_eq!(file.recipe.inputs["port"], "listen port");
    }

    #[test]
    fn test_null_fields_default_to_empty() {
        let yaml = r#"
recipe:
  name: child
  license: MIT
  parent: base/v1
  base: ~
  inputs: ~
  tags: ~
"#;
        let file: RecipeFile = serde_yaml_ng::from_str(yaml).unwrap();
        assert!(file.recipe.base_images.is_empty());
        assert!(file.recipe.inputs.is_empty());
        assert!(file.recipe.tags.is_empty());
        assert_eq!(file.recipe.parent, "base/v1");
    }

    #[test]
    fn test_template_variables_from_recipes_key() {
        let yaml = r#"
template:
  name: web
  license: MIT
  files:
    aws: main.tf
    openstack: main.tf
  recipes: [frontend, backend]
"#;
        let file: TemplateFile = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(file.template.variables, vec!["frontend", "backend"]);
        let platforms: Vec<_> = file.template.files.keys().collect();
        assert_eq!(platforms, vec!["aws", "openstack"]);
    }

    #[test]
    fn test_application_definition_parse() {
        let yaml = r#"
application:
  name: blog
  template: web/v1
  recipes:
    frontend: [nginx/v1]
    backend: [mysql/v1, php/v2]
"#;
        let file: ApplicationFile = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(file.application.template, "web/v1");
        assert_eq!(file.application.recipes["backend"], vec!["mysql/v1", "php/v2"]);
    }

    #[test]
    fn test_identity_reference() {
        assert_eq!(Identity::versioned("base", "v1").reference(), "base/v1");
        assert_eq!(Identity::unversioned("aws-east").reference(), "aws-east");
    }

    #[test]
    fn test_entity_kind_layout() {
        assert_eq!(EntityKind::Recipe.file_name(), "recipe.yaml");
        assert_eq!(EntityKind::Application.file_name(), "app.yaml");
        assert_eq!(EntityKind::Application.source_dir(), "apps");
        assert!(!EntityKind::Endpoint.is_versioned());
        assert!(EntityKind::Template.is_versioned());
    }

    #[test]
    fn test_kind_report_counts() {
        let mut report = PassReport::default();
        report.kind_mut(EntityKind::Recipe).record(Action::Created);
        report.kind_mut(EntityKind::Recipe).record(Action::Updated);
        report.kind_mut(EntityKind::Application).skipped += 1;
        assert_eq!(report.recipes.total(), 2);
        assert_eq!(report.skipped(), 1);
        assert_eq!(
            report.recipes.to_string(),
            "1 created, 1 updated, 0 skipped"
        );
    }

    #[test]
    fn test_action_display() {
        assert_eq!(Action::Created.to_string(), "CREATED");
        assert_eq!(Action::Updated.to_string(), "UPDATED");
    }
}
