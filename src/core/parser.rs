//! Definition parsing and validation.
//!
//! Parses the four definition files and validates structural constraints:
//! - Name (and license, for recipes and templates) must be present
//! - A recipe needs base images or a parent, and the parent must exist
//! - Every template platform file must exist beside the definition
//! - Endpoints need config and image maps
//! - Application references must be well formed and point at existing files

use super::discovery::SourceLayout;
use super::error::CatalogError;
use super::types::*;
use serde::de::DeserializeOwned;
use std::path::Path;
use thiserror::Error;

/// Validation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Parse a definition file from disk.
pub fn parse_definition_file<T: DeserializeOwned>(path: &Path) -> Result<T, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_definition(&content).map_err(|e| format!("{}: {}", path.display(), e))
}

/// Parse a definition from a YAML string.
pub fn parse_definition<T: DeserializeOwned>(yaml: &str) -> Result<T, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Parse a `name/version` reference.
pub fn parse_reference(reference: &str) -> Result<Identity, ValidationError> {
    let parts: Vec<&str> = reference.split('/').collect();
    match parts.as_slice() {
        [name, version] if !name.is_empty() && !version.is_empty() => {
            Ok(Identity::versioned(name, version))
        }
        _ => Err(ValidationError::new(format!(
            "invalid reference '{}', expected name/version",
            reference
        ))),
    }
}

/// Validate a recipe definition.
pub fn validate_recipe(
    recipe: &RecipeDefinition,
    layout: &SourceLayout,
) -> Result<(), ValidationError> {
    if recipe.name.is_empty() {
        return Err(ValidationError::new("missing name"));
    }
    if recipe.license.is_empty() {
        return Err(ValidationError::new("missing license"));
    }
    if recipe.base_images.is_empty() && recipe.parent.is_empty() {
        return Err(ValidationError::new("both base and parent are empty"));
    }
    if !recipe.parent.is_empty() {
        let parent = parse_reference(&recipe.parent)?;
        if !layout.contains(EntityKind::Recipe, &parent) {
            return Err(ValidationError::new(format!(
                "parent recipe {} does not exist",
                layout
                    .definition_path(EntityKind::Recipe, &parent)
                    .display()
            )));
        }
    }
    Ok(())
}

/// Validate a template definition located in `dir`.
pub fn validate_template(template: &TemplateDefinition, dir: &Path) -> Result<(), ValidationError> {
    if template.name.is_empty() {
        return Err(ValidationError::new("missing name"));
    }
    if template.license.is_empty() {
        return Err(ValidationError::new("missing license"));
    }
    if template.files.is_empty() {
        return Err(ValidationError::new("no files specified"));
    }
    for (platform, file) in &template.files {
        if !dir.join(platform).join(file).is_file() {
            return Err(ValidationError::new(format!(
                "file {} for platform {} does not exist",
                file, platform
            )));
        }
    }
    Ok(())
}

/// Validate an endpoint definition.
pub fn validate_endpoint(endpoint: &EndpointDefinition) -> Result<(), ValidationError> {
    if endpoint.name.is_empty() {
        return Err(ValidationError::new("missing name"));
    }
    if endpoint.kind.is_empty() {
        return Err(ValidationError::new("missing kind"));
    }
    if endpoint.config.is_empty() {
        return Err(ValidationError::new("missing config info"));
    }
    if endpoint.images.is_empty() {
        return Err(ValidationError::new("no image mapping defined"));
    }
    Ok(())
}

/// Outcome of validating an application: the flattened recipe references are
/// returned even when the definition is rejected.
#[derive(Debug, Clone)]
pub struct ApplicationCheck {
    pub recipe_refs: Vec<String>,
    pub outcome: Result<(), ValidationError>,
}

/// Validate an application definition.
pub fn validate_application(app: &ApplicationDefinition) -> ApplicationCheck {
    let recipe_refs: Vec<String> = app.recipes.values().flatten().cloned().collect();
    let outcome = if app.name.is_empty() {
        Err(ValidationError::new("missing name"))
    } else if app.template.is_empty() {
        Err(ValidationError::new("missing template"))
    } else {
        Ok(())
    };
    ApplicationCheck {
        recipe_refs,
        outcome,
    }
}

/// Check that an application's template and recipes exist in the source tree.
///
/// Returns the parsed recipe identities in reference order.
pub fn check_application_references(
    app: &ApplicationDefinition,
    recipe_refs: &[String],
    layout: &SourceLayout,
) -> Result<Vec<Identity>, CatalogError> {
    if recipe_refs.is_empty() {
        return Err(ValidationError::new("application references no recipes").into());
    }

    let template = parse_reference(&app.template)?;
    if !layout.contains(EntityKind::Template, &template) {
        return Err(CatalogError::reference(format!(
            "template {} not found",
            template
        )));
    }

    let mut recipes = Vec::with_capacity(recipe_refs.len());
    for reference in recipe_refs {
        let identity = parse_reference(reference)?;
        if !layout.contains(EntityKind::Recipe, &identity) {
            return Err(CatalogError::reference(format!(
                "recipe {} not found",
                identity
            )));
        }
        recipes.push(identity);
    }
    Ok(recipes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipe(name: &str, license: &str, base: &[&str], parent: &str) -> RecipeDefinition {
        RecipeDefinition {
            name: name.to_string(),
            license: license.to_string(),
            base_images: base.iter().map(|s| s.to_string()).collect(),
            parent: parent.to_string(),
            ..Default::default()
        }
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_parse_reference() {
        assert_eq!(
            parse_reference("base/v1").unwrap(),
            Identity::versioned("base", "v1")
        );
        assert!(parse_reference("base").is_err());
        assert!(parse_reference("a/b/c").is_err());
        assert!(parse_reference("/v1").is_err());
    }

    #[test]
    fn test_recipe_without_base_or_parent_rejected() {
        let layout = SourceLayout::new("/nonexistent");
        let err = validate_recipe(&recipe("r", "MIT", &[], ""), &layout).unwrap_err();
        assert!(err.message.contains("base and parent"));
    }

    #[test]
    fn test_recipe_missing_name_and_license() {
        let layout = SourceLayout::new("/nonexistent");
        let err = validate_recipe(&recipe("", "MIT", &["ubuntu"], ""), &layout).unwrap_err();
        assert_eq!(err.message, "missing name");
        let err = validate_recipe(&recipe("r", "", &["ubuntu"], ""), &layout).unwrap_err();
        assert_eq!(err.message, "missing license");
    }

    #[test]
    fn test_recipe_with_base_images_accepted() {
        let layout = SourceLayout::new("/nonexistent");
        validate_recipe(&recipe("r", "MIT", &["ubuntu:20.04"], ""), &layout).unwrap();
    }

    #[test]
    fn test_recipe_parent_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SourceLayout::new(dir.path());
        let child = recipe("child", "MIT", &[], "base/v1");

        let err = validate_recipe(&child, &layout).unwrap_err();
        assert!(err.message.contains("does not exist"));

        write(dir.path(), "recipes/base/v1/recipe.yaml", "recipe: {}\n");
        validate_recipe(&child, &layout).unwrap();
    }

    #[test]
    fn test_recipe_malformed_parent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SourceLayout::new(dir.path());
        let err = validate_recipe(&recipe("c", "MIT", &[], "base"), &layout).unwrap_err();
        assert!(err.message.contains("invalid reference"));
    }

    #[test]
    fn test_template_missing_platform_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut template = TemplateDefinition {
            name: "web".into(),
            license: "MIT".into(),
            ..Default::default()
        };
        template.files.insert("aws".into(), "main.tf".into());

        let err = validate_template(&template, dir.path()).unwrap_err();
        assert!(err.message.contains("aws"));

        write(dir.path(), "aws/main.tf", "resource {}\n");
        validate_template(&template, dir.path()).unwrap();
    }

    #[test]
    fn test_template_without_files_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let template = TemplateDefinition {
            name: "web".into(),
            license: "MIT".into(),
            ..Default::default()
        };
        let err = validate_template(&template, dir.path()).unwrap_err();
        assert_eq!(err.message, "no files specified");
    }

    #[test]
    fn test_endpoint_rules() {
        let mut endpoint = EndpointDefinition {
            name: "aws".into(),
            kind: "openstack".into(),
            ..Default::default()
        };
        assert_eq!(
            validate_endpoint(&endpoint).unwrap_err().message,
            "missing config info"
        );
        endpoint.config.insert("url".into(), "https://cloud".into());
        assert_eq!(
            validate_endpoint(&endpoint).unwrap_err().message,
            "no image mapping defined"
        );
        endpoint.images.insert("ubuntu:20.04".into(), "img-123".into());
        validate_endpoint(&endpoint).unwrap();

        endpoint.kind.clear();
        assert_eq!(validate_endpoint(&endpoint).unwrap_err().message, "missing kind");
    }

    #[test]
    fn test_application_refs_returned_on_rejection() {
        let app: ApplicationFile = parse_definition(
            r#"
application:
  name: blog
  recipes:
    frontend: [nginx/v1]
    backend: [mysql/v1, php/v2]
"#,
        )
        .unwrap();
        let check = validate_application(&app.application);
        assert_eq!(check.recipe_refs, vec!["nginx/v1", "mysql/v1", "php/v2"]);
        assert_eq!(check.outcome.unwrap_err().message, "missing template");
    }

    #[test]
    fn test_application_references_checked() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SourceLayout::new(dir.path());
        let app = ApplicationDefinition {
            name: "blog".into(),
            template: "web/v1".into(),
            ..Default::default()
        };
        let refs = vec!["nginx/v1".to_string()];

        let err = check_application_references(&app, &[], &layout).unwrap_err();
        assert_eq!(err.category(), "validation");

        let err = check_application_references(&app, &refs, &layout).unwrap_err();
        assert_eq!(err.category(), "reference");
        assert!(err.to_string().contains("template web/v1"));

        write(dir.path(), "templates/web/v1/template.yaml", "template: {}\n");
        let err = check_application_references(&app, &refs, &layout).unwrap_err();
        assert!(err.to_string().contains("recipe nginx/v1"));

        write(dir.path(), "recipes/nginx/v1/recipe.yaml", "recipe: {}\n");
        let ids = check_application_references(&app, &refs, &layout).unwrap();
        assert_eq!(ids, vec![Identity::versioned("nginx", "v1")]);
    }

    #[test]
    fn test_parse_definition_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("endpoint.yaml");
        std::fs::write(
            &path,
            "endpoint:\n  name: aws\n  kind: openstack\n  config: {url: x}\n  images: {a: b}\n",
        )
        .unwrap();
        let file: EndpointFile = parse_definition_file(&path).unwrap();
        assert_eq!(file.endpoint.kind, "openstack");
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result: Result<RecipeFile, _> = parse_definition("not: [valid: yaml: {{");
        assert!(result.is_err());
    }
}
