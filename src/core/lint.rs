//! Authoring-time check of a whole source tree, without a store.
//!
//! Applies the same validation as a pass, then resolves every recipe's base
//! images and every application's common base image against the recipes
//! found in the tree.

use super::discovery::{discover, Discovered, SourceLayout};
use super::error::CatalogError;
use super::parser::*;
use super::resolver::{common_base_images, resolve_base_images, RecipeLink, RecipeLookup};
use super::types::*;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Result of checking one definition.
#[derive(Debug)]
pub struct Finding {
    pub kind: EntityKind,
    pub key: String,
    pub path: PathBuf,
    pub error: Option<CatalogError>,
}

impl Finding {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            None => write!(f, "Check:{}:{}:ok", self.kind, self.key),
            Some(e) => write!(f, "Check:{}:{}:ko: {}", self.kind, self.key, e),
        }
    }
}

#[derive(Debug, Default)]
pub struct LintReport {
    pub findings: Vec<Finding>,
}

impl LintReport {
    pub fn passed(&self) -> bool {
        self.findings.iter().all(Finding::ok)
    }

    pub fn failures(&self) -> usize {
        self.findings.iter().filter(|f| !f.ok()).count()
    }

    fn push(&mut self, source: &Discovered, result: Result<(), CatalogError>) {
        self.findings.push(Finding {
            kind: source.kind,
            key: source.identity.reference(),
            path: source.path.clone(),
            error: result.err(),
        });
    }
}

fn load<T: serde::de::DeserializeOwned>(source: &Discovered) -> Result<T, CatalogError> {
    parse_definition_file(&source.path).map_err(|message| ValidationError { message }.into())
}

fn found(layout: &SourceLayout, kind: EntityKind, report: &mut LintReport) -> Vec<Discovered> {
    match discover(layout, kind) {
        Ok(discovery) => {
            for rejected in discovery.rejected {
                report.findings.push(Finding {
                    kind,
                    key: rejected.path.display().to_string(),
                    path: rejected.path,
                    error: Some(
                        ValidationError {
                            message: rejected.reason,
                        }
                        .into(),
                    ),
                });
            }
            discovery.found
        }
        Err(message) => {
            report.findings.push(Finding {
                kind,
                key: kind.source_dir().to_string(),
                path: layout.kind_root(kind),
                error: Some(ValidationError { message }.into()),
            });
            Vec::new()
        }
    }
}

/// Check every definition under `layout`.
pub fn lint(layout: &SourceLayout) -> LintReport {
    let mut report = LintReport::default();

    let recipes = found(layout, EntityKind::Recipe, &mut report);
    let mut parsed = Vec::with_capacity(recipes.len());
    let mut tree: HashMap<String, RecipeLink> = HashMap::new();
    for source in recipes {
        let file = load::<RecipeFile>(&source);
        if let Ok(file) = &file {
            tree.insert(
                source.identity.reference(),
                RecipeLink::from_definition(&source.identity, &file.recipe),
            );
        }
        parsed.push((source, file));
    }
    for (source, file) in parsed {
        let result = file.and_then(|file| {
            validate_recipe(&file.recipe, layout)?;
            let link = RecipeLink::from_definition(&source.identity, &file.recipe);
            resolve_base_images(&link, &tree)?;
            if !source.dir().join("recipe.sh").is_file() {
                return Err(ValidationError {
                    message: "missing recipe.sh".into(),
                }
                .into());
            }
            Ok(())
        });
        report.push(&source, result);
    }

    for source in found(layout, EntityKind::Template, &mut report) {
        let result = load::<TemplateFile>(&source).and_then(|file| {
            validate_template(&file.template, source.dir()).map_err(Into::into)
        });
        report.push(&source, result);
    }

    for source in found(layout, EntityKind::Endpoint, &mut report) {
        let result = load::<EndpointFile>(&source)
            .and_then(|file| validate_endpoint(&file.endpoint).map_err(Into::into));
        report.push(&source, result);
    }

    for source in found(layout, EntityKind::Application, &mut report) {
        let result = load::<ApplicationFile>(&source)
            .and_then(|file| check_application(&file.application, layout, &tree));
        report.push(&source, result);
    }

    report
}

fn check_application(
    app: &ApplicationDefinition,
    layout: &SourceLayout,
    tree: &HashMap<String, RecipeLink>,
) -> Result<(), CatalogError> {
    let check = validate_application(app);
    check.outcome?;
    let identities = check_application_references(app, &check.recipe_refs, layout)?;

    let mut links = Vec::with_capacity(identities.len());
    for identity in &identities {
        let reference = identity.reference();
        let link = tree.lookup(&reference)?.ok_or_else(|| {
            CatalogError::reference(format!("recipe {} could not be parsed", reference))
        })?;
        links.push(link);
    }
    common_base_images(&links, tree)?;
    Ok(())
}
