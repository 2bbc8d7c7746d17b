//! Idempotent create-or-update of catalog records.
//!
//! A `Reconciler` lives for exactly one pass. Every record it writes is
//! registered in its symbol table under `name/version`, so later kinds in the
//! same pass can turn symbolic references into generated ids.

use super::discovery::Discovered;
use super::error::CatalogError;
use super::store::{self, CatalogStore, StoreError};
use super::types::*;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Pass-local map from symbolic reference to generated id.
#[derive(Debug, Default)]
pub struct SymbolTable {
    entries: HashMap<(EntityKind, String), String>,
}

impl SymbolTable {
    pub fn register(&mut self, kind: EntityKind, reference: String, id: String) {
        self.entries.insert((kind, reference), id);
    }

    pub fn resolve(&self, kind: EntityKind, reference: &str) -> Option<&str> {
        self.entries
            .get(&(kind, reference.to_string()))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

fn read_source(path: &std::path::Path) -> Result<String, CatalogError> {
    std::fs::read_to_string(path).map_err(|e| {
        super::parser::ValidationError {
            message: format!("cannot read {}: {}", path.display(), e),
        }
        .into()
    })
}

/// Writes records for one pass.
pub struct Reconciler<'a> {
    store: &'a dyn CatalogStore,
    namespace: String,
    symbols: SymbolTable,
}

impl<'a> Reconciler<'a> {
    /// `namespace` is the generated id of the namespace record.
    pub fn new(store: &'a dyn CatalogStore, namespace: &str) -> Self {
        Self {
            store,
            namespace: namespace.to_string(),
            symbols: SymbolTable::default(),
        }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Insert the record when its key is new, otherwise overwrite the stored
    /// record in place, keeping its id.
    pub fn reconcile<R: Record>(&mut self, mut record: R) -> Result<Reconciled, StoreError> {
        let key = record.key();
        record.set_timestamp(now_unix());

        let reconciled = match store::find_record::<R>(self.store, &key)? {
            Some(existing) => {
                record.set_id(existing.id().to_string());
                store::replace_record(self.store, &record)?;
                Reconciled {
                    id: existing.id().to_string(),
                    action: Action::Updated,
                }
            }
            None => {
                let id = store::insert_record(self.store, &record)?;
                Reconciled {
                    id,
                    action: Action::Created,
                }
            }
        };

        tracing::debug!(
            kind = %R::KIND,
            key = %key.identity,
            id = %reconciled.id,
            action = %reconciled.action,
            "reconciled"
        );
        self.symbols
            .register(R::KIND, key.identity.reference(), reconciled.id.clone());
        Ok(reconciled)
    }

    /// Build a recipe record: reads `recipe.sh` and resolves the parent id.
    pub fn recipe_record(
        &self,
        source: &Discovered,
        recipe: &RecipeDefinition,
    ) -> Result<Recipe, CatalogError> {
        let script = read_source(&source.dir().join("recipe.sh"))?;
        let parent_recipe = if recipe.parent.is_empty() {
            String::new()
        } else {
            self.parent_id(&recipe.parent)?
        };

        Ok(Recipe {
            id: String::new(),
            namespace: self.namespace.clone(),
            remote: source.identity.name.clone(),
            remote_version: source.identity.version.clone().unwrap_or_default(),
            name: recipe.name.clone(),
            description: recipe.description.clone(),
            author: recipe.author.clone(),
            license: recipe.license.clone(),
            base_images: recipe.base_images.clone(),
            parent: recipe.parent.clone(),
            parent_recipe,
            inputs: recipe.inputs.clone(),
            tags: recipe.tags.clone(),
            script,
            public: true,
            timestamp: 0,
        })
    }

    /// Parent ids come from this pass first, then from the store.
    fn parent_id(&self, parent: &str) -> Result<String, CatalogError> {
        if let Some(id) = self.symbols.resolve(EntityKind::Recipe, parent) {
            return Ok(id.to_string());
        }
        let identity = super::parser::parse_reference(parent)?;
        let key = EntityKey::new(&self.namespace, identity);
        match store::find_record::<Recipe>(self.store, &key)? {
            Some(persisted) => Ok(persisted.id),
            None => Err(CatalogError::reference(format!(
                "parent recipe {} not found in store",
                parent
            ))),
        }
    }

    /// Build a template record: reads every platform file.
    pub fn template_record(
        &self,
        source: &Discovered,
        template: &TemplateDefinition,
    ) -> Result<Template, CatalogError> {
        let mut data = IndexMap::new();
        for (platform, file) in &template.files {
            let body = read_source(&source.dir().join(platform).join(file))?;
            data.insert(platform.clone(), body);
        }

        Ok(Template {
            id: String::new(),
            namespace: self.namespace.clone(),
            remote: source.identity.name.clone(),
            remote_version: source.identity.version.clone().unwrap_or_default(),
            name: template.name.clone(),
            description: template.description.clone(),
            author: template.author.clone(),
            license: template.license.clone(),
            inputs: template.inputs.clone(),
            tags: template.tags.clone(),
            data,
            variables: template.variables.clone(),
            public: true,
            timestamp: 0,
        })
    }

    pub fn endpoint_record(&self, source: &Discovered, endpoint: &EndpointDefinition) -> Endpoint {
        Endpoint {
            id: String::new(),
            namespace: self.namespace.clone(),
            remote: source.identity.name.clone(),
            name: endpoint.name.clone(),
            description: endpoint.description.clone(),
            kind: endpoint.kind.clone(),
            features: endpoint.features.clone(),
            inputs: endpoint.inputs.clone(),
            config: endpoint.config.clone(),
            images: endpoint.images.clone(),
            tags: endpoint.tags.clone(),
            public: true,
            timestamp: 0,
        }
    }

    /// Build an application record. Template and recipe references must have
    /// been reconciled earlier in this pass.
    pub fn application_record(
        &self,
        source: &Discovered,
        app: &ApplicationDefinition,
        image: Vec<String>,
    ) -> Result<Application, CatalogError> {
        let template = self
            .symbols
            .resolve(EntityKind::Template, &app.template)
            .ok_or_else(|| {
                CatalogError::reference(format!(
                    "template {} was not reconciled in this pass",
                    app.template
                ))
            })?
            .to_string();

        let mut recipes = IndexMap::new();
        for (variable, references) in &app.recipes {
            let mut ids = Vec::with_capacity(references.len());
            for reference in references {
                let id = self
                    .symbols
                    .resolve(EntityKind::Recipe, reference)
                    .ok_or_else(|| {
                        CatalogError::reference(format!(
                            "recipe {} was not reconciled in this pass",
                            reference
                        ))
                    })?;
                ids.push(id.to_string());
            }
            recipes.insert(variable.clone(), ids);
        }

        Ok(Application {
            id: String::new(),
            namespace: self.namespace.clone(),
            remote: source.identity.name.clone(),
            remote_version: source.identity.version.clone().unwrap_or_default(),
            name: app.name.clone(),
            description: app.description.clone(),
            template,
            recipes,
            image,
            tags: app.tags.clone(),
            public: true,
            timestamp: 0,
        })
    }
}
