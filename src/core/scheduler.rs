//! Poll scheduler and the reconciliation pass.
//!
//! A pass runs Recipes, Templates, Endpoints, Applications in that order. Any
//! per-item failure is logged and counted as skipped; only a namespace
//! bootstrap failure aborts the pass. The poll loop refreshes the source
//! tree, runs one pass on the blocking pool, then sleeps for the poll
//! interval (or the shorter backoff after an aborted pass).

use super::discovery::{discover, Discovered, SourceLayout};
use super::error::CatalogError;
use super::parser::*;
use super::reconciler::Reconciler;
use super::resolver::{
    build_recipe_order, common_base_images, resolve_base_images, PassLookup, RecipeLink,
    RecipeLookup, ResolveError,
};
use super::store::CatalogStore;
use super::types::*;
use crate::source::SourceRefresher;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Run one complete pass over `layout` into `namespace`.
pub fn run_pass(
    store: &dyn CatalogStore,
    layout: &SourceLayout,
    namespace: &str,
) -> Result<PassReport, CatalogError> {
    let namespace_id = store.ensure_namespace(namespace)?;
    let mut pass = Pass {
        store,
        layout,
        namespace_id: namespace_id.as_str(),
        reconciler: Reconciler::new(store, &namespace_id),
        recipes: HashMap::new(),
        report: PassReport::default(),
    };

    pass.recipes();
    pass.templates();
    pass.endpoints();
    pass.applications();

    for kind in EntityKind::ORDER {
        let summary = pass.report.kind(kind);
        tracing::info!(%kind, total = summary.total(), %summary, "kind reconciled");
    }
    tracing::debug!(
        symbols = pass.reconciler.symbols().len(),
        "pass finished"
    );
    Ok(pass.report)
}

fn load<T: serde::de::DeserializeOwned>(source: &Discovered) -> Result<T, CatalogError> {
    parse_definition_file(&source.path).map_err(|message| ValidationError { message }.into())
}

struct Pass<'a> {
    store: &'a dyn CatalogStore,
    layout: &'a SourceLayout,
    namespace_id: &'a str,
    reconciler: Reconciler<'a>,
    /// Recipes accepted in this pass, by `name/version`
    recipes: HashMap<String, RecipeLink>,
    report: PassReport,
}

impl Pass<'_> {
    fn discover(&mut self, kind: EntityKind) -> Vec<Discovered> {
        match discover(self.layout, kind) {
            Ok(discovery) => {
                tracing::debug!(%kind, count = discovery.found.len(), "discovered definitions");
                for rejected in discovery.rejected {
                    let error = CatalogError::from(ValidationError {
                        message: rejected.reason,
                    });
                    self.skip(kind, &rejected.path, &error);
                }
                discovery.found
            }
            Err(e) => {
                tracing::error!(%kind, error = %e, "discovery failed, skipping kind");
                Vec::new()
            }
        }
    }

    fn outcome(&mut self, source: &Discovered, result: Result<Reconciled, CatalogError>) {
        match result {
            Ok(reconciled) => {
                tracing::info!(
                    kind = %source.kind,
                    key = %source.identity,
                    id = %reconciled.id,
                    "{}",
                    reconciled.action
                );
                self.report.kind_mut(source.kind).record(reconciled.action);
            }
            Err(e) => {
                self.skip(source.kind, &source.path, &e);
            }
        }
    }

    fn skip(&mut self, kind: EntityKind, path: &Path, error: &CatalogError) {
        tracing::warn!(
            %kind,
            path = %path.display(),
            category = error.category(),
            error = %error,
            "skipping definition"
        );
        self.report.kind_mut(kind).skipped += 1;
    }

    fn recipes(&mut self) {
        let mut accepted: HashMap<String, (Discovered, RecipeDefinition)> = HashMap::new();
        for source in self.discover(EntityKind::Recipe) {
            let parsed = load::<RecipeFile>(&source).and_then(|file| {
                validate_recipe(&file.recipe, self.layout)?;
                Ok(file.recipe)
            });
            match parsed {
                Ok(recipe) => {
                    let reference = source.identity.reference();
                    self.recipes.insert(
                        reference.clone(),
                        RecipeLink::from_definition(&source.identity, &recipe),
                    );
                    accepted.insert(reference, (source, recipe));
                }
                Err(e) => self.skip(source.kind, &source.path, &e),
            }
        }

        let (order, blocked) = build_recipe_order(&self.recipes);
        for reference in blocked {
            if let Some((source, _)) = accepted.remove(&reference) {
                self.recipes.remove(&reference);
                let err = ResolveError::CyclicParent {
                    chain: vec![reference],
                };
                self.skip(source.kind, &source.path, &err.into());
            }
        }

        for reference in order {
            let Some((source, recipe)) = accepted.remove(&reference) else {
                continue;
            };
            let result = self.reconcile_recipe(&source, &recipe);
            if result.is_err() {
                self.recipes.remove(&reference);
            }
            self.outcome(&source, result);
        }
    }

    fn reconcile_recipe(
        &mut self,
        source: &Discovered,
        recipe: &RecipeDefinition,
    ) -> Result<Reconciled, CatalogError> {
        let link = RecipeLink::from_definition(&source.identity, recipe);
        let lookup = PassLookup::new(&self.recipes, self.store, self.namespace_id);
        let images = resolve_base_images(&link, &lookup)?;
        tracing::debug!(recipe = %link.reference, ?images, "effective base images");

        let record = self.reconciler.recipe_record(source, recipe)?;
        Ok(self.reconciler.reconcile(record)?)
    }

    fn templates(&mut self) {
        for source in self.discover(EntityKind::Template) {
            let result = load::<TemplateFile>(&source).and_then(|file| {
                validate_template(&file.template, source.dir())?;
                let record = self.reconciler.template_record(&source, &file.template)?;
                Ok(self.reconciler.reconcile(record)?)
            });
            self.outcome(&source, result);
        }
    }

    fn endpoints(&mut self) {
        for source in self.discover(EntityKind::Endpoint) {
            let result = load::<EndpointFile>(&source).and_then(|file| {
                validate_endpoint(&file.endpoint)?;
                let record = self.reconciler.endpoint_record(&source, &file.endpoint);
                Ok(self.reconciler.reconcile(record)?)
            });
            self.outcome(&source, result);
        }
    }

    fn applications(&mut self) {
        for source in self.discover(EntityKind::Application) {
            let result = load::<ApplicationFile>(&source)
                .and_then(|file| self.reconcile_application(&source, &file.application));
            self.outcome(&source, result);
        }
    }

    fn reconcile_application(
        &mut self,
        source: &Discovered,
        app: &ApplicationDefinition,
    ) -> Result<Reconciled, CatalogError> {
        let check = validate_application(app);
        check.outcome?;
        let identities = check_application_references(app, &check.recipe_refs, self.layout)?;

        let lookup = PassLookup::new(&self.recipes, self.store, self.namespace_id);
        let mut links = Vec::with_capacity(identities.len());
        for identity in &identities {
            let reference = identity.reference();
            let link = lookup
                .lookup(&reference)?
                .ok_or_else(|| CatalogError::reference(format!("recipe {} not found", reference)))?;
            links.push(link);
        }
        let image = common_base_images(&links, &lookup)?;

        let record = self.reconciler.application_record(source, app, image)?;
        Ok(self.reconciler.reconcile(record)?)
    }
}

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    RunningPass,
}

/// Timing and refresh settings for the poll loop.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub namespace: String,
    pub interval: Duration,
    pub backoff: Duration,
    pub skip_refresh: bool,
}

/// How a scheduled pass ended.
#[derive(Debug)]
pub enum PassOutcome {
    Completed(PassReport),
    Aborted(CatalogError),
    /// The pass task panicked.
    Crashed(String),
}

impl PassOutcome {
    /// Delay before the next pass.
    pub fn next_delay(&self, settings: &PollSettings) -> Duration {
        match self {
            Self::Completed(_) => settings.interval,
            Self::Aborted(_) | Self::Crashed(_) => settings.backoff.min(settings.interval),
        }
    }
}

/// Drives the poll-and-reconcile cycle. Owns the store handle and hands it
/// to each pass.
pub struct Scheduler {
    store: Arc<dyn CatalogStore>,
    source: Arc<dyn SourceRefresher>,
    settings: PollSettings,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        source: Arc<dyn SourceRefresher>,
        settings: PollSettings,
    ) -> Self {
        Self {
            store,
            source,
            settings,
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    /// Refresh the source and run one pass.
    pub async fn run_once(&mut self) -> PassOutcome {
        self.state = SchedulerState::RunningPass;
        let outcome = self.pass().await;
        self.state = SchedulerState::Idle;

        match &outcome {
            PassOutcome::Completed(report) => {
                tracing::info!(skipped = report.skipped(), "pass completed")
            }
            PassOutcome::Aborted(e) => {
                tracing::error!(category = e.category(), error = %e, "pass aborted")
            }
            PassOutcome::Crashed(e) => tracing::error!(error = %e, "pass crashed"),
        }
        outcome
    }

    async fn pass(&self) -> PassOutcome {
        if self.settings.skip_refresh {
            tracing::debug!("source refresh skipped");
        } else if let Err(e) = self.source.refresh().await {
            return PassOutcome::Aborted(CatalogError::SourceRefresh {
                message: e.to_string(),
            });
        }

        let store = Arc::clone(&self.store);
        let layout = self.source.layout();
        let namespace = self.settings.namespace.clone();
        let joined =
            tokio::task::spawn_blocking(move || run_pass(store.as_ref(), &layout, &namespace))
                .await;

        match joined {
            Ok(Ok(report)) => PassOutcome::Completed(report),
            Ok(Err(e)) => PassOutcome::Aborted(e),
            Err(e) => PassOutcome::Crashed(e.to_string()),
        }
    }

    /// Run passes forever. Never returns.
    pub async fn run_forever(mut self) {
        loop {
            let outcome = self.run_once().await;
            let delay = outcome.next_delay(&self.settings);
            tracing::info!(next_in_secs = delay.as_secs(), "waiting for next pass");
            tokio::time::sleep(delay).await;
        }
    }
}
