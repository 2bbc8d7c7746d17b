//! Base image resolution and recipe ordering.
//!
//! Follows recipe parent chains to their effective base images, intersects
//! base images across an application's recipes, and orders a pass's recipes
//! so parents are reconciled before children (Kahn's algorithm with
//! alphabetical tie-breaking).

use super::parser::parse_reference;
use super::store::{self, CatalogStore, StoreError};
use super::types::*;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("recipe {recipe} has neither base images nor a parent")]
    NoBaseImage { recipe: String },

    #[error("parent {parent} of recipe {recipe} not found")]
    ParentNotFound { recipe: String, parent: String },

    #[error("cyclic parent chain: {}", chain.join(" -> "))]
    CyclicParent { chain: Vec<String> },

    #[error("no common base image in recipes {}", recipes.join(", "))]
    NoCommonImage { recipes: Vec<String> },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The parts of a recipe that inheritance resolution needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeLink {
    /// `name/version`
    pub reference: String,
    pub base_images: Vec<String>,
    pub parent: Option<String>,
}

impl RecipeLink {
    pub fn from_definition(identity: &Identity, recipe: &RecipeDefinition) -> Self {
        Self {
            reference: identity.reference(),
            base_images: recipe.base_images.clone(),
            parent: non_empty(&recipe.parent),
        }
    }

    pub fn from_record(recipe: &Recipe) -> Self {
        Self {
            reference: format!("{}/{}", recipe.remote, recipe.remote_version),
            base_images: recipe.base_images.clone(),
            parent: non_empty(&recipe.parent),
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Find a recipe by `name/version`.
pub trait RecipeLookup {
    fn lookup(&self, reference: &str) -> Result<Option<RecipeLink>, StoreError>;
}

impl RecipeLookup for HashMap<String, RecipeLink> {
    fn lookup(&self, reference: &str) -> Result<Option<RecipeLink>, StoreError> {
        Ok(self.get(reference).cloned())
    }
}

/// Lookup over the recipes accepted in the current pass, falling back to the
/// persisted store.
pub struct PassLookup<'a> {
    pass: &'a HashMap<String, RecipeLink>,
    store: &'a dyn CatalogStore,
    namespace: &'a str,
}

impl<'a> PassLookup<'a> {
    pub fn new(
        pass: &'a HashMap<String, RecipeLink>,
        store: &'a dyn CatalogStore,
        namespace: &'a str,
    ) -> Self {
        Self {
            pass,
            store,
            namespace,
        }
    }
}

impl RecipeLookup for PassLookup<'_> {
    fn lookup(&self, reference: &str) -> Result<Option<RecipeLink>, StoreError> {
        if let Some(link) = self.pass.get(reference) {
            return Ok(Some(link.clone()));
        }
        let Ok(identity) = parse_reference(reference) else {
            return Ok(None);
        };
        let key = EntityKey::new(self.namespace, identity);
        let persisted: Option<Recipe> = store::find_record(self.store, &key)?;
        Ok(persisted.as_ref().map(RecipeLink::from_record))
    }
}

/// Resolve the effective base images of a recipe.
///
/// A parent takes precedence over the recipe's own base images. Revisiting a
/// recipe along the chain fails with `CyclicParent`.
pub fn resolve_base_images(
    recipe: &RecipeLink,
    lookup: &dyn RecipeLookup,
) -> Result<Vec<String>, ResolveError> {
    let mut chain = vec![recipe.reference.clone()];
    let mut visited: HashSet<String> = HashSet::from([recipe.reference.clone()]);
    let mut current = recipe.clone();

    while let Some(parent) = current.parent.clone() {
        chain.push(parent.clone());
        if !visited.insert(parent.clone()) {
            return Err(ResolveError::CyclicParent { chain });
        }
        current = lookup
            .lookup(&parent)?
            .ok_or_else(|| ResolveError::ParentNotFound {
                recipe: current.reference.clone(),
                parent,
            })?;
    }

    if current.base_images.is_empty() {
        return Err(ResolveError::NoBaseImage {
            recipe: current.reference,
        });
    }
    Ok(current.base_images)
}

/// Base images shared by every recipe, in the first recipe's order.
///
/// Stops at the first recipe that empties the candidate set.
pub fn common_base_images(
    recipes: &[RecipeLink],
    lookup: &dyn RecipeLookup,
) -> Result<Vec<String>, ResolveError> {
    let mut candidates: Option<Vec<String>> = None;
    let mut seen = Vec::with_capacity(recipes.len());

    for recipe in recipes {
        let images = resolve_base_images(recipe, lookup)?;
        seen.push(recipe.reference.clone());
        tracing::debug!(recipe = %recipe.reference, ?images, "resolved base images");

        let next = match candidates {
            None => dedup(&images),
            Some(ref current) => intersect(current, &images),
        };
        if next.is_empty() {
            return Err(ResolveError::NoCommonImage { recipes: seen });
        }
        candidates = Some(next);
    }

    Ok(candidates.unwrap_or_default())
}

fn dedup(images: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    images
        .iter()
        .filter(|image| seen.insert(image.as_str()))
        .cloned()
        .collect()
}

fn intersect(current: &[String], images: &[String]) -> Vec<String> {
    let allowed: HashSet<&str> = images.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    current
        .iter()
        .filter(|image| allowed.contains(image.as_str()) && seen.insert(image.as_str()))
        .cloned()
        .collect()
}

/// Order recipes so every parent present in the set precedes its children.
///
/// Returns the order and the references left over because they sit on (or
/// below) a parent cycle.
pub fn build_recipe_order(recipes: &HashMap<String, RecipeLink>) -> (Vec<String>, Vec<String>) {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();

    for reference in recipes.keys() {
        in_degree.insert(reference.as_str(), 0);
    }

    for (reference, link) in recipes {
        if let Some(parent) = link.parent.as_deref() {
            if let Some((parent_key, _)) = recipes.get_key_value(parent) {
                children
                    .entry(parent_key.as_str())
                    .or_default()
                    .push(reference.as_str());
                *in_degree.entry(reference.as_str()).or_default() += 1;
            }
        }
    }

    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(reference, _)| *reference)
        .collect();
    ready.sort_unstable();
    let mut queue: VecDeque<&str> = ready.into_iter().collect();

    let mut order = Vec::with_capacity(recipes.len());
    while let Some(current) = queue.pop_front() {
        order.push(current.to_string());

        let mut next_ready = Vec::new();
        for child in children.get(current).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(child) {
                *degree -= 1;
                if *degree == 0 {
                    next_ready.push(*child);
                }
            }
        }
        next_ready.sort_unstable();
        queue.extend(next_ready);
    }

    let ordered: HashSet<&str> = order.iter().map(String::as_str).collect();
    let blocked: BTreeSet<String> = recipes
        .keys()
        .filter(|reference| !ordered.contains(reference.as_str()))
        .cloned()
        .collect();

    (order, blocked.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::SqliteStore;

    fn link(reference: &str, base: &[&str], parent: Option<&str>) -> RecipeLink {
        RecipeLink {
            reference: reference.to_string(),
            base_images: base.iter().map(|s| s.to_string()).collect(),
            parent: parent.map(str::to_string),
        }
    }

    fn index(links: &[RecipeLink]) -> HashMap<String, RecipeLink> {
        links
            .iter()
            .map(|l| (l.reference.clone(), l.clone()))
            .collect()
    }

    #[test]
    fn test_resolve_own_base_images() {
        let base = link("base/v1", &["ubuntu:20.04"], None);
        let lookup = index(&[base.clone()]);
        assert_eq!(
            resolve_base_images(&base, &lookup).unwrap(),
            vec!["ubuntu:20.04"]
        );
    }

    #[test]
    fn test_resolve_child_inherits_parent() {
        let base = link("base/v1", &["ubuntu:20.04"], None);
        let child = link("child/v1", &[], Some("base/v1"));
        let lookup = index(&[base, child.clone()]);
        assert_eq!(
            resolve_base_images(&child, &lookup).unwrap(),
            vec!["ubuntu:20.04"]
        );
    }

    #[test]
    fn test_resolve_deep_chain() {
        let mut links = vec![link("r0/v1", &["debian:12", "alpine:3"], None)];
        for i in 1..=20 {
            let parent = format!("r{}/v1", i - 1);
            links.push(link(&format!("r{}/v1", i), &[], Some(&parent)));
        }
        let lookup = index(&links);
        let leaf = links.last().unwrap();
        assert_eq!(
            resolve_base_images(leaf, &lookup).unwrap(),
            vec!["debian:12", "alpine:3"]
        );
    }

    #[test]
    fn test_parent_takes_precedence_over_own_images() {
        let base = link("base/v1", &["ubuntu:20.04"], None);
        let child = link("child/v1", &["centos:8"], Some("base/v1"));
        let lookup = index(&[base, child.clone()]);
        assert_eq!(
            resolve_base_images(&child, &lookup).unwrap(),
            vec!["ubuntu:20.04"]
        );
    }

    #[test]
    fn test_resolve_parent_not_found() {
        let child = link("child/v1", &[], Some("ghost/v1"));
        let lookup = index(&[child.clone()]);
        match resolve_base_images(&child, &lookup) {
            Err(ResolveError::ParentNotFound { recipe, parent }) => {
                assert_eq!(recipe, "child/v1");
                assert_eq!(parent, "ghost/v1");
            }
            other => panic!("expected ParentNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_no_base_image_at_root() {
        let root = link("root/v1", &[], None);
        let child = link("child/v1", &[], Some("root/v1"));
        let lookup = index(&[root, child.clone()]);
        assert!(matches!(
            resolve_base_images(&child, &lookup),
            Err(ResolveError::NoBaseImage { recipe }) if recipe == "root/v1"
        ));
    }

    #[test]
    fn test_resolve_cycle_detected() {
        let a = link("a/v1", &["ubuntu"], Some("b/v1"));
        let b = link("b/v1", &[], Some("c/v1"));
        let c = link("c/v1", &[], Some("a/v1"));
        let lookup = index(&[a.clone(), b, c]);
        match resolve_base_images(&a, &lookup) {
            Err(ResolveError::CyclicParent { chain }) => {
                assert_eq!(chain, vec!["a/v1", "b/v1", "c/v1", "a/v1"]);
            }
            other => panic!("expected CyclicParent, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_self_parent() {
        let a = link("a/v1", &[], Some("a/v1"));
        let lookup = index(&[a.clone()]);
        assert!(matches!(
            resolve_base_images(&a, &lookup),
            Err(ResolveError::CyclicParent { .. })
        ));
    }

    #[test]
    fn test_common_images_through_inheritance() {
        let base = link("base/v1", &["ubuntu:20.04"], None);
        let child = link("child/v1", &[], Some("base/v1"));
        let sibling = link("sibling/v1", &["ubuntu:20.04", "centos:8"], None);
        let lookup = index(&[base, child.clone(), sibling.clone()]);
        assert_eq!(
            common_base_images(&[child, sibling], &lookup).unwrap(),
            vec!["ubuntu:20.04"]
        );
    }

    #[test]
    fn test_common_images_exact_intersection() {
        let a = link("a/v1", &["u", "c", "d", "u"], None);
        let b = link("b/v1", &["d", "c", "x"], None);
        let c = link("c/v1", &["c", "d", "y"], None);
        let lookup = index(&[a.clone(), b.clone(), c.clone()]);
        let mut images = common_base_images(&[a, b, c], &lookup).unwrap();
        images.sort();
        assert_eq!(images, vec!["c", "d"]);
    }

    #[test]
    fn test_common_images_disjoint() {
        let a = link("a/v1", &["ubuntu:20.04"], None);
        let b = link("b/v1", &["centos:8"], None);
        let lookup = index(&[a.clone(), b.clone()]);
        match common_base_images(&[a, b], &lookup) {
            Err(ResolveError::NoCommonImage { recipes }) => {
                assert_eq!(recipes, vec!["a/v1", "b/v1"]);
            }
            other => panic!("expected NoCommonImage, got {:?}", other),
        }
    }

    #[test]
    fn test_common_images_short_circuits() {
        let a = link("a/v1", &["ubuntu"], None);
        let b = link("b/v1", &["centos"], None);
        // c would fail resolution, but is never reached
        let c = link("c/v1", &[], Some("ghost/v1"));
        let lookup = index(&[a.clone(), b.clone()]);
        assert!(matches!(
            common_base_images(&[a, b, c], &lookup),
            Err(ResolveError::NoCommonImage { .. })
        ));
    }

    #[test]
    fn test_common_images_fails_on_unresolvable_recipe() {
        let a = link("a/v1", &["ubuntu"], None);
        let b = link("b/v1", &[], Some("ghost/v1"));
        let lookup = index(&[a.clone()]);
        assert!(matches!(
            common_base_images(&[a, b], &lookup),
            Err(ResolveError::ParentNotFound { .. })
        ));
    }

    #[test]
    fn test_pass_lookup_falls_back_to_store() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ns = store.ensure_namespace("community").unwrap();
        let persisted = Recipe {
            id: String::new(),
            namespace: ns.clone(),
            remote: "base".into(),
            remote_version: "v1".into(),
            name: "base".into(),
            description: String::new(),
            author: String::new(),
            license: "MIT".into(),
            base_images: vec!["ubuntu:20.04".into()],
            parent: String::new(),
            parent_recipe: String::new(),
            inputs: Default::default(),
            tags: vec![],
            script: "true".into(),
            public: true,
            timestamp: 0,
        };
        store::insert_record(&store, &persisted).unwrap();

        let child = link("child/v1", &[], Some("base/v1"));
        let pass = index(&[child.clone()]);
        let lookup = PassLookup::new(&pass, &store, &ns);
        assert_eq!(
            resolve_base_images(&child, &lookup).unwrap(),
            vec!["ubuntu:20.04"]
        );
        assert!(lookup.lookup("missing/v9").unwrap().is_none());
        assert!(lookup.lookup("not-a-reference").unwrap().is_none());
    }

    #[test]
    fn test_recipe_order_parents_first() {
        let links = index(&[
            link("zz-child/v1", &[], Some("mm-mid/v1")),
            link("mm-mid/v1", &[], Some("aa-base/v1")),
            link("aa-base/v1", &["ubuntu"], None),
            link("bb-solo/v1", &["ubuntu"], None),
            link("cc-external/v1", &[], Some("persisted/v1")),
        ]);
        let (order, blocked) = build_recipe_order(&links);
        assert_eq!(
            order,
            vec![
                "aa-base/v1",
                "bb-solo/v1",
                "cc-external/v1",
                "mm-mid/v1",
                "zz-child/v1"
            ]
        );
        assert!(blocked.is_empty());
    }

    #[test]
    fn test_recipe_order_reports_cycles() {
        let links = index(&[
            link("a/v1", &[], Some("b/v1")),
            link("b/v1", &[], Some("a/v1")),
            link("c/v1", &[], Some("a/v1")),
            link("d/v1", &["ubuntu"], None),
        ]);
        let (order, blocked) = build_recipe_order(&links);
        assert_eq!(order, vec!["d/v1"]);
        assert_eq!(blocked, vec!["a/v1", "b/v1", "c/v1"]);
    }
}
