//! catalog-injector: catalog resolution and reconciliation.
//!
//! Discovers recipe, template, endpoint and application definitions in a
//! source tree, validates them, resolves recipe inheritance and application
//! base-image compatibility, and upserts the results into a catalog store.

pub mod cli;
pub mod config;
pub mod core;
pub mod server;
pub mod source;
