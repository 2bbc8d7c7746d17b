//! Core catalog logic: types, discovery, validation, resolution, reconciliation.

pub mod discovery;
pub mod error;
pub mod lint;
pub mod parser;
pub mod reconciler;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod types;
