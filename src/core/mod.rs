// TableSleuth - core/mod.rs
//
// Core business logic layer.
// Must NOT depend on: app, platform, or touch the filesystem directly.

pub mod export;
pub mod ingest;
pub mod model;
pub mod normalize;
pub mod patterns;
pub mod reconcile;
pub mod schema;
pub mod search;
pub mod text;
