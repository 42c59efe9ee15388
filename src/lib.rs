//! bundlemerge library crate.
//!
//! Reconciles concurrently edited copies ("forks") of a bundle of
//! configuration files by three-way merge against their nearest shared
//! ancestor. The `bundlemerge` binary is a thin CLI over these modules;
//! storage lives in the `bundle-store` crate.

pub mod config;
pub mod handlers;
pub mod merge;
pub mod telemetry;

pub use bundle_store;
