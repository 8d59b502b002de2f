//! Arbor common types, errors, and configuration.
//!
//! This crate provides shared definitions used across all Arbor components.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ForestConfig, META_FORMAT_VERSION, StoreConfig, StoreMeta};
pub use error::{ArborError, Result};
pub use types::{NodeId, ParentRef};
