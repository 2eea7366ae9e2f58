//! Resource abstraction layer
//!
//! This module provides a data-driven approach to GCP resource types.
//! Resource definitions are loaded from JSON files at compile time, allowing
//! new resource types to be synchronized without code changes.
//!
//! # Architecture
//!
//! - [`registry`] - Loads and validates resource definitions from embedded JSON
//! - [`normalize`] - Dot-path extraction used to flatten raw API records
//!
//! # Resource Definitions
//!
//! Resources are defined in JSON files under `src/resources/`:
//! - `functions.json` - Cloud Functions
//! - `storage.json` - Cloud Storage buckets and their labels

pub mod normalize;
pub mod registry;

pub use registry::*;
