//! # shannon-config
//!
//! Layered configuration: a YAML file overlaid by `SHANNON_`-prefixed
//! environment variables (nested keys join with `__`).

pub mod loader;
pub mod schema;

pub use loader::{load, load_from_str};
pub use schema::*;
