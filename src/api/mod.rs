//! TrafficScope API
//!
//! Logging bootstrap and the facade the presentation surface calls.

pub mod inspector_api;

pub use inspector_api::{get_version, init_core, InspectorApi};
