//! Data models for TrafficScope
//!
//! Shared between the capture hook, the record store and the presentation surface.

pub mod config;
pub mod headers;
pub mod record;

pub use config::*;
pub use headers::Headers;
pub use record::*;
