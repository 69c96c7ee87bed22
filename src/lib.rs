//! # TrafficScope Core
//!
//! In-app HTTP traffic inspector. Records every request the host app makes
//! through its default network configuration so a debug surface can list
//! them, without changing what goes over the wire.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │              Presentation surface (host UI)              │
//! ├──────────────────────────────────────────────────────────┤
//! │        api::InspectorApi   /   session::SessionController │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐  │
//! │  │ NetworkConfig│──▶│ Capture hook │──▶│ RecordStore  │  │
//! │  │ (interceptor │   │              │   │ + session log│  │
//! │  │    chain)    │   └──────┬───────┘   └──────────────┘  │
//! │  └──────────────┘          ▼                             │
//! │                        Transport (reqwest)               │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod error;
pub mod intercept;
pub mod models;
pub mod session;
pub mod storage;

pub use error::{InspectorError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
