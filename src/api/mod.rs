//! Cellforge API Server module
//!
//! Provides the HTTP REST API over the sheet engine.
//! Run with `cellforge-server`.

pub mod handlers;
pub mod server;

pub use server::{router, run_api_server, ApiConfig, AppState};
