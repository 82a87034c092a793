//! Transport layer for the gateway.
//!
//! HTTP via axum is the only transport.

pub mod http;

pub use http::{ServerConfig, serve};
