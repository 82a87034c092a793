//! HTTP transport.

mod routes;
mod server;

pub use routes::{ErrorBody, routes, status_for};
pub use server::{ServerConfig, serve};
