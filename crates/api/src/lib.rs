//! Renderwatch API server library.
//!
//! Exposes the building blocks (config, state, error handling, routes,
//! WebSocket infrastructure, progress relay) so integration tests and the
//! binary entrypoint share them.

pub mod config;
pub mod error;
pub mod handlers;
pub mod relay;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
