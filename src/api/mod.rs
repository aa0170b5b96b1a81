//! Bingo Hall API Service
//!
//! HTTP administration and query endpoints plus the player WebSocket gateway.

pub mod auth;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod websocket;

pub use handlers::AppState;
pub use server::{build_app, ApiServer};
pub use websocket::{ClientMessage, ConnectionBroadcaster, ServerMessage};
