//! Route Definitions

use super::{handlers::*, websocket::websocket_handler};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/jackpot", get(jackpot_handler))
        .route("/treasury", get(treasury_handler))
        // Game administration and queries
        .route("/games", get(list_games_handler).post(schedule_game_handler))
        .route("/games/:id", get(game_handler))
        .route("/games/:id/start", post(start_game_handler))
        .route("/games/:id/draw", post(draw_handler))
        .route("/games/:id/stop", post(stop_game_handler))
        .route("/games/:id/cards", post(purchase_card_handler))
        .route("/games/:id/fairness", get(fairness_handler))
        .route("/games/:id/draws/:index/verify", get(verify_draw_handler))
        // Player sockets
        .route("/ws", get(websocket_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
