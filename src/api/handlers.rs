//! Request Handlers
//!
//! HTTP administration and query endpoints. Every handler goes through the
//! hall; none of them touches game state directly.

use super::{errors::ApiError, middleware::RequestId, models::*, websocket::ConnectionBroadcaster};
use crate::fairness::{DrawVerification, FairnessReport};
use crate::games::types::{now_millis, CompletionOutcome, Draw, GameId, GameSnapshot};
use crate::hall::{BingoHall, ScheduledGame};
use crate::metrics::HallMetrics;
use crate::treasury::TreasuryState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    pub hall: Arc<BingoHall>,
    pub broadcaster: Arc<ConnectionBroadcaster>,
    pub metrics: Option<Arc<HallMetrics>>,
    pub version: String,
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Running".to_string(),
        version: state.version.clone(),
        games: state.hall.list_games().len(),
        connections: state.broadcaster.connection_count(),
    })
}

/// GET /jackpot
pub async fn jackpot_handler(State(state): State<Arc<AppState>>) -> Json<JackpotResponse> {
    Json(JackpotResponse {
        jackpot: state.hall.get_jackpot_balance(),
    })
}

/// GET /treasury
pub async fn treasury_handler(State(state): State<Arc<AppState>>) -> Json<TreasuryState> {
    Json(state.hall.get_treasury())
}

/// POST /games
pub async fn schedule_game_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    body: Option<Json<ScheduleGameRequest>>,
) -> Result<(StatusCode, Json<ScheduledGame>), ApiError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let start = request.scheduled_start.unwrap_or_else(now_millis);
    let scheduled = state
        .hall
        .schedule_game(start)
        .map_err(|e| ApiError::from_game(request_id.0, e))?;
    Ok((StatusCode::CREATED, Json(scheduled)))
}

/// GET /games
pub async fn list_games_handler(State(state): State<Arc<AppState>>) -> Json<GameListResponse> {
    Json(GameListResponse {
        games: state.hall.list_games().iter().map(GameSummary::from).collect(),
    })
}

/// GET /games/:id
pub async fn game_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<u64>,
) -> Result<Json<GameSnapshot>, ApiError> {
    state
        .hall
        .get_game_state(GameId(game_id))
        .map(Json)
        .map_err(|e| ApiError::from_game(request_id.0, e))
}

/// POST /games/:id/start
pub async fn start_game_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<u64>,
) -> Result<Json<GameSnapshot>, ApiError> {
    state
        .hall
        .start_game(GameId(game_id))
        .await
        .map(Json)
        .map_err(|e| ApiError::from_game(request_id.0, e))
}

/// POST /games/:id/draw
pub async fn draw_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<u64>,
) -> Result<Json<Draw>, ApiError> {
    state
        .hall
        .draw_next(GameId(game_id))
        .await
        .map(Json)
        .map_err(|e| ApiError::from_game(request_id.0, e))
}

/// POST /games/:id/stop
pub async fn stop_game_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<u64>,
) -> Result<Json<CompletionOutcome>, ApiError> {
    state
        .hall
        .force_stop(GameId(game_id))
        .await
        .map(Json)
        .map_err(|e| ApiError::from_game(request_id.0, e))
}

/// POST /games/:id/cards
pub async fn purchase_card_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<u64>,
    Json(request): Json<PurchaseCardRequest>,
) -> Result<(StatusCode, Json<CardResponse>), ApiError> {
    let card = state
        .hall
        .purchase_card(request.user_id, GameId(game_id), request.grid, request.price)
        .await
        .map_err(|e| ApiError::from_game(request_id.0, e))?;

    Ok((
        StatusCode::CREATED,
        Json(CardResponse {
            card_id: card.id,
            game_id: card.game_id,
            user_id: card.user_id,
            grid: card.grid,
            purchase_price: card.purchase_price,
        }),
    ))
}

/// GET /games/:id/fairness
pub async fn fairness_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<u64>,
) -> Result<Json<FairnessReport>, ApiError> {
    state
        .hall
        .get_fairness_report(GameId(game_id))
        .map(Json)
        .map_err(|e| ApiError::from_game(request_id.0, e))
}

/// GET /games/:id/draws/:index/verify
pub async fn verify_draw_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path((game_id, index)): Path<(u64, u32)>,
) -> Result<Json<DrawVerification>, ApiError> {
    state
        .hall
        .verify_draw(GameId(game_id), index)
        .map(Json)
        .map_err(|e| ApiError::from_game(request_id.0, e))
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(metrics) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
