//! API Request and Response Models

use crate::games::card::CardGrid;
use crate::games::types::{CardId, GameId, GameSnapshot, GameStatus, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub games: usize,
    pub connections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JackpotResponse {
    pub jackpot: u64,
}

/// POST /games
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleGameRequest {
    /// Unix milliseconds; defaults to now
    #[serde(default)]
    pub scheduled_start: Option<u64>,
}

/// POST /games/:id/cards
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseCardRequest {
    pub user_id: UserId,
    pub price: u64,
    /// A random grid is issued when omitted
    #[serde(default)]
    pub grid: Option<CardGrid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSummary {
    pub id: GameId,
    pub status: GameStatus,
    pub draws: usize,
    pub cards_sold: u32,
    pub total_pool: u64,
}

impl From<&GameSnapshot> for GameSummary {
    fn from(snapshot: &GameSnapshot) -> Self {
        Self {
            id: snapshot.game.id,
            status: snapshot.game.status,
            draws: snapshot.game.draws.len(),
            cards_sold: snapshot.game.cards_sold,
            total_pool: snapshot.game.total_pool,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameListResponse {
    pub games: Vec<GameSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardResponse {
    pub card_id: CardId,
    pub game_id: GameId,
    pub user_id: UserId,
    pub grid: CardGrid,
    pub purchase_price: u64,
}
