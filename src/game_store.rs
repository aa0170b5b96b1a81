//! Persistent game records
//!
//! Logical tables over a [`KvStore`]:
//!
//! | key                                   | value                         |
//! |---------------------------------------|-------------------------------|
//! | `game:<id be>`                        | game header (JSON, no draws)  |
//! | `draw:<id be><seq be>`                | draw (bincode)                |
//! | `card:<card be>`                      | card (JSON)                   |
//! | `card:game:<id be><card be>`          | empty, per-game card index    |
//! | `seed:<id be>`                        | seed + signed commitment      |
//! | `treasury`                            | jackpot / wallet / carry row  |
//! | `reconcile:<id be>`                   | allocation failure detail     |

use crate::errors::StorageError;
use crate::games::card::Card;
use crate::games::draw_engine::SeedCommitment;
use crate::games::types::{CardId, Draw, Game, GameId};
use crate::storage::{BatchOp, KvStore};
use crate::treasury::TreasuryState;
use serde::{Deserialize, Serialize};

const GAME_PREFIX: &[u8] = b"game:";
const DRAW_PREFIX: &[u8] = b"draw:";
const CARD_PREFIX: &[u8] = b"card:";
const CARD_GAME_PREFIX: &[u8] = b"card:game:";
const SEED_PREFIX: &[u8] = b"seed:";
const TREASURY_KEY: &[u8] = b"treasury";
const RECONCILE_PREFIX: &[u8] = b"reconcile:";

fn keyed(prefix: &[u8], parts: &[u64]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + parts.len() * 8);
    key.extend_from_slice(prefix);
    for part in parts {
        key.extend_from_slice(&part.to_be_bytes());
    }
    key
}

fn game_key(id: GameId) -> Vec<u8> {
    keyed(GAME_PREFIX, &[id.0])
}

fn draw_prefix(id: GameId) -> Vec<u8> {
    keyed(DRAW_PREFIX, &[id.0])
}

fn draw_key(id: GameId, sequence_index: u32) -> Vec<u8> {
    keyed(DRAW_PREFIX, &[id.0, sequence_index as u64])
}

fn card_key(id: CardId) -> Vec<u8> {
    keyed(CARD_PREFIX, &[id.0])
}

fn card_index_key(game_id: GameId, card_id: CardId) -> Vec<u8> {
    keyed(CARD_GAME_PREFIX, &[game_id.0, card_id.0])
}

fn seed_key(id: GameId) -> Vec<u8> {
    keyed(SEED_PREFIX, &[id.0])
}

fn reconcile_key(id: GameId) -> Vec<u8> {
    keyed(RECONCILE_PREFIX, &[id.0])
}

fn header_bytes(game: &Game) -> Result<Vec<u8>, StorageError> {
    let mut header = game.clone();
    header.draws.clear();
    Ok(serde_json::to_vec(&header)?)
}

/// Seed row. Kept apart from the public game record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedRecord {
    pub seed_hex: String,
    pub commitment: SeedCommitment,
}

/// Write the game header and seed when a game is scheduled
pub fn create_game(store: &dyn KvStore, game: &Game, seed: &SeedRecord) -> Result<(), StorageError> {
    store.write_batch(vec![
        BatchOp::Put(game_key(game.id), header_bytes(game)?),
        BatchOp::Put(seed_key(game.id), serde_json::to_vec(seed)?),
    ])
}

/// Overwrite the game header (status, winners, pool, settlement)
pub fn store_game(store: &dyn KvStore, game: &Game) -> Result<(), StorageError> {
    store.put(&game_key(game.id), &header_bytes(game)?)
}

/// Append a draw and the updated header in one batch
pub fn append_draw(store: &dyn KvStore, game: &Game, draw: &Draw) -> Result<(), StorageError> {
    store.write_batch(vec![
        BatchOp::Put(draw_key(draw.game_id, draw.sequence_index), bincode::serialize(draw)?),
        BatchOp::Put(game_key(game.id), header_bytes(game)?),
    ])
}

pub fn load_draws(store: &dyn KvStore, id: GameId) -> Result<Vec<Draw>, StorageError> {
    store
        .scan_prefix(&draw_prefix(id))?
        .into_iter()
        .map(|(_, bytes)| bincode::deserialize::<Draw>(&bytes).map_err(StorageError::from))
        .collect()
}

/// Game header with its draws reattached in sequence order
pub fn load_game(store: &dyn KvStore, id: GameId) -> Result<Option<Game>, StorageError> {
    let Some(bytes) = store.get(&game_key(id))? else {
        return Ok(None);
    };
    let mut game: Game = serde_json::from_slice(&bytes).map_err(|e| {
        StorageError::CorruptedData(format!("Failed to decode game {}: {}", id, e))
    })?;
    game.draws = load_draws(store, id)?;
    Ok(Some(game))
}

pub fn load_games(store: &dyn KvStore) -> Result<Vec<Game>, StorageError> {
    let mut games = Vec::new();
    for (key, _) in store.scan_prefix(GAME_PREFIX)? {
        let id_bytes: [u8; 8] = key[GAME_PREFIX.len()..]
            .try_into()
            .map_err(|_| StorageError::CorruptedData("Malformed game key".to_string()))?;
        if let Some(game) = load_game(store, GameId(u64::from_be_bytes(id_bytes)))? {
            games.push(game);
        }
    }
    Ok(games)
}

pub fn load_seed(store: &dyn KvStore, id: GameId) -> Result<Option<SeedRecord>, StorageError> {
    match store.get(&seed_key(id))? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Cards are written exactly once
pub fn store_card(store: &dyn KvStore, card: &Card) -> Result<(), StorageError> {
    if store.get(&card_key(card.id))?.is_some() {
        return Err(StorageError::WriteFailed(format!("card {} already issued", card.id)));
    }
    store.write_batch(vec![
        BatchOp::Put(card_key(card.id), serde_json::to_vec(card)?),
        BatchOp::Put(card_index_key(card.game_id, card.id), Vec::new()),
    ])
}

/// Remove a card whose purchase was rolled back before the game accepted it
pub fn revoke_card(store: &dyn KvStore, card: &Card) -> Result<(), StorageError> {
    store.write_batch(vec![
        BatchOp::Delete(card_key(card.id)),
        BatchOp::Delete(card_index_key(card.game_id, card.id)),
    ])
}

pub fn load_card(store: &dyn KvStore, id: CardId) -> Result<Option<Card>, StorageError> {
    match store.get(&card_key(id))? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub fn load_cards_for_game(store: &dyn KvStore, game_id: GameId) -> Result<Vec<Card>, StorageError> {
    let prefix = keyed(CARD_GAME_PREFIX, &[game_id.0]);
    let mut cards = Vec::new();
    for (key, _) in store.scan_prefix(&prefix)? {
        let tail: [u8; 8] = key[key.len() - 8..]
            .try_into()
            .map_err(|_| StorageError::CorruptedData("Malformed card index key".to_string()))?;
        if let Some(card) = load_card(store, CardId(u64::from_be_bytes(tail)))? {
            cards.push(card);
        }
    }
    Ok(cards)
}

pub fn load_treasury(store: &dyn KvStore) -> Result<TreasuryState, StorageError> {
    match store.get(TREASURY_KEY)? {
        Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
        None => Ok(TreasuryState::default()),
    }
}

/// Persist the treasury row together with the settled game header
pub fn commit_settlement(
    store: &dyn KvStore,
    treasury: &TreasuryState,
    game: Option<&Game>,
) -> Result<(), StorageError> {
    let mut ops = vec![BatchOp::Put(TREASURY_KEY.to_vec(), serde_json::to_vec(treasury)?)];
    if let Some(game) = game {
        ops.push(BatchOp::Put(game_key(game.id), header_bytes(game)?));
        ops.push(BatchOp::Delete(reconcile_key(game.id)));
    }
    store.write_batch(ops)
}

/// Flag a completed game whose allocation failed
pub fn flag_for_reconciliation(store: &dyn KvStore, game: &Game, reason: &str) -> Result<(), StorageError> {
    tracing::warn!(game_id = %game.id, reason, "Flagging game for manual reconciliation");
    store.write_batch(vec![
        BatchOp::Put(game_key(game.id), header_bytes(game)?),
        BatchOp::Put(reconcile_key(game.id), reason.as_bytes().to_vec()),
    ])
}

pub fn load_reconciliation_queue(store: &dyn KvStore) -> Result<Vec<(GameId, String)>, StorageError> {
    store
        .scan_prefix(RECONCILE_PREFIX)?
        .into_iter()
        .map(|(key, value)| {
            let id: [u8; 8] = key[RECONCILE_PREFIX.len()..]
                .try_into()
                .map_err(|_| StorageError::CorruptedData("Malformed reconcile key".to_string()))?;
            Ok((GameId(u64::from_be_bytes(id)), String::from_utf8_lossy(&value).into_owned()))
        })
        .collect()
}

/// Highest game and card ids in use, for restarting the id counters
pub fn load_id_watermarks(store: &dyn KvStore) -> Result<(u64, u64), StorageError> {
    let last_id = |prefix: &[u8], rows: Vec<(Vec<u8>, Vec<u8>)>| {
        rows.iter()
            .filter_map(|(k, _)| k.get(prefix.len()..prefix.len() + 8))
            .filter_map(|b| <[u8; 8]>::try_from(b).ok())
            .map(u64::from_be_bytes)
            .max()
            .unwrap_or(0)
    };

    let games = last_id(GAME_PREFIX, store.scan_prefix(GAME_PREFIX)?);
    let cards = store
        .scan_prefix(CARD_PREFIX)?
        .into_iter()
        .filter(|(k, _)| !k.starts_with(CARD_GAME_PREFIX))
        .collect();
    Ok((games, last_id(CARD_PREFIX, cards)))
}
