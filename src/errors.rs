//! Error types for the bingo hall
//!
//! One enum per concern, joined under [`BingoError`]. Game-level errors carry
//! enough context to produce a reason code for the claimant or an audit line
//! for operations.

use crate::games::types::{CardId, ClaimKind, GameId, GameStatus, UserId};
use thiserror::Error;

/// Root error type for all bingo hall operations
#[derive(Debug, Error)]
pub enum BingoError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Game error: {0}")]
    Game(#[from] GameError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Configuration and validation errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),
}

/// Storage system errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database open failed: {0}")]
    DatabaseOpenFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),
}

/// Why a claim was refused. Reported to the claimant only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidClaim {
    #[error("card {card_id} is not known")]
    UnknownCard { card_id: CardId },

    #[error("card {card_id} belongs to game {card_game}, not {game_id}")]
    WrongGame {
        card_id: CardId,
        card_game: GameId,
        game_id: GameId,
    },

    #[error("card {card_id} is not owned by user {user_id}")]
    NotCardOwner { card_id: CardId, user_id: UserId },

    #[error("number {number} has not been drawn")]
    NumberNotDrawn { number: u8 },

    #[error("card {card_id} already won the {kind} prize")]
    AlreadyClaimed { card_id: CardId, kind: ClaimKind },

    #[error("{kind} was already won at call {winning_call}; this card completed at call {call_count}")]
    CategoryClosed {
        kind: ClaimKind,
        winning_call: u32,
        call_count: u32,
    },

    #[error("user {user_id} is not eligible to play")]
    UserNotEligible { user_id: UserId },
}

impl InvalidClaim {
    /// Stable reason code sent over the wire
    pub fn code(&self) -> &'static str {
        match self {
            InvalidClaim::UnknownCard { .. } => "UNKNOWN_CARD",
            InvalidClaim::WrongGame { .. } => "WRONG_GAME",
            InvalidClaim::NotCardOwner { .. } => "NOT_CARD_OWNER",
            InvalidClaim::NumberNotDrawn { .. } => "NUMBER_NOT_DRAWN",
            InvalidClaim::AlreadyClaimed { .. } => "ALREADY_CLAIMED",
            InvalidClaim::CategoryClosed { .. } => "CATEGORY_CLOSED",
            InvalidClaim::UserNotEligible { .. } => "USER_NOT_ELIGIBLE",
        }
    }
}

/// Errors raised by the game state machine, its actor, and the hall
#[derive(Debug, Error)]
pub enum GameError {
    #[error("game {game_id} not found")]
    NotFound { game_id: GameId },

    #[error("cannot {operation} game {game_id} while {status}")]
    InvalidState {
        game_id: GameId,
        status: GameStatus,
        operation: &'static str,
    },

    #[error("number {number} was already drawn in game {game_id}")]
    DuplicateNumber { game_id: GameId, number: u8 },

    #[error("number {number} is outside 1..=90")]
    NumberOutOfRange { number: u8 },

    #[error("all 90 numbers have been drawn in game {game_id}")]
    ExhaustedPool { game_id: GameId },

    #[error("invalid claim: {0}")]
    InvalidClaim(#[from] InvalidClaim),

    #[error("invalid card: {0}")]
    InvalidCard(String),

    #[error("game {game_id} did not respond within {timeout_ms}ms")]
    ServiceUnavailable { game_id: GameId, timeout_ms: u64 },

    #[error("allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("ledger failure: {0}")]
    Ledger(#[from] LedgerError),
}

impl GameError {
    /// Stable reason code sent over the wire
    pub fn code(&self) -> &'static str {
        match self {
            GameError::NotFound { .. } => "GAME_NOT_FOUND",
            GameError::InvalidState { .. } => "INVALID_STATE",
            GameError::DuplicateNumber { .. } => "DUPLICATE_NUMBER",
            GameError::NumberOutOfRange { .. } => "BAD_REQUEST",
            GameError::ExhaustedPool { .. } => "EXHAUSTED_POOL",
            GameError::InvalidClaim(reason) => reason.code(),
            GameError::InvalidCard(_) => "BAD_REQUEST",
            GameError::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            GameError::Allocation(_) => "ALLOCATION_FAILED",
            GameError::Storage(_) | GameError::Ledger(_) => "INTERNAL_ERROR",
        }
    }
}

/// Failure while splitting a prize pool. The treasury rolls back and the
/// game is flagged for manual reconciliation.
#[derive(Debug, Clone, Error)]
pub enum AllocationError {
    #[error("prize schedule sums to {total_bps} bps, expected 10000")]
    InvalidSchedule { total_bps: u32 },

    #[error("arithmetic overflow while splitting pool of {pool}")]
    Overflow { pool: u64 },

    #[error("credit to {user_id} failed: {reason}")]
    CreditFailed { user_id: UserId, reason: String },

    #[error("treasury persistence failed: {0}")]
    PersistFailed(String),

    #[error("treasury is not accepting work")]
    TreasuryUnavailable,
}

/// External ledger collaborator errors
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("insufficient funds for {user_id}: balance {balance}, needed {needed}")]
    InsufficientFunds {
        user_id: UserId,
        balance: u64,
        needed: u64,
    },

    #[error("ledger rejected operation: {0}")]
    Rejected(String),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

// External error conversions
impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::WriteFailed(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::CorruptedData(e.to_string())
    }
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::CorruptedData(e.to_string())
    }
}

impl From<std::io::Error> for BingoError {
    fn from(e: std::io::Error) -> Self {
        BingoError::Storage(StorageError::ReadFailed(e.to_string()))
    }
}

impl From<toml::de::Error> for ConfigurationError {
    fn from(e: toml::de::Error) -> Self {
        ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e))
    }
}

impl From<StorageError> for AllocationError {
    fn from(e: StorageError) -> Self {
        AllocationError::PersistFailed(e.to_string())
    }
}

// Convenience type alias for Results
pub type BingoResult<T> = Result<T, BingoError>;
pub type GameResult<T> = Result<T, GameError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let config_error = ConfigurationError::ValidationFailed("test".to_string());
        let bingo_error = BingoError::Configuration(config_error);

        assert!(bingo_error.to_string().contains("Configuration error"));
        assert!(bingo_error.to_string().contains("test"));
    }

    #[test]
    fn test_claim_reason_codes() {
        let err: GameError = InvalidClaim::NumberNotDrawn { number: 42 }.into();
        assert_eq!(err.code(), "NUMBER_NOT_DRAWN");
        assert!(err.to_string().contains("42"));

        let err = GameError::InvalidState {
            game_id: GameId(3),
            status: GameStatus::Completed,
            operation: "draw",
        };
        assert_eq!(err.code(), "INVALID_STATE");
        assert!(err.to_string().contains("completed"));
    }

    #[test]
    fn test_error_source() {
        let storage = StorageError::ReadFailed("disk".to_string());
        let bingo_error: BingoError = storage.into();

        assert!(bingo_error.source().is_some());
    }
}
