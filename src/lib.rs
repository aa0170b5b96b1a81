//! Bingohall - multi-player 90-ball bingo engine
//!
//! Provably fair number draws (signed seed commitment, HMAC-SHA256 proofs),
//! one actor task per game, claim validation against the committed draw
//! order, and atomic prize settlement against a persisted progressive
//! jackpot. The `api` module exposes HTTP administration and a WebSocket
//! gateway for players.

pub mod api;
pub mod config;
pub mod errors;
pub mod fairness;
pub mod game_store;
pub mod games;
pub mod hall;
pub mod ledger;
pub mod metrics;
pub mod storage;
pub mod treasury;

pub use config::{ConfigLoader, HallConfig};
pub use errors::{BingoError, BingoResult, GameError, GameResult};
pub use hall::{BingoHall, HallServices, ScheduledGame};
pub use storage::{KvStore, MemoryStore, RocksStore};
