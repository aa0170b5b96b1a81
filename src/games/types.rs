use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest number in the draw pool (numbers run 1..=90)
pub const MAX_NUMBER: u8 = 90;

/// Game identifier, also the arena index of the game's actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub u64);

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Card identifier, unique across all games
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(pub u64);

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Player identifier as issued by the external account service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a game instance. Transitions only move forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Scheduled,
    Active,
    Completed,
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameStatus::Scheduled => write!(f, "scheduled"),
            GameStatus::Active => write!(f, "active"),
            GameStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Prize category a claim competes for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ClaimKind {
    /// One complete row
    Quine,
    /// Every number on the card
    Bingo,
}

impl fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimKind::Quine => write!(f, "quine"),
            ClaimKind::Bingo => write!(f, "bingo"),
        }
    }
}

/// What drove a game to `completed`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    Bingo,
    PoolExhausted,
    ForceStopped,
    /// Generator/state invariant violation during the draw loop
    Fault,
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionReason::Bingo => write!(f, "bingo"),
            CompletionReason::PoolExhausted => write!(f, "pool_exhausted"),
            CompletionReason::ForceStopped => write!(f, "force_stopped"),
            CompletionReason::Fault => write!(f, "fault"),
        }
    }
}

/// How simultaneous valid claims of one category are resolved
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakPolicy {
    /// Every claimant whose card completed by the winning call shares the prize
    #[default]
    SplitEvenly,
    /// Only the first validated claim wins
    FirstSubmitter,
}

/// One published number. Append-only, ordered by `sequence_index` (1-based).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Draw {
    pub game_id: GameId,
    pub sequence_index: u32,
    pub number: u8,
    /// Unix timestamp (milliseconds)
    pub timestamp: u64,
    /// Hex-encoded HMAC-SHA256 proof
    pub proof: String,
}

/// A player's request to be recorded as a winner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub game_id: GameId,
    pub card_id: CardId,
    pub user_id: UserId,
    pub kind: ClaimKind,
    pub submitted_at: u64,
}

/// A recorded winning claim
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WinnerRecord {
    pub user_id: UserId,
    pub card_id: CardId,
    pub call_count: u32,
    #[serde(default)]
    pub jackpot_eligible: bool,
}

/// Per-category amounts resolved when the game was allocated
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPrizes {
    pub quine: u64,
    pub bingo: u64,
    pub jackpot: u64,
    pub platform: u64,
}

/// Amount credited to one winner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Payout {
    pub user_id: UserId,
    pub card_id: CardId,
    pub kind: ClaimKind,
    pub amount: u64,
    /// Share of the jackpot included in `amount`
    pub jackpot_share: u64,
}

/// Settlement progress of a completed game
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SettlementStatus {
    #[default]
    Unsettled,
    Paid,
    NeedsReconciliation { reason: String },
}

/// Authoritative game record. Owned exclusively by the game's state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: GameId,
    pub status: GameStatus,
    /// Scheduled start (unix ms)
    pub scheduled_start: u64,
    pub started_at: Option<u64>,
    pub ended_at: Option<u64>,
    pub draws: Vec<Draw>,
    pub total_pool: u64,
    pub cards_sold: u32,
    pub prizes: CategoryPrizes,
    pub quine_winners: Vec<WinnerRecord>,
    pub quine_call_count: Option<u32>,
    pub bingo_winners: Vec<WinnerRecord>,
    pub bingo_call_count: Option<u32>,
    pub jackpot_won: bool,
    /// Hex SHA-256 of the draw seed, published before the game starts
    pub fairness_hash: String,
    pub completion: Option<CompletionReason>,
    pub settlement: SettlementStatus,
    pub payouts: Vec<Payout>,
}

impl Game {
    pub fn new(id: GameId, scheduled_start: u64, fairness_hash: String) -> Self {
        Self {
            id,
            status: GameStatus::Scheduled,
            scheduled_start,
            started_at: None,
            ended_at: None,
            draws: Vec::new(),
            total_pool: 0,
            cards_sold: 0,
            prizes: CategoryPrizes::default(),
            quine_winners: Vec::new(),
            quine_call_count: None,
            bingo_winners: Vec::new(),
            bingo_call_count: None,
            jackpot_won: false,
            fairness_hash,
            completion: None,
            settlement: SettlementStatus::Unsettled,
            payouts: Vec::new(),
        }
    }

    /// Sequence index at which `number` was drawn, if it was
    pub fn call_index_of(&self, number: u8) -> Option<u32> {
        self.draws
            .iter()
            .find(|d| d.number == number)
            .map(|d| d.sequence_index)
    }

    pub fn winners(&self, kind: ClaimKind) -> &[WinnerRecord] {
        match kind {
            ClaimKind::Quine => &self.quine_winners,
            ClaimKind::Bingo => &self.bingo_winners,
        }
    }

    pub fn winning_call_count(&self, kind: ClaimKind) -> Option<u32> {
        match kind {
            ClaimKind::Quine => self.quine_call_count,
            ClaimKind::Bingo => self.bingo_call_count,
        }
    }
}

/// Immutable view of a game handed to readers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    #[serde(flatten)]
    pub game: Game,
    /// True while the bingo co-winner window is open
    pub closing: bool,
    /// Hex seed, published once the game is completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revealed_seed: Option<String>,
}

impl GameSnapshot {
    pub fn status(&self) -> GameStatus {
        self.game.status
    }

    pub fn drawn_numbers(&self) -> Vec<u8> {
        self.game.draws.iter().map(|d| d.number).collect()
    }
}

/// Result of completing a game. Repeated completions return the first one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    pub game_id: GameId,
    pub reason: CompletionReason,
    pub ended_at: u64,
    pub quine_winners: Vec<WinnerRecord>,
    pub bingo_winners: Vec<WinnerRecord>,
    /// False when this call found the game already completed
    pub newly_completed: bool,
}

/// Verdict returned to a claimant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimVerdict {
    pub valid: bool,
    pub call_count: Option<u32>,
    pub jackpot_eligible: bool,
    /// Number of winners in the category after this claim
    pub co_winners: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ClaimVerdict {
    pub fn accepted(call_count: u32, jackpot_eligible: bool, co_winners: usize) -> Self {
        Self {
            valid: true,
            call_count: Some(call_count),
            jackpot_eligible,
            co_winners,
            reason: None,
            message: None,
        }
    }

    pub fn rejected(code: &str, message: String) -> Self {
        Self {
            valid: false,
            call_count: None,
            jackpot_eligible: false,
            co_winners: 0,
            reason: Some(code.to_string()),
            message: Some(message),
        }
    }
}

/// Events fanned out to everyone watching a game
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    NumberDrawn {
        game_id: GameId,
        number: u8,
        sequence_index: u32,
    },
    GameCompleted {
        game_id: GameId,
        reason: CompletionReason,
        quine_winners: Vec<WinnerRecord>,
        bingo_winners: Vec<WinnerRecord>,
        payouts: Vec<Payout>,
        prizes: CategoryPrizes,
        settlement: SettlementStatus,
    },
}

/// Receives game events. Implemented by the connection broadcaster.
pub trait GameEventSink: Send + Sync {
    fn publish(&self, game_id: GameId, event: GameEvent);
}

/// Sink that drops everything (headless runs and tests)
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl GameEventSink for NullSink {
    fn publish(&self, _game_id: GameId, _event: GameEvent) {}
}

/// Current unix time in milliseconds
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
