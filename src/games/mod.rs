pub mod actor;
pub mod card;
pub mod claims;
pub mod draw_engine;
pub mod prizes;
pub mod state_machine;
pub mod types;

pub use actor::{GameActor, GameHandle};
pub use card::{Card, CardGrid};
pub use claims::{ClaimResult, ClaimValidator};
pub use draw_engine::{DrawEngine, DrawSeed, DrawSequence, SeedCommitment};
pub use prizes::{Allocation, PrizeAllocator, PrizeSchedule};
pub use state_machine::GameStateMachine;
pub use types::*;
