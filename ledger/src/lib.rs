pub mod error;
pub mod game_ledger;
pub mod price;
pub mod repository;
pub mod store;
pub mod types;

pub use error::{LedgerError, LedgerResult, PriceError, RepositoryError};
pub use game_ledger::GameLedger;
pub use price::{CoinPriceProvider, StaticPriceProvider};
pub use repository::{JsonFileRepository, LedgerRepository, MemoryRepository};
pub use store::{GameStore, UserGameStore};
