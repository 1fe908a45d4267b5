//! 存储后端

mod memory;
mod postgres;
mod traits;

pub use memory::MemoryStore;
pub use postgres::{PgLedgerRepository, PgRuleRepository};
pub use traits::{AppendOutcome, LedgerRepository, RuleRepository, WindowSummary};

#[cfg(test)]
pub use traits::{MockLedgerRepository, MockRuleRepository};
