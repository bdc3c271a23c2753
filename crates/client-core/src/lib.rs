#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Shared configuration, persistence, and error types for the `crybb-bot` mention responder.

pub mod config;
pub mod counters;
pub mod errors;
pub mod ledger;

pub use config::{Cli, Config, Secret};
pub use counters::{Counters, CountersSnapshot};
pub use errors::{EngineError, LedgerError};
pub use ledger::ProcessedLedger;
