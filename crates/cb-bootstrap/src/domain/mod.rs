//! Pure bootstrap domain logic: round-scoped state and quorum aggregation.
//! No I/O, no async, no clocks; everything here is driven by the
//! application layer.

pub mod aggregator;
pub mod entities;
pub mod errors;

pub use aggregator::{HeaderAggregator, ObserveOutcome};
pub use entities::{BranchClaim, Frontier, PendingHeaders, PendingOperations, SyncPhase};
pub use errors::BootstrapError;
