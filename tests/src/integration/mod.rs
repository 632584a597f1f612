//! Cross-crate integration tests.

pub mod protocol_flows;
pub mod sync_scenarios;
