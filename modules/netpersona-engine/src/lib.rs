pub mod audit;
pub mod constraints;
pub mod context;
pub mod error;
pub mod ghostwriter;
pub mod judge;
pub mod ledger;
pub mod orchestrator;
pub mod persona;
pub mod profile;
pub mod ranking;
pub mod stats;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

#[cfg(test)]
mod chain_tests;
