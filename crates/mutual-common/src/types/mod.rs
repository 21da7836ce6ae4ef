//! Core data types for the mutual staking engine

pub mod ids;
pub mod units;
