//! # Mutual Staking
//!
//! Staking pool engine for a mutual cover protocol: members lock stake in
//! 91-day tranches, cover buyers draw capacity from that stake per product,
//! and rewards accrue to stakers through a single per-share index.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       StakingPool                        │
//! │        (timestamp check → draft → catch-up → commit)     │
//! ├─────────────┬──────────────┬──────────────┬──────────────┤
//! │  Tranche    │   Reward     │  Capacity    │  Product     │
//! │  Ledger     │ Accumulator  │  Allocator   │  Registry    │
//! ├─────────────┴──────────────┴──────────────┴──────────────┤
//! │                Expiry walk (bounded steps)               │
//! └──────────────────────────────────────────────────────────┘
//!                 │                          │
//!          PricingEngine              ProtocolConfig
//! ```
//!
//! ## Guarantees
//!
//! - Every entry point is atomic: a failed call changes neither state nor
//!   the event log
//! - Work per call is bounded by `EngineConfig::max_expiration_steps`
//! - Positions in expired tranches settle against the expiry snapshot
//! - Active allocations never exceed a product's capacity

pub mod allocator;
pub mod catalog;
pub mod config;
pub mod events;
pub mod expiry;
pub mod pool;
pub mod products;
pub mod rewards;
pub mod state;
pub mod tranche;
pub mod views;

pub use allocator::{Allocation, TrancheCapacity};
pub use catalog::{CatalogProduct, ProtocolConfig, StaticProtocolConfig};
pub use config::{EngineConfig, PoolParams};
pub use events::PoolEvent;
pub use expiry::ExpirationProgress;
pub use pool::{
    AllocationOutcome, AllocationRequest, BurnReceipt, DepositRequest, ExtendRequest,
    PartialRelease, StakingPool, WithdrawReceipt, WithdrawRequest,
};
pub use products::{ProductParams, StakedProduct};
pub use tranche::{DepositReceipt, ExpiredTrancheSnapshot, Tranche, TrancheWithdrawal};
pub use views::{DepositView, PoolSummary};
