//! # Mutual Common
//!
//! Shared identifiers, fixed-width units, protocol constants and the error
//! taxonomy for the mutual staking engine.
//!
//! ## Core Types
//!
//! - [`TrancheId`] / [`BucketId`]: fixed-duration time buckets
//! - [`ProductId`], [`TokenId`], [`AllocationId`], [`AccountId`]: record identifiers
//! - [`AllocationUnits`]: quantized capacity counter (`u32`, checked)
//!
//! ## Errors
//!
//! - [`MutualError`]: unified error with one family per concern
//!   (capacity, configuration, timing, authorization, stake, pricing)

pub mod error;
pub mod math;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{
    AuthError, CapacityError, ConfigError, MutualError, PricingError, Result, StakeError,
    TimingError,
};
pub use types::{
    ids::{AccountId, AllocationId, BucketId, ProductId, Timestamp, TokenId, TrancheId},
    units::AllocationUnits,
};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Seconds in one day
pub const ONE_DAY: u64 = 24 * 60 * 60;

/// Seconds in a pricing year
pub const SECONDS_PER_YEAR: u64 = 365 * ONE_DAY;

/// Length of a stake tranche (91 days)
pub const TRANCHE_DURATION: u64 = 91 * ONE_DAY;

/// Length of a cover expiry bucket (28 days)
pub const BUCKET_DURATION: u64 = 28 * ONE_DAY;

/// Number of tranches accepting deposits at any time (current + next seven)
pub const MAX_ACTIVE_TRANCHES: u64 = 8;

/// One whole token in base units
pub const ONE_NXM: u128 = 1_000_000_000_000_000_000;

/// Base units represented by one allocation unit (0.01 token)
pub const NXM_PER_ALLOCATION_UNIT: u128 = 10_000_000_000_000_000;

/// Scaling factor of the rewards-per-share accumulator
pub const ACC_PRECISION: u128 = 1_000_000_000_000_000_000;

/// Weight denominator (100 = 100%)
pub const WEIGHT_DENOMINATOR: u32 = 100;

/// Cap on the sum of product weights in a pool (20x)
pub const MAX_TOTAL_WEIGHT: u32 = 20 * WEIGHT_DENOMINATOR;

/// Denominator of the global capacity ratio
pub const GLOBAL_CAPACITY_DENOMINATOR: u128 = 10_000;

/// Denominator of a product's capacity reduction ratio
pub const CAPACITY_REDUCTION_DENOMINATOR: u128 = 10_000;

/// Price denominator (prices are basis points; 10_000 = 100% per year)
pub const PRICE_DENOMINATOR: u64 = 10_000;

/// Pool fee denominator (fees are whole percents)
pub const POOL_FEE_DENOMINATOR: u8 = 100;

/// Reward-share bonus per tranche of lock beyond the current one (10%)
pub const REWARD_BONUS_PER_TRANCHE_RATIO: u128 = 1_000;

/// Denominator of the reward-share bonus
pub const REWARD_BONUS_PER_TRANCHE_DENOMINATOR: u128 = 10_000;

/// Token id of the pool manager's fee position
pub const MANAGER_TOKEN_ID: TokenId = TokenId(0);
