//! Error types for the mutual staking engine
//!
//! Provides a unified error type and one variant family per failure concern.
//! Every failure aborts the whole operation; none is recovered locally.

use thiserror::Error;

use crate::types::ids::{AllocationId, BucketId, ProductId, Timestamp, TokenId, TrancheId};

/// Result type alias using MutualError
pub type Result<T> = std::result::Result<T, MutualError>;

/// Unified error type for engine operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MutualError {
    // Capacity errors
    #[error("Capacity error: {0}")]
    Capacity(#[from] CapacityError),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // Timing errors
    #[error("Timing error: {0}")]
    Timing(#[from] TimingError),

    // Authorization errors
    #[error("Authorization error: {0}")]
    Auth(#[from] AuthError),

    // Stake and deposit errors
    #[error("Stake error: {0}")]
    Stake(#[from] StakeError),

    // Pricing errors
    #[error("Pricing error: {0}")]
    Pricing(#[from] PricingError),

    // Checked ledger math overflowed
    #[error("Arithmetic overflow in {0}")]
    Arithmetic(&'static str),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Capacity reservation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapacityError {
    #[error("Insufficient capacity: requested {requested} units, available {available}")]
    InsufficientCapacity { requested: u64, available: u64 },

    #[error("Allocation {0} was already deallocated")]
    AlreadyDeallocated(AllocationId),

    #[error("Allocation {0} not found")]
    AllocationNotFound(AllocationId),

    #[error("Amount {amount} overflows the allocation unit counter")]
    AllocationOverflow { amount: u128 },

    #[error("No active tranche outlives the requested cover period")]
    NoUsableTranches,
}

/// Product and pool configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Target weight {weight} exceeds the weight denominator")]
    TargetWeightTooHigh { weight: u32 },

    #[error("Target price {price} exceeds the price denominator")]
    TargetPriceTooHigh { price: u64 },

    #[error("Target price {price} is below the global minimum {minimum}")]
    TargetPriceBelowMin { price: u64, minimum: u64 },

    #[error("A target price must be set when adding product {0}")]
    MustSetPriceForNewProducts(ProductId),

    #[error("A target weight must be set when adding product {0}")]
    MustSetWeightForNewProducts(ProductId),

    #[error("Product {0} does not exist")]
    ProductNotFound(ProductId),

    #[error("Product {0} is not listed in this pool")]
    ProductNotInPool(ProductId),

    #[error("Total effective weight {total} exceeds the maximum {max}")]
    TotalEffectiveWeightExceeded { total: u32, max: u32 },

    #[error("Total target weight {total} exceeds the maximum {max}")]
    TotalTargetWeightExceeded { total: u32, max: u32 },

    #[error("Pool fee {fee} exceeds the maximum pool fee {max}")]
    PoolFeeExceedsMax { fee: u8, max: u8 },

    #[error("Maximum pool fee {0} must be below the fee denominator")]
    MaxPoolFeeTooHigh(u8),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}

/// Tranche and expiry timing errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimingError {
    #[error("Tranche {0} has already expired")]
    TrancheExpired(TrancheId),

    #[error("Tranche {0} is not yet open for deposits")]
    TrancheNotYetActive(TrancheId),

    #[error("Stake in tranche {0} is locked until the tranche ends")]
    StakeLocked(TrancheId),

    #[error("Expirations pending: {pending_tranches} tranches, {pending_buckets} buckets")]
    ExpirationBacklog {
        pending_tranches: u64,
        pending_buckets: u64,
    },

    #[error("Timestamp {now} precedes the last processed time {last}")]
    StaleTimestamp { now: Timestamp, last: Timestamp },

    #[error("Tranche {to} must be later than tranche {from}")]
    InvalidTrancheOrder { from: TrancheId, to: TrancheId },

    #[error("Expiry {0} does not start after the current time")]
    InvalidExpiryBucket(BucketId),
}

/// Caller authorization errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Caller is not the pool manager")]
    NotPoolManager,

    #[error("Caller is not the designated allocator")]
    NotAllocator,

    #[error("Caller does not own {0}")]
    NotTokenOwner(TokenId),
}

/// Deposit and withdrawal errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StakeError {
    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Deposit of {amount} mints zero stake shares")]
    InsufficientDepositAmount { amount: u128 },

    #[error("Token {0} was never minted by this pool")]
    UnknownToken(TokenId),

    #[error("Token {token} has no deposit in tranche {tranche}")]
    DepositNotFound { token: TokenId, tranche: TrancheId },

    #[error("Active stake is zero while stake shares are outstanding")]
    PoolStakeDepleted,

    #[error("The manager fee position cannot hold stake")]
    ManagerCannotStake,
}

/// Pricing calculation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PricingError {
    #[error("Requested amount must be positive")]
    ZeroAmount,

    #[error("Total capacity is zero")]
    ZeroCapacity,

    #[error("Pricing calculation overflow")]
    Overflow,
}

impl From<serde_json::Error> for MutualError {
    fn from(err: serde_json::Error) -> Self {
        MutualError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for MutualError {
    fn from(err: anyhow::Error) -> Self {
        MutualError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MutualError::Capacity(CapacityError::InsufficientCapacity {
            requested: 120,
            available: 80,
        });
        assert!(err.to_string().contains("requested 120 units"));
    }

    #[test]
    fn test_errors_compare_by_condition() {
        let first: MutualError = CapacityError::AlreadyDeallocated(AllocationId(7)).into();
        let second: MutualError = CapacityError::AlreadyDeallocated(AllocationId(7)).into();
        assert_eq!(first, second);
        assert_ne!(
            first,
            MutualError::from(CapacityError::AllocationNotFound(AllocationId(7)))
        );
    }

    #[test]
    fn test_backlog_error() {
        let err = TimingError::ExpirationBacklog {
            pending_tranches: 2,
            pending_buckets: 7,
        };
        assert!(err.to_string().contains("2 tranches, 7 buckets"));
    }
}
