//! Events emitted by committed pool operations
//!
//! Each event carries the identifiers and amounts an external indexer needs
//! to rebuild pool state without re-running the pricing math.

use mutual_common::{
    AccountId, AllocationId, AllocationUnits, BucketId, ProductId, Timestamp, TokenId, TrancheId,
};
use serde::{Deserialize, Serialize};

/// A committed state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PoolEvent {
    StakeDeposited {
        token_id: TokenId,
        owner: AccountId,
        tranche_id: TrancheId,
        amount: u128,
        stake_shares: u128,
        rewards_shares: u128,
        fee_shares: u128,
    },
    DepositExtended {
        token_id: TokenId,
        from_tranche: TrancheId,
        to_tranche: TrancheId,
        top_up: u128,
        stake_shares: u128,
        rewards_shares: u128,
    },
    Withdrawn {
        token_id: TokenId,
        tranche_id: TrancheId,
        stake: u128,
        rewards: u128,
    },
    CoverAllocated {
        allocation_id: AllocationId,
        product_id: ProductId,
        amount: u128,
        units: AllocationUnits,
        expiry_bucket: BucketId,
        premium: u128,
        actual_price: u64,
        new_base_price: u64,
    },
    CoverDeallocated {
        allocation_id: AllocationId,
        product_id: ProductId,
        units: AllocationUnits,
    },
    ProductUpdated {
        product_id: ProductId,
        target_weight: u32,
        effective_weight: u32,
        target_price: u64,
    },
    PoolFeeChanged {
        manager: AccountId,
        old_fee: u8,
        new_fee: u8,
    },
    TrancheExpired {
        tranche_id: TrancheId,
        acc_per_share_at_expiry: u128,
        stake_amount_at_expiry: u128,
        stake_shares_supply_at_expiry: u128,
    },
    BucketExpired {
        bucket_id: BucketId,
        at: Timestamp,
    },
    StakeBurned {
        amount: u128,
        burned: u128,
        released_units: AllocationUnits,
    },
    RewardsMinted {
        amount: u128,
        distributed: bool,
    },
    RewardsStreamed {
        amount: u128,
        reward_per_second: u128,
        expiry_bucket: BucketId,
    },
}

impl PoolEvent {
    /// Short name of the event kind
    pub fn kind(&self) -> &'static str {
        match self {
            PoolEvent::StakeDeposited { .. } => "StakeDeposited",
            PoolEvent::DepositExtended { .. } => "DepositExtended",
            PoolEvent::Withdrawn { .. } => "Withdrawn",
            PoolEvent::CoverAllocated { .. } => "CoverAllocated",
            PoolEvent::CoverDeallocated { .. } => "CoverDeallocated",
            PoolEvent::ProductUpdated { .. } => "ProductUpdated",
            PoolEvent::PoolFeeChanged { .. } => "PoolFeeChanged",
            PoolEvent::TrancheExpired { .. } => "TrancheExpired",
            PoolEvent::BucketExpired { .. } => "BucketExpired",
            PoolEvent::StakeBurned { .. } => "StakeBurned",
            PoolEvent::RewardsMinted { .. } => "RewardsMinted",
            PoolEvent::RewardsStreamed { .. } => "RewardsStreamed",
        }
    }
}
