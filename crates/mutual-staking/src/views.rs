//! Read-only views over a pool

use mutual_common::{
    AllocationId, AllocationUnits, BucketId, ConfigError, ProductId, Result, Timestamp, TokenId,
    TrancheId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::allocator::{Allocation, TrancheCapacity};
use crate::catalog::ProtocolConfig;
use crate::config::{EngineConfig, PoolParams};
use crate::pool::StakingPool;
use crate::products::StakedProduct;
use crate::tranche::{ExpiredTrancheSnapshot, Tranche};

/// Pool-wide aggregates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSummary {
    pub active_stake: u128,
    pub stake_shares_supply: u128,
    pub rewards_shares_supply: u128,
    pub acc_per_share: u128,
    pub last_acc_update: Timestamp,
    pub reward_per_second: u128,
    pub total_rewards_minted: u128,
    pub undistributed_rewards: u128,
    pub first_active_tranche: TrancheId,
    pub first_active_bucket: BucketId,
    pub pool_fee: u8,
    pub total_target_weight: u32,
    pub total_effective_weight: u32,
}

/// A position in one tranche with rewards settled up to the last update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositView {
    pub token_id: TokenId,
    pub tranche_id: TrancheId,
    pub stake_shares: u128,
    pub rewards_shares: u128,
    pub pending_rewards: u128,
    pub expired: bool,
}

impl<C: ProtocolConfig> StakingPool<C> {
    pub fn summary(&self) -> PoolSummary {
        let state = &self.state;
        PoolSummary {
            active_stake: state.ledger.active_stake(),
            stake_shares_supply: state.ledger.stake_shares_supply(),
            rewards_shares_supply: state.rewards.rewards_shares_supply(),
            acc_per_share: state.rewards.acc_per_share(),
            last_acc_update: state.rewards.last_update(),
            reward_per_second: state.rewards.reward_per_second(),
            total_rewards_minted: state.rewards.total_minted(),
            undistributed_rewards: state.rewards.undistributed(),
            first_active_tranche: state.ledger.first_active_tranche(),
            first_active_bucket: state.first_active_bucket,
            pool_fee: state.params.pool_fee,
            total_target_weight: state.products.total_target_weight(),
            total_effective_weight: state.products.total_effective_weight(),
        }
    }

    pub fn params(&self) -> &PoolParams {
        &self.state.params
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn last_timestamp(&self) -> Timestamp {
        self.state.last_timestamp
    }

    pub fn tranche(&self, tranche_id: TrancheId) -> Tranche {
        self.state.ledger.tranche(tranche_id)
    }

    pub fn expired_tranche(&self, tranche_id: TrancheId) -> Option<&ExpiredTrancheSnapshot> {
        self.state.ledger.expired_snapshot(tranche_id)
    }

    /// A position with its pending rewards brought up to date
    pub fn position(&self, token_id: TokenId, tranche_id: TrancheId) -> Option<DepositView> {
        let ledger = &self.state.ledger;
        let mut deposit = *ledger.deposit(token_id, tranche_id)?;
        let index = ledger
            .settlement_index(tranche_id, self.state.rewards.acc_per_share())
            .ok()?;
        deposit.settle(index).ok()?;

        Some(DepositView {
            token_id,
            tranche_id,
            stake_shares: deposit.stake_shares,
            rewards_shares: deposit.rewards_shares,
            pending_rewards: deposit.pending_rewards,
            expired: ledger.is_expired(tranche_id),
        })
    }

    /// All positions of a token
    pub fn positions_of(&self, token_id: TokenId) -> Vec<DepositView> {
        self.state
            .ledger
            .deposits_of(token_id)
            .filter_map(|(tranche_id, _)| self.position(token_id, tranche_id))
            .collect()
    }

    pub fn product(&self, product_id: ProductId) -> Option<&StakedProduct> {
        self.state.products.get(product_id)
    }

    pub fn product_ids(&self) -> Vec<ProductId> {
        self.state.products.ids().collect()
    }

    /// Units in use in each active tranche, oldest first
    pub fn active_allocations(&self, product_id: ProductId) -> Vec<AllocationUnits> {
        self.state.allocator.active_allocations(
            product_id,
            self.state.ledger.active_tranches(),
            self.state.first_active_bucket,
        )
    }

    /// Capacity of each active tranche at the product's target weight
    pub fn tranche_capacities(
        &self,
        product_id: ProductId,
        global_capacity_ratio: u32,
        capacity_reduction_ratio: u32,
    ) -> Result<Vec<TrancheCapacity>> {
        let product = self
            .state
            .products
            .get(product_id)
            .ok_or(ConfigError::ProductNotInPool(product_id))?;
        self.state.tranche_capacities(
            product_id,
            self.state.ledger.active_tranches(),
            global_capacity_ratio,
            capacity_reduction_ratio,
            product.target_weight,
        )
    }

    /// Share of the product's capacity in use, as a fraction
    pub fn utilization(
        &self,
        product_id: ProductId,
        global_capacity_ratio: u32,
        capacity_reduction_ratio: u32,
    ) -> Result<Decimal> {
        let capacities =
            self.tranche_capacities(product_id, global_capacity_ratio, capacity_reduction_ratio)?;
        let used: u64 = capacities.iter().map(|t| t.used.get()).sum();
        let total: u64 = capacities.iter().map(|t| t.capacity.get()).sum();
        if total == 0 {
            return Ok(Decimal::ZERO);
        }
        Ok(Decimal::from(used) / Decimal::from(total))
    }

    pub fn allocation(&self, allocation_id: AllocationId) -> Option<&Allocation> {
        self.state.allocator.allocation(allocation_id)
    }

    /// Whether an allocation still holds capacity
    pub fn is_allocation_active(&self, allocation_id: AllocationId) -> bool {
        self.allocation(allocation_id)
            .map(|allocation| allocation.is_active(self.state.first_active_bucket))
            .unwrap_or(false)
    }

    /// Tranches and buckets that `now` would expire
    pub fn pending_expirations(&self, now: Timestamp) -> (u64, u64) {
        self.state.pending_expirations(now)
    }
}
