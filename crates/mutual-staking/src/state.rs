//! Pool state
//!
//! Everything a pool owns lives in [`PoolState`]. Operations run against a
//! draft copy and replace the committed state only when they succeed.

use mutual_common::{
    AccountId, AllocationUnits, BucketId, ConfigError, ProductId, Result, Timestamp, TokenId,
    TrancheId, CAPACITY_REDUCTION_DENOMINATOR, GLOBAL_CAPACITY_DENOMINATOR,
    NXM_PER_ALLOCATION_UNIT, WEIGHT_DENOMINATOR,
};
use std::collections::BTreeMap;

use crate::allocator::{CapacityAllocator, TrancheCapacity};
use crate::catalog::ProtocolConfig;
use crate::config::PoolParams;
use crate::events::PoolEvent;
use crate::products::{effective_weight, ProductRegistry};
use crate::rewards::RewardAccumulator;
use crate::tranche::TrancheLedger;

/// Capacity of `stake` for one product, in allocation units
///
/// `floor(stake / unit) × gcr × (1 − crr) × weight`, rounded down. Clamped to
/// the width of the usage counters.
pub fn capacity_units(
    stake: u128,
    global_capacity_ratio: u32,
    capacity_reduction_ratio: u32,
    weight: u32,
) -> AllocationUnits {
    let stake_units = stake / NXM_PER_ALLOCATION_UNIT;
    let reduction = (capacity_reduction_ratio as u128).min(CAPACITY_REDUCTION_DENOMINATOR);
    let capacity = stake_units
        .saturating_mul(global_capacity_ratio as u128)
        .saturating_mul(CAPACITY_REDUCTION_DENOMINATOR - reduction)
        .saturating_mul(weight as u128)
        / (GLOBAL_CAPACITY_DENOMINATOR * CAPACITY_REDUCTION_DENOMINATOR * WEIGHT_DENOMINATOR as u128);
    AllocationUnits(u32::try_from(capacity).unwrap_or(u32::MAX))
}

/// Complete state of one staking pool
#[derive(Debug, Clone)]
pub struct PoolState {
    pub(crate) params: PoolParams,
    pub(crate) ledger: TrancheLedger,
    pub(crate) rewards: RewardAccumulator,
    pub(crate) products: ProductRegistry,
    pub(crate) allocator: CapacityAllocator,
    pub(crate) first_active_bucket: BucketId,
    pub(crate) token_owners: BTreeMap<TokenId, AccountId>,
    pub(crate) next_token_id: u64,
    pub(crate) last_timestamp: Timestamp,
    pub(crate) events: Vec<PoolEvent>,
}

impl PoolState {
    pub fn new(params: PoolParams, now: Timestamp) -> Self {
        Self {
            params,
            ledger: TrancheLedger::new(now),
            rewards: RewardAccumulator::new(now),
            products: ProductRegistry::new(),
            allocator: CapacityAllocator::new(),
            first_active_bucket: BucketId::containing(now),
            token_owners: BTreeMap::new(),
            next_token_id: 1,
            last_timestamp: now,
            events: Vec::new(),
        }
    }

    pub(crate) fn emit(&mut self, event: PoolEvent) {
        self.events.push(event);
    }

    /// Tranches and buckets whose end has passed but not been processed
    pub fn pending_expirations(&self, now: Timestamp) -> (u64, u64) {
        let tranches = TrancheId::containing(now)
            .0
            .saturating_sub(self.ledger.first_active_tranche().0);
        let buckets = BucketId::containing(now)
            .0
            .saturating_sub(self.first_active_bucket.0);
        (tranches, buckets)
    }

    /// Bring a product's counters up to the processed expiry point
    pub(crate) fn expire_product(&mut self, product_id: ProductId) {
        self.allocator.expire_product(
            product_id,
            self.first_active_bucket,
            self.ledger.first_active_tranche(),
        );
    }

    /// Capacity and usage of `tranche_ids` for one product at `weight`
    pub fn tranche_capacities(
        &self,
        product_id: ProductId,
        tranche_ids: impl Iterator<Item = TrancheId>,
        global_capacity_ratio: u32,
        capacity_reduction_ratio: u32,
        weight: u32,
    ) -> Result<Vec<TrancheCapacity>> {
        tranche_ids
            .map(|tranche_id| {
                let stake = self.ledger.tranche_stake(tranche_id)?;
                Ok(TrancheCapacity {
                    tranche_id,
                    capacity: capacity_units(
                        stake,
                        global_capacity_ratio,
                        capacity_reduction_ratio,
                        weight,
                    ),
                    used: self
                        .allocator
                        .used_in(product_id, tranche_id, self.first_active_bucket),
                })
            })
            .collect()
    }

    /// Effective weight of a product from its usage of full-weight capacity
    pub fn effective_weight_of(
        &self,
        product_id: ProductId,
        target_weight: u32,
        protocol: &dyn ProtocolConfig,
    ) -> Result<u32> {
        let catalog = protocol
            .product(product_id)
            .ok_or(ConfigError::ProductNotFound(product_id))?;
        let capacities = self.tranche_capacities(
            product_id,
            self.ledger.active_tranches(),
            protocol.global_capacity_ratio(),
            catalog.capacity_reduction_ratio,
            WEIGHT_DENOMINATOR,
        )?;
        let used: u64 = capacities.iter().map(|t| t.used.get()).sum();
        let full: u64 = capacities.iter().map(|t| t.capacity.get()).sum();
        Ok(effective_weight(target_weight, used, full))
    }

    /// Next position id
    pub(crate) fn mint_token(&mut self, owner: AccountId) -> TokenId {
        let token_id = TokenId(self.next_token_id);
        self.next_token_id += 1;
        self.token_owners.insert(token_id, owner);
        token_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mutual_common::{ONE_NXM, TRANCHE_DURATION};

    #[test]
    fn test_capacity_units() {
        // 100 tokens at 2x capacity, no reduction, full weight
        assert_eq!(capacity_units(100 * ONE_NXM, 20_000, 0, 100), AllocationUnits(20_000));
        // Half weight, 10% reduction
        assert_eq!(capacity_units(100 * ONE_NXM, 20_000, 1_000, 50), AllocationUnits(9_000));
        // Sub-unit stake has no capacity
        assert_eq!(capacity_units(NXM_PER_ALLOCATION_UNIT - 1, 20_000, 0, 100), AllocationUnits::ZERO);
    }

    #[test]
    fn test_pending_expirations() {
        let params = PoolParams::new(AccountId::new("m"), AccountId::new("a"), 0, 20);
        let state = PoolState::new(params, TRANCHE_DURATION * 4);
        assert_eq!(state.pending_expirations(TRANCHE_DURATION * 4 + 1), (0, 0));

        let (tranches, buckets) = state.pending_expirations(TRANCHE_DURATION * 6);
        assert_eq!(tranches, 2);
        assert_eq!(buckets, BucketId::containing(TRANCHE_DURATION * 6).0 - BucketId::containing(TRANCHE_DURATION * 4).0);
    }
}
