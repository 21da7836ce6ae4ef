//! Capacity allocator
//!
//! Tracks, per product, the allocation units in use in each active tranche
//! and the units scheduled to expire in each 28-day bucket. Expiry is applied
//! lazily: a product's counters are brought up to date whenever the product
//! is touched, and read views subtract expired buckets on the fly.

use mutual_common::{
    AllocationId, AllocationUnits, BucketId, CapacityError, ProductId, Result, TrancheId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// One cover's reservation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub product_id: ProductId,
    /// Base units requested
    pub amount: u128,
    /// Units held in each tranche
    pub tranche_units: BTreeMap<TrancheId, AllocationUnits>,
    /// Bucket whose start releases this allocation
    pub expiry_bucket: BucketId,
    pub premium: u128,
    pub deallocated: bool,
}

impl Allocation {
    pub fn total_units(&self) -> u64 {
        self.tranche_units.values().map(AllocationUnits::get).sum()
    }

    /// Whether the allocation has been released by expiry or explicitly
    pub fn is_active(&self, first_active_bucket: BucketId) -> bool {
        !self.deallocated && self.expiry_bucket > first_active_bucket
    }
}

/// Usage counters of one product
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAllocations {
    /// Units in use per tranche
    active: BTreeMap<TrancheId, AllocationUnits>,
    /// Units released when the keyed bucket begins, per tranche
    expiring: BTreeMap<BucketId, BTreeMap<TrancheId, AllocationUnits>>,
}

impl ProductAllocations {
    /// Release every bucket that has begun and forget expired tranches
    pub fn expire_through(&mut self, first_active_bucket: BucketId, first_active_tranche: TrancheId) {
        let pending = self.expiring.split_off(&first_active_bucket.next());
        let released = std::mem::replace(&mut self.expiring, pending);

        for (bucket, per_tranche) in released {
            for (tranche_id, units) in per_tranche {
                if let Some(used) = self.active.get_mut(&tranche_id) {
                    *used = used.saturating_sub(units);
                }
            }
            debug!(bucket = %bucket, "Released expired allocations");
        }

        self.active = self.active.split_off(&first_active_tranche);
        self.active.retain(|_, units| !units.is_zero());
        for per_tranche in self.expiring.values_mut() {
            *per_tranche = per_tranche.split_off(&first_active_tranche);
        }
    }

    /// Units in use in `tranche_id` as of `first_active_bucket`
    ///
    /// Does not mutate; buckets that already began are subtracted here.
    pub fn used_in(&self, tranche_id: TrancheId, first_active_bucket: BucketId) -> AllocationUnits {
        let used = self.active.get(&tranche_id).copied().unwrap_or_default();
        self.expiring
            .range(..=first_active_bucket)
            .filter_map(|(_, per_tranche)| per_tranche.get(&tranche_id))
            .fold(used, |acc, units| acc.saturating_sub(*units))
    }

    fn add(&mut self, tranche_id: TrancheId, bucket: BucketId, units: AllocationUnits) -> Result<()> {
        let used = self.active.entry(tranche_id).or_default();
        *used = used.checked_add(units)?;
        let expiring = self.expiring.entry(bucket).or_default().entry(tranche_id).or_default();
        *expiring = expiring.checked_add(units)?;
        Ok(())
    }

    fn remove(&mut self, tranche_id: TrancheId, bucket: BucketId, units: AllocationUnits) {
        if let Some(used) = self.active.get_mut(&tranche_id) {
            *used = used.saturating_sub(units);
        }
        if let Some(expiring) = self
            .expiring
            .get_mut(&bucket)
            .and_then(|per_tranche| per_tranche.get_mut(&tranche_id))
        {
            *expiring = expiring.saturating_sub(units);
        }
    }
}

/// Capacity of one tranche for one product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrancheCapacity {
    pub tranche_id: TrancheId,
    pub capacity: AllocationUnits,
    pub used: AllocationUnits,
}

impl TrancheCapacity {
    pub fn free(&self) -> AllocationUnits {
        self.capacity.saturating_sub(self.used)
    }
}

/// A validated reservation not yet committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationPlan {
    pub units: AllocationUnits,
    pub tranche_units: BTreeMap<TrancheId, AllocationUnits>,
    /// Units in use across the usable tranches before this allocation
    pub used_before: u64,
    /// Capacity of the usable tranches
    pub total_capacity: u64,
}

impl AllocationPlan {
    /// Fill `tranches` in order until `units` are placed
    pub fn fill(units: AllocationUnits, tranches: &[TrancheCapacity]) -> Result<Self> {
        let used_before = tranches.iter().map(|t| t.used.get()).sum();
        let total_capacity = tranches.iter().map(|t| t.capacity.get()).sum();
        let available: u64 = tranches.iter().map(|t| t.free().get()).sum();

        if units.get() > available {
            return Err(CapacityError::InsufficientCapacity {
                requested: units.get(),
                available,
            }
            .into());
        }

        let mut remaining = units;
        let mut tranche_units = BTreeMap::new();
        for tranche in tranches {
            if remaining.is_zero() {
                break;
            }
            let take = remaining.min(tranche.free());
            if !take.is_zero() {
                tranche_units.insert(tranche.tranche_id, take);
                remaining = remaining.saturating_sub(take);
            }
        }

        Ok(Self {
            units,
            tranche_units,
            used_before,
            total_capacity,
        })
    }
}

/// All products' counters and the allocation records of a pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapacityAllocator {
    products: BTreeMap<ProductId, ProductAllocations>,
    allocations: BTreeMap<AllocationId, Allocation>,
    next_id: u64,
}

impl CapacityAllocator {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    pub fn allocation(&self, id: AllocationId) -> Option<&Allocation> {
        self.allocations.get(&id)
    }

    pub fn allocations(&self) -> impl Iterator<Item = &Allocation> {
        self.allocations.values()
    }

    /// Bring one product's counters up to date
    pub fn expire_product(
        &mut self,
        product_id: ProductId,
        first_active_bucket: BucketId,
        first_active_tranche: TrancheId,
    ) {
        if let Some(product) = self.products.get_mut(&product_id) {
            product.expire_through(first_active_bucket, first_active_tranche);
        }
    }

    pub fn used_in(
        &self,
        product_id: ProductId,
        tranche_id: TrancheId,
        first_active_bucket: BucketId,
    ) -> AllocationUnits {
        self.products
            .get(&product_id)
            .map(|product| product.used_in(tranche_id, first_active_bucket))
            .unwrap_or_default()
    }

    /// Units in use per tranche, one entry per tranche in `tranche_ids`
    pub fn active_allocations(
        &self,
        product_id: ProductId,
        tranche_ids: impl Iterator<Item = TrancheId>,
        first_active_bucket: BucketId,
    ) -> Vec<AllocationUnits> {
        tranche_ids
            .map(|tranche_id| self.used_in(product_id, tranche_id, first_active_bucket))
            .collect()
    }

    /// Record a planned reservation
    pub fn commit(
        &mut self,
        product_id: ProductId,
        amount: u128,
        plan: &AllocationPlan,
        expiry_bucket: BucketId,
        premium: u128,
    ) -> Result<AllocationId> {
        let product = self.products.entry(product_id).or_default();
        for (tranche_id, units) in &plan.tranche_units {
            product.add(*tranche_id, expiry_bucket, *units)?;
        }

        let id = AllocationId(self.next_id);
        self.next_id += 1;
        self.allocations.insert(
            id,
            Allocation {
                id,
                product_id,
                amount,
                tranche_units: plan.tranche_units.clone(),
                expiry_bucket,
                premium,
                deallocated: false,
            },
        );
        Ok(id)
    }

    /// Release an allocation before its natural expiry
    ///
    /// An allocation whose bucket has already begun is only marked; its
    /// units were released by expiry.
    pub fn deallocate(
        &mut self,
        id: AllocationId,
        first_active_bucket: BucketId,
        first_active_tranche: TrancheId,
    ) -> Result<Allocation> {
        let allocation = self
            .allocations
            .get_mut(&id)
            .ok_or(CapacityError::AllocationNotFound(id))?;
        if allocation.deallocated {
            return Err(CapacityError::AlreadyDeallocated(id).into());
        }

        let live = allocation.expiry_bucket > first_active_bucket;
        allocation.deallocated = true;
        let released = allocation.clone();

        if live {
            let product = self.products.entry(released.product_id).or_default();
            product.expire_through(first_active_bucket, first_active_tranche);
            for (tranche_id, units) in &released.tranche_units {
                product.remove(*tranche_id, released.expiry_bucket, *units);
            }
        }
        Ok(released)
    }

    /// Release part of an allocation, newest tranche first
    ///
    /// Rounds the released amount down. Returns the units released.
    pub fn release_partial(
        &mut self,
        id: AllocationId,
        amount: u128,
        first_active_bucket: BucketId,
        first_active_tranche: TrancheId,
    ) -> Result<AllocationUnits> {
        let allocation = self
            .allocations
            .get_mut(&id)
            .ok_or(CapacityError::AllocationNotFound(id))?;
        if allocation.deallocated {
            return Err(CapacityError::AlreadyDeallocated(id).into());
        }
        if allocation.expiry_bucket <= first_active_bucket {
            return Ok(AllocationUnits::ZERO);
        }

        let mut remaining = AllocationUnits::from_amount_floor(amount)?;
        let mut released = Vec::new();
        let mut total = AllocationUnits::ZERO;
        for (tranche_id, units) in allocation.tranche_units.iter_mut().rev() {
            if remaining.is_zero() {
                break;
            }
            let take = remaining.min(*units);
            *units = units.saturating_sub(take);
            remaining = remaining.saturating_sub(take);
            total = total.checked_add(take)?;
            released.push((*tranche_id, take));
        }
        allocation.tranche_units.retain(|_, units| !units.is_zero());
        // The reserved amount was rounded up to whole units
        allocation.amount = allocation.amount.saturating_sub(total.to_amount());
        let bucket = allocation.expiry_bucket;
        let product_id = allocation.product_id;

        let product = self.products.entry(product_id).or_default();
        product.expire_through(first_active_bucket, first_active_tranche);
        for (tranche_id, units) in released {
            product.remove(tranche_id, bucket, units);
        }
        Ok(total)
    }
}
