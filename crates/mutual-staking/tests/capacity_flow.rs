//! Allocation, pricing and product weight scenarios

mod common;

use common::*;
use mutual_common::{
    AllocationUnits, AuthError, BucketId, CapacityError, ConfigError, MutualError, PricingError,
    ProductId, ONE_DAY,
};
use mutual_pricing::PricingCurve;
use mutual_staking::{EngineConfig, PartialRelease, PoolEvent, ProductParams};
use proptest::prelude::*;

const YEAR: u64 = 365 * ONE_DAY;

/// Pool with 100 NXM in the last active tranche and the product listed
fn funded_pool(config: EngineConfig) -> Pool {
    let mut pool = pool_with(config, 0);
    stake(&mut pool, &alice(), LAST_TRANCHE, nxm(100), T0);
    list_product(&mut pool, PRODUCT, 100, 150, T0);
    pool
}

#[test]
fn test_allocation_prices_and_bumps() {
    let mut pool = funded_pool(EngineConfig::default());

    let first = pool
        .allocate(&cover(), cover_request(PRODUCT, nxm(10), YEAR), T0)
        .unwrap();
    assert_eq!(first.units, AllocationUnits(1_000));
    assert_eq!(first.quote.base_price, 1_000);
    assert_eq!(first.quote.actual_price, 1_000);
    assert_eq!(first.quote.new_base_price, 1_200);
    assert_eq!(first.premium, nxm(1));
    assert_eq!(pool.product(PRODUCT).unwrap().bumped_price, 1_200);

    // One day of decay toward the target
    let second = pool
        .allocate(&cover(), cover_request(PRODUCT, nxm(10), YEAR), T0 + ONE_DAY)
        .unwrap();
    assert_eq!(second.quote.base_price, 1_150);
    assert_eq!(second.quote.actual_price, 1_150);
    assert_eq!(second.premium, 1_150_000_000_000_000_000);
    assert_eq!(pool.active_allocations(PRODUCT)[7], AllocationUnits(2_000));
}

#[test]
fn test_surge_loading_above_threshold() {
    let curve = PricingCurve::default().with_price_bump(0, 1_000);
    let mut pool = funded_pool(EngineConfig {
        pricing: curve,
        ..EngineConfig::default()
    });

    let filled = pool
        .allocate(&cover(), cover_request(PRODUCT, nxm(80), YEAR), T0)
        .unwrap();
    assert_eq!(filled.quote.actual_price, 1_000);
    assert_eq!(pool.product(PRODUCT).unwrap().bumped_price, 1_000);

    let surged = pool
        .allocate(&cover(), cover_request(PRODUCT, nxm(10), YEAR), T0 + ONE_DAY)
        .unwrap();
    assert_eq!(surged.quote.base_price, 950);
    assert_eq!(surged.quote.actual_price, 997);
    assert_eq!(surged.quote.surge_loading(), 47);
}

#[test]
fn test_bumped_price_never_falls_without_time() {
    let mut pool = funded_pool(EngineConfig::default());
    let mut last = pool.product(PRODUCT).unwrap().bumped_price;

    for _ in 0..9 {
        pool.allocate(&cover(), cover_request(PRODUCT, nxm(10), YEAR), T0 + 5)
            .unwrap();
        let bumped = pool.product(PRODUCT).unwrap().bumped_price;
        assert!(bumped > last);
        last = bumped;
    }
    assert_eq!(last, 1_000 + 9 * 200);
}

#[test]
fn test_allocation_rejections() {
    let mut pool = funded_pool(EngineConfig::default());

    assert_eq!(
        pool.allocate(&alice(), cover_request(PRODUCT, nxm(1), YEAR), T0),
        Err(AuthError::NotAllocator.into())
    );
    assert_eq!(
        pool.allocate(&cover(), cover_request(PRODUCT, 0, YEAR), T0),
        Err(PricingError::ZeroAmount.into())
    );
    assert_eq!(
        pool.allocate(&cover(), cover_request(OTHER_PRODUCT, nxm(1), YEAR), T0),
        Err(ConfigError::ProductNotInPool(OTHER_PRODUCT).into())
    );
    // Three years outlasts every active tranche
    assert_eq!(
        pool.allocate(&cover(), cover_request(PRODUCT, nxm(1), 3 * YEAR), T0),
        Err(CapacityError::NoUsableTranches.into())
    );
    assert_eq!(
        pool.allocate(&cover(), cover_request(PRODUCT, nxm(101), YEAR), T0),
        Err(CapacityError::InsufficientCapacity {
            requested: 10_100,
            available: 10_000
        }
        .into())
    );
    assert_eq!(pool.active_allocations(PRODUCT)[7], AllocationUnits::ZERO);
}

#[test]
fn test_empty_pool_has_no_capacity() {
    let mut pool = pool();
    list_product(&mut pool, PRODUCT, 100, 150, T0);
    let result = pool.allocate(&cover(), cover_request(PRODUCT, nxm(1), YEAR), T0);
    assert!(matches!(
        result,
        Err(MutualError::Capacity(CapacityError::InsufficientCapacity { available: 0, .. }))
    ));
}

#[test]
fn test_deallocate_releases_once() {
    let mut pool = funded_pool(EngineConfig::default());
    let outcome = pool
        .allocate(&cover(), cover_request(PRODUCT, nxm(10), YEAR), T0)
        .unwrap();

    let released = pool.deallocate(&cover(), outcome.allocation_id, T0 + 10).unwrap();
    assert_eq!(released, AllocationUnits(1_000));
    assert_eq!(pool.active_allocations(PRODUCT)[7], AllocationUnits::ZERO);
    assert!(!pool.is_allocation_active(outcome.allocation_id));

    assert_eq!(
        pool.deallocate(&cover(), outcome.allocation_id, T0 + 20),
        Err(CapacityError::AlreadyDeallocated(outcome.allocation_id).into())
    );

    // Capacity is not credited twice
    let capacities = pool.tranche_capacities(PRODUCT, 10_000, 0).unwrap();
    assert_eq!(capacities[7].free(), AllocationUnits(10_000));
}

#[test]
fn test_cover_expires_with_its_bucket() {
    let mut pool = funded_pool(EngineConfig::default());
    let outcome = pool
        .allocate(&cover(), cover_request(PRODUCT, nxm(10), 30 * ONE_DAY), T0)
        .unwrap();
    assert_eq!(outcome.expiry_bucket, BucketId(327));

    pool.process_expirations(T0 + 55 * ONE_DAY, true).unwrap();
    assert!(pool.is_allocation_active(outcome.allocation_id));
    assert_eq!(pool.active_allocations(PRODUCT)[7], AllocationUnits(1_000));

    pool.process_expirations(T0 + 56 * ONE_DAY, true).unwrap();
    assert!(!pool.is_allocation_active(outcome.allocation_id));
    assert_eq!(pool.active_allocations(PRODUCT)[7], AllocationUnits::ZERO);

    let late = pool
        .deallocate(&cover(), outcome.allocation_id, T0 + 57 * ONE_DAY)
        .unwrap();
    assert_eq!(late, AllocationUnits::ZERO);
    assert_eq!(
        pool.deallocate(&cover(), outcome.allocation_id, T0 + 58 * ONE_DAY),
        Err(CapacityError::AlreadyDeallocated(outcome.allocation_id).into())
    );
}

#[test]
fn test_burn_with_partial_release() {
    let mut pool = funded_pool(EngineConfig::default());
    let outcome = pool
        .allocate(&cover(), cover_request(PRODUCT, nxm(50), YEAR), T0)
        .unwrap();
    pool.drain_events();

    let release = PartialRelease {
        allocation_id: outcome.allocation_id,
        amount: nxm(20) + 1,
    };
    let receipt = pool.burn_stake(&cover(), nxm(40), Some(release), T0 + 1).unwrap();

    assert_eq!(receipt.burned, nxm(40));
    assert_eq!(receipt.released_units, AllocationUnits(2_000));
    assert_eq!(pool.summary().active_stake, nxm(60));
    assert_eq!(pool.active_allocations(PRODUCT)[7], AllocationUnits(3_000));
    let allocation = pool.allocation(outcome.allocation_id).unwrap();
    assert_eq!(allocation.total_units(), 3_000);
    assert_eq!(allocation.amount, nxm(30));

    let events = pool.drain_events();
    assert!(matches!(
        events.as_slice(),
        [PoolEvent::StakeBurned { burned, .. }] if *burned == nxm(40)
    ));
}

#[test]
fn test_cover_period_overflow_rejected() {
    let mut pool = funded_pool(EngineConfig::default());
    pool.drain_events();
    let before = pool.summary();

    assert_eq!(
        pool.allocate(&cover(), cover_request(PRODUCT, nxm(1), u64::MAX - 10), T0),
        Err(MutualError::Arithmetic("cover end"))
    );

    let mut with_grace = cover_request(PRODUCT, nxm(1), YEAR);
    with_grace.grace_period = u64::MAX - YEAR;
    assert_eq!(
        pool.allocate(&cover(), with_grace, T0),
        Err(MutualError::Arithmetic("grace period end"))
    );

    assert_eq!(pool.summary(), before);
    assert_eq!(pool.active_allocations(PRODUCT)[7], AllocationUnits::ZERO);
    assert!(pool.drain_events().is_empty());
}

#[test]
fn test_burn_requires_allocator() {
    let mut pool = funded_pool(EngineConfig::default());
    assert_eq!(
        pool.burn_stake(&manager(), nxm(1), None, T0),
        Err(AuthError::NotAllocator.into())
    );
}

#[test]
fn test_recalculated_weight_tracks_usage() {
    let mut pool = funded_pool(EngineConfig::default());
    pool.allocate(&cover(), cover_request(PRODUCT, nxm(75), YEAR), T0)
        .unwrap();
    pool.burn_stake(&cover(), nxm(50), None, T0 + 1).unwrap();

    // Anyone may refresh
    pool.recalculate_effective_weights(&[PRODUCT], T0 + 2).unwrap();
    let product = pool.product(PRODUCT).unwrap();
    assert_eq!(product.target_weight, 100);
    assert_eq!(product.last_effective_weight, 150);
    assert_eq!(pool.summary().total_effective_weight, 150);

    assert_eq!(
        pool.recalculate_effective_weights(&[OTHER_PRODUCT], T0 + 3),
        Err(ConfigError::ProductNotInPool(OTHER_PRODUCT).into())
    );
}

#[test]
fn test_total_weight_capped() {
    let mut pool = pool();
    let twenty: Vec<ProductParams> = (1..=20)
        .map(|id| {
            ProductParams::new(ProductId(id))
                .with_target_weight(100)
                .with_target_price(200)
        })
        .collect();
    pool.set_products(&manager(), &twenty, T0).unwrap();
    assert_eq!(pool.summary().total_target_weight, 2_000);
    assert_eq!(pool.product_ids().len(), 20);

    let one_more = ProductParams::new(ProductId(21))
        .with_target_weight(100)
        .with_target_price(200);
    assert_eq!(
        pool.set_products(&manager(), &[one_more], T0),
        Err(ConfigError::TotalEffectiveWeightExceeded {
            total: 2_100,
            max: 2_000
        }
        .into())
    );
    assert!(pool.product(ProductId(21)).is_none());
}

#[test]
fn test_product_edits_are_validated() {
    let mut pool = pool();
    assert_eq!(
        pool.set_products(&alice(), &[ProductParams::new(PRODUCT).with_target_weight(10)], T0),
        Err(AuthError::NotPoolManager.into())
    );
    assert_eq!(
        pool.set_products(&manager(), &[ProductParams::new(PRODUCT).with_target_weight(10)], T0),
        Err(ConfigError::MustSetPriceForNewProducts(PRODUCT).into())
    );
    assert_eq!(
        pool.set_products(
            &manager(),
            &[ProductParams::new(ProductId(99))
                .with_target_weight(10)
                .with_target_price(200)],
            T0
        ),
        Err(ConfigError::ProductNotFound(ProductId(99)).into())
    );

    list_product(&mut pool, PRODUCT, 40, 300, T0);
    let events = pool.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        PoolEvent::ProductUpdated {
            product_id,
            target_weight: 40,
            effective_weight: 40,
            target_price: 300,
        } if *product_id == PRODUCT
    )));
}

#[test]
fn test_utilization_view() {
    let mut pool = funded_pool(EngineConfig::default());
    pool.allocate(&cover(), cover_request(PRODUCT, nxm(25), YEAR), T0)
        .unwrap();
    let utilization = pool.utilization(PRODUCT, 10_000, 0).unwrap();
    assert_eq!(utilization, rust_decimal_macros::dec!(0.25));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_allocations_never_exceed_capacity(
        requests in prop::collection::vec((1u128..40, 0usize..3), 1..12),
    ) {
        let mut pool = pool();
        stake(&mut pool, &alice(), FIRST_TRANCHE.offset(5), nxm(60), T0);
        stake(&mut pool, &bob(), LAST_TRANCHE, nxm(40), T0);
        list_product(&mut pool, PRODUCT, 100, 150, T0);

        let periods = [30 * ONE_DAY, 91 * ONE_DAY, YEAR];
        for (i, (tokens, period)) in requests.into_iter().enumerate() {
            let now = T0 + i as u64;
            match pool.allocate(&cover(), cover_request(PRODUCT, nxm(tokens), periods[period]), now) {
                Ok(outcome) => prop_assert_eq!(outcome.units, AllocationUnits((tokens * 100) as u32)),
                Err(MutualError::Capacity(CapacityError::InsufficientCapacity { .. })) => {}
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }

            for tranche in pool.tranche_capacities(PRODUCT, 10_000, 0).unwrap() {
                prop_assert!(tranche.used <= tranche.capacity);
            }
        }
    }
}
