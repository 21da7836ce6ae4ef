//! Shared fixtures for pool scenarios

#![allow(dead_code)]

use mutual_common::{
    AccountId, ProductId, Timestamp, TokenId, TrancheId, ONE_NXM, TRANCHE_DURATION,
};
use mutual_staking::{
    AllocationRequest, DepositReceipt, DepositRequest, EngineConfig, PoolParams, ProductParams,
    StakingPool, StaticProtocolConfig,
};

/// Start of tranche 100, also the start of bucket 325
pub const T0: Timestamp = TRANCHE_DURATION * 100;
pub const FIRST_TRANCHE: TrancheId = TrancheId(100);
pub const LAST_TRANCHE: TrancheId = TrancheId(107);

pub const PRODUCT: ProductId = ProductId(1);
pub const OTHER_PRODUCT: ProductId = ProductId(2);

pub type Pool = StakingPool<StaticProtocolConfig>;

pub fn manager() -> AccountId {
    AccountId::new("manager")
}

pub fn cover() -> AccountId {
    AccountId::new("cover")
}

pub fn alice() -> AccountId {
    AccountId::new("alice")
}

pub fn bob() -> AccountId {
    AccountId::new("bob")
}

pub fn nxm(amount: u128) -> u128 {
    amount * ONE_NXM
}

/// Catalog with 25 products, all starting at 10% and unreduced
pub fn catalog() -> StaticProtocolConfig {
    (1..=25).fold(StaticProtocolConfig::new(10_000, 100), |config, id| {
        config.with_product(ProductId(id), 1_000, 0)
    })
}

pub fn pool_with(config: EngineConfig, pool_fee: u8) -> Pool {
    let params = PoolParams::new(manager(), cover(), pool_fee, 50);
    StakingPool::new(params, config, catalog(), T0).unwrap()
}

pub fn pool() -> Pool {
    pool_with(EngineConfig::default(), 0)
}

pub fn list_product(pool: &mut Pool, product_id: ProductId, weight: u32, price: u64, now: Timestamp) {
    let edit = ProductParams::new(product_id)
        .with_target_weight(weight)
        .with_target_price(price);
    pool.set_products(&manager(), &[edit], now).unwrap();
}

pub fn stake(
    pool: &mut Pool,
    who: &AccountId,
    tranche_id: TrancheId,
    amount: u128,
    now: Timestamp,
) -> DepositReceipt {
    pool.deposit(
        who,
        DepositRequest {
            amount,
            tranche_id,
            token_id: None,
        },
        now,
    )
    .unwrap()
}

/// Cover request at 1x global capacity with no reduction and no grace period
pub fn cover_request(product_id: ProductId, amount: u128, period: u64) -> AllocationRequest {
    AllocationRequest {
        product_id,
        amount,
        period,
        grace_period: 0,
        global_capacity_ratio: 10_000,
        capacity_reduction_ratio: 0,
    }
}

pub fn token(receipt: &DepositReceipt) -> TokenId {
    receipt.token_id
}
