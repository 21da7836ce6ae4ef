//! Staking pool facade
//!
//! [`StakingPool`] is the single owning handle over a [`PoolState`]. Every
//! mutating entry point:
//!
//! 1. rejects timestamps older than the last processed one
//! 2. clones the state into a draft
//! 3. catches up expirations within the configured step budget, failing with
//!    `ExpirationBacklog` if the pool is still behind
//! 4. runs the operation on the draft and commits it only on success
//!
//! A failed call therefore leaves both state and event log untouched.

use mutual_common::{
    AccountId, AllocationId, AllocationUnits, AuthError, BucketId, CapacityError, ConfigError,
    PricingError, ProductId, Result, StakeError, Timestamp, TimingError, TokenId, TrancheId,
    MutualError, MANAGER_TOKEN_ID,
};
use mutual_pricing::{PriceInputs, PriceQuote, PricingEngine};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::allocator::AllocationPlan;
use crate::catalog::ProtocolConfig;
use crate::config::{EngineConfig, PoolParams};
use crate::events::PoolEvent;
use crate::expiry::{self, ExpirationProgress};
use crate::products::ProductParams;
use crate::state::PoolState;
use crate::tranche::{DepositReceipt, TrancheWithdrawal};

/// Stake a new or existing position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRequest {
    pub amount: u128,
    pub tranche_id: TrancheId,
    /// Existing position to add to; a new one is minted when absent
    #[serde(default)]
    pub token_id: Option<TokenId>,
}

/// Move a position to a later tranche
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendRequest {
    pub token_id: TokenId,
    pub from_tranche: TrancheId,
    pub to_tranche: TrancheId,
    #[serde(default)]
    pub top_up: u128,
}

/// Withdraw stake and/or rewards from some of a position's tranches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub token_id: TokenId,
    pub tranche_ids: Vec<TrancheId>,
    pub withdraw_stake: bool,
    pub withdraw_rewards: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawReceipt {
    pub stake: u128,
    pub rewards: u128,
    pub tranches: Vec<TrancheWithdrawal>,
}

/// Capacity request from the cover collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub product_id: ProductId,
    /// Cover amount in base units
    pub amount: u128,
    /// Cover period in seconds
    pub period: u64,
    /// Claim window after the period in seconds
    pub grace_period: u64,
    pub global_capacity_ratio: u32,
    pub capacity_reduction_ratio: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationOutcome {
    pub allocation_id: AllocationId,
    pub premium: u128,
    pub units: AllocationUnits,
    pub expiry_bucket: BucketId,
    pub quote: PriceQuote,
}

/// Part of an allocation released together with a stake burn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialRelease {
    pub allocation_id: AllocationId,
    pub amount: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnReceipt {
    pub burned: u128,
    pub released_units: AllocationUnits,
}

/// Collaborators available to an operation
pub(crate) struct Context<'a, C> {
    pub(crate) engine: &'a PricingEngine,
    pub(crate) protocol: &'a C,
}

/// A staking pool
pub struct StakingPool<C> {
    pub(crate) state: PoolState,
    pub(crate) engine: PricingEngine,
    pub(crate) config: EngineConfig,
    pub(crate) protocol: C,
}

impl<C: ProtocolConfig> StakingPool<C> {
    /// Create an empty pool at `now`
    pub fn new(params: PoolParams, config: EngineConfig, protocol: C, now: Timestamp) -> Result<Self> {
        params.validate()?;
        config.validate()?;
        info!(manager = %params.manager, pool_fee = params.pool_fee, "Staking pool created");

        Ok(Self {
            state: PoolState::new(params, now),
            engine: PricingEngine::new(config.pricing),
            config,
            protocol,
        })
    }

    pub fn protocol(&self) -> &C {
        &self.protocol
    }

    fn check_timestamp(&self, now: Timestamp) -> Result<()> {
        if now < self.state.last_timestamp {
            return Err(TimingError::StaleTimestamp {
                now,
                last: self.state.last_timestamp,
            }
            .into());
        }
        Ok(())
    }

    /// Run `op` atomically against a caught-up draft of the state
    fn transact<T, F>(&mut self, now: Timestamp, op: F) -> Result<T>
    where
        F: FnOnce(&mut PoolState, &Context<'_, C>) -> Result<T>,
    {
        self.check_timestamp(now)?;
        let mut draft = self.state.clone();

        let progress =
            expiry::process_expirations(&mut draft, now, self.config.max_expiration_steps, true)?;
        if !progress.caught_up {
            let (pending_tranches, pending_buckets) = draft.pending_expirations(now);
            return Err(TimingError::ExpirationBacklog {
                pending_tranches,
                pending_buckets,
            }
            .into());
        }

        let ctx = Context {
            engine: &self.engine,
            protocol: &self.protocol,
        };
        let output = op(&mut draft, &ctx)?;

        draft.last_timestamp = now;
        self.state = draft;
        Ok(output)
    }

    /// Process pending tranche and bucket expirations
    ///
    /// Commits partial progress; call again while `caught_up` is false.
    #[instrument(skip(self))]
    pub fn process_expirations(&mut self, now: Timestamp, force: bool) -> Result<ExpirationProgress> {
        self.check_timestamp(now)?;
        let mut draft = self.state.clone();
        let progress =
            expiry::process_expirations(&mut draft, now, self.config.max_expiration_steps, force)?;
        draft.last_timestamp = now;
        self.state = draft;

        if progress.steps() > 0 {
            info!(
                tranches = progress.tranches_expired,
                buckets = progress.buckets_expired,
                caught_up = progress.caught_up,
                "Processed expirations"
            );
        }
        Ok(progress)
    }

    /// Stake into a tranche
    #[instrument(skip(self))]
    pub fn deposit(
        &mut self,
        caller: &AccountId,
        request: DepositRequest,
        now: Timestamp,
    ) -> Result<DepositReceipt> {
        let receipt = self.transact(now, |state, _| {
            if request.amount == 0 {
                return Err(StakeError::InvalidAmount.into());
            }
            state.ledger.check_depositable(request.tranche_id, now)?;

            let token_id = match request.token_id {
                Some(MANAGER_TOKEN_ID) => return Err(StakeError::ManagerCannotStake.into()),
                Some(token_id) => {
                    require_owner(state, caller, token_id)?;
                    token_id
                }
                None => state.mint_token(caller.clone()),
            };

            let receipt = state.ledger.deposit_to(
                &mut state.rewards,
                token_id,
                request.tranche_id,
                request.amount,
                state.params.pool_fee,
            )?;

            state.emit(PoolEvent::StakeDeposited {
                token_id,
                owner: caller.clone(),
                tranche_id: request.tranche_id,
                amount: request.amount,
                stake_shares: receipt.stake_shares,
                rewards_shares: receipt.rewards_shares,
                fee_shares: receipt.fee_shares,
            });
            Ok(receipt)
        })?;

        info!(
            token = %receipt.token_id,
            tranche = %receipt.tranche_id,
            amount = request.amount,
            stake_shares = receipt.stake_shares,
            "Stake deposited"
        );
        Ok(receipt)
    }

    /// Move a position to a later tranche, optionally adding stake
    #[instrument(skip(self))]
    pub fn extend_deposit(
        &mut self,
        caller: &AccountId,
        request: ExtendRequest,
        now: Timestamp,
    ) -> Result<DepositReceipt> {
        let receipt = self.transact(now, |state, _| {
            if request.token_id == MANAGER_TOKEN_ID {
                return Err(StakeError::ManagerCannotStake.into());
            }
            require_owner(state, caller, request.token_id)?;

            let receipt = state.ledger.extend(
                &mut state.rewards,
                request.token_id,
                request.from_tranche,
                request.to_tranche,
                request.top_up,
                state.params.pool_fee,
                now,
            )?;

            state.emit(PoolEvent::DepositExtended {
                token_id: request.token_id,
                from_tranche: request.from_tranche,
                to_tranche: request.to_tranche,
                top_up: request.top_up,
                stake_shares: receipt.stake_shares,
                rewards_shares: receipt.rewards_shares,
            });
            Ok(receipt)
        })?;

        info!(
            token = %request.token_id,
            from = %request.from_tranche,
            to = %request.to_tranche,
            "Deposit extended"
        );
        Ok(receipt)
    }

    /// Withdraw stake from expired tranches and/or accrued rewards
    #[instrument(skip(self))]
    pub fn withdraw(
        &mut self,
        caller: &AccountId,
        request: WithdrawRequest,
        now: Timestamp,
    ) -> Result<WithdrawReceipt> {
        let receipt = self.transact(now, |state, _| {
            if request.token_id == MANAGER_TOKEN_ID {
                require_manager(state, caller)?;
            } else {
                require_owner(state, caller, request.token_id)?;
            }

            let mut receipt = WithdrawReceipt::default();
            for tranche_id in &request.tranche_ids {
                let withdrawal = state.ledger.withdraw(
                    &state.rewards,
                    request.token_id,
                    *tranche_id,
                    request.withdraw_stake,
                    request.withdraw_rewards,
                )?;
                receipt.stake = receipt
                    .stake
                    .checked_add(withdrawal.stake)
                    .ok_or(MutualError::Arithmetic("withdrawn stake"))?;
                receipt.rewards = receipt
                    .rewards
                    .checked_add(withdrawal.rewards)
                    .ok_or(MutualError::Arithmetic("withdrawn rewards"))?;

                state.emit(PoolEvent::Withdrawn {
                    token_id: request.token_id,
                    tranche_id: *tranche_id,
                    stake: withdrawal.stake,
                    rewards: withdrawal.rewards,
                });
                receipt.tranches.push(withdrawal);
            }
            Ok(receipt)
        })?;

        info!(
            token = %request.token_id,
            stake = receipt.stake,
            rewards = receipt.rewards,
            "Withdrawn"
        );
        Ok(receipt)
    }

    /// Reserve capacity for a cover and price it
    #[instrument(skip(self))]
    pub fn allocate(
        &mut self,
        caller: &AccountId,
        request: AllocationRequest,
        now: Timestamp,
    ) -> Result<AllocationOutcome> {
        let outcome = self.transact(now, |state, ctx| {
            require_allocator(state, caller)?;
            if request.amount == 0 {
                return Err(PricingError::ZeroAmount.into());
            }

            let product = *state
                .products
                .get(request.product_id)
                .ok_or(ConfigError::ProductNotInPool(request.product_id))?;
            let catalog = ctx
                .protocol
                .product(request.product_id)
                .ok_or(ConfigError::ProductNotFound(request.product_id))?;

            state.expire_product(request.product_id);
            let units = AllocationUnits::from_amount_ceil(request.amount)?;

            let cover_end = now
                .checked_add(request.period)
                .ok_or(MutualError::Arithmetic("cover end"))?;
            let grace_end = cover_end
                .checked_add(request.grace_period)
                .ok_or(MutualError::Arithmetic("grace period end"))?;
            let first_usable = TrancheId::containing(grace_end);
            let last_active = state.ledger.last_active_tranche();
            if first_usable > last_active {
                return Err(CapacityError::NoUsableTranches.into());
            }

            let capacities = state.tranche_capacities(
                request.product_id,
                (first_usable.0..=last_active.0).map(TrancheId),
                request.global_capacity_ratio,
                request.capacity_reduction_ratio,
                product.target_weight,
            )?;
            let plan = AllocationPlan::fill(units, &capacities)?;

            let quote = ctx.engine.quote(&PriceInputs {
                amount: units.get() as u128,
                active_cover: plan.used_before as u128,
                capacity: plan.total_capacity as u128,
                initial_price: catalog.initial_price_ratio,
                last_base_price: Some(product.bumped_price),
                last_update: product.bumped_price_update_time,
                target_price: product.target_price,
                now,
            })?;
            let premium = ctx
                .engine
                .premium(quote.actual_price, request.amount, request.period)?;

            let expiry_bucket = BucketId::expiring_at(cover_end);
            let allocation_id = state.allocator.commit(
                request.product_id,
                request.amount,
                &plan,
                expiry_bucket,
                premium,
            )?;

            if let Some(stored) = state.products.get_mut(request.product_id) {
                stored.bumped_price = quote.new_base_price;
                stored.bumped_price_update_time = now;
            }

            state.emit(PoolEvent::CoverAllocated {
                allocation_id,
                product_id: request.product_id,
                amount: request.amount,
                units,
                expiry_bucket,
                premium,
                actual_price: quote.actual_price,
                new_base_price: quote.new_base_price,
            });

            Ok(AllocationOutcome {
                allocation_id,
                premium,
                units,
                expiry_bucket,
                quote,
            })
        })?;

        info!(
            allocation = %outcome.allocation_id,
            product = %request.product_id,
            units = %outcome.units,
            premium = outcome.premium,
            price = outcome.quote.actual_price,
            "Cover allocated"
        );
        Ok(outcome)
    }

    /// Release a cover's capacity before its expiry
    #[instrument(skip(self))]
    pub fn deallocate(
        &mut self,
        caller: &AccountId,
        allocation_id: AllocationId,
        now: Timestamp,
    ) -> Result<AllocationUnits> {
        let units = self.transact(now, |state, _| {
            require_allocator(state, caller)?;

            let first_active_bucket = state.first_active_bucket;
            let allocation = state.allocator.deallocate(
                allocation_id,
                first_active_bucket,
                state.ledger.first_active_tranche(),
            )?;
            let units = if allocation.expiry_bucket > first_active_bucket {
                AllocationUnits::try_from_wide(allocation.total_units())?
            } else {
                AllocationUnits::ZERO
            };

            state.emit(PoolEvent::CoverDeallocated {
                allocation_id,
                product_id: allocation.product_id,
                units,
            });
            Ok(units)
        })?;

        info!(allocation = %allocation_id, units = %units, "Cover deallocated");
        Ok(units)
    }

    /// Burn stake for a claim payout
    #[instrument(skip(self))]
    pub fn burn_stake(
        &mut self,
        caller: &AccountId,
        amount: u128,
        release: Option<PartialRelease>,
        now: Timestamp,
    ) -> Result<BurnReceipt> {
        let receipt = self.transact(now, |state, _| {
            require_allocator(state, caller)?;

            let burned = state.ledger.burn(amount);
            let released_units = match release {
                Some(release) => state.allocator.release_partial(
                    release.allocation_id,
                    release.amount,
                    state.first_active_bucket,
                    state.ledger.first_active_tranche(),
                )?,
                None => AllocationUnits::ZERO,
            };

            state.emit(PoolEvent::StakeBurned {
                amount,
                burned,
                released_units,
            });
            Ok(BurnReceipt {
                burned,
                released_units,
            })
        })?;

        info!(
            burned = receipt.burned,
            released = %receipt.released_units,
            "Stake burned"
        );
        Ok(receipt)
    }

    /// Distribute rewards to current reward shares immediately
    ///
    /// Returns `false` if no reward shares existed to receive them.
    #[instrument(skip(self))]
    pub fn mint_rewards(&mut self, caller: &AccountId, amount: u128, now: Timestamp) -> Result<bool> {
        let distributed = self.transact(now, |state, _| {
            require_allocator(state, caller)?;
            if amount == 0 {
                return Err(StakeError::InvalidAmount.into());
            }
            let distributed = state.rewards.mint(amount)?;
            state.emit(PoolEvent::RewardsMinted {
                amount,
                distributed,
            });
            Ok(distributed)
        })?;

        if !distributed {
            warn!(amount, "Minted rewards were not distributed");
        }
        Ok(distributed)
    }

    /// Stream rewards until `expiry_bucket` begins
    ///
    /// Returns the exact amount the stream will pay out, which the value
    /// collaborator should mint.
    #[instrument(skip(self))]
    pub fn stream_rewards(
        &mut self,
        caller: &AccountId,
        amount: u128,
        expiry_bucket: BucketId,
        now: Timestamp,
    ) -> Result<u128> {
        let minted = self.transact(now, |state, _| {
            require_allocator(state, caller)?;
            let (reward_per_second, minted) = state.rewards.stream(amount, expiry_bucket, now)?;
            state.emit(PoolEvent::RewardsStreamed {
                amount: minted,
                reward_per_second,
                expiry_bucket,
            });
            Ok(minted)
        })?;

        info!(minted, bucket = %expiry_bucket, "Rewards streamed");
        Ok(minted)
    }

    /// Add or edit products
    #[instrument(skip(self))]
    pub fn set_products(
        &mut self,
        caller: &AccountId,
        params: &[ProductParams],
        now: Timestamp,
    ) -> Result<()> {
        let touched = self.transact(now, |state, ctx| {
            require_manager(state, caller)?;
            for edit in params {
                state.expire_product(edit.product_id);
            }

            let protocol: &dyn ProtocolConfig = ctx.protocol;
            let mut registry = std::mem::take(&mut state.products);
            let touched = registry.apply(params, now, protocol, |product_id, target| {
                state.effective_weight_of(product_id, target, protocol)
            })?;
            state.products = registry;

            emit_product_updates(state, &touched);
            Ok(touched)
        })?;

        info!(products = touched.len(), "Products updated");
        Ok(())
    }

    /// Refresh effective weights from current utilization
    ///
    /// Open to any caller; never fails on the weight caps.
    #[instrument(skip(self))]
    pub fn recalculate_effective_weights(
        &mut self,
        product_ids: &[ProductId],
        now: Timestamp,
    ) -> Result<()> {
        self.transact(now, |state, ctx| {
            for product_id in product_ids {
                state.expire_product(*product_id);
            }

            let protocol: &dyn ProtocolConfig = ctx.protocol;
            let mut registry = std::mem::take(&mut state.products);
            registry.recalculate(product_ids, |product_id, target| {
                state.effective_weight_of(product_id, target, protocol)
            })?;
            state.products = registry;

            emit_product_updates(state, product_ids);
            Ok(())
        })
    }

    /// Change the manager fee
    ///
    /// Settles the manager's positions and rescales their reward shares by
    /// `new_fee / old_fee`.
    #[instrument(skip(self))]
    pub fn set_pool_fee(&mut self, caller: &AccountId, new_fee: u8, now: Timestamp) -> Result<()> {
        let old_fee = self.transact(now, |state, _| {
            require_manager(state, caller)?;
            if new_fee > state.params.max_pool_fee {
                return Err(ConfigError::PoolFeeExceedsMax {
                    fee: new_fee,
                    max: state.params.max_pool_fee,
                }
                .into());
            }

            let old_fee = state.params.pool_fee;
            state
                .ledger
                .rescale_manager_shares(&mut state.rewards, old_fee, new_fee)?;
            state.params.pool_fee = new_fee;

            state.emit(PoolEvent::PoolFeeChanged {
                manager: caller.clone(),
                old_fee,
                new_fee,
            });
            Ok(old_fee)
        })?;

        info!(old_fee, new_fee, "Pool fee changed");
        Ok(())
    }

    /// Take the committed events emitted since the last drain
    pub fn drain_events(&mut self) -> Vec<PoolEvent> {
        std::mem::take(&mut self.state.events)
    }
}

fn require_manager(state: &PoolState, caller: &AccountId) -> Result<()> {
    if *caller != state.params.manager {
        return Err(AuthError::NotPoolManager.into());
    }
    Ok(())
}

fn require_allocator(state: &PoolState, caller: &AccountId) -> Result<()> {
    if *caller != state.params.allocator {
        return Err(AuthError::NotAllocator.into());
    }
    Ok(())
}

fn require_owner(state: &PoolState, caller: &AccountId, token_id: TokenId) -> Result<()> {
    let owner = state
        .token_owners
        .get(&token_id)
        .ok_or(StakeError::UnknownToken(token_id))?;
    if owner != caller {
        return Err(AuthError::NotTokenOwner(token_id).into());
    }
    Ok(())
}

fn emit_product_updates(state: &mut PoolState, product_ids: &[ProductId]) {
    let updates: Vec<PoolEvent> = product_ids
        .iter()
        .filter_map(|product_id| {
            state.products.get(*product_id).map(|product| PoolEvent::ProductUpdated {
                product_id: *product_id,
                target_weight: product.target_weight,
                effective_weight: product.last_effective_weight,
                target_price: product.target_price,
            })
        })
        .collect();
    state.events.extend(updates);
}
