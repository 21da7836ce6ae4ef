//! Tranche ledger
//!
//! Stake is deposited into 91-day tranches and stays locked until the
//! tranche ends. Each tranche tracks the stake shares and reward shares
//! minted into it; positions are keyed by `(token, tranche)`.
//!
//! When a tranche ends the ledger writes an [`ExpiredTrancheSnapshot`] and
//! removes the tranche's stake and shares from the live aggregates. Positions
//! in an expired tranche settle against the snapshot, never the live index.

use mutual_common::{
    math::mul_div, MutualError, Result, StakeError, Timestamp, TimingError, TokenId, TrancheId,
    MANAGER_TOKEN_ID, MAX_ACTIVE_TRANCHES, POOL_FEE_DENOMINATOR, REWARD_BONUS_PER_TRANCHE_DENOMINATOR,
    REWARD_BONUS_PER_TRANCHE_RATIO,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::rewards::{earned, RewardAccumulator};

/// Aggregate shares minted into one tranche
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tranche {
    pub stake_shares: u128,
    pub rewards_shares: u128,
}

/// State of a tranche captured the first time its end was processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiredTrancheSnapshot {
    pub acc_per_share_at_expiry: u128,
    pub stake_amount_at_expiry: u128,
    pub stake_shares_supply_at_expiry: u128,
}

/// A position's stake and reward claim in one tranche
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub stake_shares: u128,
    pub rewards_shares: u128,
    pub last_acc_per_share: u128,
    pub pending_rewards: u128,
}

impl Deposit {
    /// Fold rewards earned up to `index` into `pending_rewards`
    pub fn settle(&mut self, index: u128) -> Result<()> {
        let owed = earned(self.rewards_shares, self.last_acc_per_share, index)?;
        self.pending_rewards = self
            .pending_rewards
            .checked_add(owed)
            .ok_or(MutualError::Arithmetic("pending rewards"))?;
        self.last_acc_per_share = self.last_acc_per_share.max(index);
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.stake_shares == 0 && self.pending_rewards == 0
    }
}

/// Shares minted by one deposit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositReceipt {
    pub token_id: TokenId,
    pub tranche_id: TrancheId,
    pub stake_shares: u128,
    pub rewards_shares: u128,
    pub fee_shares: u128,
}

/// Amounts released from one tranche position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrancheWithdrawal {
    pub tranche_id: TrancheId,
    pub stake: u128,
    pub rewards: u128,
}

/// Stake, share and position bookkeeping for all tranches of a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrancheLedger {
    active_stake: u128,
    stake_shares_supply: u128,
    first_active_tranche: TrancheId,
    tranches: BTreeMap<TrancheId, Tranche>,
    expired: BTreeMap<TrancheId, ExpiredTrancheSnapshot>,
    deposits: BTreeMap<(TokenId, TrancheId), Deposit>,
}

impl TrancheLedger {
    pub fn new(now: Timestamp) -> Self {
        Self {
            active_stake: 0,
            stake_shares_supply: 0,
            first_active_tranche: TrancheId::containing(now),
            tranches: BTreeMap::new(),
            expired: BTreeMap::new(),
            deposits: BTreeMap::new(),
        }
    }

    pub fn active_stake(&self) -> u128 {
        self.active_stake
    }

    pub fn stake_shares_supply(&self) -> u128 {
        self.stake_shares_supply
    }

    pub fn first_active_tranche(&self) -> TrancheId {
        self.first_active_tranche
    }

    /// Last tranche currently accepting deposits
    pub fn last_active_tranche(&self) -> TrancheId {
        self.first_active_tranche.offset(MAX_ACTIVE_TRANCHES - 1)
    }

    /// Active tranche ids, oldest first
    pub fn active_tranches(&self) -> impl Iterator<Item = TrancheId> {
        let first = self.first_active_tranche.0;
        (first..first + MAX_ACTIVE_TRANCHES).map(TrancheId)
    }

    pub fn tranche(&self, tranche_id: TrancheId) -> Tranche {
        self.tranches.get(&tranche_id).copied().unwrap_or_default()
    }

    pub fn expired_snapshot(&self, tranche_id: TrancheId) -> Option<&ExpiredTrancheSnapshot> {
        self.expired.get(&tranche_id)
    }

    pub fn deposit(&self, token_id: TokenId, tranche_id: TrancheId) -> Option<&Deposit> {
        self.deposits.get(&(token_id, tranche_id))
    }

    /// All positions of one token, oldest tranche first
    pub fn deposits_of(&self, token_id: TokenId) -> impl Iterator<Item = (TrancheId, &Deposit)> {
        self.deposits
            .range((token_id, TrancheId(0))..=(token_id, TrancheId(u64::MAX)))
            .map(|((_, tranche_id), deposit)| (*tranche_id, deposit))
    }

    pub fn is_expired(&self, tranche_id: TrancheId) -> bool {
        tranche_id < self.first_active_tranche
    }

    /// Current value of the stake held by a tranche
    pub fn tranche_stake(&self, tranche_id: TrancheId) -> Result<u128> {
        if self.stake_shares_supply == 0 {
            return Ok(0);
        }
        mul_div(
            self.active_stake,
            self.tranche(tranche_id).stake_shares,
            self.stake_shares_supply,
            "tranche stake",
        )
    }

    /// Index a position in `tranche_id` settles against
    pub fn settlement_index(&self, tranche_id: TrancheId, live_index: u128) -> Result<u128> {
        if !self.is_expired(tranche_id) {
            return Ok(live_index);
        }
        self.expired
            .get(&tranche_id)
            .map(|snapshot| snapshot.acc_per_share_at_expiry)
            .ok_or_else(|| MutualError::Internal(format!("no expiry snapshot for {tranche_id}")))
    }

    /// Reject tranches that have ended or are beyond the deposit window
    pub fn check_depositable(&self, tranche_id: TrancheId, now: Timestamp) -> Result<()> {
        if self.is_expired(tranche_id) || tranche_id.has_ended(now) {
            return Err(TimingError::TrancheExpired(tranche_id).into());
        }
        if tranche_id > self.last_active_tranche() {
            return Err(TimingError::TrancheNotYetActive(tranche_id).into());
        }
        Ok(())
    }

    /// Stake shares minted for `amount` at the current share price
    pub fn issue_stake_shares(&self, amount: u128) -> Result<u128> {
        if self.stake_shares_supply == 0 {
            return Ok(amount);
        }
        if self.active_stake == 0 {
            return Err(StakeError::PoolStakeDepleted.into());
        }
        let shares = mul_div(amount, self.stake_shares_supply, self.active_stake, "stake shares")?;
        if shares == 0 {
            return Err(StakeError::InsufficientDepositAmount { amount }.into());
        }
        Ok(shares)
    }

    /// Reward shares for `stake_shares` locked until the end of `tranche_id`
    ///
    /// Each tranche beyond the first active one adds a 10% bonus.
    pub fn rewards_shares_for(&self, stake_shares: u128, tranche_id: TrancheId) -> Result<u128> {
        let lock = tranche_id.0.saturating_sub(self.first_active_tranche.0) as u128;
        let multiplier =
            REWARD_BONUS_PER_TRANCHE_DENOMINATOR + REWARD_BONUS_PER_TRANCHE_RATIO * lock;
        mul_div(
            stake_shares,
            multiplier,
            REWARD_BONUS_PER_TRANCHE_DENOMINATOR,
            "rewards shares",
        )
    }

    /// Manager fee shares accompanying `rewards_shares`
    pub fn fee_shares(rewards_shares: u128, pool_fee: u8) -> Result<u128> {
        if pool_fee == 0 {
            return Ok(0);
        }
        mul_div(
            rewards_shares,
            pool_fee as u128,
            (POOL_FEE_DENOMINATOR - pool_fee) as u128,
            "fee shares",
        )
    }

    /// Mint stake into `tranche_id` for `token_id`
    ///
    /// The caller has already validated the tranche and the amount.
    pub fn deposit_to(
        &mut self,
        rewards: &mut RewardAccumulator,
        token_id: TokenId,
        tranche_id: TrancheId,
        amount: u128,
        pool_fee: u8,
    ) -> Result<DepositReceipt> {
        if token_id == MANAGER_TOKEN_ID {
            return Err(StakeError::ManagerCannotStake.into());
        }
        if amount == 0 {
            return Err(StakeError::InvalidAmount.into());
        }

        let stake_shares = self.issue_stake_shares(amount)?;
        let rewards_shares = self.rewards_shares_for(stake_shares, tranche_id)?;
        let fee_shares = Self::fee_shares(rewards_shares, pool_fee)?;
        let minted_rewards_shares = add(rewards_shares, fee_shares, "rewards shares")?;

        let index = rewards.acc_per_share();
        self.credit(token_id, tranche_id, index, stake_shares, rewards_shares)?;
        if fee_shares > 0 {
            self.credit(MANAGER_TOKEN_ID, tranche_id, index, 0, fee_shares)?;
        }

        let tranche = self.tranches.entry(tranche_id).or_default();
        tranche.stake_shares = add(tranche.stake_shares, stake_shares, "tranche stake shares")?;
        tranche.rewards_shares = add(tranche.rewards_shares, minted_rewards_shares, "tranche rewards shares")?;

        self.active_stake = add(self.active_stake, amount, "active stake")?;
        self.stake_shares_supply = add(self.stake_shares_supply, stake_shares, "stake shares supply")?;
        rewards.add_shares(minted_rewards_shares)?;

        debug!(token = %token_id, tranche = %tranche_id, stake_shares, rewards_shares, fee_shares, "Deposit minted");

        Ok(DepositReceipt {
            token_id,
            tranche_id,
            stake_shares,
            rewards_shares,
            fee_shares,
        })
    }

    /// Move an active position to a later tranche, optionally adding stake
    pub fn extend(
        &mut self,
        rewards: &mut RewardAccumulator,
        token_id: TokenId,
        from: TrancheId,
        to: TrancheId,
        top_up: u128,
        pool_fee: u8,
        now: Timestamp,
    ) -> Result<DepositReceipt> {
        if token_id == MANAGER_TOKEN_ID {
            return Err(StakeError::ManagerCannotStake.into());
        }
        if to <= from {
            return Err(TimingError::InvalidTrancheOrder { from, to }.into());
        }
        if self.is_expired(from) || from.has_ended(now) {
            return Err(TimingError::TrancheExpired(from).into());
        }
        self.check_depositable(to, now)?;

        let index = rewards.acc_per_share();
        let mut previous = self
            .deposits
            .remove(&(token_id, from))
            .ok_or(StakeError::DepositNotFound {
                token: token_id,
                tranche: from,
            })?;
        previous.settle(index)?;

        // Release the old lock and its accompanying fee shares
        let old_fee_shares = Self::fee_shares(previous.rewards_shares, pool_fee)?;
        let released_fee = self.debit_manager(from, index, old_fee_shares)?;
        let source = self.tranches.entry(from).or_default();
        source.stake_shares -= previous.stake_shares;
        source.rewards_shares -= previous.rewards_shares + released_fee;
        rewards.remove_shares(previous.rewards_shares + released_fee)?;

        let top_up_shares = if top_up > 0 {
            self.issue_stake_shares(top_up)?
        } else {
            0
        };
        let stake_shares = add(previous.stake_shares, top_up_shares, "stake shares")?;
        let rewards_shares = self.rewards_shares_for(stake_shares, to)?;
        let fee_shares = Self::fee_shares(rewards_shares, pool_fee)?;
        let minted_rewards_shares = add(rewards_shares, fee_shares, "rewards shares")?;

        self.credit(token_id, to, index, stake_shares, rewards_shares)?;
        if let Some(moved) = self.deposits.get_mut(&(token_id, to)) {
            moved.pending_rewards = add(moved.pending_rewards, previous.pending_rewards, "pending rewards")?;
        }
        if fee_shares > 0 {
            self.credit(MANAGER_TOKEN_ID, to, index, 0, fee_shares)?;
        }

        let target = self.tranches.entry(to).or_default();
        target.stake_shares = add(target.stake_shares, stake_shares, "tranche stake shares")?;
        target.rewards_shares = add(target.rewards_shares, minted_rewards_shares, "tranche rewards shares")?;

        self.active_stake = add(self.active_stake, top_up, "active stake")?;
        self.stake_shares_supply = add(self.stake_shares_supply, top_up_shares, "stake shares supply")?;
        rewards.add_shares(minted_rewards_shares)?;

        Ok(DepositReceipt {
            token_id,
            tranche_id: to,
            stake_shares,
            rewards_shares,
            fee_shares,
        })
    }

    /// Release stake and/or rewards from one position
    ///
    /// Stake leaves only once the tranche has expired. The record is dropped
    /// when an expired position holds neither stake nor pending rewards.
    pub fn withdraw(
        &mut self,
        rewards: &RewardAccumulator,
        token_id: TokenId,
        tranche_id: TrancheId,
        withdraw_stake: bool,
        withdraw_rewards: bool,
    ) -> Result<TrancheWithdrawal> {
        let expired = self.is_expired(tranche_id);
        let index = self.settlement_index(tranche_id, rewards.acc_per_share())?;
        let snapshot = self.expired.get(&tranche_id).copied();

        let deposit = self
            .deposits
            .get_mut(&(token_id, tranche_id))
            .ok_or(StakeError::DepositNotFound {
                token: token_id,
                tranche: tranche_id,
            })?;

        if withdraw_stake && !expired && deposit.stake_shares > 0 {
            return Err(TimingError::StakeLocked(tranche_id).into());
        }

        deposit.settle(index)?;

        let mut withdrawal = TrancheWithdrawal {
            tranche_id,
            stake: 0,
            rewards: 0,
        };

        if withdraw_rewards {
            withdrawal.rewards = std::mem::take(&mut deposit.pending_rewards);
        }

        if withdraw_stake {
            if let Some(snapshot) = snapshot {
                if snapshot.stake_shares_supply_at_expiry > 0 {
                    withdrawal.stake = mul_div(
                        snapshot.stake_amount_at_expiry,
                        deposit.stake_shares,
                        snapshot.stake_shares_supply_at_expiry,
                        "withdrawn stake",
                    )?;
                }
                deposit.stake_shares = 0;
            }
        }

        if expired && deposit.is_empty() {
            self.deposits.remove(&(token_id, tranche_id));
        }

        Ok(withdrawal)
    }

    /// Expire the first active tranche and return its snapshot
    ///
    /// The rewards index must already be advanced to the tranche end.
    pub fn expire_next(&mut self, rewards: &mut RewardAccumulator) -> Result<(TrancheId, ExpiredTrancheSnapshot)> {
        let tranche_id = self.first_active_tranche;
        let tranche = self.tranche(tranche_id);
        let stake_amount = self.tranche_stake(tranche_id)?;

        let snapshot = *self.expired.entry(tranche_id).or_insert(ExpiredTrancheSnapshot {
            acc_per_share_at_expiry: rewards.acc_per_share(),
            stake_amount_at_expiry: stake_amount,
            stake_shares_supply_at_expiry: tranche.stake_shares,
        });

        self.active_stake -= stake_amount.min(self.active_stake);
        self.stake_shares_supply -= tranche.stake_shares;
        rewards.remove_shares(tranche.rewards_shares)?;
        self.first_active_tranche = tranche_id.next();

        Ok((tranche_id, snapshot))
    }

    /// Rescale the manager's reward shares in active tranches to a new fee
    ///
    /// Pending rewards are settled at the old share count first.
    pub fn rescale_manager_shares(
        &mut self,
        rewards: &mut RewardAccumulator,
        old_fee: u8,
        new_fee: u8,
    ) -> Result<()> {
        if old_fee == new_fee {
            return Ok(());
        }
        let index = rewards.acc_per_share();
        let tranche_ids: Vec<TrancheId> = self.active_tranches().collect();

        for tranche_id in tranche_ids {
            let Some(deposit) = self.deposits.get_mut(&(MANAGER_TOKEN_ID, tranche_id)) else {
                continue;
            };
            deposit.settle(index)?;

            let old_shares = deposit.rewards_shares;
            let new_shares = if old_fee == 0 {
                0
            } else {
                mul_div(old_shares, new_fee as u128, old_fee as u128, "manager shares")?
            };
            deposit.rewards_shares = new_shares;

            let tranche = self.tranches.entry(tranche_id).or_default();
            tranche.rewards_shares = tranche.rewards_shares - old_shares + new_shares;
            rewards.remove_shares(old_shares)?;
            rewards.add_shares(new_shares)?;
        }
        Ok(())
    }

    /// Reduce active stake after a claim payout
    pub fn burn(&mut self, amount: u128) -> u128 {
        let burned = amount.min(self.active_stake);
        self.active_stake -= burned;
        burned
    }

    fn credit(
        &mut self,
        token_id: TokenId,
        tranche_id: TrancheId,
        index: u128,
        stake_shares: u128,
        rewards_shares: u128,
    ) -> Result<()> {
        let deposit = self.deposits.entry((token_id, tranche_id)).or_insert(Deposit {
            last_acc_per_share: index,
            ..Default::default()
        });
        deposit.settle(index)?;
        deposit.stake_shares = add(deposit.stake_shares, stake_shares, "position stake shares")?;
        deposit.rewards_shares = add(deposit.rewards_shares, rewards_shares, "position rewards shares")?;
        Ok(())
    }

    /// Remove up to `shares` from the manager position; returns what was removed
    fn debit_manager(&mut self, tranche_id: TrancheId, index: u128, shares: u128) -> Result<u128> {
        let Some(manager) = self.deposits.get_mut(&(MANAGER_TOKEN_ID, tranche_id)) else {
            return Ok(0);
        };
        manager.settle(index)?;
        let removed = shares.min(manager.rewards_shares);
        manager.rewards_shares -= removed;
        Ok(removed)
    }
}

fn add(a: u128, b: u128, context: &'static str) -> Result<u128> {
    a.checked_add(b).ok_or(MutualError::Arithmetic(context))
}
