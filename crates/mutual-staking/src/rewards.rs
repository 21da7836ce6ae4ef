//! Reward accumulator
//!
//! A single monotonic index `acc_per_share` grows by
//! `amount × ACC_PRECISION / rewards_shares_supply` whenever rewards are
//! distributed. Positions remember the index they last settled at and owe
//! `shares × (index − last) / ACC_PRECISION`; no distribution ever iterates
//! over positions.
//!
//! Rewards arrive either instantly ([`RewardAccumulator::mint`]) or as a
//! per-second stream that ends at a bucket boundary
//! ([`RewardAccumulator::stream`]). Streams are realised lazily by
//! [`RewardAccumulator::advance_to`].

use mutual_common::{
    math::mul_div, BucketId, MutualError, Result, StakeError, Timestamp, TimingError,
    ACC_PRECISION,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Rewards owed to `shares` for an index move from `from` to `to`
pub fn earned(shares: u128, from: u128, to: u128) -> Result<u128> {
    mul_div(shares, to.saturating_sub(from), ACC_PRECISION, "earned rewards")
}

/// Global reward index and streaming state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardAccumulator {
    acc_per_share: u128,
    last_update: Timestamp,
    rewards_shares_supply: u128,
    reward_per_second: u128,
    /// Per-second rate that stops when the keyed bucket begins
    reward_per_second_cut: BTreeMap<BucketId, u128>,
    /// Rewards folded into the index so far
    total_minted: u128,
    /// Rewards that arrived while no reward shares existed
    undistributed: u128,
}

impl RewardAccumulator {
    pub fn new(now: Timestamp) -> Self {
        Self {
            acc_per_share: 0,
            last_update: now,
            rewards_shares_supply: 0,
            reward_per_second: 0,
            reward_per_second_cut: BTreeMap::new(),
            total_minted: 0,
            undistributed: 0,
        }
    }

    pub fn acc_per_share(&self) -> u128 {
        self.acc_per_share
    }

    pub fn last_update(&self) -> Timestamp {
        self.last_update
    }

    pub fn rewards_shares_supply(&self) -> u128 {
        self.rewards_shares_supply
    }

    pub fn reward_per_second(&self) -> u128 {
        self.reward_per_second
    }

    pub fn total_minted(&self) -> u128 {
        self.total_minted
    }

    pub fn undistributed(&self) -> u128 {
        self.undistributed
    }

    /// Rate scheduled to stop when `bucket` begins
    pub fn scheduled_cut(&self, bucket: BucketId) -> u128 {
        self.reward_per_second_cut.get(&bucket).copied().unwrap_or(0)
    }

    pub fn add_shares(&mut self, shares: u128) -> Result<()> {
        self.rewards_shares_supply = self
            .rewards_shares_supply
            .checked_add(shares)
            .ok_or(MutualError::Arithmetic("rewards shares supply"))?;
        Ok(())
    }

    pub fn remove_shares(&mut self, shares: u128) -> Result<()> {
        self.rewards_shares_supply = self
            .rewards_shares_supply
            .checked_sub(shares)
            .ok_or(MutualError::Arithmetic("rewards shares supply"))?;
        Ok(())
    }

    /// Distribute `amount` immediately
    ///
    /// Returns `false` when no reward shares exist; the amount is then
    /// recorded as undistributed and the index does not move.
    pub fn mint(&mut self, amount: u128) -> Result<bool> {
        if amount == 0 {
            return Ok(true);
        }
        if self.rewards_shares_supply == 0 {
            warn!(amount, "Rewards received with no reward shares outstanding");
            self.undistributed = self
                .undistributed
                .checked_add(amount)
                .ok_or(MutualError::Arithmetic("undistributed rewards"))?;
            return Ok(false);
        }

        let increase = mul_div(amount, ACC_PRECISION, self.rewards_shares_supply, "reward index")?;
        self.acc_per_share = self
            .acc_per_share
            .checked_add(increase)
            .ok_or(MutualError::Arithmetic("reward index"))?;
        self.total_minted = self
            .total_minted
            .checked_add(amount)
            .ok_or(MutualError::Arithmetic("total minted"))?;
        Ok(true)
    }

    /// Realise streamed rewards up to `timestamp`
    ///
    /// Callers must not advance past a bucket boundary whose cut has not been
    /// applied yet; the expiry walk guarantees this.
    pub fn advance_to(&mut self, timestamp: Timestamp) -> Result<()> {
        if timestamp <= self.last_update {
            return Ok(());
        }
        let elapsed = (timestamp - self.last_update) as u128;
        let streamed = self
            .reward_per_second
            .checked_mul(elapsed)
            .ok_or(MutualError::Arithmetic("streamed rewards"))?;
        self.mint(streamed)?;
        self.last_update = timestamp;
        Ok(())
    }

    /// Start streaming `amount` from `now` until `expiry_bucket` begins
    ///
    /// Returns `(reward_per_second, minted)` where `minted` is the exact
    /// amount the stream will pay out; the remainder of the integer division
    /// is never minted.
    pub fn stream(
        &mut self,
        amount: u128,
        expiry_bucket: BucketId,
        now: Timestamp,
    ) -> Result<(u128, u128)> {
        let end = expiry_bucket.start_time();
        if end <= now {
            return Err(TimingError::InvalidExpiryBucket(expiry_bucket).into());
        }
        self.advance_to(now)?;

        let duration = (end - now) as u128;
        let per_second = amount / duration;
        if per_second == 0 {
            return Err(StakeError::InvalidAmount.into());
        }

        self.reward_per_second = self
            .reward_per_second
            .checked_add(per_second)
            .ok_or(MutualError::Arithmetic("reward rate"))?;
        *self.reward_per_second_cut.entry(expiry_bucket).or_insert(0) += per_second;

        debug!(amount, per_second, bucket = %expiry_bucket, "Reward stream started");
        Ok((per_second, per_second * duration))
    }

    /// Stop the streams ending at `bucket`
    pub fn apply_cut(&mut self, bucket: BucketId) {
        if let Some(cut) = self.reward_per_second_cut.remove(&bucket) {
            self.reward_per_second = self.reward_per_second.saturating_sub(cut);
            debug!(bucket = %bucket, cut, "Reward stream ended");
        }
    }
}
