//! Bounded expiry walk
//!
//! Advances the pool from its last processed boundary toward `now`, one
//! tranche end or bucket end per step, earliest first (tranche first on a
//! tie). Before each boundary the reward index is advanced to exactly that
//! boundary, so a tranche snapshot includes every reward streamed before the
//! tranche ended and nothing after.
//!
//! At most `max_steps` boundaries are processed per call. A pool left idle
//! for a long time is caught up over several calls.

use mutual_common::{Result, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::events::PoolEvent;
use crate::state::PoolState;

/// Work done by one expiry walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationProgress {
    pub tranches_expired: u64,
    pub buckets_expired: u64,
    /// No boundary at or before `now` remains unprocessed
    pub caught_up: bool,
}

impl ExpirationProgress {
    pub fn steps(&self) -> u64 {
        self.tranches_expired + self.buckets_expired
    }
}

/// Process up to `max_steps` boundaries at or before `now`
///
/// With `force`, a caught-up walk also advances the reward index to `now`.
pub fn process_expirations(
    state: &mut PoolState,
    now: Timestamp,
    max_steps: u32,
    force: bool,
) -> Result<ExpirationProgress> {
    let mut progress = ExpirationProgress::default();

    loop {
        let tranche_end = state.ledger.first_active_tranche().end_time();
        let bucket_end = state.first_active_bucket.end_time();
        let boundary = tranche_end.min(bucket_end);

        if boundary > now {
            progress.caught_up = true;
            break;
        }
        if progress.steps() >= max_steps as u64 {
            break;
        }

        state.rewards.advance_to(boundary)?;

        if tranche_end <= bucket_end {
            let (tranche_id, snapshot) = state.ledger.expire_next(&mut state.rewards)?;
            info!(
                tranche = %tranche_id,
                stake = snapshot.stake_amount_at_expiry,
                shares = snapshot.stake_shares_supply_at_expiry,
                "Tranche expired"
            );
            state.emit(PoolEvent::TrancheExpired {
                tranche_id,
                acc_per_share_at_expiry: snapshot.acc_per_share_at_expiry,
                stake_amount_at_expiry: snapshot.stake_amount_at_expiry,
                stake_shares_supply_at_expiry: snapshot.stake_shares_supply_at_expiry,
            });
            progress.tranches_expired += 1;
        } else {
            let bucket_id = state.first_active_bucket;
            state.first_active_bucket = bucket_id.next();
            state.rewards.apply_cut(state.first_active_bucket);
            debug!(bucket = %bucket_id, "Bucket expired");
            state.emit(PoolEvent::BucketExpired {
                bucket_id,
                at: boundary,
            });
            progress.buckets_expired += 1;
        }
    }

    if progress.caught_up {
        if force {
            state.rewards.advance_to(now)?;
        }
    } else {
        let (tranches, buckets) = state.pending_expirations(now);
        warn!(
            pending_tranches = tranches,
            pending_buckets = buckets,
            max_steps,
            "Expiry walk stopped by step budget"
        );
    }

    Ok(progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolParams;
    use mutual_common::{AccountId, BucketId, TokenId, TrancheId, BUCKET_DURATION, TRANCHE_DURATION};

    fn state_at(now: Timestamp) -> PoolState {
        let params = PoolParams::new(AccountId::new("manager"), AccountId::new("cover"), 0, 20);
        PoolState::new(params, now)
    }

    #[test]
    fn test_nothing_to_do_within_first_bucket() {
        let mut state = state_at(0);
        let progress = process_expirations(&mut state, BUCKET_DURATION - 1, 64, true).unwrap();
        assert_eq!(progress.steps(), 0);
        assert!(progress.caught_up);
        assert_eq!(state.rewards.last_update(), BUCKET_DURATION - 1);
    }

    #[test]
    fn test_boundaries_processed_in_time_order() {
        let mut state = state_at(0);
        let progress = process_expirations(&mut state, TRANCHE_DURATION, 64, false).unwrap();

        // 91 days: buckets end at 28, 56 and 84 days, then the tranche
        assert_eq!(progress.buckets_expired, 3);
        assert_eq!(progress.tranches_expired, 1);
        assert!(progress.caught_up);
        assert_eq!(state.ledger.first_active_tranche(), TrancheId(1));
        assert_eq!(state.first_active_bucket, BucketId(3));

        let kinds: Vec<_> = state.events.iter().map(PoolEvent::kind).collect();
        assert_eq!(
            kinds,
            ["BucketExpired", "BucketExpired", "BucketExpired", "TrancheExpired"]
        );
    }

    #[test]
    fn test_step_budget_leaves_backlog() {
        let mut state = state_at(0);
        let now = TRANCHE_DURATION * 10;
        let first = process_expirations(&mut state, now, 8, true).unwrap();
        assert_eq!(first.steps(), 8);
        assert!(!first.caught_up);
        // Index is left at the last processed boundary
        assert!(state.rewards.last_update() < now);

        let mut total = first;
        while !total.caught_up {
            let next = process_expirations(&mut state, now, 8, true).unwrap();
            total.tranches_expired += next.tranches_expired;
            total.buckets_expired += next.buckets_expired;
            total.caught_up = next.caught_up;
        }
        assert_eq!(total.tranches_expired, 10);
        assert_eq!(total.buckets_expired, BucketId::containing(now).0);
        assert_eq!(state.pending_expirations(now), (0, 0));
    }

    #[test]
    fn test_snapshot_excludes_rewards_streamed_after_tranche_end() {
        let mut state = state_at(0);
        state
            .ledger
            .deposit_to(&mut state.rewards, TokenId(1), TrancheId(0), 1_000, 0)
            .unwrap();

        // Stream ends at the start of bucket 5 (140 days), past the tranche end
        let (rate, _) = state.rewards.stream(BUCKET_DURATION as u128 * 5 * 1_000, BucketId(5), 0).unwrap();
        assert_eq!(rate, 1_000);

        process_expirations(&mut state, BUCKET_DURATION * 5, 64, true).unwrap();
        let snapshot = state.ledger.expired_snapshot(TrancheId(0)).unwrap();
        let streamed_before_end = rate * TRANCHE_DURATION as u128;
        assert_eq!(snapshot.acc_per_share_at_expiry, streamed_before_end * 1_000_000_000_000_000_000 / 1_000);

        // Shares are gone: the rest of the stream is undistributed
        assert_eq!(state.rewards.total_minted(), streamed_before_end);
        assert_eq!(state.rewards.reward_per_second(), 0);
    }

    #[test]
    fn test_snapshot_written_once() {
        let mut state = state_at(0);
        process_expirations(&mut state, TRANCHE_DURATION * 3, 64, true).unwrap();
        let expired = state
            .events
            .iter()
            .filter(|e| matches!(e, PoolEvent::TrancheExpired { .. }))
            .count();
        assert_eq!(expired, 3);

        process_expirations(&mut state, TRANCHE_DURATION * 3, 64, true).unwrap();
        let again = state
            .events
            .iter()
            .filter(|e| matches!(e, PoolEvent::TrancheExpired { .. }))
            .count();
        assert_eq!(again, 3);
    }
}
