//! Identifiers for tranches, buckets, products, positions and accounts
//!
//! Tranche and bucket ids are derived from time: `id = timestamp / duration`.
//! Both are monotonically increasing and never reused.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{BUCKET_DURATION, TRANCHE_DURATION};

/// Host ledger time in seconds
pub type Timestamp = u64;

/// Fixed-duration (91 day) stake bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrancheId(pub u64);

impl TrancheId {
    /// Tranche containing the given timestamp
    pub fn containing(timestamp: Timestamp) -> Self {
        Self(timestamp / TRANCHE_DURATION)
    }

    /// First second of the tranche
    pub fn start_time(&self) -> Timestamp {
        self.0 * TRANCHE_DURATION
    }

    /// First second after the tranche; stake unlocks from here on
    pub fn end_time(&self) -> Timestamp {
        (self.0 + 1) * TRANCHE_DURATION
    }

    /// Whether the tranche has ended at `now`
    pub fn has_ended(&self, now: Timestamp) -> bool {
        self.end_time() <= now
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Tranche `offset` positions after this one
    pub fn offset(&self, offset: u64) -> Self {
        Self(self.0 + offset)
    }
}

impl fmt::Display for TrancheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tranche#{}", self.0)
    }
}

/// Fixed-duration (28 day) cover expiry bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketId(pub u64);

impl BucketId {
    /// Bucket containing the given timestamp
    pub fn containing(timestamp: Timestamp) -> Self {
        Self(timestamp / BUCKET_DURATION)
    }

    /// First bucket starting at or after `timestamp`
    ///
    /// Cover ending at `timestamp` is released when this bucket begins.
    pub fn expiring_at(timestamp: Timestamp) -> Self {
        Self(timestamp.div_ceil(BUCKET_DURATION))
    }

    pub fn start_time(&self) -> Timestamp {
        self.0 * BUCKET_DURATION
    }

    pub fn end_time(&self) -> Timestamp {
        (self.0 + 1) * BUCKET_DURATION
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bucket#{}", self.0)
    }
}

/// Product identifier in the protocol catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub u32);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "product#{}", self.0)
    }
}

/// Staking position identifier (token id of the position NFT)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub u64);

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token#{}", self.0)
    }
}

/// Cover allocation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationId(pub u64);

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "allocation#{}", self.0)
    }
}

/// Caller account as authenticated by the host ledger
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tranche_boundaries() {
        let tranche = TrancheId::containing(TRANCHE_DURATION * 5 + 17);
        assert_eq!(tranche, TrancheId(5));
        assert_eq!(tranche.start_time(), TRANCHE_DURATION * 5);
        assert_eq!(tranche.end_time(), TRANCHE_DURATION * 6);
        assert!(!tranche.has_ended(TRANCHE_DURATION * 6 - 1));
        assert!(tranche.has_ended(TRANCHE_DURATION * 6));
    }

    #[test]
    fn test_bucket_expiry_rounds_up() {
        assert_eq!(BucketId::expiring_at(BUCKET_DURATION * 3), BucketId(3));
        assert_eq!(BucketId::expiring_at(BUCKET_DURATION * 3 + 1), BucketId(4));
        assert_eq!(BucketId::containing(BUCKET_DURATION * 3 + 1), BucketId(3));
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&TokenId(42)).unwrap();
        assert_eq!(json, "42");
        let account: AccountId = serde_json::from_str("\"manager\"").unwrap();
        assert_eq!(account, AccountId::new("manager"));
    }
}
