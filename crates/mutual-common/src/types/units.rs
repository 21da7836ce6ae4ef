//! Allocation units - quantized capacity counters
//!
//! Capacity bookkeeping stores `u32` counters of 0.01-token units.
//! Conversions never under-report usage: reserving rounds up, releasing a
//! partial amount rounds down. Overflow is a typed error, never a wrap.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CapacityError;
use crate::NXM_PER_ALLOCATION_UNIT;

/// Quantized allocation counter
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AllocationUnits(pub u32);

impl AllocationUnits {
    pub const ZERO: Self = Self(0);

    /// Units needed to reserve `amount` base units (rounded up)
    pub fn from_amount_ceil(amount: u128) -> Result<Self, CapacityError> {
        Self::from_u128(amount.div_ceil(NXM_PER_ALLOCATION_UNIT), amount)
    }

    /// Units fully covered by `amount` base units (rounded down)
    pub fn from_amount_floor(amount: u128) -> Result<Self, CapacityError> {
        Self::from_u128(amount / NXM_PER_ALLOCATION_UNIT, amount)
    }

    fn from_u128(units: u128, amount: u128) -> Result<Self, CapacityError> {
        u32::try_from(units)
            .map(Self)
            .map_err(|_| CapacityError::AllocationOverflow { amount })
    }

    /// Units from a wide counter, failing instead of truncating
    pub fn try_from_wide(units: u64) -> Result<Self, CapacityError> {
        u32::try_from(units).map(Self).map_err(|_| CapacityError::AllocationOverflow {
            amount: units as u128 * NXM_PER_ALLOCATION_UNIT,
        })
    }

    /// Base units represented by this counter
    pub fn to_amount(&self) -> u128 {
        self.0 as u128 * NXM_PER_ALLOCATION_UNIT
    }

    pub fn get(&self) -> u64 {
        self.0 as u64
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Result<Self, CapacityError> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(CapacityError::AllocationOverflow {
                amount: (self.0 as u128 + other.0 as u128) * NXM_PER_ALLOCATION_UNIT,
            })
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }

    /// Counter expressed in whole tokens
    pub fn as_tokens(&self) -> Decimal {
        Decimal::new(self.0 as i64, 2)
    }
}

impl fmt::Display for AllocationUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}u", self.0)
    }
}
