//! Cover pricing engine
//!
//! Computes, from utilization, elapsed time and the product's stored price:
//! - the interpolated base price
//! - the surge-loaded price actually charged for one allocation
//! - the permanently bumped base price stored after the allocation
//!
//! Every function is pure. Callers refuse zero-capacity products before
//! pricing; the engine still reports them as [`PricingError::ZeroCapacity`].

use mutual_common::{PricingError, Timestamp, ONE_DAY, SECONDS_PER_YEAR};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::curve::PricingCurve;
use crate::RATIO_PRECISION;

/// Inputs of a single price calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceInputs {
    /// Requested allocation
    pub amount: u128,
    /// Capacity already in use, same unit as `amount`
    pub active_cover: u128,
    /// Total capacity, same unit as `amount`
    pub capacity: u128,
    /// Catalog price used until the product has a stored price
    pub initial_price: u64,
    /// Last stored (bumped) base price
    pub last_base_price: Option<u64>,
    /// Time the stored price was written
    pub last_update: Timestamp,
    /// Price the base decays toward
    pub target_price: u64,
    /// Current time
    pub now: Timestamp,
}

/// Result of a price calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Interpolated base price before this allocation
    pub base_price: u64,
    /// Surge-loaded price charged for this allocation
    pub actual_price: u64,
    /// Base price to store after this allocation
    pub new_base_price: u64,
}

impl PriceQuote {
    /// Charged annual rate as a fraction (1000 bps -> 0.1)
    pub fn annual_rate(&self, price_denominator: u64) -> Decimal {
        Decimal::from(self.actual_price) / Decimal::from(price_denominator)
    }

    /// Surge loading applied on top of the base price
    pub fn surge_loading(&self) -> u64 {
        self.actual_price - self.base_price
    }
}

/// Pricing engine over a fixed curve
#[derive(Debug, Clone, Default)]
pub struct PricingEngine {
    curve: PricingCurve,
}

impl PricingEngine {
    pub fn new(curve: PricingCurve) -> Self {
        Self { curve }
    }

    pub fn curve(&self) -> &PricingCurve {
        &self.curve
    }

    /// Full quote for one allocation
    #[instrument(skip(self), level = "debug")]
    pub fn quote(&self, inputs: &PriceInputs) -> Result<PriceQuote, PricingError> {
        if inputs.amount == 0 {
            return Err(PricingError::ZeroAmount);
        }
        if inputs.capacity == 0 {
            return Err(PricingError::ZeroCapacity);
        }

        let last_price = inputs.last_base_price.unwrap_or(inputs.initial_price);
        let base_price = self.interpolate_base_price(
            last_price,
            inputs.target_price,
            inputs.last_update,
            inputs.now,
        );

        let actual_price =
            self.surge_price(inputs.amount, base_price, inputs.active_cover, inputs.capacity)?;

        let bump = self.price_bump(inputs.amount, inputs.capacity)?;
        let new_base_price = base_price.checked_add(bump).ok_or(PricingError::Overflow)?;

        debug!(base_price, actual_price, new_base_price, "Priced allocation");

        Ok(PriceQuote {
            base_price,
            actual_price,
            new_base_price,
        })
    }

    /// Move the stored price toward the target
    ///
    /// Increases toward the target are immediate; decreases are limited to
    /// `price_change_per_day` per whole elapsed day and never overshoot.
    pub fn interpolate_base_price(
        &self,
        last_price: u64,
        target_price: u64,
        last_update: Timestamp,
        now: Timestamp,
    ) -> u64 {
        if target_price > last_price {
            return target_price;
        }

        let elapsed_days = now.saturating_sub(last_update) / ONE_DAY;
        let max_change = elapsed_days.saturating_mul(self.curve.price_change_per_day);

        last_price - max_change.min(last_price - target_price)
    }

    /// Base price plus the surge loading for the part above the threshold
    ///
    /// The loading at utilization `u` is
    /// `base_surge_loading × (u − threshold) / base_surge_capacity_used`.
    /// The portion of the allocation above the threshold pays the average of
    /// the loading where it enters and where it leaves the surge zone.
    pub fn surge_price(
        &self,
        amount: u128,
        base_price: u64,
        active_cover: u128,
        capacity: u128,
    ) -> Result<u64, PricingError> {
        if amount == 0 {
            return Err(PricingError::ZeroAmount);
        }
        if capacity == 0 {
            return Err(PricingError::ZeroCapacity);
        }

        let threshold = self.curve.surge_threshold;
        let new_active_cover = active_cover.checked_add(amount).ok_or(PricingError::Overflow)?;

        let entry_ratio = ratio(active_cover, capacity)?;
        let exit_ratio = ratio(new_active_cover, capacity)?;

        if exit_ratio <= threshold {
            return Ok(base_price);
        }

        let surge_entry = entry_ratio.max(threshold);
        let entry_loading = self.loading_at(surge_entry)?;
        let exit_loading = self.loading_at(exit_ratio)?;
        let average_loading = (entry_loading + exit_loading) / 2;

        let surge_fraction = if entry_ratio >= threshold {
            RATIO_PRECISION
        } else {
            checked_mul(exit_ratio - threshold, RATIO_PRECISION)? / (exit_ratio - entry_ratio)
        };

        let loading = checked_mul(average_loading, surge_fraction)? / RATIO_PRECISION;
        let price = checked_mul(base_price as u128, RATIO_PRECISION + loading)? / RATIO_PRECISION;

        u64::try_from(price).map_err(|_| PricingError::Overflow)
    }

    /// Permanent bump of the base price caused by consuming `amount` of `capacity`
    ///
    /// Pro-rata over the bump interval and rounded up, so that any non-empty
    /// allocation moves the stored price.
    pub fn price_bump(&self, amount: u128, capacity: u128) -> Result<u64, PricingError> {
        if capacity == 0 {
            return Err(PricingError::ZeroCapacity);
        }

        let numerator = checked_mul(
            checked_mul(amount, self.curve.base_price_bump_ratio as u128)?,
            self.curve.base_price_bump_denominator as u128,
        )?;
        let denominator = checked_mul(capacity, self.curve.base_price_bump_interval as u128)?;
        if denominator == 0 {
            return Err(PricingError::ZeroCapacity);
        }

        u64::try_from(numerator.div_ceil(denominator)).map_err(|_| PricingError::Overflow)
    }

    /// Premium for covering `cover_amount` at `price` for `period` seconds
    ///
    /// Rounded down at each step.
    pub fn premium(
        &self,
        price: u64,
        cover_amount: u128,
        period: u64,
    ) -> Result<u128, PricingError> {
        let annual = checked_mul(cover_amount, price as u128)? / self.curve.price_denominator as u128;
        Ok(checked_mul(annual, period as u128)? / SECONDS_PER_YEAR as u128)
    }

    fn loading_at(&self, utilization: u128) -> Result<u128, PricingError> {
        let above = utilization.saturating_sub(self.curve.surge_threshold);
        Ok(checked_mul(self.curve.base_surge_loading, above)? / self.curve.base_surge_capacity_used)
    }
}

fn ratio(part: u128, capacity: u128) -> Result<u128, PricingError> {
    Ok(checked_mul(part, RATIO_PRECISION)? / capacity)
}

fn checked_mul(a: u128, b: u128) -> Result<u128, PricingError> {
    a.checked_mul(b).ok_or(PricingError::Overflow)
}
