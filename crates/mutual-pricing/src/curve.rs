//! Tunable pricing curve parameters

use mutual_common::PRICE_DENOMINATOR;
use serde::{Deserialize, Serialize};

/// Parameters of the pricing curve
///
/// Defaults are the protocol constants; overriding them changes the
/// economics of every pool priced with this curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingCurve {
    /// Maximum base price decrease per elapsed day (basis points)
    pub price_change_per_day: u64,
    /// Base price bump per bump interval of capacity consumed (basis points)
    pub base_price_bump_ratio: u64,
    /// Fraction of capacity that triggers one full bump (of the bump denominator)
    pub base_price_bump_interval: u64,
    /// Denominator of the bump interval
    pub base_price_bump_denominator: u64,
    /// Utilization above which surge loading applies (1e18 scale)
    pub surge_threshold: u128,
    /// Loading added per `base_surge_capacity_used` of utilization (1e18 scale)
    pub base_surge_loading: u128,
    /// Utilization step of the surge loading slope (1e18 scale)
    pub base_surge_capacity_used: u128,
    /// Price denominator (basis points)
    pub price_denominator: u64,
}

impl Default for PricingCurve {
    fn default() -> Self {
        Self {
            price_change_per_day: 50,
            base_price_bump_ratio: 200,
            base_price_bump_interval: 1_000,
            base_price_bump_denominator: 10_000,
            surge_threshold: 800_000_000_000_000_000,
            base_surge_loading: 10_000_000_000_000_000,
            base_surge_capacity_used: 10_000_000_000_000_000,
            price_denominator: PRICE_DENOMINATOR,
        }
    }
}

impl PricingCurve {
    /// Set the daily decay rate
    pub fn with_price_change_per_day(mut self, bps: u64) -> Self {
        self.price_change_per_day = bps;
        self
    }

    /// Set the surge threshold (1e18 scale)
    pub fn with_surge_threshold(mut self, threshold: u128) -> Self {
        self.surge_threshold = threshold;
        self
    }

    /// Set the bump ratio per bump interval
    pub fn with_price_bump(mut self, ratio: u64, interval: u64) -> Self {
        self.base_price_bump_ratio = ratio;
        self.base_price_bump_interval = interval;
        self
    }
}
