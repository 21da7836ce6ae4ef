//! # Mutual Pricing
//!
//! Pure, side-effect-free cover pricing for staking pool products.
//!
//! ## Pricing Steps
//!
//! ```text
//! base     = interpolate(lastBasePrice -> targetPrice, elapsed days)
//! actual   = base × (1 + surgeLoading(utilization before, after))
//! bumped   = base + bump(amount / capacity)
//! premium  = actual × amount × period / (PRICE_DENOMINATOR × year)
//! ```
//!
//! Where:
//! - base decays toward target at a fixed daily rate, but jumps up instantly
//! - surge loading applies only to the part of an allocation above 80% utilization
//! - the bump is permanent and independent from the surge loading

pub mod curve;
pub mod engine;

pub use curve::PricingCurve;
pub use engine::{PriceInputs, PriceQuote, PricingEngine};

/// Scale of utilization ratios used by the surge curve
pub const RATIO_PRECISION: u128 = 1_000_000_000_000_000_000;
