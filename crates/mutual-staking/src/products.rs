//! Product weight registry
//!
//! Stores each listed product's target weight and price along with the
//! stored (bumped) base price used by the pricing engine. Edits are
//! field-addressable, and batches that raise a target weight must keep the
//! pool's total weights under [`MAX_TOTAL_WEIGHT`].

use mutual_common::{
    ConfigError, ProductId, Result, Timestamp, MAX_TOTAL_WEIGHT, PRICE_DENOMINATOR,
    WEIGHT_DENOMINATOR,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::catalog::ProtocolConfig;

/// A product listed in the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakedProduct {
    pub target_weight: u32,
    pub last_effective_weight: u32,
    pub target_price: u64,
    pub bumped_price: u64,
    pub bumped_price_update_time: Timestamp,
}

/// One field-addressable product edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductParams {
    pub product_id: ProductId,
    #[serde(default)]
    pub set_target_weight: bool,
    #[serde(default)]
    pub target_weight: u32,
    #[serde(default)]
    pub set_target_price: bool,
    #[serde(default)]
    pub target_price: u64,
    #[serde(default)]
    pub recalculate_effective_weight: bool,
}

impl ProductParams {
    /// An edit that changes nothing until fields are set
    pub fn new(product_id: ProductId) -> Self {
        Self {
            product_id,
            set_target_weight: false,
            target_weight: 0,
            set_target_price: false,
            target_price: 0,
            recalculate_effective_weight: false,
        }
    }

    pub fn with_target_weight(mut self, weight: u32) -> Self {
        self.set_target_weight = true;
        self.target_weight = weight;
        self
    }

    pub fn with_target_price(mut self, price: u64) -> Self {
        self.set_target_price = true;
        self.target_price = price;
        self
    }

    pub fn recalculating(mut self) -> Self {
        self.recalculate_effective_weight = true;
        self
    }
}

/// Registry of a pool's products and weight totals
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductRegistry {
    products: BTreeMap<ProductId, StakedProduct>,
    total_target_weight: u32,
    total_effective_weight: u32,
}

impl ProductRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, product_id: ProductId) -> Option<&StakedProduct> {
        self.products.get(&product_id)
    }

    pub fn get_mut(&mut self, product_id: ProductId) -> Option<&mut StakedProduct> {
        self.products.get_mut(&product_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = ProductId> + '_ {
        self.products.keys().copied()
    }

    pub fn total_target_weight(&self) -> u32 {
        self.total_target_weight
    }

    pub fn total_effective_weight(&self) -> u32 {
        self.total_effective_weight
    }

    /// Apply a batch of edits
    ///
    /// `effective_weight(product, target)` derives a product's effective
    /// weight from its utilization. The weight caps are checked once, after
    /// the whole batch, and only when some target weight increased.
    pub fn apply<F>(
        &mut self,
        params: &[ProductParams],
        now: Timestamp,
        protocol: &dyn ProtocolConfig,
        effective_weight: F,
    ) -> Result<Vec<ProductId>>
    where
        F: Fn(ProductId, u32) -> Result<u32>,
    {
        let min_price = protocol.global_min_price_ratio();
        let mut weight_increased = false;
        let mut touched = Vec::with_capacity(params.len());

        for edit in params {
            let catalog = protocol
                .product(edit.product_id)
                .ok_or(ConfigError::ProductNotFound(edit.product_id))?;

            if edit.set_target_price {
                validate_price(edit.target_price, min_price)?;
            }
            if edit.set_target_weight && edit.target_weight > WEIGHT_DENOMINATOR {
                return Err(ConfigError::TargetWeightTooHigh {
                    weight: edit.target_weight,
                }
                .into());
            }

            let mut product = match self.products.get(&edit.product_id) {
                Some(existing) => *existing,
                None => {
                    if !edit.set_target_price {
                        return Err(ConfigError::MustSetPriceForNewProducts(edit.product_id).into());
                    }
                    if !edit.set_target_weight {
                        return Err(ConfigError::MustSetWeightForNewProducts(edit.product_id).into());
                    }
                    StakedProduct {
                        target_weight: 0,
                        last_effective_weight: 0,
                        target_price: edit.target_price,
                        bumped_price: catalog.initial_price_ratio,
                        bumped_price_update_time: now,
                    }
                }
            };

            if edit.set_target_price {
                product.target_price = edit.target_price;
            }

            if edit.set_target_weight {
                if edit.target_weight > product.target_weight {
                    weight_increased = true;
                }
                self.total_target_weight =
                    self.total_target_weight - product.target_weight + edit.target_weight;
                product.target_weight = edit.target_weight;
            }

            if edit.set_target_weight || edit.recalculate_effective_weight {
                let effective = effective_weight(edit.product_id, product.target_weight)?;
                self.total_effective_weight =
                    self.total_effective_weight - product.last_effective_weight + effective;
                product.last_effective_weight = effective;
            }

            debug!(product = %edit.product_id, target_weight = product.target_weight, target_price = product.target_price, "Product edited");
            self.products.insert(edit.product_id, product);
            touched.push(edit.product_id);
        }

        if weight_increased {
            if self.total_effective_weight > MAX_TOTAL_WEIGHT {
                return Err(ConfigError::TotalEffectiveWeightExceeded {
                    total: self.total_effective_weight,
                    max: MAX_TOTAL_WEIGHT,
                }
                .into());
            }
            if self.total_target_weight > MAX_TOTAL_WEIGHT {
                return Err(ConfigError::TotalTargetWeightExceeded {
                    total: self.total_target_weight,
                    max: MAX_TOTAL_WEIGHT,
                }
                .into());
            }
        }

        Ok(touched)
    }

    /// Refresh effective weights without any cap check
    pub fn recalculate<F>(&mut self, product_ids: &[ProductId], effective_weight: F) -> Result<()>
    where
        F: Fn(ProductId, u32) -> Result<u32>,
    {
        for product_id in product_ids {
            let product = self
                .products
                .get_mut(product_id)
                .ok_or(ConfigError::ProductNotInPool(*product_id))?;
            let effective = effective_weight(*product_id, product.target_weight)?;
            self.total_effective_weight =
                self.total_effective_weight - product.last_effective_weight + effective;
            product.last_effective_weight = effective;
        }
        Ok(())
    }
}

fn validate_price(price: u64, min_price: u64) -> Result<()> {
    if price > PRICE_DENOMINATOR {
        return Err(ConfigError::TargetPriceTooHigh { price }.into());
    }
    if price < min_price {
        return Err(ConfigError::TargetPriceBelowMin {
            price,
            minimum: min_price,
        }
        .into());
    }
    Ok(())
}

/// Effective weight of a product from its utilization
///
/// `max(target, ceil(used × 100 / full_capacity))`; with no capacity the
/// target weight is returned.
pub fn effective_weight(target_weight: u32, used_units: u64, full_capacity_units: u64) -> u32 {
    if full_capacity_units == 0 {
        return target_weight;
    }
    let actual = (used_units as u128 * WEIGHT_DENOMINATOR as u128).div_ceil(full_capacity_units as u128);
    target_weight.max(u32::try_from(actual).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogProduct, MockProtocolConfig};
    use mutual_common::MutualError;

    fn protocol() -> MockProtocolConfig {
        let mut mock = MockProtocolConfig::new();
        mock.expect_global_min_price_ratio().return_const(100u64);
        mock.expect_product()
            .returning(|id| {
                (id.0 < 100).then_some(CatalogProduct {
                    initial_price_ratio: 1_000,
                    capacity_reduction_ratio: 0,
                })
            });
        mock
    }

    fn at_target(_: ProductId, target: u32) -> Result<u32> {
        Ok(target)
    }

    fn full_weight(ids: std::ops::Range<u32>) -> Vec<ProductParams> {
        ids.map(|id| {
            ProductParams::new(ProductId(id))
                .with_target_weight(100)
                .with_target_price(500)
        })
        .collect()
    }

    #[test]
    fn test_new_product_needs_price_and_weight() {
        let mut registry = ProductRegistry::new();
        let protocol = protocol();

        let err = registry
            .apply(&[ProductParams::new(ProductId(1)).with_target_weight(10)], 0, &protocol, at_target)
            .unwrap_err();
        assert_eq!(err, ConfigError::MustSetPriceForNewProducts(ProductId(1)).into());

        let err = registry
            .apply(&[ProductParams::new(ProductId(1)).with_target_price(500)], 0, &protocol, at_target)
            .unwrap_err();
        assert_eq!(err, ConfigError::MustSetWeightForNewProducts(ProductId(1)).into());
    }

    #[test]
    fn test_new_product_starts_at_catalog_price() {
        let mut registry = ProductRegistry::new();
        registry
            .apply(&full_weight(1..2), 42, &protocol(), at_target)
            .unwrap();
        let product = registry.get(ProductId(1)).unwrap();
        assert_eq!(product.bumped_price, 1_000);
        assert_eq!(product.bumped_price_update_time, 42);
        assert_eq!(product.target_price, 500);
    }

    #[test]
    fn test_price_bounds() {
        let mut registry = ProductRegistry::new();
        let protocol = protocol();
        let edit = |price| {
            [ProductParams::new(ProductId(1))
                .with_target_weight(10)
                .with_target_price(price)]
        };

        assert_eq!(
            registry.apply(&edit(10_001), 0, &protocol, at_target),
            Err(ConfigError::TargetPriceTooHigh { price: 10_001 }.into())
        );
        assert_eq!(
            registry.apply(&edit(99), 0, &protocol, at_target),
            Err(ConfigError::TargetPriceBelowMin {
                price: 99,
                minimum: 100
            }
            .into())
        );
    }

    #[test]
    fn test_unknown_catalog_product() {
        let mut registry = ProductRegistry::new();
        let result = registry.apply(&full_weight(100..101), 0, &protocol(), at_target);
        assert_eq!(result, Err(ConfigError::ProductNotFound(ProductId(100)).into()));
    }

    #[test]
    fn test_target_weight_above_denominator() {
        let mut registry = ProductRegistry::new();
        let edit = ProductParams::new(ProductId(1))
            .with_target_weight(101)
            .with_target_price(500);
        assert_eq!(
            registry.apply(&[edit], 0, &protocol(), at_target),
            Err(ConfigError::TargetWeightTooHigh { weight: 101 }.into())
        );
    }

    #[test]
    fn test_twenty_products_fit_twenty_one_do_not() {
        let mut registry = ProductRegistry::new();
        let protocol = protocol();
        registry.apply(&full_weight(0..20), 0, &protocol, at_target).unwrap();
        assert_eq!(registry.total_target_weight(), 2_000);

        let mut next = registry.clone();
        let result = next.apply(&full_weight(20..21), 0, &protocol, at_target);
        assert!(matches!(
            result,
            Err(MutualError::Config(ConfigError::TotalEffectiveWeightExceeded { total: 2_100, .. }))
        ));
    }

    #[test]
    fn test_lowering_weight_skips_cap_check() {
        let mut registry = ProductRegistry::new();
        let protocol = protocol();
        registry.apply(&full_weight(0..20), 0, &protocol, at_target).unwrap();

        // Utilization keeps one product's effective weight high
        let over = |id: ProductId, target: u32| -> Result<u32> {
            Ok(if id == ProductId(0) { 150 } else { target })
        };
        let lower = [ProductParams::new(ProductId(0)).with_target_weight(50)];
        registry.apply(&lower, 0, &protocol, over).unwrap();
        assert_eq!(registry.total_effective_weight(), 2_050);
        assert_eq!(registry.total_target_weight(), 1_950);
    }

    #[test]
    fn test_price_edit_keeps_weight() {
        let mut registry = ProductRegistry::new();
        let protocol = protocol();
        registry.apply(&full_weight(1..2), 0, &protocol, at_target).unwrap();
        registry
            .apply(&[ProductParams::new(ProductId(1)).with_target_price(700)], 0, &protocol, at_target)
            .unwrap();

        let product = registry.get(ProductId(1)).unwrap();
        assert_eq!(product.target_weight, 100);
        assert_eq!(product.target_price, 700);
    }

    #[test]
    fn test_effective_weight_from_utilization() {
        assert_eq!(effective_weight(40, 0, 0), 40);
        assert_eq!(effective_weight(40, 100, 1_000), 40);
        assert_eq!(effective_weight(5, 101, 1_000), 11);
    }

    #[test]
    fn test_recalculate_unlisted_product() {
        let mut registry = ProductRegistry::new();
        assert_eq!(
            registry.recalculate(&[ProductId(3)], at_target),
            Err(ConfigError::ProductNotInPool(ProductId(3)).into())
        );
    }
}
