//! Read access to protocol-wide configuration
//!
//! The pool never owns the product catalog or the global ratios; it reads
//! them through [`ProtocolConfig`] at the moment an operation needs them.

use mutual_common::ProductId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Catalog entry of a coverable product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogProduct {
    /// Price a product starts at when first listed in a pool (basis points)
    pub initial_price_ratio: u64,
    /// Share of capacity withheld for this product (of 10_000)
    pub capacity_reduction_ratio: u32,
}

/// Trait for protocol configuration sources
#[cfg_attr(test, mockall::automock)]
pub trait ProtocolConfig {
    /// Capacity multiplier applied to staked value (of 10_000)
    fn global_capacity_ratio(&self) -> u32;

    /// Floor applied to every product's target price (basis points)
    fn global_min_price_ratio(&self) -> u64;

    /// Look up a product in the catalog
    fn product(&self, product_id: ProductId) -> Option<CatalogProduct>;
}

/// Fixed protocol configuration
///
/// Used by tests and the replay tool; deserializable from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticProtocolConfig {
    pub global_capacity_ratio: u32,
    pub global_min_price_ratio: u64,
    #[serde(default)]
    pub products: BTreeMap<ProductId, CatalogProduct>,
}

impl Default for StaticProtocolConfig {
    fn default() -> Self {
        Self {
            global_capacity_ratio: 20_000,
            global_min_price_ratio: 100,
            products: BTreeMap::new(),
        }
    }
}

impl StaticProtocolConfig {
    pub fn new(global_capacity_ratio: u32, global_min_price_ratio: u64) -> Self {
        Self {
            global_capacity_ratio,
            global_min_price_ratio,
            products: BTreeMap::new(),
        }
    }

    /// Add a catalog product
    pub fn with_product(
        mut self,
        product_id: ProductId,
        initial_price_ratio: u64,
        capacity_reduction_ratio: u32,
    ) -> Self {
        self.products.insert(
            product_id,
            CatalogProduct {
                initial_price_ratio,
                capacity_reduction_ratio,
            },
        );
        self
    }
}

impl ProtocolConfig for StaticProtocolConfig {
    fn global_capacity_ratio(&self) -> u32 {
        self.global_capacity_ratio
    }

    fn global_min_price_ratio(&self) -> u64 {
        self.global_min_price_ratio
    }

    fn product(&self, product_id: ProductId) -> Option<CatalogProduct> {
        self.products.get(&product_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_lookup() {
        let config = StaticProtocolConfig::new(10_000, 50).with_product(ProductId(3), 250, 0);
        assert_eq!(config.global_capacity_ratio(), 10_000);
        assert_eq!(config.product(ProductId(3)).unwrap().initial_price_ratio, 250);
        assert!(config.product(ProductId(4)).is_none());
    }

    #[test]
    fn test_deserialize_from_json() {
        let config: StaticProtocolConfig = serde_json::from_str(
            r#"{
                "global_capacity_ratio": 20000,
                "global_min_price_ratio": 100,
                "products": {"1": {"initial_price_ratio": 1000, "capacity_reduction_ratio": 0}}
            }"#,
        )
        .unwrap();
        assert_eq!(config.product(ProductId(1)).unwrap().initial_price_ratio, 1_000);
    }
}
