//! Engine and pool configuration

use mutual_common::{AccountId, ConfigError, Result, POOL_FEE_DENOMINATOR};
use mutual_pricing::PricingCurve;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Environment variable naming an optional configuration file
pub const CONFIG_PATH_ENV: &str = "MUTUAL_CONFIG";

/// Prefix of environment overrides (`MUTUAL__MAX_EXPIRATION_STEPS=16`)
pub const ENV_PREFIX: &str = "MUTUAL";

/// Engine-wide settings shared by every pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tranche and bucket boundaries one call may process
    pub max_expiration_steps: u32,
    /// Pricing curve parameters
    pub pricing: PricingCurve,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_expiration_steps: 64,
            pricing: PricingCurve::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `.env`, an optional file and the environment
    ///
    /// The file is `path` if given, else the file named by `MUTUAL_CONFIG`.
    /// Environment variables override file values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();

        let env_path = std::env::var(CONFIG_PATH_ENV).ok();
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| env_path.map(Into::into));
        if let Some(file) = file {
            debug!(path = %file.display(), "Loading engine config file");
            builder = builder.add_source(config::File::from(file));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let loaded: Self = builder
            .build()
            .and_then(|cfg| cfg.try_deserialize())
            .map_err(|e| ConfigError::InvalidSetting(e.to_string()))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_expiration_steps == 0 {
            return Err(
                ConfigError::InvalidSetting("max_expiration_steps must be positive".into()).into(),
            );
        }
        let curve = &self.pricing;
        if curve.price_denominator == 0
            || curve.base_price_bump_interval == 0
            || curve.base_surge_capacity_used == 0
        {
            return Err(ConfigError::InvalidSetting(
                "pricing denominators must be positive".into(),
            )
            .into());
        }
        Ok(())
    }
}

/// Per-pool parameters fixed at creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolParams {
    /// Account allowed to edit products and the pool fee
    pub manager: AccountId,
    /// Cover collaborator allowed to allocate, burn and mint rewards
    pub allocator: AccountId,
    /// Manager fee in percent of rewards
    pub pool_fee: u8,
    /// Upper bound on the pool fee
    pub max_pool_fee: u8,
}

impl PoolParams {
    pub fn new(manager: AccountId, allocator: AccountId, pool_fee: u8, max_pool_fee: u8) -> Self {
        Self {
            manager,
            allocator,
            pool_fee,
            max_pool_fee,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_pool_fee >= POOL_FEE_DENOMINATOR {
            return Err(ConfigError::MaxPoolFeeTooHigh(self.max_pool_fee).into());
        }
        if self.pool_fee > self.max_pool_fee {
            return Err(ConfigError::PoolFeeExceedsMax {
                fee: self.pool_fee,
                max: self.max_pool_fee,
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mutual_common::MutualError;

    fn params(fee: u8, max: u8) -> PoolParams {
        PoolParams::new(AccountId::new("manager"), AccountId::new("cover"), fee, max)
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_expiration_steps, 64);
        assert_eq!(config.pricing.price_change_per_day, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("mutual-engine-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "max_expiration_steps = 8\n\n[pricing]\nprice_change_per_day = 25\n",
        )
        .unwrap();

        let config = EngineConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.max_expiration_steps, 8);
        assert_eq!(config.pricing.price_change_per_day, 25);
        assert_eq!(config.pricing.base_price_bump_ratio, 200);
    }

    #[test]
    fn test_zero_step_budget_rejected() {
        let config = EngineConfig {
            max_expiration_steps: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(MutualError::Config(ConfigError::InvalidSetting(_)))
        ));
    }

    #[test]
    fn test_pool_params_validation() {
        assert!(params(10, 20).validate().is_ok());
        assert_eq!(
            params(30, 20).validate(),
            Err(ConfigError::PoolFeeExceedsMax { fee: 30, max: 20 }.into())
        );
        assert_eq!(
            params(0, 100).validate(),
            Err(ConfigError::MaxPoolFeeTooHigh(100).into())
        );
    }
}
