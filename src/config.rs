use std::{env, str::FromStr};

use anyhow::Context;
use rust_decimal::Decimal;

use crate::services::pricing::PricingPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => anyhow::bail!("unknown STORE_BACKEND `{other}` (expected postgres or memory)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub backend: StoreBackend,
    pub jwt_secret: Option<String>,
    pub pricing: PricingPolicy,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let backend = match lookup("STORE_BACKEND") {
            Some(value) => value.parse()?,
            None => StoreBackend::Postgres,
        };
        let database_url = lookup("DATABASE_URL");
        if backend == StoreBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL must be set for the postgres backend");
        }

        let host = lookup("APP_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = lookup("APP_PORT")
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);

        let defaults = PricingPolicy::default();
        let pricing = PricingPolicy {
            flat_shipping_fee: money_var(&lookup, "FLAT_SHIPPING_FEE")?
                .unwrap_or(defaults.flat_shipping_fee),
            free_shipping_threshold: money_var(&lookup, "FREE_SHIPPING_THRESHOLD")?
                .unwrap_or(defaults.free_shipping_threshold),
        };

        Ok(Self {
            database_url,
            host,
            port,
            backend,
            jwt_secret: lookup("JWT_SECRET").filter(|s| !s.is_empty()),
            pricing,
        })
    }
}

fn money_var(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> anyhow::Result<Option<Decimal>> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let value = Decimal::from_str(raw.trim()).with_context(|| format!("{key} is not a decimal"))?;
    if value.is_sign_negative() {
        anyhow::bail!("{key} must not be negative");
    }
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_postgres_and_standard_shipping() -> anyhow::Result<()> {
        let cfg = config(&[("DATABASE_URL", "postgres://localhost/cart")])?;
        assert_eq!(cfg.backend, StoreBackend::Postgres);
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.pricing, PricingPolicy::default());
        Ok(())
    }

    #[test]
    fn postgres_requires_database_url() {
        assert!(config(&[]).is_err());
        assert!(config(&[("STORE_BACKEND", "memory")]).is_ok());
    }

    #[test]
    fn shipping_policy_is_configurable() -> anyhow::Result<()> {
        let cfg = config(&[
            ("STORE_BACKEND", "memory"),
            ("FLAT_SHIPPING_FEE", "7.50"),
            ("FREE_SHIPPING_THRESHOLD", "75"),
        ])?;
        assert_eq!(cfg.pricing.flat_shipping_fee, Decimal::new(750, 2));
        assert_eq!(cfg.pricing.free_shipping_threshold, Decimal::from(75));

        assert!(config(&[("STORE_BACKEND", "memory"), ("FLAT_SHIPPING_FEE", "-1")]).is_err());
        assert!(config(&[("STORE_BACKEND", "memory"), ("FLAT_SHIPPING_FEE", "abc")]).is_err());
        Ok(())
    }
}
