//! Environment-driven settings.

use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub nats_url: Option<String>,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_api_base: String,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
    pub currency: String,
    pub shipping_flat_fee: Decimal,
    pub free_shipping_threshold: Decimal,
    pub reservation_ttl_secs: u64,
    pub reservation_sweep_secs: u64,
    pub return_reason_min_len: usize,
    pub environment: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &'static str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let environment = or("ENVIRONMENT", "development");
        let development = environment == "development";
        let secret = |key: &'static str| match get(key) {
            Some(v) => Ok(v),
            None if development => Ok(String::new()),
            None => Err(ConfigError::Missing(key)),
        };

        Ok(Self {
            database_url: get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            port: parse("PORT", or("PORT", "8083"))?,
            nats_url: get("NATS_URL"),
            stripe_secret_key: secret("STRIPE_SECRET_KEY")?,
            stripe_webhook_secret: secret("STRIPE_WEBHOOK_SECRET")?,
            stripe_api_base: or("STRIPE_API_BASE", "https://api.stripe.com"),
            checkout_success_url: or("CHECKOUT_SUCCESS_URL", "http://localhost:3000/checkout/success"),
            checkout_cancel_url: or("CHECKOUT_CANCEL_URL", "http://localhost:3000/checkout/cancel"),
            currency: or("CURRENCY", "eur").to_lowercase(),
            shipping_flat_fee: parse("SHIPPING_FLAT_FEE", or("SHIPPING_FLAT_FEE", "4.95"))?,
            free_shipping_threshold: parse("FREE_SHIPPING_THRESHOLD", or("FREE_SHIPPING_THRESHOLD", "50"))?,
            reservation_ttl_secs: parse("RESERVATION_TTL_SECS", or("RESERVATION_TTL_SECS", "900"))?,
            reservation_sweep_secs: parse("RESERVATION_SWEEP_SECS", or("RESERVATION_SWEEP_SECS", "60"))?,
            return_reason_min_len: parse("RETURN_REASON_MIN_LEN", or("RETURN_REASON_MIN_LEN", "10"))?,
            environment,
        })
    }

    pub fn is_development(&self) -> bool { self.environment == "development" }
}

fn parse<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid { key, value })
}
