//! Configuration module for fiscal-service.

use std::env;
use std::str::FromStr;

use rust_decimal::Decimal;
use service_core::config as core_config;
use service_core::error::AppError;

use crate::billing::{validate_document_type, FiscalSettings, MAX_NUMBER_WIDTH};

#[derive(Debug, Clone)]
pub struct FiscalConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub fiscal: FiscalSettings,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl FiscalConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "fiscal-service".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            },
            fiscal: fiscal_settings_from_env()?,
        })
    }
}

/// Business settings, each overridable through the environment.
///
/// Unlike connection tuning, a malformed value here is an error rather
/// than a silent fallback: it would change amounts or fiscal numbers.
pub fn fiscal_settings_from_env() -> Result<FiscalSettings, AppError> {
    let defaults = FiscalSettings::default();

    let settings = FiscalSettings {
        itbis_rate: parse_env("ITBIS_RATE", defaults.itbis_rate)?,
        default_document_type: env::var("DEFAULT_DOCUMENT_TYPE")
            .unwrap_or(defaults.default_document_type),
        number_width: parse_env("FISCAL_NUMBER_WIDTH", defaults.number_width)?,
        payment_terms_days: parse_env("PAYMENT_TERMS_DAYS", defaults.payment_terms_days)?,
        low_sequence_threshold: parse_env(
            "LOW_SEQUENCE_THRESHOLD",
            defaults.low_sequence_threshold,
        )?,
    };
    check_settings(&settings)?;
    Ok(settings)
}

/// Reject settings that would change amounts or produce unstorable numbers.
pub fn check_settings(settings: &FiscalSettings) -> Result<(), AppError> {
    if settings.itbis_rate < Decimal::ZERO || settings.itbis_rate > Decimal::ONE {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "ITBIS_RATE must be between 0 and 1, got {}",
            settings.itbis_rate
        )));
    }
    if !(1..=MAX_NUMBER_WIDTH).contains(&settings.number_width) {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "FISCAL_NUMBER_WIDTH must be between 1 and {}, got {}",
            MAX_NUMBER_WIDTH,
            settings.number_width
        )));
    }
    if settings.payment_terms_days < 0 {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "PAYMENT_TERMS_DAYS must not be negative"
        )));
    }
    validate_document_type(&settings.default_document_type).map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("DEFAULT_DOCUMENT_TYPE: {}", e))
    })?;
    Ok(())
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("Invalid {}={}: {}", key, raw, e))
        }),
        Err(_) => Ok(default),
    }
}
