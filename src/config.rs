use std::env;
use std::time::Duration;

use chrono::TimeDelta;

use crate::engine::scoring::{CostModel, ScoringStrategy};
use crate::error::AppError;

/// One year.
const MAX_TOKEN_VALIDITY_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub auto_match_wait_ms: u64,
    pub verification_radius_m: f64,
    pub token_validity_hours: i64,
    pub scoring_strategy: ScoringStrategy,
    pub fuel_consumption_rate: f64,
    pub fuel_price_per_liter: f64,
    pub matching_shortlist: usize,
    pub auto_scheduler_enabled: bool,
    pub auto_scheduler_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let costs = CostModel::default();
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            event_buffer_size: 1024,
            auto_match_wait_ms: 3000,
            verification_radius_m: 100.0,
            token_validity_hours: 24,
            scoring_strategy: ScoringStrategy::Balanced,
            fuel_consumption_rate: costs.fuel_consumption_rate,
            fuel_price_per_liter: costs.fuel_price_per_liter,
            matching_shortlist: 5,
            auto_scheduler_enabled: false,
            auto_scheduler_interval_ms: 120_000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            auto_match_wait_ms: parse_or_default("AUTO_MATCH_WAIT_MS", defaults.auto_match_wait_ms)?,
            verification_radius_m: parse_or_default(
                "VERIFICATION_RADIUS_M",
                defaults.verification_radius_m,
            )?,
            token_validity_hours: parse_or_default(
                "TOKEN_VALIDITY_HOURS",
                defaults.token_validity_hours,
            )?,
            scoring_strategy: parse_or_default("SCORING_STRATEGY", defaults.scoring_strategy)?,
            fuel_consumption_rate: parse_or_default(
                "FUEL_CONSUMPTION_RATE",
                defaults.fuel_consumption_rate,
            )?,
            fuel_price_per_liter: parse_or_default(
                "FUEL_PRICE_PER_LITER",
                defaults.fuel_price_per_liter,
            )?,
            matching_shortlist: parse_or_default("MATCHING_SHORTLIST", defaults.matching_shortlist)?,
            auto_scheduler_enabled: parse_or_default(
                "AUTO_SCHEDULER_ENABLED",
                defaults.auto_scheduler_enabled,
            )?,
            auto_scheduler_interval_ms: parse_or_default(
                "AUTO_SCHEDULER_INTERVAL_MS",
                defaults.auto_scheduler_interval_ms,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would silently disable a check or overflow
    /// timestamp arithmetic later on.
    pub fn validate(&self) -> Result<(), AppError> {
        positive_finite("VERIFICATION_RADIUS_M", self.verification_radius_m)?;
        positive_finite("FUEL_CONSUMPTION_RATE", self.fuel_consumption_rate)?;
        positive_finite("FUEL_PRICE_PER_LITER", self.fuel_price_per_liter)?;

        if !(1..=MAX_TOKEN_VALIDITY_HOURS).contains(&self.token_validity_hours) {
            return Err(AppError::Internal(format!(
                "invalid TOKEN_VALIDITY_HOURS: must be between 1 and {MAX_TOKEN_VALIDITY_HOURS}"
            )));
        }
        if self.matching_shortlist == 0 {
            return Err(AppError::Internal(
                "invalid MATCHING_SHORTLIST: must be > 0".to_string(),
            ));
        }
        if self.auto_scheduler_interval_ms == 0 {
            return Err(AppError::Internal(
                "invalid AUTO_SCHEDULER_INTERVAL_MS: must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn auto_match_wait(&self) -> Duration {
        Duration::from_millis(self.auto_match_wait_ms)
    }

    pub fn auto_scheduler_interval(&self) -> Duration {
        Duration::from_millis(self.auto_scheduler_interval_ms)
    }

    pub fn token_validity(&self) -> TimeDelta {
        TimeDelta::try_hours(self.token_validity_hours)
            .unwrap_or_else(|| TimeDelta::hours(MAX_TOKEN_VALIDITY_HOURS))
    }

    pub fn cost_model(&self) -> CostModel {
        CostModel {
            fuel_consumption_rate: self.fuel_consumption_rate,
            fuel_price_per_liter: self.fuel_price_per_liter,
        }
    }
}

fn positive_finite(key: &str, value: f64) -> Result<(), AppError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(AppError::Internal(format!(
            "invalid {key}: must be a finite number > 0"
        )))
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn nan_radius_is_rejected() {
        let config = Config {
            verification_radius_m: f64::NAN,
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn unusable_fuel_costs_are_rejected() {
        for (rate, price) in [(f64::NAN, 1.5), (0.35, -1.0), (f64::INFINITY, 1.5), (0.35, 0.0)] {
            let config = Config {
                fuel_consumption_rate: rate,
                fuel_price_per_liter: price,
                ..Config::default()
            };
            assert!(config.validate().is_err(), "rate={rate} price={price}");
        }
    }

    #[test]
    fn token_validity_is_bounded() {
        for hours in [0, -5, 10_000_000_000] {
            let config = Config {
                token_validity_hours: hours,
                ..Config::default()
            };
            assert!(config.validate().is_err(), "hours={hours}");
        }

        let year = Config {
            token_validity_hours: 24 * 365,
            ..Config::default()
        };
        assert!(year.validate().is_ok());
        assert_eq!(year.token_validity().num_hours(), 24 * 365);
    }

    #[test]
    fn zero_shortlist_is_rejected() {
        let config = Config {
            matching_shortlist: 0,
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }
}
