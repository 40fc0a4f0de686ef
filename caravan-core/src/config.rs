//! Run-wide tunables.
//!
//! Loaded once from JSON (or taken from [`SimConfig::builtin`]) and shared by
//! reference for the rest of the run. Nothing in the engine mutates it.

use std::{fs, io, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::Role;
use crate::types::Millis;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse simulation config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read simulation config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Length of one day in milliseconds.
    pub day_length: Millis,
    pub days_per_year: u32,
    /// Step between holding updates in milliseconds.
    pub holding_update_time: Millis,
    /// Period between agent decision passes in milliseconds.
    pub decision_time: Millis,
    /// Share of value a settlement passes on in a trade, in (0, 1].
    pub settlement_margin: f64,
    /// Price floor is `intercept / min_price_divisor`.
    pub min_price_divisor: f64,
    pub consumption_space_factor: f64,
    pub input_space_factor: f64,
    pub output_space_factor: f64,
    /// Net carry of a bare traveler; negative means spare capacity.
    pub traveler_carry: f64,
    pub criteria_max: f64,
    pub limit_factor_min: f64,
    pub limit_factor_max: f64,
    pub attack_threshold: f64,
    /// Depth of the nearby-settlement walk.
    pub town_range: u32,
    pub role_weights: Vec<(Role, f64)>,
    pub equip_utility_scale: f64,
    /// Days of production counted when projecting plan profit.
    pub plan_horizon_days: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            day_length: 1000,
            days_per_year: 365,
            holding_update_time: 500,
            decision_time: 1500,
            settlement_margin: 0.9,
            min_price_divisor: 63.0,
            consumption_space_factor: 4.0,
            input_space_factor: 8.0,
            output_space_factor: 2.0,
            traveler_carry: -16.0,
            criteria_max: 9.0,
            limit_factor_min: 0.1,
            limit_factor_max: 0.9,
            attack_threshold: 10.0,
            town_range: 2,
            role_weights: vec![
                (Role::Trader, 16.0),
                (Role::Soldier, 2.0),
                (Role::Bandit, 2.0),
                (Role::Agent, 1.0),
                (Role::Guard, 2.0),
                (Role::Thug, 1.0),
            ],
            equip_utility_scale: 0.001,
            plan_horizon_days: 30.0,
        }
    }
}

impl SimConfig {
    pub fn builtin() -> Self {
        Self::default()
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Load from `path`, falling back to the builtin defaults on failure.
    #[cfg_attr(not(feature = "instrument"), allow(unused_variables))]
    pub fn load_or_builtin(path: &Path) -> Self {
        match Self::from_file(path) {
            Ok(config) => {
                #[cfg(feature = "instrument")]
                tracing::info!(target: "config", path = %path.display(), "config.loaded=file");
                config
            }
            Err(err) => {
                #[cfg(feature = "instrument")]
                tracing::warn!(target: "config", path = %path.display(), error = %err, "config.load_failed");
                Self::builtin()
            }
        }
    }

    /// Milliseconds in one year; converts shelf lives in years to expiry windows.
    pub fn year_length(&self) -> Millis {
        self.day_length * Millis::from(self.days_per_year)
    }

    /// Fraction of a production day covered by `elapsed`.
    pub fn tick_fraction(&self, elapsed: Millis) -> f64 {
        if self.day_length <= 0 {
            return 0.0;
        }
        elapsed as f64 / self.day_length as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SimConfig::from_json_str(r#"{ "settlement_margin": 0.8, "town_range": 3 }"#)
            .expect("valid config");
        assert_eq!(config.settlement_margin, 0.8);
        assert_eq!(config.town_range, 3);
        assert_eq!(config.day_length, SimConfig::default().day_length);
    }

    #[test]
    fn test_bad_json_is_parse_error() {
        let err = SimConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = SimConfig::load_or_builtin(Path::new("/definitely/not/here.json"));
        assert_eq!(config.decision_time, SimConfig::default().decision_time);
    }

    #[test]
    fn test_year_length() {
        let config = SimConfig::default();
        assert_eq!(config.year_length(), 365_000);
        assert_eq!(config.tick_fraction(500), 0.5);
    }
}
