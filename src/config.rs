use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_INITIAL_CAPITAL: f64 = 100_000.0;
pub const DEFAULT_LOOKBACK_BUFFER_DAYS: i64 = 365;
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.02;
pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_TICKER: &str = "AAPL";
pub const DEFAULT_START_DATE: &str = "2024-06-01";
pub const DEFAULT_END_DATE: &str = "2024-11-30";

/// Runtime settings for backtest runs, resolved from a string map (normally the
/// process environment). Every key is optional and falls back to its default.
#[derive(Debug, Clone)]
pub struct BacktestSettings {
    pub initial_capital: f64,
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub output_dir: PathBuf,
    pub lookback_buffer_days: i64,
    pub risk_free_rate: f64,
    pub agent_url: Option<String>,
    pub agent_timeout: Duration,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            data_dir: PathBuf::from("data"),
            cache_dir: PathBuf::from("data_cache"),
            output_dir: PathBuf::from("results"),
            lookback_buffer_days: DEFAULT_LOOKBACK_BUFFER_DAYS,
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
            agent_url: None,
            agent_timeout: Duration::from_secs(DEFAULT_AGENT_TIMEOUT_SECS),
        }
    }
}

impl BacktestSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let initial_capital = optional_setting_f64(settings, "BACKTEST_INITIAL_CAPITAL", None, None)?
            .unwrap_or(defaults.initial_capital);
        if initial_capital <= 0.0 {
            return Err(anyhow!(
                "Setting BACKTEST_INITIAL_CAPITAL must be > 0 (value: {})",
                initial_capital
            ));
        }

        let lookback_buffer_days =
            optional_setting_usize(settings, "BACKTEST_LOOKBACK_BUFFER_DAYS", 0)?
                .map(|days| days as i64)
                .unwrap_or(defaults.lookback_buffer_days);
        let risk_free_rate =
            optional_setting_f64(settings, "BACKTEST_RISK_FREE_RATE", Some(0.0), Some(1.0))?
                .unwrap_or(defaults.risk_free_rate);
        let agent_timeout = optional_setting_usize(settings, "AGENT_TIMEOUT_SECS", 1)?
            .map(|secs| Duration::from_secs(secs as u64))
            .unwrap_or(defaults.agent_timeout);

        Ok(Self {
            initial_capital,
            data_dir: optional_setting(settings, "BACKTEST_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            cache_dir: optional_setting(settings, "BACKTEST_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            output_dir: optional_setting(settings, "BACKTEST_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            lookback_buffer_days,
            risk_free_rate,
            agent_url: optional_setting(settings, "AGENT_URL").map(str::to_string),
            agent_timeout,
        })
    }

    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self> {
        let settings: HashMap<String, String> = env::vars().collect();
        Self::from_settings_map(&settings)
    }
}

pub fn parse_date(key: &str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        anyhow!(
            "{} must be a date in YYYY-MM-DD format (value: {})",
            key,
            raw
        )
    })
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn optional_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<Option<f64>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(Some(value))
}

fn optional_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> Result<Option<usize>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(Some(value as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_map_yields_defaults() {
        let parsed = BacktestSettings::from_settings_map(&HashMap::new()).unwrap();
        assert_eq!(parsed.initial_capital, 100_000.0);
        assert_eq!(parsed.lookback_buffer_days, 365);
        assert_eq!(parsed.risk_free_rate, 0.02);
        assert_eq!(parsed.data_dir, PathBuf::from("data"));
        assert_eq!(parsed.cache_dir, PathBuf::from("data_cache"));
        assert_eq!(parsed.output_dir, PathBuf::from("results"));
        assert!(parsed.agent_url.is_none());
        assert_eq!(parsed.agent_timeout, Duration::from_secs(600));
    }

    #[test]
    fn overrides_are_applied() {
        let parsed = BacktestSettings::from_settings_map(&settings(&[
            ("BACKTEST_INITIAL_CAPITAL", "25000"),
            ("BACKTEST_LOOKBACK_BUFFER_DAYS", "30"),
            ("BACKTEST_OUTPUT_DIR", " out "),
            ("AGENT_URL", "http://localhost:8000/decide"),
            ("AGENT_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(parsed.initial_capital, 25_000.0);
        assert_eq!(parsed.lookback_buffer_days, 30);
        assert_eq!(parsed.output_dir, PathBuf::from("out"));
        assert_eq!(
            parsed.agent_url.as_deref(),
            Some("http://localhost:8000/decide")
        );
        assert_eq!(parsed.agent_timeout, Duration::from_secs(5));
    }

    #[test]
    fn invalid_values_name_the_setting() {
        let err = BacktestSettings::from_settings_map(&settings(&[(
            "BACKTEST_INITIAL_CAPITAL",
            "lots",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("BACKTEST_INITIAL_CAPITAL"));

        let err =
            BacktestSettings::from_settings_map(&settings(&[("BACKTEST_INITIAL_CAPITAL", "0")]))
                .unwrap_err();
        assert!(err.to_string().contains("> 0"));

        let err =
            BacktestSettings::from_settings_map(&settings(&[("BACKTEST_RISK_FREE_RATE", "1.5")]))
                .unwrap_err();
        assert!(err.to_string().contains("BACKTEST_RISK_FREE_RATE"));

        let err = BacktestSettings::from_settings_map(&settings(&[(
            "BACKTEST_LOOKBACK_BUFFER_DAYS",
            "2.5",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("integer"));

        let err = BacktestSettings::from_settings_map(&settings(&[("AGENT_TIMEOUT_SECS", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("AGENT_TIMEOUT_SECS"));
    }

    #[test]
    fn parses_iso_dates() {
        assert_eq!(
            parse_date("start", "2024-06-01").unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
        );
        assert!(parse_date("start", "06/01/2024").is_err());
    }
}
