use crate::config::DEFAULT_RISK_FREE_RATE;
use crate::models::{Trade, TradeAction};
use serde::{Serialize, Serializer};
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, BTreeSet};

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

const PRIORITY_KEYS: [&str; 6] = ["CR%", "ARR%", "Sharpe", "MDD%", "Volatility%", "Num Trades"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub cumulative_return_pct: f64,
    pub annualized_return_pct: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown_pct: f64,
    pub volatility_pct: f64,
    pub num_trades: usize,
    pub win_rate_pct: Option<f64>,
    pub profit_factor: Option<f64>,
}

impl PerformanceMetrics {
    pub fn zero() -> Self {
        Self {
            cumulative_return_pct: 0.0,
            annualized_return_pct: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown_pct: 0.0,
            volatility_pct: 0.0,
            num_trades: 0,
            win_rate_pct: None,
            profit_factor: None,
        }
    }

    /// Display/report map keyed by the short metric labels, floats rounded to 2 decimals.
    /// A win rate or profit factor of exactly zero is reported as missing.
    pub fn summary(&self) -> MetricsSummary {
        let mut summary = BTreeMap::new();
        summary.insert("CR%".to_string(), MetricValue::float(self.cumulative_return_pct));
        summary.insert("ARR%".to_string(), MetricValue::float(self.annualized_return_pct));
        summary.insert("Sharpe".to_string(), MetricValue::float(self.sharpe_ratio));
        summary.insert("MDD%".to_string(), MetricValue::float(self.max_drawdown_pct));
        summary.insert("Volatility%".to_string(), MetricValue::float(self.volatility_pct));
        summary.insert("Num Trades".to_string(), MetricValue::Int(self.num_trades));
        summary.insert(
            "Win Rate%".to_string(),
            optional_float(self.win_rate_pct),
        );
        summary.insert(
            "Profit Factor".to_string(),
            optional_float(self.profit_factor),
        );
        summary
    }
}

pub type MetricsSummary = BTreeMap<String, MetricValue>;

/// One cell of the metrics summary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Float(f64),
    Int(usize),
    Missing,
}

impl MetricValue {
    fn float(value: f64) -> Self {
        MetricValue::Float(round2(value))
    }
}

fn optional_float(value: Option<f64>) -> MetricValue {
    value
        .filter(|v| *v != 0.0)
        .map_or(MetricValue::Missing, MetricValue::float)
}

impl Serialize for MetricValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MetricValue::Float(value) if value.is_nan() => serializer.serialize_str("NaN"),
            MetricValue::Float(value) if value.is_infinite() => {
                serializer.serialize_str(if *value > 0.0 { "Infinity" } else { "-Infinity" })
            }
            MetricValue::Float(value) => serializer.serialize_f64(*value),
            MetricValue::Int(value) => serializer.serialize_u64(*value as u64),
            MetricValue::Missing => serializer.serialize_none(),
        }
    }
}

fn round2(value: f64) -> f64 {
    if value.is_finite() {
        (value * 100.0).round() / 100.0
    } else {
        value
    }
}

/// Return and risk statistics over a daily portfolio value series.
#[derive(Debug, Clone, Copy)]
pub struct MetricsCalculator {
    pub risk_free_rate: f64,
}

impl Default for MetricsCalculator {
    fn default() -> Self {
        Self {
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
        }
    }
}

impl MetricsCalculator {
    pub fn new(risk_free_rate: f64) -> Self {
        Self { risk_free_rate }
    }

    pub fn calculate_all_metrics(&self, values: &[f64], trades: &[Trade]) -> PerformanceMetrics {
        if values.len() < 2 {
            return PerformanceMetrics::zero();
        }

        let daily_returns = Self::daily_returns(values);

        PerformanceMetrics {
            cumulative_return_pct: Self::cumulative_return(values),
            annualized_return_pct: Self::annualized_return(values),
            sharpe_ratio: self.sharpe_ratio(&daily_returns),
            max_drawdown_pct: Self::max_drawdown(values),
            volatility_pct: Self::volatility(&daily_returns),
            num_trades: trades.len(),
            win_rate_pct: Self::win_rate(trades),
            profit_factor: Self::profit_factor(trades),
        }
    }

    /// Day-over-day fractional changes; undefined steps (e.g. from a zero value) are dropped.
    pub fn daily_returns(values: &[f64]) -> Vec<f64> {
        values
            .windows(2)
            .map(|window| window[1] / window[0] - 1.0)
            .filter(|r| r.is_finite())
            .collect()
    }

    pub fn cumulative_return(values: &[f64]) -> f64 {
        let (Some(first), Some(last)) = (values.first(), values.last()) else {
            return 0.0;
        };
        if *first == 0.0 {
            return 0.0;
        }
        (last / first - 1.0) * 100.0
    }

    pub fn annualized_return(values: &[f64]) -> f64 {
        let n = values.len();
        if n < 2 || values[0] == 0.0 {
            return 0.0;
        }
        let total_return = values[n - 1] / values[0];
        let years = n as f64 / TRADING_DAYS_PER_YEAR;
        (total_return.powf(1.0 / years) - 1.0) * 100.0
    }

    pub fn sharpe_ratio(&self, daily_returns: &[f64]) -> f64 {
        if daily_returns.len() < 2 {
            return 0.0;
        }
        let daily_rf = self.risk_free_rate / TRADING_DAYS_PER_YEAR;
        let excess_return = daily_returns.mean() - daily_rf;
        let std_dev = daily_returns.std_dev();
        if std_dev == 0.0 || !std_dev.is_finite() {
            return 0.0;
        }
        excess_return / std_dev * TRADING_DAYS_PER_YEAR.sqrt()
    }

    /// Largest peak-to-trough decline, as a positive percentage.
    pub fn max_drawdown(values: &[f64]) -> f64 {
        if values.len() < 2 {
            return 0.0;
        }
        let mut running_max = f64::NEG_INFINITY;
        let mut worst = 0.0_f64;
        for value in values {
            running_max = running_max.max(*value);
            if running_max > 0.0 {
                let drawdown = (value - running_max) / running_max;
                worst = worst.min(drawdown);
            }
        }
        worst.abs() * 100.0
    }

    pub fn volatility(daily_returns: &[f64]) -> f64 {
        if daily_returns.len() < 2 {
            return 0.0;
        }
        daily_returns.std_dev() * TRADING_DAYS_PER_YEAR.sqrt() * 100.0
    }

    fn closed_pnls(trades: &[Trade]) -> Vec<f64> {
        trades
            .iter()
            .filter(|t| t.action == TradeAction::Sell)
            .filter_map(|t| t.realized_pnl)
            .collect()
    }

    /// Share of closing trades with a positive realized P&L.
    pub fn win_rate(trades: &[Trade]) -> Option<f64> {
        let pnls = Self::closed_pnls(trades);
        if pnls.is_empty() {
            return None;
        }
        let winners = pnls.iter().filter(|pnl| **pnl > 0.0).count();
        Some(winners as f64 / pnls.len() as f64 * 100.0)
    }

    pub fn profit_factor(trades: &[Trade]) -> Option<f64> {
        let pnls = Self::closed_pnls(trades);
        if pnls.is_empty() {
            return None;
        }
        let gross_profit: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
        let gross_loss: f64 = pnls.iter().filter(|p| **p < 0.0).sum::<f64>().abs();
        if gross_loss == 0.0 {
            return Some(if gross_profit > 0.0 { f64::INFINITY } else { 0.0 });
        }
        Some(gross_profit / gross_loss)
    }
}

/// Side-by-side comparison of metric summaries, one column per strategy.
pub fn format_metrics_table(metrics_list: &[MetricsSummary], names: &[String]) -> String {
    if metrics_list.is_empty() || names.is_empty() || metrics_list.len() != names.len() {
        return "Invalid metrics data".to_string();
    }

    let all_keys: BTreeSet<&str> = metrics_list
        .iter()
        .flat_map(|m| m.keys().map(String::as_str))
        .collect();
    let mut key_order: Vec<&str> = PRIORITY_KEYS
        .iter()
        .copied()
        .filter(|k| all_keys.contains(k))
        .collect();
    key_order.extend(all_keys.iter().copied().filter(|k| !PRIORITY_KEYS.contains(k)));

    let mut lines = Vec::with_capacity(key_order.len() + 2);
    let mut header = format!("{:<20}", "Metric");
    for name in names {
        header.push_str(&format!("{:>15}", name));
    }
    lines.push(header);
    lines.push("-".repeat(20 + 15 * names.len()));

    for key in key_order {
        let mut row = format!("{:<20}", key);
        let percent = ["Rate", "Return", "MDD", "Volatility"]
            .iter()
            .any(|marker| key.contains(marker));
        for metrics in metrics_list {
            let cell = match metrics.get(key).copied().unwrap_or(MetricValue::Missing) {
                MetricValue::Missing => format!("{:>15}", "N/A"),
                MetricValue::Float(value) if percent => format!("{:>14.2}%", value),
                MetricValue::Float(value) => format!("{:>15.2}", value),
                MetricValue::Int(value) => format!("{:>15}", value),
            };
            row.push_str(&cell);
        }
        lines.push(row);
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sell(pnl: f64) -> Trade {
        Trade {
            date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            ticker: "AAPL".to_string(),
            action: TradeAction::Sell,
            shares: 1.0,
            price: 100.0,
            value: 100.0,
            realized_pnl: Some(pnl),
        }
    }

    fn buy() -> Trade {
        Trade {
            action: TradeAction::Buy,
            realized_pnl: None,
            ..sell(0.0)
        }
    }

    #[test]
    fn cumulative_return_and_drawdown() {
        assert!((MetricsCalculator::cumulative_return(&[100_000.0, 110_000.0]) - 10.0).abs() < 1e-9);
        assert!((MetricsCalculator::max_drawdown(&[100.0, 120.0, 90.0, 110.0]) - 25.0).abs() < 1e-9);
        assert_eq!(MetricsCalculator::cumulative_return(&[0.0, 10.0]), 0.0);
    }

    #[test]
    fn short_series_yield_zero_metrics() {
        let calculator = MetricsCalculator::default();
        assert_eq!(calculator.calculate_all_metrics(&[], &[]), PerformanceMetrics::zero());
        let single = calculator.calculate_all_metrics(&[100.0], &[buy(), sell(5.0)]);
        assert_eq!(single, PerformanceMetrics::zero());
    }

    #[test]
    fn annualizes_over_trading_days() {
        let values = vec![100.0, 101.0, 102.0, 110.0];
        let expected = ((110.0_f64 / 100.0).powf(252.0 / 4.0) - 1.0) * 100.0;
        assert!((MetricsCalculator::annualized_return(&values) - expected).abs() < 1e-6);
    }

    #[test]
    fn sharpe_and_volatility_use_sample_std() {
        let values = [100.0, 110.0, 99.0, 108.9];
        let returns = MetricsCalculator::daily_returns(&values);
        assert_eq!(returns.len(), 3);

        let mean: f64 = (0.1 - 0.1 + 0.1) / 3.0;
        let var = ((0.1 - mean).powi(2) * 2.0 + (-0.1 - mean).powi(2)) / 2.0;
        let std_dev = var.sqrt();
        let expected_sharpe = (mean - 0.02 / 252.0) / std_dev * 252.0_f64.sqrt();

        let calculator = MetricsCalculator::default();
        assert!((calculator.sharpe_ratio(&returns) - expected_sharpe).abs() < 1e-6);
        assert!(
            (MetricsCalculator::volatility(&returns) - std_dev * 252.0_f64.sqrt() * 100.0).abs()
                < 1e-6
        );
    }

    #[test]
    fn flat_series_has_no_risk() {
        let calculator = MetricsCalculator::default();
        let metrics = calculator.calculate_all_metrics(&[100.0, 100.0, 100.0], &[]);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_eq!(metrics.volatility_pct, 0.0);
        assert_eq!(metrics.max_drawdown_pct, 0.0);
        assert_eq!(metrics.win_rate_pct, None);
        assert_eq!(metrics.profit_factor, None);
    }

    #[test]
    fn zero_values_do_not_poison_returns() {
        let returns = MetricsCalculator::daily_returns(&[0.0, 100.0, 110.0]);
        assert_eq!(returns.len(), 1);
        assert!((returns[0] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn trade_statistics() {
        let trades = vec![buy(), sell(300.0), buy(), sell(-100.0), buy(), sell(100.0)];
        let win_rate = MetricsCalculator::win_rate(&trades).unwrap();
        assert!((win_rate - 200.0 / 3.0).abs() < 1e-9);
        assert!((MetricsCalculator::profit_factor(&trades).unwrap() - 4.0).abs() < 1e-9);

        assert_eq!(
            MetricsCalculator::profit_factor(&[buy(), sell(50.0)]),
            Some(f64::INFINITY)
        );
        assert_eq!(MetricsCalculator::profit_factor(&[sell(0.0)]), Some(0.0));
        assert_eq!(MetricsCalculator::win_rate(&[buy()]), None);
        assert_eq!(MetricsCalculator::win_rate(&[sell(-1.0)]), Some(0.0));
    }

    #[test]
    fn summary_rounds_and_serializes_non_finite_values() {
        let metrics = PerformanceMetrics {
            cumulative_return_pct: 12.345,
            annualized_return_pct: 30.0,
            sharpe_ratio: 1.234_9,
            max_drawdown_pct: 5.0,
            volatility_pct: 20.0,
            num_trades: 2,
            win_rate_pct: Some(100.0),
            profit_factor: Some(f64::INFINITY),
        };
        let summary = metrics.summary();
        assert_eq!(summary["Sharpe"], MetricValue::Float(1.23));
        assert_eq!(summary["Num Trades"], MetricValue::Int(2));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["Profit Factor"], "Infinity");
        assert_eq!(json["Num Trades"], 2);
        assert!(json["Win Rate%"].is_number());

        let empty = PerformanceMetrics::zero().summary();
        let json = serde_json::to_value(&empty).unwrap();
        assert!(json["Win Rate%"].is_null());
    }

    #[test]
    fn comparison_table_layout() {
        let first = PerformanceMetrics {
            cumulative_return_pct: 10.0,
            win_rate_pct: Some(50.0),
            num_trades: 3,
            ..PerformanceMetrics::zero()
        }
        .summary();
        let second = PerformanceMetrics::zero().summary();
        let names = vec!["Buy & Hold".to_string(), "RSI(14)".to_string()];

        let table = format_metrics_table(&[first, second], &names);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines[0], format!("{:<20}{:>15}{:>15}", "Metric", "Buy & Hold", "RSI(14)"));
        assert_eq!(lines[1], "-".repeat(50));
        assert_eq!(lines[2], format!("{:<20}{:>15}{:>15}", "CR%", "10.00", "0.00"));
        assert_eq!(lines[5], format!("{:<20}{:>14}%{:>14}%", "MDD%", "0.00", "0.00"));
        assert_eq!(lines[7], format!("{:<20}{:>15}{:>15}", "Num Trades", "3", "0"));
        assert_eq!(lines[8], format!("{:<20}{:>15}{:>15}", "Profit Factor", "N/A", "N/A"));
        assert_eq!(lines[9], format!("{:<20}{:>14}%{:>15}", "Win Rate%", "50.00", "N/A"));
        assert_eq!(lines.len(), 10);
    }

    #[test]
    fn zero_win_rate_and_profit_factor_are_reported_missing() {
        let losing = PerformanceMetrics {
            num_trades: 2,
            win_rate_pct: Some(0.0),
            profit_factor: Some(0.0),
            ..PerformanceMetrics::zero()
        };
        let summary = losing.summary();
        assert_eq!(summary["Win Rate%"], MetricValue::Missing);
        assert_eq!(summary["Profit Factor"], MetricValue::Missing);
        assert_eq!(summary["Num Trades"], MetricValue::Int(2));

        let json = serde_json::to_value(&summary).unwrap();
        assert!(json["Win Rate%"].is_null());
        assert!(json["Profit Factor"].is_null());

        let table = format_metrics_table(&[summary], &["RSI(14)".to_string()]);
        assert!(table.contains(&format!("{:<20}{:>15}", "Win Rate%", "N/A")));
        assert!(table.contains(&format!("{:<20}{:>15}", "Profit Factor", "N/A")));

        let tiny = PerformanceMetrics {
            win_rate_pct: Some(0.001),
            ..PerformanceMetrics::zero()
        };
        assert_eq!(tiny.summary()["Win Rate%"], MetricValue::Float(0.0));
    }

    #[test]
    fn comparison_table_rejects_mismatched_input() {
        let summary = PerformanceMetrics::zero().summary();
        assert_eq!(format_metrics_table(&[], &[]), "Invalid metrics data");
        assert_eq!(
            format_metrics_table(&[summary], &["a".to_string(), "b".to_string()]),
            "Invalid metrics data"
        );
    }
}
