use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "BUY",
            SignalAction::Sell => "SELL",
            SignalAction::Hold => "HOLD",
        }
    }

    /// Maps free-form decision text onto an action. "buy" wins over "sell" when both appear.
    pub fn from_decision_text(decision: &str) -> Self {
        let lowered = decision.to_lowercase();
        if lowered.contains("buy") {
            SignalAction::Buy
        } else if lowered.contains("sell") {
            SignalAction::Sell
        } else {
            SignalAction::Hold
        }
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An executed fill. `realized_pnl` is only populated for sells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub date: NaiveDate,
    pub ticker: String,
    pub action: TradeAction,
    pub shares: f64,
    pub price: f64,
    pub value: f64,
    pub realized_pnl: Option<f64>,
}

/// What a strategy reported for a given day. `Error` marks a day where the
/// strategy failed to produce a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalKind {
    Buy,
    Sell,
    Hold,
    Error,
}

impl From<SignalAction> for SignalKind {
    fn from(action: SignalAction) -> Self {
        match action {
            SignalAction::Buy => SignalKind::Buy,
            SignalAction::Sell => SignalKind::Sell,
            SignalAction::Hold => SignalKind::Hold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub date: NaiveDate,
    pub signal: SignalKind,
    pub price: f64,
    #[serde(default)]
    pub raw_decision: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One row of the per-day value history derived from portfolio snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioValuePoint {
    pub date: NaiveDate,
    pub cash: f64,
    pub total_value: f64,
    pub total_return: f64,
}
