//! Cash and share accounting for a single backtest run.

use crate::models::{PortfolioValuePoint, Trade, TradeAction};
use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Tolerance on cash checks so a full-cash buy survives float rounding.
pub const CASH_TOLERANCE: f64 = 0.01;

/// Shares held in one symbol and their weighted average cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub shares: f64,
    pub avg_price: f64,
}

impl Position {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            shares: 0.0,
            avg_price: 0.0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.shares <= 0.0
    }

    pub fn cost_basis(&self) -> f64 {
        self.shares * self.avg_price
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.shares * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.market_value(price) - self.cost_basis()
    }

    pub fn buy(&mut self, shares: f64, price: f64) {
        let total_cost = self.cost_basis() + shares * price;
        self.shares += shares;
        if self.shares > 0.0 {
            self.avg_price = total_cost / self.shares;
        }
    }

    /// Removes up to `shares` (clamped to what is held) and returns the realized P&L.
    pub fn sell(&mut self, shares: f64, price: f64) -> f64 {
        let sold = shares.min(self.shares);
        let realized_pnl = sold * (price - self.avg_price);
        self.shares -= sold;
        if self.shares <= 0.0 {
            self.shares = 0.0;
            self.avg_price = 0.0;
        }
        realized_pnl
    }
}

/// Immutable end-of-day capture of the portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub date: NaiveDate,
    pub cash: f64,
    pub positions: BTreeMap<String, Position>,
    pub prices: HashMap<String, f64>,
}

impl PortfolioSnapshot {
    /// Cash plus marked positions; a symbol without a price is valued at 0.
    pub fn total_value(&self) -> f64 {
        let positions_value: f64 = self
            .positions
            .iter()
            .map(|(symbol, pos)| pos.market_value(self.prices.get(symbol).copied().unwrap_or(0.0)))
            .sum();
        self.cash + positions_value
    }

    pub fn total_return(&self, initial_value: f64) -> f64 {
        if initial_value == 0.0 {
            return 0.0;
        }
        (self.total_value() - initial_value) / initial_value
    }
}

/// Identifies the run a portfolio belongs to, so observers shared by parallel
/// runs can tell their events apart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLabel {
    pub run_id: Uuid,
    pub strategy: String,
}

impl RunLabel {
    pub fn new(run_id: Uuid, strategy: impl Into<String>) -> Self {
        Self {
            run_id,
            strategy: strategy.into(),
        }
    }
}

/// Receives portfolio events as they happen. Both hooks are optional.
pub trait PortfolioObserver: Send + Sync {
    fn on_trade(&self, _run: &RunLabel, _trade: &Trade) {}
    fn on_snapshot(&self, _run: &RunLabel, _snapshot: &PortfolioSnapshot) {}
}

pub struct Portfolio {
    initial_capital: f64,
    cash: f64,
    positions: BTreeMap<String, Position>,
    history: Vec<PortfolioSnapshot>,
    trades: Vec<Trade>,
    run: RunLabel,
    observers: Vec<Arc<dyn PortfolioObserver>>,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Self::with_observers(initial_capital, Vec::new())
    }

    pub fn with_observers(initial_capital: f64, observers: Vec<Arc<dyn PortfolioObserver>>) -> Self {
        Self {
            initial_capital,
            cash: initial_capital,
            positions: BTreeMap::new(),
            history: Vec::new(),
            trades: Vec::new(),
            run: RunLabel::default(),
            observers,
        }
    }

    /// Label passed to observers with every event.
    pub fn with_run_label(mut self, run: RunLabel) -> Self {
        self.run = run;
        self
    }

    pub fn run_label(&self) -> &RunLabel {
        &self.run
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn position(&self, ticker: &str) -> Option<&Position> {
        self.positions.get(ticker)
    }

    pub fn shares(&self, ticker: &str) -> f64 {
        self.positions.get(ticker).map(|p| p.shares).unwrap_or(0.0)
    }

    pub fn positions(&self) -> &BTreeMap<String, Position> {
        &self.positions
    }

    pub fn history(&self) -> &[PortfolioSnapshot] {
        &self.history
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Buys `shares` at `price`. Returns false, leaving everything untouched,
    /// when `shares` is not positive, `price` is negative or non-finite, or the
    /// cost exceeds cash.
    pub fn buy(&mut self, ticker: &str, shares: f64, price: f64, date: NaiveDate) -> bool {
        if !is_positive_finite(shares) || !price.is_finite() || price < 0.0 {
            debug!(
                "Rejected buy of {} {} @ {}: invalid quantity or price",
                shares, ticker, price
            );
            return false;
        }
        let cost = shares * price;
        if cost > self.cash + CASH_TOLERANCE {
            debug!(
                "Rejected buy of {:.4} {} @ {:.2}: cost {:.2} exceeds cash {:.2}",
                shares, ticker, price, cost, self.cash
            );
            return false;
        }

        self.cash -= cost;
        self.positions
            .entry(ticker.to_string())
            .or_insert_with(|| Position::new(ticker))
            .buy(shares, price);

        self.push_trade(Trade {
            date,
            ticker: ticker.to_string(),
            action: TradeAction::Buy,
            shares,
            price,
            value: cost,
            realized_pnl: None,
        });
        true
    }

    /// Sells `shares` at `price`. Returns false when more shares are requested
    /// than are held (no partial fill) or the inputs are invalid.
    pub fn sell(&mut self, ticker: &str, shares: f64, price: f64, date: NaiveDate) -> bool {
        if !is_positive_finite(shares) || !price.is_finite() || price < 0.0 {
            debug!(
                "Rejected sell of {} {} @ {}: invalid quantity or price",
                shares, ticker, price
            );
            return false;
        }
        let Some(position) = self.positions.get_mut(ticker) else {
            debug!("Rejected sell of {} {}: no position", shares, ticker);
            return false;
        };
        if position.shares < shares {
            debug!(
                "Rejected sell of {:.4} {}: only {:.4} held",
                shares, ticker, position.shares
            );
            return false;
        }

        let proceeds = shares * price;
        let realized_pnl = position.sell(shares, price);
        self.cash += proceeds;

        self.push_trade(Trade {
            date,
            ticker: ticker.to_string(),
            action: TradeAction::Sell,
            shares,
            price,
            value: proceeds,
            realized_pnl: Some(realized_pnl),
        });
        true
    }

    pub fn get_total_value(&self, prices: &HashMap<String, f64>) -> f64 {
        let positions_value: f64 = self
            .positions
            .iter()
            .map(|(symbol, pos)| pos.market_value(prices.get(symbol).copied().unwrap_or(0.0)))
            .sum();
        self.cash + positions_value
    }

    /// Appends an end-of-day snapshot holding copies of the current positions.
    pub fn record_snapshot(&mut self, date: NaiveDate, prices: HashMap<String, f64>) {
        let snapshot = PortfolioSnapshot {
            date,
            cash: self.cash,
            positions: self.positions.clone(),
            prices,
        };
        for observer in &self.observers {
            observer.on_snapshot(&self.run, &snapshot);
        }
        self.history.push(snapshot);
    }

    pub fn history_points(&self) -> Vec<PortfolioValuePoint> {
        self.history
            .iter()
            .map(|snapshot| PortfolioValuePoint {
                date: snapshot.date,
                cash: snapshot.cash,
                total_value: snapshot.total_value(),
                total_return: snapshot.total_return(self.initial_capital),
            })
            .collect()
    }

    pub fn value_series(&self) -> Vec<f64> {
        self.history.iter().map(PortfolioSnapshot::total_value).collect()
    }

    /// Fraction of total value held as `CASH` and in each symbol. Empty when the
    /// portfolio is worth nothing.
    pub fn current_allocation(&self, prices: &HashMap<String, f64>) -> BTreeMap<String, f64> {
        let total = self.get_total_value(prices);
        let mut allocation = BTreeMap::new();
        if total == 0.0 {
            return allocation;
        }
        allocation.insert("CASH".to_string(), self.cash / total);
        for (symbol, pos) in &self.positions {
            let price = prices.get(symbol).copied().unwrap_or(0.0);
            allocation.insert(symbol.clone(), pos.market_value(price) / total);
        }
        allocation
    }

    fn push_trade(&mut self, trade: Trade) {
        for observer in &self.observers {
            observer.on_trade(&self.run, &trade);
        }
        self.trades.push(trade);
    }
}

fn is_positive_finite(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn prices(ticker: &str, price: f64) -> HashMap<String, f64> {
        HashMap::from([(ticker.to_string(), price)])
    }

    #[test]
    fn position_weighted_average_and_clamped_sell() {
        let mut position = Position::new("AAPL");
        position.buy(10.0, 100.0);
        position.buy(10.0, 200.0);
        assert!((position.avg_price - 150.0).abs() < 1e-9);
        assert!((position.unrealized_pnl(160.0) - 200.0).abs() < 1e-9);

        let pnl = position.sell(50.0, 170.0);
        assert!((pnl - 20.0 * 20.0).abs() < 1e-9);
        assert_eq!(position.shares, 0.0);
        assert_eq!(position.avg_price, 0.0);
    }

    #[test]
    fn buy_then_partial_sell_scenario() {
        let mut portfolio = Portfolio::new(100_000.0);
        assert!(portfolio.buy("AAPL", 1000.0, 50.0, day(3)));
        assert!((portfolio.cash() - 50_000.0).abs() < 1e-9);
        let position = portfolio.position("AAPL").unwrap();
        assert_eq!(position.shares, 1000.0);
        assert_eq!(position.avg_price, 50.0);

        assert!(portfolio.sell("AAPL", 500.0, 60.0, day(4)));
        assert!((portfolio.cash() - 80_000.0).abs() < 1e-9);
        let position = portfolio.position("AAPL").unwrap();
        assert_eq!(position.shares, 500.0);
        assert_eq!(position.avg_price, 50.0);

        let sell = &portfolio.trades()[1];
        assert_eq!(sell.action, TradeAction::Sell);
        assert!((sell.realized_pnl.unwrap() - 5_000.0).abs() < 1e-9);
        assert!((sell.value - 30_000.0).abs() < 1e-9);
        assert_eq!(portfolio.trades()[0].realized_pnl, None);
    }

    #[test]
    fn buy_beyond_cash_tolerance_is_rejected() {
        let mut portfolio = Portfolio::new(100_000.0);
        assert!(!portfolio.buy("AAPL", 1.0, 100_000.02, day(3)));
        assert_eq!(portfolio.cash(), 100_000.0);
        assert!(portfolio.trades().is_empty());
        assert!(portfolio.positions().is_empty());

        // Within a cent is accepted.
        assert!(portfolio.buy("AAPL", 1.0, 100_000.005, day(3)));
    }

    #[test]
    fn invalid_inputs_are_rejected_without_effect() {
        let mut portfolio = Portfolio::new(1_000.0);
        assert!(!portfolio.buy("AAPL", 0.0, 10.0, day(3)));
        assert!(!portfolio.buy("AAPL", 1.0, f64::NAN, day(3)));
        assert!(!portfolio.buy("AAPL", -1.0, 10.0, day(3)));
        assert!(!portfolio.sell("AAPL", 1.0, 10.0, day(3)));
        assert!(portfolio.positions().is_empty());
        assert!(portfolio.trades().is_empty());
        assert_eq!(portfolio.cash(), 1_000.0);
    }

    #[test]
    fn zero_price_buy_is_accepted_at_no_cost() {
        let mut portfolio = Portfolio::new(1_000.0);
        assert!(portfolio.buy("AAPL", 10.0, 0.0, day(3)));
        assert_eq!(portfolio.cash(), 1_000.0);
        let position = portfolio.position("AAPL").unwrap();
        assert_eq!(position.shares, 10.0);
        assert_eq!(position.avg_price, 0.0);
        assert_eq!(portfolio.trades()[0].value, 0.0);

        assert!(!portfolio.buy("AAPL", 1.0, -0.01, day(3)));
        assert!(!portfolio.buy("AAPL", 1.0, f64::INFINITY, day(3)));
        assert_eq!(portfolio.trades().len(), 1);
    }

    #[test]
    fn oversized_sell_is_rejected() {
        let mut portfolio = Portfolio::new(1_000.0);
        assert!(portfolio.buy("AAPL", 5.0, 100.0, day(3)));
        assert!(!portfolio.sell("AAPL", 6.0, 100.0, day(4)));
        assert_eq!(portfolio.shares("AAPL"), 5.0);
        assert!((portfolio.cash() - 500.0).abs() < 1e-9);
        assert_eq!(portfolio.trades().len(), 1);
    }

    #[test]
    fn round_trip_at_same_price_restores_cash() {
        let mut portfolio = Portfolio::new(10_000.0);
        let shares = 10_000.0 / 37.0;
        assert!(portfolio.buy("MSFT", shares, 37.0, day(3)));
        assert!(portfolio.sell("MSFT", shares, 37.0, day(4)));
        assert!((portfolio.cash() - 10_000.0).abs() < 1e-6);
        assert!(portfolio.trades()[1].realized_pnl.unwrap().abs() < 1e-6);
        let position = portfolio.position("MSFT").unwrap();
        assert_eq!(position.shares, 0.0);
        assert_eq!(position.avg_price, 0.0);
    }

    #[test]
    fn snapshots_hold_independent_copies() {
        let mut portfolio = Portfolio::new(1_000.0);
        assert!(portfolio.buy("AAPL", 5.0, 100.0, day(3)));
        portfolio.record_snapshot(day(3), prices("AAPL", 110.0));
        assert!(portfolio.sell("AAPL", 5.0, 120.0, day(4)));
        portfolio.record_snapshot(day(4), prices("AAPL", 120.0));

        let first = &portfolio.history()[0];
        assert_eq!(first.positions["AAPL"].shares, 5.0);
        assert!((first.total_value() - 1_050.0).abs() < 1e-9);
        assert!((first.total_return(1_000.0) - 0.05).abs() < 1e-9);

        let points = portfolio.history_points();
        assert_eq!(points.len(), 2);
        assert!((points[1].total_value - 1_100.0).abs() < 1e-9);
        assert!((points[1].cash - 1_100.0).abs() < 1e-9);
    }

    #[test]
    fn missing_prices_value_positions_at_zero() {
        let mut portfolio = Portfolio::new(1_000.0);
        assert!(portfolio.buy("AAPL", 5.0, 100.0, day(3)));
        assert!((portfolio.get_total_value(&HashMap::new()) - 500.0).abs() < 1e-9);
        let snapshot = PortfolioSnapshot {
            date: day(3),
            cash: 0.0,
            positions: BTreeMap::new(),
            prices: HashMap::new(),
        };
        assert_eq!(snapshot.total_return(0.0), 0.0);
    }

    #[test]
    fn allocation_splits_cash_and_holdings() {
        let mut portfolio = Portfolio::new(1_000.0);
        assert!(portfolio.buy("AAPL", 5.0, 100.0, day(3)));
        let allocation = portfolio.current_allocation(&prices("AAPL", 100.0));
        assert!((allocation["CASH"] - 0.5).abs() < 1e-9);
        assert!((allocation["AAPL"] - 0.5).abs() < 1e-9);

        let empty = Portfolio::new(0.0);
        assert!(empty.current_allocation(&HashMap::new()).is_empty());
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl PortfolioObserver for Recorder {
        fn on_trade(&self, run: &RunLabel, trade: &Trade) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{}:trade:{}", run.strategy, trade.action));
        }

        fn on_snapshot(&self, run: &RunLabel, snapshot: &PortfolioSnapshot) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{}:snapshot:{}", run.strategy, snapshot.date));
        }
    }

    #[test]
    fn observers_see_events_in_order() {
        let recorder = Arc::new(Recorder::default());
        let run = RunLabel::new(Uuid::new_v4(), "SMA(5,20)");
        let mut portfolio =
            Portfolio::with_observers(1_000.0, vec![recorder.clone() as Arc<dyn PortfolioObserver>])
                .with_run_label(run.clone());
        assert_eq!(portfolio.run_label(), &run);
        assert!(portfolio.buy("AAPL", 1.0, 100.0, day(3)));
        portfolio.record_snapshot(day(3), prices("AAPL", 100.0));
        assert!(!portfolio.sell("AAPL", 2.0, 100.0, day(4)));
        assert!(portfolio.sell("AAPL", 1.0, 100.0, day(4)));

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "SMA(5,20):trade:BUY",
                "SMA(5,20):snapshot:2024-06-03",
                "SMA(5,20):trade:SELL"
            ]
        );
    }
}
