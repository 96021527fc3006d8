use crate::config::DEFAULT_INITIAL_CAPITAL;
use crate::data_loader::DataLoader;
use crate::error::DataError;
use crate::models::{PortfolioValuePoint, SignalAction, SignalRecord, Trade};
use crate::performance::{format_metrics_table, MetricsCalculator, PerformanceMetrics};
use crate::portfolio::{Portfolio, PortfolioObserver, RunLabel};
use crate::strategy::Strategy;
use anyhow::Result;
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

const PROGRESS_LOG_INTERVAL: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub id: Uuid,
    pub ticker: String,
    pub strategy: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub final_value: f64,
    pub total_return_pct: f64,
    pub num_trades: usize,
    pub metrics: PerformanceMetrics,
    pub history: Vec<PortfolioValuePoint>,
    pub trades: Vec<Trade>,
    pub signals: Vec<SignalRecord>,
}

/// One independent run for [`Backtester::run_batch`].
pub struct BacktestRequest {
    pub ticker: String,
    pub strategy: Box<dyn Strategy + Send + Sync>,
}

impl BacktestRequest {
    pub fn new(ticker: impl Into<String>, strategy: Box<dyn Strategy + Send + Sync>) -> Self {
        Self {
            ticker: ticker.into(),
            strategy,
        }
    }
}

pub struct BatchOutcome {
    pub ticker: String,
    pub strategy: String,
    pub result: Result<BacktestResult>,
}

/// Replays strategies day by day over historical prices.
pub struct Backtester {
    initial_capital: f64,
    data_loader: Arc<DataLoader>,
    metrics: MetricsCalculator,
    observers: Vec<Arc<dyn PortfolioObserver>>,
    show_progress: bool,
}

impl Backtester {
    pub fn new(initial_capital: f64, data_loader: Arc<DataLoader>) -> Self {
        Self {
            initial_capital,
            data_loader,
            metrics: MetricsCalculator::default(),
            observers: Vec::new(),
            show_progress: false,
        }
    }

    pub fn with_default_capital(data_loader: Arc<DataLoader>) -> Self {
        Self::new(DEFAULT_INITIAL_CAPITAL, data_loader)
    }

    pub fn with_metrics(mut self, metrics: MetricsCalculator) -> Self {
        self.metrics = metrics;
        self
    }

    /// Observers attached to the portfolio of every run. Events carry the run's
    /// [`RunLabel`], whose `run_id` matches [`BacktestResult::id`].
    pub fn with_observer(mut self, observer: Arc<dyn PortfolioObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_progress_bar(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn data_loader(&self) -> &DataLoader {
        &self.data_loader
    }

    pub fn run_backtest(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
        strategy: &mut dyn Strategy,
    ) -> Result<BacktestResult> {
        info!("{}", "=".repeat(60));
        info!("Running Backtest: {}", ticker);
        info!("Strategy: {}", strategy.name());
        info!("Period: {} to {}", start, end);
        info!("Initial Capital: ${:.2}", self.initial_capital);
        info!("{}", "=".repeat(60));

        let data = self.data_loader.load_data(ticker, start, end)?;
        let trading_days = self.data_loader.get_trading_days(ticker, start, end)?;
        if trading_days.is_empty() {
            return Err(DataError::NoTradingDays {
                ticker: ticker.to_string(),
                start,
                end,
            }
            .into());
        }
        info!("Total trading days: {}", trading_days.len());

        let run_id = Uuid::new_v4();
        let mut portfolio = Portfolio::with_observers(self.initial_capital, self.observers.clone())
            .with_run_label(RunLabel::new(run_id, strategy.name()));
        let total_days = trading_days.len();

        for (i, date) in trading_days.iter().copied().enumerate() {
            let current = DataLoader::get_data_up_to(&data, date);
            if current.len() < 2 {
                continue;
            }
            let price = current[current.len() - 1].close;

            let signal = match strategy.generate_signal(ticker, date, current) {
                Ok(signal) => signal,
                Err(err) => {
                    warn!("Error on {}: {:#}", date, err);
                    strategy
                        .signal_log_mut()
                        .record_error(date, price, format!("{:#}", err));
                    SignalAction::Hold
                }
            };

            match signal {
                SignalAction::Buy => {
                    let cash = portfolio.cash();
                    if cash > 0.0 && price.is_finite() && price > 0.0 {
                        let shares = cash / price;
                        if portfolio.buy(ticker, shares, price, date) {
                            info!("[{}] BUY {:.2} shares @ ${:.2}", date, shares, price);
                        }
                    }
                }
                SignalAction::Sell => {
                    let shares = portfolio.shares(ticker);
                    if shares > 0.0 && portfolio.sell(ticker, shares, price, date) {
                        info!("[{}] SELL {:.2} shares @ ${:.2}", date, shares, price);
                    }
                }
                SignalAction::Hold => {}
            }

            portfolio.record_snapshot(date, HashMap::from([(ticker.to_string(), price)]));

            if (i + 1) % PROGRESS_LOG_INTERVAL == 0 || i + 1 == total_days {
                info!(
                    "Progress: {:.1}% ({}/{} days)",
                    (i + 1) as f64 / total_days as f64 * 100.0,
                    i + 1,
                    total_days
                );
            }
        }

        let final_value = match data.iter().rev().find(|c| c.date <= end) {
            Some(last) => {
                portfolio.get_total_value(&HashMap::from([(ticker.to_string(), last.close)]))
            }
            None => portfolio.cash(),
        };

        let metrics = self
            .metrics
            .calculate_all_metrics(&portfolio.value_series(), portfolio.trades());

        let result = BacktestResult {
            id: run_id,
            ticker: ticker.to_string(),
            strategy: strategy.name().to_string(),
            start_date: start,
            end_date: end,
            initial_capital: self.initial_capital,
            final_value,
            total_return_pct: (final_value / self.initial_capital - 1.0) * 100.0,
            num_trades: portfolio.trades().len(),
            metrics,
            history: portfolio.history_points(),
            trades: portfolio.trades().to_vec(),
            signals: strategy.signal_log().entries().to_vec(),
        };

        log_summary(&result);
        Ok(result)
    }

    /// Runs independent requests in parallel. Each run owns its portfolio and
    /// strategy; only the data loader's cache is shared. Outcomes come back in
    /// request order and a failed run does not affect the others.
    pub fn run_batch(
        &self,
        requests: Vec<BacktestRequest>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<BatchOutcome> {
        let pb = if self.show_progress {
            let pb = ProgressBar::new(requests.len() as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb
        } else {
            ProgressBar::hidden()
        };

        let outcomes: Vec<BatchOutcome> = requests
            .into_par_iter()
            .map(|mut request| {
                let strategy_name = request.strategy.name().to_string();
                let result =
                    self.run_backtest(&request.ticker, start, end, request.strategy.as_mut());
                if let Err(err) = &result {
                    warn!(
                        "Backtest of {} on {} failed: {:#}",
                        strategy_name, request.ticker, err
                    );
                }
                pb.inc(1);
                BatchOutcome {
                    ticker: request.ticker,
                    strategy: strategy_name,
                    result,
                }
            })
            .collect();

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        if failed > 0 {
            pb.finish_with_message("Backtesting completed with errors");
        } else {
            pb.finish_with_message("Backtesting completed");
        }
        outcomes
    }

    /// Renders the side-by-side metrics table for results on one ticker.
    pub fn compare_strategies(&self, ticker: &str, results: &[BacktestResult]) -> String {
        info!("{}", "=".repeat(80));
        info!("STRATEGY COMPARISON: {}", ticker);
        info!("{}", "=".repeat(80));

        let summaries: Vec<_> = results.iter().map(|r| r.metrics.summary()).collect();
        let names: Vec<String> = results.iter().map(|r| r.strategy.clone()).collect();
        format_metrics_table(&summaries, &names)
    }
}

fn log_summary(result: &BacktestResult) {
    let metrics = &result.metrics;
    info!("{}", "=".repeat(60));
    info!("BACKTEST SUMMARY: {} - {}", result.ticker, result.strategy);
    info!("Period: {} to {}", result.start_date, result.end_date);
    info!("Initial Capital: ${:.2}", result.initial_capital);
    info!("Final Value: ${:.2}", result.final_value);
    info!("Total Return: {:.2}%", result.total_return_pct);
    info!("Number of Trades: {}", result.num_trades);
    info!("  Cumulative Return (CR%): {:.2}%", metrics.cumulative_return_pct);
    info!("  Annualized Return (ARR%): {:.2}%", metrics.annualized_return_pct);
    info!("  Sharpe Ratio: {:.2}", metrics.sharpe_ratio);
    info!("  Max Drawdown (MDD%): {:.2}%", metrics.max_drawdown_pct);
    info!("  Volatility: {:.2}%", metrics.volatility_pct);
    if let Some(win_rate) = metrics.win_rate_pct.filter(|v| *v != 0.0) {
        info!("  Win Rate: {:.2}%", win_rate);
    }
    info!("{}", "=".repeat(60));
}
