use crate::backtester::BacktestResult;
use crate::models::Trade;
use crate::performance::MetricsSummary;
use crate::portfolio::{PortfolioObserver, RunLabel};
use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Serialize)]
struct MetricsReport<'a> {
    ticker: &'a str,
    strategy: &'a str,
    start_date: String,
    end_date: String,
    initial_capital: f64,
    final_value: f64,
    total_return_pct: f64,
    num_trades: usize,
    metrics: MetricsSummary,
}

/// Paths written by [`save_results`]. Trades and signals are only written when present.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedFiles {
    pub metrics: PathBuf,
    pub history: PathBuf,
    pub trades: Option<PathBuf>,
    pub signals: Option<PathBuf>,
}

/// `Buy & Hold` -> `Buy_Hold`, `SMA(50,200)` -> `SMA_50_200`.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '.' {
            out.push(ch);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

pub fn file_stem(result: &BacktestResult) -> String {
    format!(
        "{}_{}_{}_{}",
        sanitize_name(&result.ticker),
        sanitize_name(&result.strategy),
        result.start_date.format("%Y%m%d"),
        result.end_date.format("%Y%m%d")
    )
}

pub fn save_results(result: &BacktestResult, output_dir: &Path) -> Result<SavedFiles> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let stem = file_stem(result);
    let path_for = |suffix: &str| output_dir.join(format!("{}_{}", stem, suffix));

    let metrics_path = path_for("metrics.json");
    let report = MetricsReport {
        ticker: &result.ticker,
        strategy: &result.strategy,
        start_date: result.start_date.format("%Y-%m-%d").to_string(),
        end_date: result.end_date.format("%Y-%m-%d").to_string(),
        initial_capital: result.initial_capital,
        final_value: result.final_value,
        total_return_pct: result.total_return_pct,
        num_trades: result.num_trades,
        metrics: result.metrics.summary(),
    };
    let file = File::create(&metrics_path)
        .with_context(|| format!("failed to create {}", metrics_path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &report)
        .with_context(|| format!("failed to write {}", metrics_path.display()))?;

    let history_path = path_for("history.csv");
    write_csv(&history_path, &result.history)?;

    let trades = if result.trades.is_empty() {
        None
    } else {
        let path = path_for("trades.csv");
        write_csv(&path, &result.trades)?;
        Some(path)
    };

    let signals = if result.signals.is_empty() {
        None
    } else {
        let path = path_for("signals.csv");
        write_csv(&path, &result.signals)?;
        Some(path)
    };

    info!("Results saved to: {}", output_dir.join(format!("{}_*", stem)).display());
    Ok(SavedFiles {
        metrics: metrics_path,
        history: history_path,
        trades,
        signals,
    })
}

fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("failed to create {}", path.display()))?;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

/// One journal line: the trade plus the run it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    #[serde(flatten)]
    pub run: RunLabel,
    #[serde(flatten)]
    pub trade: Trade,
}

/// Appends every executed trade to a JSON-lines file. Lines from runs sharing
/// the journal are told apart by `run_id` and `strategy`.
pub struct JsonlTradeJournal {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlTradeJournal {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open trade journal {}", path.display()))?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, run: &RunLabel, trade: &Trade) -> Result<()> {
        let line = serde_json::to_string(&JournalEntry {
            run: run.clone(),
            trade: trade.clone(),
        })?;
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }
}

impl PortfolioObserver for JsonlTradeJournal {
    fn on_trade(&self, run: &RunLabel, trade: &Trade) {
        if let Err(err) = self.append(run, trade) {
            warn!("Failed to journal trade to {}: {:#}", self.path.display(), err);
        }
    }
}
