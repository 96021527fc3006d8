use crate::cache::{CacheKey, PriceCache};
use crate::config::DEFAULT_LOOKBACK_BUFFER_DAYS;
use crate::error::DataError;
use crate::models::Candle;
use crate::report::sanitize_name;
use anyhow::{anyhow, Context, Result};
use chrono::{Duration, NaiveDate};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where daily candles come from.
pub trait PriceSource: Send + Sync {
    /// Candles for `ticker` dated within `[from, to]`, oldest first.
    fn fetch(&self, ticker: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<Candle>>;
}

/// Reads `<data_dir>/<TICKER>.csv` files with `Date,Open,High,Low,Close,Volume` columns.
pub struct CsvDirectorySource {
    data_dir: PathBuf,
}

impl CsvDirectorySource {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn file_for(&self, ticker: &str) -> Option<PathBuf> {
        [ticker.to_string(), ticker.to_uppercase()]
            .into_iter()
            .map(|name| self.data_dir.join(format!("{}.csv", name)))
            .find(|path| path.exists())
    }
}

struct ColumnMap {
    date: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord, path: &Path) -> Result<Self> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|header| header.trim().eq_ignore_ascii_case(name))
        };
        let require = |name: &str| {
            find(name).ok_or_else(|| anyhow!("{} is missing the {} column", path.display(), name))
        };
        Ok(Self {
            date: require("Date")?,
            open: require("Open")?,
            high: require("High")?,
            low: require("Low")?,
            close: require("Close")?,
            volume: find("Volume"),
        })
    }
}

fn parse_csv_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let day = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn parse_field(record: &csv::StringRecord, index: usize, column: &str, line: u64) -> Result<f64> {
    let raw = record.get(index).unwrap_or("").trim();
    raw.parse::<f64>()
        .map_err(|_| anyhow!("line {}: {} must be a number (value: {})", line, column, raw))
}

impl PriceSource for CsvDirectorySource {
    fn fetch(&self, ticker: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<Candle>> {
        let Some(path) = self.file_for(ticker) else {
            return Ok(Vec::new());
        };

        let file =
            File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(BufReader::new(file));
        let headers = reader
            .headers()
            .with_context(|| format!("failed to read header of {}", path.display()))?
            .clone();
        let columns = ColumnMap::from_headers(&headers, &path)?;

        let mut by_date: HashMap<NaiveDate, Candle> = HashMap::new();
        for result in reader.records() {
            let record = result.with_context(|| format!("malformed row in {}", path.display()))?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            let raw_date = record.get(columns.date).unwrap_or("");
            let date = parse_csv_date(raw_date)
                .ok_or_else(|| anyhow!("line {}: unreadable date '{}'", line, raw_date))?;
            if date < from || date > to {
                continue;
            }
            let volume = match columns.volume {
                Some(index) => record
                    .get(index)
                    .and_then(|raw| raw.trim().parse::<f64>().ok())
                    .unwrap_or(0.0),
                None => 0.0,
            };
            by_date.insert(
                date,
                Candle {
                    ticker: ticker.to_string(),
                    date,
                    open: parse_field(&record, columns.open, "Open", line)?,
                    high: parse_field(&record, columns.high, "High", line)?,
                    low: parse_field(&record, columns.low, "Low", line)?,
                    close: parse_field(&record, columns.close, "Close", line)?,
                    volume,
                },
            );
        }

        let mut candles: Vec<Candle> = by_date.into_values().collect();
        candles.sort_by_key(|c| c.date);
        debug!(
            "Read {} candles for {} from {}",
            candles.len(),
            ticker,
            path.display()
        );
        Ok(candles)
    }
}

/// Fixed candles per ticker, filtered by date on fetch.
#[derive(Default, Clone)]
pub struct InMemorySource {
    series: HashMap<String, Vec<Candle>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, ticker: &str, mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.date);
        self.series.insert(ticker.to_string(), candles);
        self
    }
}

impl PriceSource for InMemorySource {
    fn fetch(&self, ticker: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<Candle>> {
        Ok(self
            .series
            .get(ticker)
            .map(|candles| {
                candles
                    .iter()
                    .filter(|c| c.date >= from && c.date <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Price data access for backtests: a price source behind an in-memory cache
/// and an optional on-disk snapshot cache.
pub struct DataLoader {
    source: Arc<dyn PriceSource>,
    cache: PriceCache,
    cache_dir: Option<PathBuf>,
    lookback_buffer_days: i64,
}

impl DataLoader {
    pub fn new(source: Arc<dyn PriceSource>) -> Self {
        Self {
            source,
            cache: PriceCache::new(),
            cache_dir: None,
            lookback_buffer_days: DEFAULT_LOOKBACK_BUFFER_DAYS,
        }
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    pub fn with_lookback_buffer_days(mut self, days: i64) -> Self {
        self.lookback_buffer_days = days.max(0);
        self
    }

    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }

    /// Candles from `start - lookback buffer` through `end`, so indicators
    /// are warm on the first simulated day.
    pub fn load_data(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Arc<Vec<Candle>>> {
        if start > end {
            return Err(DataError::InvalidRange {
                ticker: ticker.to_string(),
                start,
                end,
            }
            .into());
        }
        let key = CacheKey::new(ticker, start, end);
        self.cache
            .get_or_try_insert_with(key, || self.fetch_uncached(ticker, start, end))
    }

    fn fetch_uncached(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<Candle>> {
        let buffer_start = start - Duration::days(self.lookback_buffer_days);
        let snapshot_path = self.snapshot_path(ticker, buffer_start, start, end);
        if let Some(path) = snapshot_path.as_deref().filter(|p| p.exists()) {
            match read_snapshot(path) {
                Ok(candles) if !candles.is_empty() => {
                    debug!("Loaded {} candles for {} from {}", candles.len(), ticker, path.display());
                    return Ok(candles);
                }
                Ok(_) => {}
                Err(err) => warn!("Ignoring unreadable cache file {}: {:#}", path.display(), err),
            }
        }

        info!("Loading data for {} from {} to {}...", ticker, buffer_start, end);
        let candles = self
            .source
            .fetch(ticker, buffer_start, end)
            .map_err(|source| DataError::Source {
                ticker: ticker.to_string(),
                source,
            })?;
        if candles.is_empty() {
            return Err(DataError::NoData {
                ticker: ticker.to_string(),
            }
            .into());
        }

        if let Some(path) = snapshot_path {
            if let Err(err) = write_snapshot(&path, &candles) {
                warn!("Failed to write cache file {}: {:#}", path.display(), err);
            }
        }
        Ok(candles)
    }

    /// `<cache_dir>/<TICKER>_<bufferStart>_<start>_<end>.bin`. The buffer start
    /// keeps loaders with different look-back buffers from sharing a file.
    fn snapshot_path(
        &self,
        ticker: &str,
        buffer_start: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|dir| {
            dir.join(format!(
                "{}_{}_{}_{}.bin",
                sanitize_name(ticker),
                buffer_start.format("%Y%m%d"),
                start.format("%Y%m%d"),
                end.format("%Y%m%d")
            ))
        })
    }

    /// Dates with a candle inside `[start, end]`, in order.
    pub fn get_trading_days(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>> {
        let data = self.load_data(ticker, start, end)?;
        Ok(data
            .iter()
            .map(|c| c.date)
            .filter(|date| *date >= start && *date <= end)
            .collect())
    }

    /// Close on `date`, or on the closest earlier date.
    pub fn get_price(&self, ticker: &str, date: NaiveDate, data: &[Candle]) -> Result<f64> {
        let available = data.partition_point(|c| c.date <= date);
        if available == 0 {
            return Err(DataError::NoPriceOnOrBefore {
                ticker: ticker.to_string(),
                date,
            }
            .into());
        }
        Ok(data[available - 1].close)
    }

    /// Prefix of `data` dated on or before `date`.
    pub fn get_data_up_to(data: &[Candle], date: NaiveDate) -> &[Candle] {
        &data[..data.partition_point(|c| c.date <= date)]
    }

    /// Drops every cached series, in memory and on disk. Returns the number of files removed.
    pub fn clear_cache(&self) -> Result<usize> {
        self.cache.clear();
        let Some(dir) = self.cache_dir.as_ref().filter(|d| d.is_dir()) else {
            return Ok(0);
        };

        let mut removed = 0;
        for entry in fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("bin") {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
                removed += 1;
            }
        }
        info!("Cleared {} cached price file(s) from {}", removed, dir.display());
        Ok(removed)
    }
}

fn read_snapshot(path: &Path) -> Result<Vec<Candle>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let candles = bincode::deserialize_from(BufReader::new(file))
        .with_context(|| format!("failed to decode {}", path.display()))?;
    Ok(candles)
}

fn write_snapshot(path: &Path, candles: &[Candle]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    bincode::serialize_into(BufWriter::new(file), candles)
        .with_context(|| format!("failed to encode {}", path.display()))?;
    Ok(())
}
