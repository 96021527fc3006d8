use crate::models::Candle;
use anyhow::Result;
use chrono::NaiveDate;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub ticker: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl CacheKey {
    pub fn new(ticker: &str, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            ticker: ticker.to_string(),
            start,
            end,
        }
    }
}

type Slot = Arc<Mutex<Option<Arc<Vec<Candle>>>>>;

/// In-memory price series cache shared across concurrent runs.
///
/// Each key owns a slot guarded by its own mutex: the first caller for a key
/// fetches while later callers for the same key wait and then reuse the
/// result. Different keys never block each other. A failed fetch leaves the
/// slot empty so the next caller retries.
#[derive(Default)]
pub struct PriceCache {
    entries: DashMap<CacheKey, Slot>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<Vec<Candle>>> {
        let slot = self.entries.get(key)?.value().clone();
        let guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.clone()
    }

    pub fn get_or_try_insert_with<F>(&self, key: CacheKey, fetch: F) -> Result<Arc<Vec<Candle>>>
    where
        F: FnOnce() -> Result<Vec<Candle>>,
    {
        // Clone the slot out so the map shard is unlocked while fetching.
        let slot = self
            .entries
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .value()
            .clone();

        let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(candles) = guard.as_ref() {
            return Ok(candles.clone());
        }

        let candles = Arc::new(fetch()?);
        *guard = Some(candles.clone());
        Ok(candles)
    }

    /// Number of keys holding a loaded series.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .lock()
                    .map(|guard| guard.is_some())
                    .unwrap_or(false)
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn key(ticker: &str) -> CacheKey {
        CacheKey::new(
            ticker,
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 11, 30).unwrap(),
        )
    }

    fn candle(ticker: &str) -> Candle {
        Candle {
            ticker: ticker.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
        }
    }

    #[test]
    fn fetches_each_key_once_under_contention() {
        let cache = Arc::new(PriceCache::new());
        let fetches = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let fetches = fetches.clone();
                thread::spawn(move || {
                    cache
                        .get_or_try_insert_with(key("AAPL"), || {
                            fetches.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(std::time::Duration::from_millis(20));
                            Ok(vec![candle("AAPL")])
                        })
                        .unwrap()
                        .len()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failed_fetch_is_retried() {
        let cache = PriceCache::new();
        assert!(cache
            .get_or_try_insert_with(key("MSFT"), || Err(anyhow!("offline")))
            .is_err());
        assert!(cache.get(&key("MSFT")).is_none());
        assert!(cache.is_empty());

        let loaded = cache
            .get_or_try_insert_with(key("MSFT"), || Ok(vec![candle("MSFT")]))
            .unwrap();
        assert_eq!(loaded[0].ticker, "MSFT");
        assert!(cache.get(&key("MSFT")).is_some());
    }

    #[test]
    fn clear_drops_everything() {
        let cache = PriceCache::new();
        cache
            .get_or_try_insert_with(key("AAPL"), || Ok(vec![candle("AAPL")]))
            .unwrap();
        cache.clear();
        assert!(cache.get(&key("AAPL")).is_none());
        assert_eq!(cache.len(), 0);
    }
}
