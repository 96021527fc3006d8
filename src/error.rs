use chrono::NaiveDate;
use thiserror::Error;

/// Failures of the market-data layer.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("No data found for {ticker}")]
    NoData { ticker: String },

    #[error("No trading days found for {ticker} between {start} and {end}")]
    NoTradingDays {
        ticker: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("No price data available for {ticker} on or before {date}")]
    NoPriceOnOrBefore { ticker: String, date: NaiveDate },

    #[error("Invalid date range for {ticker}: {start} is after {end}")]
    InvalidRange {
        ticker: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("Price source failed for {ticker}: {source}")]
    Source {
        ticker: String,
        #[source]
        source: anyhow::Error,
    },
}

impl DataError {
    /// True when the symbol/range simply has nothing to offer, as opposed to an I/O failure.
    pub fn is_missing_data(&self) -> bool {
        matches!(
            self,
            DataError::NoData { .. }
                | DataError::NoTradingDays { .. }
                | DataError::NoPriceOnOrBefore { .. }
        )
    }
}
