use crate::indicators;
use crate::models::*;
use crate::param_utils::get_param_usize_at_least;
use crate::strategy_utils::{crossed_above, crossed_below, emit, PositionState, SignalLog};
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::HashMap;

/// Golden/death cross of a short and a long simple moving average.
pub struct SMAStrategy {
    name: String,
    short_period: usize,
    long_period: usize,
    position: PositionState,
    signals: SignalLog,
}

impl SMAStrategy {
    pub fn new(parameters: HashMap<String, f64>) -> Self {
        let short_period = get_param_usize_at_least(&parameters, "shortPeriod", 50, 1);
        let long_period = get_param_usize_at_least(&parameters, "longPeriod", 200, 1);
        Self {
            name: format!("SMA({},{})", short_period, long_period),
            short_period,
            long_period,
            position: PositionState::Flat,
            signals: SignalLog::new(),
        }
    }
}

impl super::Strategy for SMAStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_signal(
        &mut self,
        _ticker: &str,
        date: NaiveDate,
        history: &[Candle],
    ) -> Result<SignalAction> {
        if history.len() < self.min_data_points() {
            return Ok(SignalAction::Hold);
        }

        let prices = indicators::closes(history);
        let last = prices.len() - 1;
        let values = (
            indicators::sma_at(&prices, self.short_period, last - 1),
            indicators::sma_at(&prices, self.long_period, last - 1),
            indicators::sma_at(&prices, self.short_period, last),
            indicators::sma_at(&prices, self.long_period, last),
        );
        let (Some(short_prev), Some(long_prev), Some(short_curr), Some(long_curr)) = values else {
            return Ok(SignalAction::Hold);
        };

        let action = if crossed_above(short_prev, long_prev, short_curr, long_curr) {
            SignalAction::Buy
        } else if crossed_below(short_prev, long_prev, short_curr, long_curr) {
            SignalAction::Sell
        } else {
            SignalAction::Hold
        };

        Ok(emit(
            &mut self.position,
            &mut self.signals,
            date,
            prices[last],
            action,
        ))
    }

    fn min_data_points(&self) -> usize {
        self.long_period.max(2)
    }

    fn signal_log(&self) -> &SignalLog {
        &self.signals
    }

    fn signal_log_mut(&mut self) -> &mut SignalLog {
        &mut self.signals
    }
}
