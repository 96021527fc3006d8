use crate::indicators;
use crate::models::*;
use crate::param_utils::get_param_usize_at_least;
use crate::strategy_utils::{crossed_above, crossed_below, emit, PositionState, SignalLog};
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::HashMap;

pub struct MACDStrategy {
    name: String,
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
    min_data_points: usize,
    position: PositionState,
    signals: SignalLog,
}

impl MACDStrategy {
    pub fn new(parameters: HashMap<String, f64>) -> Self {
        let fast_period = get_param_usize_at_least(&parameters, "fastPeriod", 12, 1);
        let slow_period = get_param_usize_at_least(&parameters, "slowPeriod", 26, 1);
        let signal_period = get_param_usize_at_least(&parameters, "signalPeriod", 9, 1);
        Self {
            name: format!("MACD({},{},{})", fast_period, slow_period, signal_period),
            fast_period,
            slow_period,
            signal_period,
            min_data_points: (slow_period + signal_period).max(2),
            position: PositionState::Flat,
            signals: SignalLog::new(),
        }
    }
}

impl super::Strategy for MACDStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_signal(
        &mut self,
        _ticker: &str,
        date: NaiveDate,
        history: &[Candle],
    ) -> Result<SignalAction> {
        if history.len() < self.min_data_points {
            return Ok(SignalAction::Hold);
        }

        let prices = indicators::closes(history);
        let (macd_line, signal_line, _histogram) = indicators::calculate_macd(
            &prices,
            self.fast_period,
            self.slow_period,
            self.signal_period,
        );

        let last = macd_line.len() - 1;
        let (prev_macd, current_macd) = (macd_line[last - 1], macd_line[last]);
        let (prev_signal, current_signal) = (signal_line[last - 1], signal_line[last]);
        let price = prices[last];

        let action = if crossed_above(prev_macd, prev_signal, current_macd, current_signal) {
            SignalAction::Buy
        } else if crossed_below(prev_macd, prev_signal, current_macd, current_signal) {
            SignalAction::Sell
        } else {
            SignalAction::Hold
        };

        Ok(emit(
            &mut self.position,
            &mut self.signals,
            date,
            price,
            action,
        ))
    }

    fn min_data_points(&self) -> usize {
        self.min_data_points
    }

    fn signal_log(&self) -> &SignalLog {
        &self.signals
    }

    fn signal_log_mut(&mut self) -> &mut SignalLog {
        &mut self.signals
    }
}
