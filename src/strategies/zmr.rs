use crate::indicators;
use crate::models::*;
use crate::param_utils::{get_param_f64, get_param_usize_at_least};
use crate::strategy_utils::{emit, PositionState, SignalLog};
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::HashMap;

/// Zero mean reversion: buy a deep negative z-score, exit once price has
/// reverted toward the mean.
pub struct ZMRStrategy {
    name: String,
    period: usize,
    entry_threshold: f64,
    exit_threshold: f64,
    position: PositionState,
    signals: SignalLog,
}

impl ZMRStrategy {
    pub fn new(parameters: HashMap<String, f64>) -> Self {
        let period = get_param_usize_at_least(&parameters, "period", 20, 2);
        Self {
            name: format!("ZMR({})", period),
            period,
            entry_threshold: get_param_f64(&parameters, "entryThreshold", 2.0),
            exit_threshold: get_param_f64(&parameters, "exitThreshold", 0.5),
            position: PositionState::Flat,
            signals: SignalLog::new(),
        }
    }
}

impl super::Strategy for ZMRStrategy {
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
        let Some(z_score) = indicators::zscore_at(&prices, self.period, last) else {
            return Ok(SignalAction::Hold);
        };

        let action = match self.position {
            PositionState::Flat if z_score < -self.entry_threshold => SignalAction::Buy,
            PositionState::Long
                if z_score > -self.exit_threshold || z_score > self.entry_threshold =>
            {
                SignalAction::Sell
            }
            _ => SignalAction::Hold,
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
        self.period
    }

    fn signal_log(&self) -> &SignalLog {
        &self.signals
    }

    fn signal_log_mut(&mut self) -> &mut SignalLog {
        &mut self.signals
    }
}
