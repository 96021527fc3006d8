use crate::indicators;
use crate::models::*;
use crate::param_utils::{get_param_f64, get_param_usize_at_least};
use crate::strategy_utils::{emit, PositionState, SignalLog};
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::HashMap;

/// Oversold/overbought thresholds on a rolling-mean RSI.
pub struct RSIStrategy {
    name: String,
    period: usize,
    oversold: f64,
    overbought: f64,
    position: PositionState,
    signals: SignalLog,
}

impl RSIStrategy {
    pub fn new(parameters: HashMap<String, f64>) -> Self {
        let period = get_param_usize_at_least(&parameters, "period", 14, 1);
        let oversold = get_param_f64(&parameters, "oversold", 30.0);
        let overbought = get_param_f64(&parameters, "overbought", 70.0);
        Self {
            name: format!("RSI({})", period),
            period,
            oversold,
            overbought,
            position: PositionState::Flat,
            signals: SignalLog::new(),
        }
    }
}

impl super::Strategy for RSIStrategy {
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
        let Some(rsi) = indicators::rsi_at(&prices, self.period, last) else {
            return Ok(SignalAction::Hold);
        };

        let action = match self.position {
            PositionState::Flat if rsi < self.oversold => SignalAction::Buy,
            PositionState::Long if rsi > self.overbought => SignalAction::Sell,
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
        self.period + 1
    }

    fn signal_log(&self) -> &SignalLog {
        &self.signals
    }

    fn signal_log_mut(&mut self) -> &mut SignalLog {
        &mut self.signals
    }
}
