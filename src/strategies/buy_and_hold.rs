use crate::models::*;
use crate::strategy_utils::SignalLog;
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::HashMap;

/// Buys on the first day with data and never sells.
pub struct BuyAndHoldStrategy {
    name: String,
    has_bought: bool,
    signals: SignalLog,
}

impl BuyAndHoldStrategy {
    pub fn new(_parameters: HashMap<String, f64>) -> Self {
        Self {
            name: "Buy & Hold".to_string(),
            has_bought: false,
            signals: SignalLog::new(),
        }
    }
}

impl super::Strategy for BuyAndHoldStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_signal(
        &mut self,
        _ticker: &str,
        date: NaiveDate,
        history: &[Candle],
    ) -> Result<SignalAction> {
        if self.has_bought {
            return Ok(SignalAction::Hold);
        }
        let Some(last) = history.last() else {
            return Ok(SignalAction::Hold);
        };
        self.has_bought = true;
        self.signals.record(date, SignalAction::Buy, last.close);
        Ok(SignalAction::Buy)
    }

    fn min_data_points(&self) -> usize {
        1
    }

    fn signal_log(&self) -> &SignalLog {
        &self.signals
    }

    fn signal_log_mut(&mut self) -> &mut SignalLog {
        &mut self.signals
    }
}
