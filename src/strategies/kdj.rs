use crate::indicators;
use crate::models::*;
use crate::param_utils::{get_param_f64, get_param_usize_at_least};
use crate::strategy_utils::{emit, PositionState, SignalLog};
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::HashMap;

/// Stochastic K/D strategy: enter when K leads D in the oversold zone, exit when
/// K falls under D in the overbought zone.
pub struct KDJStrategy {
    name: String,
    period: usize,
    smooth_k: usize,
    smooth_d: usize,
    oversold: f64,
    overbought: f64,
    position: PositionState,
    signals: SignalLog,
}

impl KDJStrategy {
    pub fn new(parameters: HashMap<String, f64>) -> Self {
        let period = get_param_usize_at_least(&parameters, "period", 9, 1);
        let smooth_k = get_param_usize_at_least(&parameters, "smoothK", 3, 1);
        let smooth_d = get_param_usize_at_least(&parameters, "smoothD", 3, 1);
        Self {
            name: format!("KDJ({})", period),
            period,
            smooth_k,
            smooth_d,
            oversold: get_param_f64(&parameters, "oversold", 20.0),
            overbought: get_param_f64(&parameters, "overbought", 80.0),
            position: PositionState::Flat,
            signals: SignalLog::new(),
        }
    }
}

impl super::Strategy for KDJStrategy {
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

        let kdj = indicators::calculate_kdj(history, self.period, self.smooth_k, self.smooth_d);
        let Some(Some(current)) = kdj.last().copied() else {
            return Ok(SignalAction::Hold);
        };
        let price = history[history.len() - 1].close;

        let action = match self.position {
            PositionState::Flat if current.k > current.d && current.k < self.oversold => {
                SignalAction::Buy
            }
            PositionState::Long if current.k < current.d && current.k > self.overbought => {
                SignalAction::Sell
            }
            _ => SignalAction::Hold,
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
        self.period + self.smooth_k.max(self.smooth_d)
    }

    fn signal_log(&self) -> &SignalLog {
        &self.signals
    }

    fn signal_log_mut(&mut self) -> &mut SignalLog {
        &mut self.signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::{candles_with_range, run_over};
    use crate::strategy::Strategy;

    #[test]
    fn enters_on_oversold_turn_and_exits_on_overbought_turn() {
        // Steady decline, a one-day bounce, a long rally, then a one-day dip.
        let mut closes: Vec<f64> = (0..15).map(|i| 100.0 - 2.0 * i as f64).collect();
        closes.push(73.0);
        closes.extend((16..36).map(|i| 73.0 + 3.0 * (i - 15) as f64));
        closes.push(130.0);
        let candles = candles_with_range(&closes, 1.0);
        let mut strategy = KDJStrategy::new(HashMap::new());

        let signals = run_over(&mut strategy, &candles);

        assert_eq!(
            signals.iter().position(|s| *s == SignalAction::Buy),
            Some(15)
        );
        assert_eq!(
            signals.iter().position(|s| *s == SignalAction::Sell),
            Some(36)
        );
        assert_eq!(strategy.signal_log().len(), 2);
        assert_eq!(strategy.name(), "KDJ(9)");
        assert_eq!(strategy.min_data_points(), 12);
    }

    #[test]
    fn zero_range_history_holds() {
        let candles = candles_with_range(&[50.0; 20], 0.0);
        let mut strategy = KDJStrategy::new(HashMap::new());
        let signals = run_over(&mut strategy, &candles);
        assert!(signals.iter().all(|s| *s == SignalAction::Hold));
    }
}
