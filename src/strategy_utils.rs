use crate::models::{SignalAction, SignalKind, SignalRecord};
use chrono::NaiveDate;

/// Whether a strategy currently considers itself invested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PositionState {
    #[default]
    Flat,
    Long,
}

impl PositionState {
    /// Applies an entry/exit signal. Returns the signal when it is a legal
    /// transition, HOLD when it would re-enter the current state.
    pub fn transition(&mut self, action: SignalAction) -> SignalAction {
        match (*self, action) {
            (PositionState::Flat, SignalAction::Buy) => {
                *self = PositionState::Long;
                SignalAction::Buy
            }
            (PositionState::Long, SignalAction::Sell) => {
                *self = PositionState::Flat;
                SignalAction::Sell
            }
            _ => SignalAction::Hold,
        }
    }
}

/// Append-only record of what a strategy emitted.
#[derive(Debug, Clone, Default)]
pub struct SignalLog {
    entries: Vec<SignalRecord>,
}

impl SignalLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, date: NaiveDate, action: SignalAction, price: f64) {
        self.entries.push(SignalRecord {
            date,
            signal: action.into(),
            price,
            raw_decision: None,
            error: None,
        });
    }

    pub fn record_decision(
        &mut self,
        date: NaiveDate,
        action: SignalAction,
        price: f64,
        raw_decision: impl Into<String>,
    ) {
        self.entries.push(SignalRecord {
            date,
            signal: action.into(),
            price,
            raw_decision: Some(raw_decision.into()),
            error: None,
        });
    }

    pub fn record_error(&mut self, date: NaiveDate, price: f64, error: impl Into<String>) {
        self.entries.push(SignalRecord {
            date,
            signal: SignalKind::Error,
            price,
            raw_decision: None,
            error: Some(error.into()),
        });
    }

    pub fn entries(&self) -> &[SignalRecord] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `a` moved from at-or-below `b` to strictly above it.
pub fn crossed_above(prev_a: f64, prev_b: f64, curr_a: f64, curr_b: f64) -> bool {
    prev_a <= prev_b && curr_a > curr_b
}

/// `a` moved from at-or-above `b` to strictly below it.
pub fn crossed_below(prev_a: f64, prev_b: f64, curr_a: f64, curr_b: f64) -> bool {
    prev_a >= prev_b && curr_a < curr_b
}

/// Shared entry/exit bookkeeping for indicator strategies: applies the state
/// transition and logs the emitted signal.
pub fn emit(
    state: &mut PositionState,
    log: &mut SignalLog,
    date: NaiveDate,
    price: f64,
    action: SignalAction,
) -> SignalAction {
    let emitted = state.transition(action);
    if emitted != SignalAction::Hold {
        log.record(date, emitted, price);
    }
    emitted
}
