use crate::models::*;
use crate::strategy_utils::SignalLog;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// What an external decision agent returned for one (ticker, date).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDecision {
    /// Full agent state, kept opaque.
    #[serde(default)]
    pub state: Value,
    /// Free-form decision text, e.g. "FINAL TRANSACTION PROPOSAL: BUY".
    pub decision: String,
}

/// An opaque decision pipeline queried once per trading day.
pub trait DecisionAgent: Send + Sync {
    fn propagate(&self, ticker: &str, date: NaiveDate) -> Result<AgentDecision>;
}

/// Strategy that delegates every decision to a [`DecisionAgent`].
///
/// Unlike the indicator strategies it keeps no position state: the agent's
/// verdict is passed straight through, and every day is logged together with
/// the raw decision text. Agent failures are returned to the caller.
pub struct AgentStrategy {
    name: String,
    agent: Arc<dyn DecisionAgent>,
    signals: SignalLog,
    last_state: Option<Value>,
}

impl AgentStrategy {
    pub fn new(name: impl Into<String>, agent: Arc<dyn DecisionAgent>) -> Self {
        Self {
            name: name.into(),
            agent,
            signals: SignalLog::new(),
            last_state: None,
        }
    }

    pub fn last_state(&self) -> Option<&Value> {
        self.last_state.as_ref()
    }
}

impl super::Strategy for AgentStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_signal(
        &mut self,
        ticker: &str,
        date: NaiveDate,
        history: &[Candle],
    ) -> Result<SignalAction> {
        let price = history.last().map(|c| c.close).unwrap_or(0.0);
        let AgentDecision { state, decision } = self
            .agent
            .propagate(ticker, date)
            .with_context(|| format!("decision agent failed for {} on {}", ticker, date))?;

        let action = SignalAction::from_decision_text(&decision);
        self.signals.record_decision(date, action, price, decision);
        self.last_state = Some(state);
        Ok(action)
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
