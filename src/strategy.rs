use crate::models::*;
use crate::strategy_utils::SignalLog;
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::HashMap;

/// A daily decision maker. `history` holds every candle up to and including
/// `date`, oldest first; implementations must not look past it.
pub trait Strategy {
    fn name(&self) -> &str;
    fn generate_signal(
        &mut self,
        ticker: &str,
        date: NaiveDate,
        history: &[Candle],
    ) -> Result<SignalAction>;
    fn min_data_points(&self) -> usize;
    fn signal_log(&self) -> &SignalLog;
    fn signal_log_mut(&mut self) -> &mut SignalLog;
}

#[path = "strategies/buy_and_hold.rs"]
pub mod buy_and_hold;

pub use buy_and_hold::BuyAndHoldStrategy;

#[path = "strategies/macd.rs"]
pub mod macd;

pub use macd::MACDStrategy;

#[path = "strategies/rsi.rs"]
pub mod rsi;

pub use rsi::RSIStrategy;

#[path = "strategies/sma.rs"]
pub mod sma;

pub use sma::SMAStrategy;

#[path = "strategies/kdj.rs"]
pub mod kdj;

pub use kdj::KDJStrategy;

#[path = "strategies/zmr.rs"]
pub mod zmr;

pub use zmr::ZMRStrategy;

#[path = "strategies/agent.rs"]
pub mod agent;

pub use agent::{AgentDecision, AgentStrategy, DecisionAgent};

/// Template ids of the benchmark strategies, in reporting order.
pub const BENCHMARK_IDS: [&str; 6] = ["buy_and_hold", "macd", "rsi", "sma", "kdj", "zmr"];

pub const AGENT_TEMPLATE_ID: &str = "agent";

pub fn create_strategy(
    template_id: &str,
    parameters: HashMap<String, f64>,
) -> Result<Box<dyn Strategy + Send + Sync>> {
    match template_id {
        "buy_and_hold" => Ok(Box::new(BuyAndHoldStrategy::new(parameters))),
        "macd" => Ok(Box::new(MACDStrategy::new(parameters))),
        "rsi" => Ok(Box::new(RSIStrategy::new(parameters))),
        "sma" => Ok(Box::new(SMAStrategy::new(parameters))),
        "kdj" => Ok(Box::new(KDJStrategy::new(parameters))),
        "zmr" => Ok(Box::new(ZMRStrategy::new(parameters))),
        AGENT_TEMPLATE_ID => Err(anyhow::anyhow!(
            "The agent strategy needs a decision agent; build it with AgentStrategy::new"
        )),
        _ => Err(anyhow::anyhow!(
            "Unknown strategy template: {}",
            template_id
        )),
    }
}

/// Every benchmark strategy with default parameters.
pub fn create_benchmarks() -> Result<Vec<Box<dyn Strategy + Send + Sync>>> {
    BENCHMARK_IDS
        .iter()
        .map(|id| create_strategy(id, HashMap::new()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyTemplate {
    pub id: &'static str,
    pub display_name: String,
    pub min_data_points: usize,
}

pub fn list_strategies() -> Vec<StrategyTemplate> {
    BENCHMARK_IDS
        .into_iter()
        .filter_map(|id| {
            create_strategy(id, HashMap::new())
                .ok()
                .map(|strategy| StrategyTemplate {
                    id,
                    display_name: strategy.name().to_string(),
                    min_data_points: strategy.min_data_points(),
                })
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_every_benchmark_with_display_names() {
        let names: Vec<String> = create_benchmarks()
            .unwrap()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "Buy & Hold",
                "MACD(12,26,9)",
                "RSI(14)",
                "SMA(50,200)",
                "KDJ(9)",
                "ZMR(20)"
            ]
        );
    }

    #[test]
    fn parameters_flow_into_names() {
        let strategy = create_strategy(
            "sma",
            HashMap::from([
                ("shortPeriod".to_string(), 10.0),
                ("longPeriod".to_string(), 30.0),
            ]),
        )
        .unwrap();
        assert_eq!(strategy.name(), "SMA(10,30)");
        assert_eq!(strategy.min_data_points(), 30);
    }

    #[test]
    fn unknown_and_agent_templates_are_rejected() {
        assert!(create_strategy("lightning", HashMap::new()).is_err());
        assert!(create_strategy(AGENT_TEMPLATE_ID, HashMap::new()).is_err());
    }

    #[test]
    fn lists_minimum_history() {
        let templates = list_strategies();
        assert_eq!(templates.len(), 6);
        let rsi = templates.iter().find(|t| t.id == "rsi").unwrap();
        assert_eq!(rsi.min_data_points, 15);
        let kdj = templates.iter().find(|t| t.id == "kdj").unwrap();
        assert_eq!(kdj.min_data_points, 12);
    }
}
