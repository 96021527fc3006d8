pub mod agent_client;
pub mod backtester;
pub mod cache;
pub mod config;
pub mod data_loader;
pub mod error;
pub mod indicators;
pub mod models;
pub mod param_utils;
pub mod performance;
pub mod portfolio;
pub mod report;
pub mod strategy;
pub mod strategy_utils;
