use crate::strategy::agent::{AgentDecision, DecisionAgent};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use reqwest::Certificate;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::time::Duration;

const AGENT_CA_CERT_ENV: &str = "AGENT_CA_CERT";

fn env_path(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn load_ca_certificate() -> Result<Option<Certificate>> {
    let Some(path) = env_path(AGENT_CA_CERT_ENV) else {
        return Ok(None);
    };
    let pem =
        fs::read(&path).with_context(|| format!("failed to read CA certificate from {}", path))?;
    let certificate = Certificate::from_pem(&pem)
        .with_context(|| format!("failed to parse CA certificate from {}", path))?;
    Ok(Some(certificate))
}

pub fn build_blocking_client(timeout: Option<Duration>) -> Result<reqwest::blocking::Client> {
    let mut builder = reqwest::blocking::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(certificate) = load_ca_certificate()? {
        builder = builder.add_root_certificate(certificate);
    }
    builder.build().context("failed to build HTTP client")
}

#[derive(Debug, Serialize)]
struct DecisionRequest<'a> {
    ticker: &'a str,
    date: String,
}

#[derive(Debug, Deserialize)]
struct DecisionResponse {
    decision: Option<String>,
    #[serde(default)]
    state: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

/// Decision agent served over HTTP: `POST {ticker, date}` and read back
/// `{decision, state}`.
pub struct HttpDecisionAgent {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpDecisionAgent {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(anyhow!("decision agent URL must not be empty"));
        }
        Ok(Self {
            url,
            client: build_blocking_client(Some(timeout))?,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl DecisionAgent for HttpDecisionAgent {
    fn propagate(&self, ticker: &str, date: NaiveDate) -> Result<AgentDecision> {
        let request = DecisionRequest {
            ticker,
            date: date.format("%Y-%m-%d").to_string(),
        };
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .with_context(|| format!("request to decision agent at {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!(
                "decision agent returned HTTP {}: {}",
                status,
                body.trim()
            ));
        }

        let payload: DecisionResponse = response
            .json()
            .context("decision agent returned an unreadable response")?;
        if let Some(error) = payload.error.filter(|e| !e.trim().is_empty()) {
            return Err(anyhow!("decision agent reported an error: {}", error));
        }
        let decision = payload
            .decision
            .ok_or_else(|| anyhow!("decision agent response is missing `decision`"))?;

        Ok(AgentDecision {
            state: payload.state,
            decision,
        })
    }
}
