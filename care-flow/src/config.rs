use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    context::DEFAULT_MAX_REVISIONS,
    error::{FlowError, Result},
};

/// Clinically neutral text substituted whenever a run cannot produce a usable answer
pub const DEFAULT_FALLBACK_MESSAGE: &str = "I'm sorry, I wasn't able to complete your request right now. \
Please contact a healthcare professional or our support team for further assistance. \
If this is an emergency, call your local emergency number.";

/// Tunables for the orchestration loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard cap on oracle/dispatch iterations per run
    pub max_iterations: u32,
    /// Diagnosis revisions allowed per request
    pub max_revisions: u32,
    pub oracle_timeout_secs: u64,
    /// Timeout for the single retry after an oracle timeout
    pub oracle_retry_timeout_secs: u64,
    pub unit_timeout_secs: u64,
    /// Audit entries sent to the oracle with each decision request
    pub log_tail: usize,
    pub fallback_message: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 12,
            max_revisions: DEFAULT_MAX_REVISIONS,
            oracle_timeout_secs: 30,
            oracle_retry_timeout_secs: 10,
            unit_timeout_secs: 60,
            log_tail: 8,
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            FlowError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Defaults overridden by any `CARE_FLOW_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(v) = env_number("CARE_FLOW_MAX_ITERATIONS")? {
            self.max_iterations = v;
        }
        if let Some(v) = env_number("CARE_FLOW_MAX_REVISIONS")? {
            self.max_revisions = v;
        }
        if let Some(v) = env_number("CARE_FLOW_ORACLE_TIMEOUT_SECS")? {
            self.oracle_timeout_secs = v;
        }
        if let Some(v) = env_number("CARE_FLOW_ORACLE_RETRY_TIMEOUT_SECS")? {
            self.oracle_retry_timeout_secs = v;
        }
        if let Some(v) = env_number("CARE_FLOW_UNIT_TIMEOUT_SECS")? {
            self.unit_timeout_secs = v;
        }
        if let Ok(message) = std::env::var("CARE_FLOW_FALLBACK_MESSAGE") {
            self.fallback_message = message;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(FlowError::Configuration(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.oracle_timeout_secs == 0 || self.unit_timeout_secs == 0 {
            return Err(FlowError::Configuration(
                "timeouts must be positive".to_string(),
            ));
        }
        if self.oracle_retry_timeout_secs == 0
            || self.oracle_retry_timeout_secs > self.oracle_timeout_secs
        {
            return Err(FlowError::Configuration(
                "oracle_retry_timeout_secs must be positive and no longer than oracle_timeout_secs"
                    .to_string(),
            ));
        }
        if self.fallback_message.trim().is_empty() {
            return Err(FlowError::Configuration(
                "fallback_message must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_secs)
    }

    pub fn oracle_retry_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_retry_timeout_secs)
    }

    pub fn unit_timeout(&self) -> Duration {
        Duration::from_secs(self.unit_timeout_secs)
    }
}

fn env_number<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_number(key, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| FlowError::Configuration(format!("{key}: {e}")))
}
