//! Decision oracle interface and response parsing.
//!
//! The oracle is an external reasoner and its replies are untrusted text. This
//! module only turns that text into a typed [`OracleResponse`]; deciding whether
//! to honour it is the job of [`crate::decision`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    context::{AuditEntry, ContextSnapshot},
    error::{FlowError, Result},
    plan::{Plan, Route, Step},
};

/// Everything the oracle sees for one decision
#[derive(Debug, Clone, Serialize)]
pub struct OracleRequest {
    pub context: ContextSnapshot,
    pub plan: Plan,
    pub log_tail: Vec<AuditEntry>,
}

/// Schema every oracle reply must satisfy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleResponse {
    pub next_step: Route,
    pub reasoning: String,
    pub plan: Vec<Step>,
    /// Extra input for the unit named in `next_step`
    #[serde(default)]
    pub input_override: Option<String>,
}

#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// Return the raw reply text for a decision request
    async fn decide(&self, request: &OracleRequest) -> Result<String>;
}

/// Parse and schema-check a raw oracle reply.
///
/// Tolerates markdown code fences and prose around the JSON object.
pub fn parse_oracle_response(raw: &str) -> Result<OracleResponse> {
    let json = extract_json_object(raw)
        .ok_or_else(|| FlowError::MalformedDecision("no JSON object in reply".to_string()))?;

    let response: OracleResponse = serde_json::from_str(json)
        .map_err(|e| FlowError::MalformedDecision(e.to_string()))?;

    if response.reasoning.trim().is_empty() {
        return Err(FlowError::MalformedDecision(
            "reasoning must not be empty".to_string(),
        ));
    }
    if let Some(index) = response
        .plan
        .iter()
        .position(|s| s.description.trim().is_empty())
    {
        return Err(FlowError::MalformedDecision(format!(
            "plan step {index} has no description"
        )));
    }
    Plan::from_steps(response.plan.clone())?;

    Ok(response)
}

/// Locate the JSON object in an LLM reply, looking inside a ```json fence when present
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let body = match trimmed.find("```json") {
        Some(start) => {
            let rest = &trimmed[start + 7..];
            rest.find("```").map(|end| &rest[..end]).unwrap_or(rest)
        }
        None => trimmed,
    };
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (start < end).then(|| &body[start..=end])
}
