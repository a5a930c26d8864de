use async_trait::async_trait;
use care_flow::{
    Capability, CapabilityUnit, ContextUpdate, Investigation, SharedContext, UnitError,
    UnitOutcome,
};
use serde::Deserialize;
use tracing::info;

use super::utils::{parse_json_reply, prompt_llm, render, unit_failure};

const INVESTIGATION_PROMPT: &str = r#"You suggest diagnostic tests a doctor might consider for a working diagnosis.

Respond with ONLY this JSON:
{
  "investigations": [{"name": "Complete blood count", "rationale": "look for signs of infection"}],
  "response": "short plain-language explanation for the patient, stating that a doctor decides which tests are needed"
}"#;

#[derive(Debug, Deserialize)]
struct InvestigationReply {
    investigations: Vec<Investigation>,
    response: String,
}

/// Suggests tests that would confirm or rule out the working diagnosis
pub struct InvestigationUnit;

#[async_trait]
impl CapabilityUnit for InvestigationUnit {
    fn capability(&self) -> Capability {
        Capability::InvestigationGenerator
    }

    async fn invoke(
        &self,
        context: &SharedContext,
        _input_override: Option<&str>,
    ) -> Result<UnitOutcome, UnitError> {
        info!(session_id = %context.session_id, "Generating investigations");

        let prompt = format!(
            "Working diagnosis:\n{}\n\nSymptoms:\n{}\n\nPatient question: {}",
            render(&context.diagnosis),
            render(&context.symptoms),
            context.user_input
        );
        let reply = prompt_llm(INVESTIGATION_PROMPT, &prompt)
            .await
            .map_err(unit_failure)?;
        let parsed: InvestigationReply = parse_json_reply(&reply).map_err(unit_failure)?;

        if parsed.investigations.is_empty() {
            return Ok(UnitOutcome::Declined(
                "no investigations warranted".to_string(),
            ));
        }

        Ok(UnitOutcome::Updated(
            ContextUpdate {
                investigations: Some(parsed.investigations),
                ..Default::default()
            }
            .respond(parsed.response),
        ))
    }
}
