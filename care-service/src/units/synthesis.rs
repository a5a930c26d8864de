use async_trait::async_trait;
use care_flow::{Capability, CapabilityUnit, ContextUpdate, SharedContext, UnitError, UnitOutcome};
use tracing::info;

use super::utils::{prompt_llm, render, unit_failure};

const SYNTHESIS_PROMPT: &str = "You combine a diagnosis, suggested tests and recommendations into one \
coherent answer for the patient. Keep the structure: what it might be, what tests may help, what to do now, \
when to seek care. Do not add new medical claims that are not in the inputs.";

/// Merges the findings of several units into one reply
pub struct SynthesisUnit;

#[async_trait]
impl CapabilityUnit for SynthesisUnit {
    fn capability(&self) -> Capability {
        Capability::Synthesizer
    }

    async fn invoke(
        &self,
        context: &SharedContext,
        _input_override: Option<&str>,
    ) -> Result<UnitOutcome, UnitError> {
        info!(session_id = %context.session_id, "Synthesizing final answer");

        let prompt = format!(
            "Patient question: {}\n\nDiagnosis:\n{}\n\nInvestigations:\n{}\n\nRecommendation:\n{}",
            context.user_input,
            render(&context.diagnosis),
            render(&context.investigations),
            render(&context.recommendation),
        );
        let answer = prompt_llm(SYNTHESIS_PROMPT, &prompt)
            .await
            .map_err(unit_failure)?;

        Ok(UnitOutcome::Updated(ContextUpdate::default().respond(answer)))
    }
}
