use async_trait::async_trait;
use care_flow::{Capability, CapabilityUnit, ContextUpdate, SharedContext, UnitError, UnitOutcome};
use tracing::info;

use super::utils::{prompt_llm, render, unit_failure};

const RECOMMENDATION_PROMPT: &str = "You give general self-care and next-step advice for a working diagnosis. \
Be practical and concise. Never prescribe medication doses. Always say when the patient should see a \
healthcare professional and which warning signs need urgent care.";

pub struct RecommendationUnit;

#[async_trait]
impl CapabilityUnit for RecommendationUnit {
    fn capability(&self) -> Capability {
        Capability::Recommender
    }

    async fn invoke(
        &self,
        context: &SharedContext,
        _input_override: Option<&str>,
    ) -> Result<UnitOutcome, UnitError> {
        info!(session_id = %context.session_id, "Generating recommendation");

        let prompt = format!(
            "Working diagnosis:\n{}\n\nRisk assessment:\n{}\n\nPatient question: {}",
            render(&context.diagnosis),
            render(&context.risk_assessment),
            context.user_input
        );
        let advice = prompt_llm(RECOMMENDATION_PROMPT, &prompt)
            .await
            .map_err(unit_failure)?;

        Ok(UnitOutcome::Updated(
            ContextUpdate {
                recommendation: Some(advice.clone()),
                ..Default::default()
            }
            .respond(advice),
        ))
    }
}
