use async_trait::async_trait;
use care_flow::{
    Capability, CapabilityUnit, ContextUpdate, SharedContext, SymptomProfile, UnitError,
    UnitOutcome,
};
use tracing::info;

use super::utils::{parse_json_reply, prompt_llm, render, unit_failure};

const EXTRACTION_PROMPT: &str = r#"You are a clinical intake assistant. Extract the symptoms the patient describes.

Respond with ONLY this JSON:
{
  "symptoms": [
    {"name": "fever", "duration": "3 days", "severity": "moderate"}
  ],
  "notes": "anything clinically relevant that is not a symptom, or null"
}

Use null for unknown duration or severity. Do not invent symptoms the patient did not mention.
If the message describes no symptoms at all, return an empty "symptoms" list."#;

/// Turns free-text symptom descriptions into a structured profile
pub struct SymptomExtractorUnit;

#[async_trait]
impl CapabilityUnit for SymptomExtractorUnit {
    fn capability(&self) -> Capability {
        Capability::SymptomExtractor
    }

    async fn invoke(
        &self,
        context: &SharedContext,
        input_override: Option<&str>,
    ) -> Result<UnitOutcome, UnitError> {
        info!(session_id = %context.session_id, "Extracting symptoms");

        let text = input_override.unwrap_or(&context.user_input);
        let prompt = format!(
            "Earlier conversation:\n{}\n\nPatient message:\n{}",
            render(&context.history),
            text
        );
        let reply = prompt_llm(EXTRACTION_PROMPT, &prompt)
            .await
            .map_err(unit_failure)?;
        let profile = parse_profile(&reply).map_err(unit_failure)?;

        if profile.symptoms.is_empty() {
            return Ok(UnitOutcome::Declined(
                "no symptoms described in the message".to_string(),
            ));
        }

        info!(
            session_id = %context.session_id,
            symptoms = profile.symptoms.len(),
            "Symptoms extracted"
        );
        Ok(UnitOutcome::Updated(ContextUpdate {
            symptoms: Some(profile),
            ..Default::default()
        }))
    }
}

fn parse_profile(reply: &str) -> anyhow::Result<SymptomProfile> {
    let mut profile: SymptomProfile = parse_json_reply(reply)?;
    profile.symptoms.retain(|s| !s.name.trim().is_empty());
    Ok(profile)
}
