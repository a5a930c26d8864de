use async_trait::async_trait;
use care_flow::{
    Capability, CapabilityUnit, ContextUpdate, ImagePayload, SharedContext, UnitError,
    UnitOutcome,
};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::utils::{call_openrouter_api, llm_model, unit_failure};

const VISION_PROMPT: &str = "You are assisting a clinician. Describe the medically relevant visual findings in this image: \
location, size, colour, texture, borders and anything unusual. Describe only what is visible; \
do not name a diagnosis. If the image shows nothing medically relevant, say so plainly.";

const MAX_FINDINGS_TOKENS: u32 = 800;

/// Describes clinically relevant findings in an uploaded image
pub struct ImageAnalyzerUnit;

#[async_trait]
impl CapabilityUnit for ImageAnalyzerUnit {
    fn capability(&self) -> Capability {
        Capability::ImageAnalyzer
    }

    async fn invoke(
        &self,
        context: &SharedContext,
        input_override: Option<&str>,
    ) -> Result<UnitOutcome, UnitError> {
        let Some(image) = context.image.as_ref() else {
            return Ok(UnitOutcome::Declined("no image attached".to_string()));
        };

        info!(
            session_id = %context.session_id,
            mime_type = %image.mime_type,
            "Analyzing image with LLM vision"
        );

        let mut instructions = VISION_PROMPT.to_string();
        if !context.user_input.trim().is_empty() {
            instructions.push_str(&format!("\n\nThe patient wrote: {}", context.user_input));
        }
        if let Some(focus) = input_override {
            instructions.push_str(&format!("\n\nFocus on: {focus}"));
        }

        let findings = call_openrouter_api(
            &llm_model(),
            vision_content(&instructions, image),
            MAX_FINDINGS_TOKENS,
        )
        .await
        .map_err(unit_failure)?;

        if findings.trim().is_empty() {
            warn!(session_id = %context.session_id, "Vision model returned no findings");
            return Err(UnitError::Failed(
                "vision model returned no findings".to_string(),
            ));
        }

        Ok(UnitOutcome::Updated(ContextUpdate {
            image_findings: Some(findings.trim().to_string()),
            ..Default::default()
        }))
    }
}

fn vision_content(instructions: &str, image: &ImagePayload) -> Vec<Value> {
    vec![
        json!({
            "type": "text",
            "text": instructions
        }),
        json!({
            "type": "image_url",
            "image_url": {
                "url": format!("data:{};base64,{}", image.mime_type, image.data_base64)
            }
        }),
    ]
}
