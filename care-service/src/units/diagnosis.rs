use async_trait::async_trait;
use care_flow::{
    Capability, CapabilityUnit, Condition, ContextUpdate, Diagnosis, RiskAssessment, RiskLevel,
    SharedContext, UnitError, UnitOutcome,
};
use serde::Deserialize;
use tracing::info;

use super::utils::{parse_json_reply, prompt_llm, render, unit_failure};

const DIAGNOSIS_PROMPT: &str = r#"You are a careful clinical reasoning assistant. You never replace a doctor.

Given structured symptoms and/or image findings, either:

1. ASK for the single most important missing detail when you cannot reason responsibly without it:
{
  "information_needed": true,
  "follow_up_question": "How long have you had the fever?"
}

2. Or give a differential:
{
  "information_needed": false,
  "summary": "one-sentence most likely explanation",
  "conditions": [{"name": "Viral upper respiratory infection", "likelihood": "high"}],
  "confidence": 0.6,
  "risk_level": "low | moderate | high | emergency",
  "risk_rationale": "why this risk level",
  "response": "a plain-language answer for the patient that names possible causes, says when to seek care, and recommends seeing a healthcare professional"
}

Respond with JSON only. Use "emergency" for red-flag presentations and tell the patient to seek emergency care immediately."#;

#[derive(Debug, Deserialize)]
struct DiagnosisReply {
    #[serde(default)]
    information_needed: bool,
    follow_up_question: Option<String>,
    summary: Option<String>,
    #[serde(default)]
    conditions: Vec<Condition>,
    confidence: Option<f32>,
    risk_level: Option<RiskLevel>,
    risk_rationale: Option<String>,
    response: Option<String>,
}

/// Produces a differential from extracted findings, or asks one clarifying question
pub struct DiagnosisUnit;

#[async_trait]
impl CapabilityUnit for DiagnosisUnit {
    fn capability(&self) -> Capability {
        Capability::DiagnosisEngine
    }

    async fn invoke(
        &self,
        context: &SharedContext,
        input_override: Option<&str>,
    ) -> Result<UnitOutcome, UnitError> {
        info!(
            session_id = %context.session_id,
            revision = context.revision_count,
            "Running diagnosis"
        );

        let reply = prompt_llm(DIAGNOSIS_PROMPT, &build_prompt(context, input_override))
            .await
            .map_err(unit_failure)?;
        let parsed: DiagnosisReply = parse_json_reply(&reply).map_err(unit_failure)?;
        into_update(parsed).map(UnitOutcome::Updated)
    }
}

fn build_prompt(context: &SharedContext, critic_feedback: Option<&str>) -> String {
    let mut prompt = format!(
        "Patient message: {}\n\nSymptoms:\n{}\n\nImage findings:\n{}\n\nConversation so far:\n{}",
        context.user_input,
        render(&context.symptoms),
        render(&context.image_findings),
        render(&context.history),
    );
    if let (Some(previous), Some(feedback)) = (&context.diagnosis, critic_feedback) {
        prompt.push_str(&format!(
            "\n\nYour previous assessment:\n{}\n\nReviewer feedback to address:\n{}",
            render(previous),
            feedback
        ));
    }
    prompt
}

fn into_update(reply: DiagnosisReply) -> Result<ContextUpdate, UnitError> {
    if reply.information_needed {
        let question = reply
            .follow_up_question
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| {
                UnitError::Failed("clarification requested without a question".to_string())
            })?;
        return Ok(ContextUpdate::default().ask(question));
    }

    let summary = reply
        .summary
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| UnitError::Failed("diagnosis reply has no summary".to_string()))?;
    let response = reply.response.unwrap_or_else(|| summary.clone());

    Ok(ContextUpdate {
        diagnosis: Some(Diagnosis {
            summary,
            conditions: reply.conditions,
            confidence: reply.confidence.map(|c| c.clamp(0.0, 1.0)),
        }),
        risk_assessment: reply.risk_level.map(|level| RiskAssessment {
            level,
            rationale: reply.risk_rationale.unwrap_or_default(),
        }),
        ..Default::default()
    }
    .respond(response))
}
