use async_trait::async_trait;
use care_flow::{Capability, CapabilityUnit, ContextUpdate, SharedContext, UnitError, UnitOutcome};
use rig::completion::Chat;
use tracing::info;

use super::utils::{get_llm_agent, unit_failure};

const CONVERSATION_PROMPT: &str = r#"You are the front desk of a digital health assistant.

You can help people describe symptoms, understand possible causes, suggest tests a doctor may order,
give general self-care advice, and book appointments.

Answer greetings, general health questions and questions about what you can do in a friendly, brief way.
If the person describes symptoms, invite them to share details such as duration and severity.
You do not diagnose in this role. For emergencies, tell the person to call their local emergency number."#;

/// General chat, also the safe default whenever routing cannot be trusted
pub struct ConversationUnit;

#[async_trait]
impl CapabilityUnit for ConversationUnit {
    fn capability(&self) -> Capability {
        Capability::GeneralConversation
    }

    async fn invoke(
        &self,
        context: &SharedContext,
        input_override: Option<&str>,
    ) -> Result<UnitOutcome, UnitError> {
        info!(
            session_id = %context.session_id,
            history_len = context.history.len(),
            "Answering conversationally"
        );

        let mut preamble = CONVERSATION_PROMPT.to_string();
        if let Some(guidance) = input_override {
            preamble.push_str(&format!("\n\nAdditional guidance: {guidance}"));
        }
        let agent = get_llm_agent(&preamble).map_err(unit_failure)?;
        let reply = agent
            .chat(&context.user_input, context.rig_history())
            .await
            .map_err(unit_failure)?;

        Ok(UnitOutcome::Updated(
            ContextUpdate {
                conversation_reply: Some(reply.clone()),
                ..Default::default()
            }
            .respond(reply),
        ))
    }
}
