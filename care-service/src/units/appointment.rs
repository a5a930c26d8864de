use async_trait::async_trait;
use care_flow::{
    Appointment, Capability, CapabilityUnit, ContextUpdate, SharedContext, UnitError, UnitOutcome,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::utils::{parse_json_reply, prompt_llm, render, unit_failure};

const APPOINTMENT_PROMPT: &str = r#"You collect appointment details from the conversation.

If you know both the department (e.g. "general practice", "dermatology") and a preferred time, respond with ONLY:
{
  "department": "dermatology",
  "preferred_time": "Tuesday morning"
}

Otherwise respond with ONLY:
{
  "missing_question": "Which day and time would suit you?"
}

Suggest a department that fits the working diagnosis when the patient has not named one."#;

#[derive(Debug, Deserialize)]
struct AppointmentReply {
    department: Option<String>,
    preferred_time: Option<String>,
    missing_question: Option<String>,
}

/// Books an appointment once the department and time are known
pub struct AppointmentUnit;

#[async_trait]
impl CapabilityUnit for AppointmentUnit {
    fn capability(&self) -> Capability {
        Capability::AppointmentScheduler
    }

    async fn invoke(
        &self,
        context: &SharedContext,
        _input_override: Option<&str>,
    ) -> Result<UnitOutcome, UnitError> {
        info!(session_id = %context.session_id, "Scheduling appointment");

        let prompt = format!(
            "Patient message: {}\n\nConversation so far:\n{}\n\nWorking diagnosis:\n{}",
            context.user_input,
            render(&context.history),
            render(&context.diagnosis),
        );
        let reply = prompt_llm(APPOINTMENT_PROMPT, &prompt)
            .await
            .map_err(unit_failure)?;
        let parsed: AppointmentReply = parse_json_reply(&reply).map_err(unit_failure)?;
        Ok(UnitOutcome::Updated(book(parsed)?))
    }
}

fn book(reply: AppointmentReply) -> Result<ContextUpdate, UnitError> {
    match (reply.department, reply.preferred_time) {
        (Some(department), Some(preferred_time))
            if !department.trim().is_empty() && !preferred_time.trim().is_empty() =>
        {
            let confirmation = confirmation_code();
            let message = format!(
                "Your {department} appointment request for {preferred_time} is booked. \
                 Confirmation code: {confirmation}."
            );
            info!(department = %department, confirmation = %confirmation, "Appointment booked");
            Ok(ContextUpdate {
                appointment: Some(Appointment {
                    department,
                    preferred_time,
                    confirmation: Some(confirmation),
                }),
                ..Default::default()
            }
            .respond(message))
        }
        // The question completes this request; the answer arrives as a new one
        _ => reply
            .missing_question
            .filter(|q| !q.trim().is_empty())
            .map(|question| ContextUpdate::default().respond(question))
            .ok_or_else(|| {
                UnitError::Failed("appointment reply has neither details nor a question".to_string())
            }),
    }
}

fn confirmation_code() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("APT-{}", id[..8].to_uppercase())
}
