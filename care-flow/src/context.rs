use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    capability::{Capability, ContextField},
    plan::{Plan, Route, StepStatus},
};

/// Default bound on diagnosis revisions per request
pub const DEFAULT_MAX_REVISIONS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One prior message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub mime_type: String,
    pub data_base64: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symptom {
    pub name: String,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymptomProfile {
    pub symptoms: Vec<Symptom>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub name: String,
    #[serde(default)]
    pub likelihood: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub summary: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Emergency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investigation {
    pub name: String,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub department: String,
    pub preferred_time: String,
    #[serde(default)]
    pub confirmation: Option<String>,
}

/// A capability failure recorded on the context instead of crossing the dispatch boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityFailure {
    pub capability: Capability,
    pub message: String,
    pub request_id: Uuid,
    pub at: DateTime<Utc>,
}

/// One line of the execution log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub iteration: u32,
    pub route: Route,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_status: Option<StepStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_status: Option<StepStatus>,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub corrections: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// Partial update produced by a capability unit. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextUpdate {
    pub symptoms: Option<SymptomProfile>,
    pub image_findings: Option<String>,
    pub diagnosis: Option<Diagnosis>,
    pub risk_assessment: Option<RiskAssessment>,
    pub investigations: Option<Vec<Investigation>>,
    pub recommendation: Option<String>,
    pub conversation_reply: Option<String>,
    pub appointment: Option<Appointment>,
    pub information_needed: Option<bool>,
    pub final_response: Option<String>,
}

impl ContextUpdate {
    /// Whether the update carries any capability output
    pub fn produces_output(&self) -> bool {
        self.symptoms.is_some()
            || self.image_findings.is_some()
            || self.diagnosis.is_some()
            || self.risk_assessment.is_some()
            || self.investigations.is_some()
            || self.recommendation.is_some()
            || self.conversation_reply.is_some()
            || self.appointment.is_some()
    }

    /// Ask the requester for clarification and suspend the run
    pub fn ask(mut self, question: impl Into<String>) -> Self {
        self.information_needed = Some(true);
        self.final_response = Some(question.into());
        self
    }

    pub fn respond(mut self, response: impl Into<String>) -> Self {
        self.final_response = Some(response.into());
        self
    }
}

/// Where a context stands once a turn has completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    /// Final response set and every plan step resolved
    Completed,
    /// Clarification requested from the user
    AwaitingInput,
    InProgress,
}

/// The single mutable record threaded through one orchestration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedContext {
    pub session_id: String,
    pub request_id: Uuid,
    pub user_input: String,
    #[serde(default)]
    pub history: Vec<Turn>,
    #[serde(default)]
    pub image: Option<ImagePayload>,

    pub symptoms: Option<SymptomProfile>,
    pub image_findings: Option<String>,
    pub diagnosis: Option<Diagnosis>,
    pub risk_assessment: Option<RiskAssessment>,
    #[serde(default)]
    pub investigations: Vec<Investigation>,
    pub recommendation: Option<String>,
    pub conversation_reply: Option<String>,
    pub appointment: Option<Appointment>,

    #[serde(default)]
    pub information_needed: bool,
    pub final_response: Option<String>,

    #[serde(default)]
    pub revision_count: u32,
    pub max_revisions: u32,

    #[serde(default)]
    pub plan: Plan,
    /// Cursor naming the route chosen for the next dispatch
    #[serde(default)]
    pub next_route: Option<Route>,
    /// A user request arrived and no capability has acted on it yet
    #[serde(default)]
    pub pending_request: bool,

    /// Capabilities attempted during the current request
    #[serde(default)]
    pub attempted: BTreeSet<Capability>,
    /// Capabilities that produced output during the current request
    #[serde(default)]
    pub produced: BTreeSet<Capability>,

    #[serde(default)]
    pub errors: Vec<CapabilityFailure>,
    #[serde(default)]
    pub execution_log: Vec<AuditEntry>,
}

impl SharedContext {
    pub fn new(session_id: impl Into<String>, user_input: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            request_id: Uuid::new_v4(),
            user_input: user_input.into(),
            history: Vec::new(),
            image: None,
            symptoms: None,
            image_findings: None,
            diagnosis: None,
            risk_assessment: None,
            investigations: Vec::new(),
            recommendation: None,
            conversation_reply: None,
            appointment: None,
            information_needed: false,
            final_response: None,
            revision_count: 0,
            max_revisions: DEFAULT_MAX_REVISIONS,
            plan: Plan::new(),
            next_route: None,
            pending_request: true,
            attempted: BTreeSet::new(),
            produced: BTreeSet::new(),
            errors: Vec::new(),
            execution_log: Vec::new(),
        }
    }

    pub fn with_image(mut self, image: ImagePayload) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_history(mut self, history: Vec<Turn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_max_revisions(mut self, max_revisions: u32) -> Self {
        self.max_revisions = max_revisions;
        self
    }

    /// Roll a persisted context forward into a new physical request.
    ///
    /// The previous exchange moves into history and the per-request bookkeeping
    /// resets. The plan is left exactly as it was so a suspended run resumes
    /// where it stopped.
    pub fn begin_request(&mut self, user_input: impl Into<String>, image: Option<ImagePayload>) {
        if !self.user_input.is_empty() {
            self.history.push(Turn::user(std::mem::take(&mut self.user_input)));
        }
        if let Some(response) = self.final_response.take() {
            self.history.push(Turn::assistant(response));
        }
        self.user_input = user_input.into();
        self.image = image;
        self.request_id = Uuid::new_v4();
        self.information_needed = false;
        self.revision_count = 0;
        self.next_route = None;
        self.pending_request = true;
        self.attempted.clear();
        self.produced.clear();
    }

    /// Merge a unit's partial update into the context
    pub fn apply(&mut self, capability: Capability, update: ContextUpdate) {
        if update.produces_output() {
            self.produced.insert(capability);
        }
        if let Some(symptoms) = update.symptoms {
            self.symptoms = Some(symptoms);
        }
        if let Some(findings) = update.image_findings {
            self.image_findings = Some(findings);
        }
        if let Some(diagnosis) = update.diagnosis {
            self.diagnosis = Some(diagnosis);
        }
        if let Some(risk) = update.risk_assessment {
            self.risk_assessment = Some(risk);
        }
        if let Some(investigations) = update.investigations {
            self.investigations = investigations;
        }
        if let Some(recommendation) = update.recommendation {
            self.recommendation = Some(recommendation);
        }
        if let Some(reply) = update.conversation_reply {
            self.conversation_reply = Some(reply);
        }
        if let Some(appointment) = update.appointment {
            self.appointment = Some(appointment);
        }
        if let Some(needed) = update.information_needed {
            self.information_needed = needed;
        }
        if let Some(response) = update.final_response {
            self.final_response = Some(response);
        }
    }

    pub fn record_failure(&mut self, capability: Capability, message: impl Into<String>) {
        self.errors.push(CapabilityFailure {
            capability,
            message: message.into(),
            request_id: self.request_id,
            at: Utc::now(),
        });
    }

    /// Whether a field a unit depends on is populated
    pub fn has(&self, field: ContextField) -> bool {
        match field {
            ContextField::UserInput => !self.user_input.trim().is_empty(),
            ContextField::Image => self.image.is_some(),
            ContextField::Symptoms => self.symptoms.is_some(),
            ContextField::ImageFindings => self.image_findings.is_some(),
            ContextField::Diagnosis => self.diagnosis.is_some(),
            ContextField::Investigations => !self.investigations.is_empty(),
            ContextField::Recommendation => self.recommendation.is_some(),
        }
    }

    pub fn has_final_response(&self) -> bool {
        self.final_response
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty())
    }

    pub fn state(&self) -> ContextState {
        if self.information_needed {
            ContextState::AwaitingInput
        } else if self.has_final_response() && !self.plan.is_empty() && self.plan.is_resolved() {
            ContextState::Completed
        } else {
            ContextState::InProgress
        }
    }

    /// Compact view handed to the decision oracle
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            session_id: self.session_id.clone(),
            user_input: self.user_input.clone(),
            history: self.history.clone(),
            has_image: self.image.is_some(),
            symptoms: self.symptoms.clone(),
            image_findings: self.image_findings.clone(),
            diagnosis: self.diagnosis.clone(),
            risk_assessment: self.risk_assessment.clone(),
            investigations: self.investigations.clone(),
            recommendation: self.recommendation.clone(),
            appointment: self.appointment.clone(),
            information_needed: self.information_needed,
            final_response: self.final_response.clone(),
            revision_count: self.revision_count,
            max_revisions: self.max_revisions,
            new_request: self.pending_request,
            produced_this_request: self.produced.iter().copied().collect(),
            errors: self
                .errors
                .iter()
                .filter(|e| e.request_id == self.request_id)
                .map(|e| format!("{}: {}", e.capability, e.message))
                .collect(),
        }
    }

    /// Last `n` audit entries
    pub fn log_tail(&self, n: usize) -> &[AuditEntry] {
        let start = self.execution_log.len().saturating_sub(n);
        &self.execution_log[start..]
    }

    /// Chat history in rig message format
    #[cfg(feature = "rig")]
    pub fn rig_history(&self) -> Vec<rig::completion::Message> {
        self.history
            .iter()
            .map(|turn| match turn.role {
                Role::User => rig::completion::Message::user(turn.text.clone()),
                Role::Assistant => rig::completion::Message::assistant(turn.text.clone()),
            })
            .collect()
    }
}

/// Read-only projection of the context without image bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub session_id: String,
    pub user_input: String,
    pub history: Vec<Turn>,
    pub has_image: bool,
    pub symptoms: Option<SymptomProfile>,
    pub image_findings: Option<String>,
    pub diagnosis: Option<Diagnosis>,
    pub risk_assessment: Option<RiskAssessment>,
    pub investigations: Vec<Investigation>,
    pub recommendation: Option<String>,
    pub appointment: Option<Appointment>,
    pub information_needed: bool,
    pub final_response: Option<String>,
    pub revision_count: u32,
    pub max_revisions: u32,
    pub new_request: bool,
    pub produced_this_request: Vec<Capability>,
    pub errors: Vec<String>,
}
