use base64::{Engine as _, engine::general_purpose::STANDARD};
use care_flow::{
    AuditEntry, CapabilityFailure, ContextState, ImagePayload, Plan, RunStatus, SharedContext,
    Turn,
};
use serde::{Deserialize, Serialize};

/// Largest decoded image accepted on `/consult`
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct ConsultRequest {
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: String,
    pub image: Option<ImageUpload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageUpload {
    pub mime_type: String,
    /// Base64-encoded image bytes
    pub data: String,
}

impl ImageUpload {
    /// Check the payload is a decodable image within the size limit
    pub fn into_payload(self) -> Result<ImagePayload, String> {
        if !self.mime_type.starts_with("image/") {
            return Err(format!("unsupported mime type: {}", self.mime_type));
        }
        let bytes = STANDARD
            .decode(self.data.trim())
            .map_err(|e| format!("image is not valid base64: {e}"))?;
        if bytes.is_empty() {
            return Err("image is empty".to_string());
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(format!(
                "image is {} bytes, limit is {MAX_IMAGE_BYTES}",
                bytes.len()
            ));
        }
        Ok(ImagePayload {
            mime_type: self.mime_type,
            data_base64: self.data.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultResponse {
    pub session_id: String,
    /// `completed`, `awaiting_input`, `aborted`, `cancelled`, or `blocked` when screened out
    pub status: String,
    pub response: Option<String>,
    pub awaiting_input: bool,
    pub plan: Plan,
}

impl ConsultResponse {
    pub fn from_run(status: RunStatus, context: &SharedContext) -> Self {
        Self {
            session_id: context.session_id.clone(),
            status: status_name(status),
            response: context.final_response.clone(),
            awaiting_input: context.information_needed,
            plan: context.plan.clone(),
        }
    }

    pub fn blocked(session_id: String, message: String) -> Self {
        Self {
            session_id,
            status: "blocked".to_string(),
            response: Some(message),
            awaiting_input: false,
            plan: Plan::new(),
        }
    }
}

fn status_name(status: RunStatus) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{status:?}").to_lowercase())
}

/// Stored session view for `GET /session/{id}`; image bytes are never returned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub state: ContextState,
    pub user_input: String,
    pub final_response: Option<String>,
    pub information_needed: bool,
    pub has_image: bool,
    pub revision_count: u32,
    pub history: Vec<Turn>,
    pub plan: Plan,
    pub errors: Vec<CapabilityFailure>,
    pub execution_log: Vec<AuditEntry>,
}

impl From<SharedContext> for SessionResponse {
    fn from(context: SharedContext) -> Self {
        Self {
            state: context.state(),
            has_image: context.image.is_some(),
            session_id: context.session_id,
            user_input: context.user_input,
            final_response: context.final_response,
            information_needed: context.information_needed,
            revision_count: context.revision_count,
            history: context.history,
            plan: context.plan,
            errors: context.errors,
            execution_log: context.execution_log,
        }
    }
}
