//! SessionRunner – loads (or creates) the session context for one physical request,
//! runs the orchestrator to termination, suspension or cancellation, and persists
//! the result.
//!
//! A suspended run is a persisted state machine keyed by session id, not a call
//! stack: the next request for the same session, possibly on another process,
//! resumes the stored plan without re-executing completed steps.
//!
//! ```rust,ignore
//! let runner = SessionRunner::new(orchestrator, store);
//! let outcome = runner
//!     .handle(IncomingRequest::new("session-1", "I have a fever"), CancellationToken::new())
//!     .await?;
//! println!("{:?}: {:?}", outcome.status, outcome.response());
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    context::{ImagePayload, SharedContext},
    error::{FlowError, Result},
    orchestrator::{Orchestrator, RunOutcome},
    storage::SessionStore,
};

/// One incoming user message
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub session_id: String,
    pub message: String,
    pub image: Option<ImagePayload>,
}

impl IncomingRequest {
    pub fn new(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message: message.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImagePayload) -> Self {
        self.image = Some(image);
        self
    }
}

/// High-level helper for the _load → run → save_ pattern
#[derive(Clone)]
pub struct SessionRunner {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn SessionStore>,
}

impl SessionRunner {
    pub fn new(orchestrator: Arc<Orchestrator>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            orchestrator,
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Neutral text shown to the requester in place of any internal failure
    pub fn fallback_message(&self) -> &str {
        &self.orchestrator.config().fallback_message
    }

    /// Run one physical request for its session and persist the outcome
    pub async fn handle(
        &self,
        request: IncomingRequest,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        let context = match self.store.load(&request.session_id).await? {
            Some(mut context) => {
                info!(
                    session_id = %request.session_id,
                    plan_steps = context.plan.len(),
                    awaiting_input = context.information_needed,
                    "Resuming session"
                );
                context.begin_request(request.message, request.image);
                context
            }
            None => {
                info!(session_id = %request.session_id, "Starting new session");
                let context = SharedContext::new(request.session_id.clone(), request.message)
                    .with_max_revisions(self.orchestrator.config().max_revisions);
                match request.image {
                    Some(image) => context.with_image(image),
                    None => context,
                }
            }
        };

        let outcome = self.orchestrator.run(context, cancel).await;
        self.store
            .save(&outcome.context.session_id, &outcome.context)
            .await?;
        Ok(outcome)
    }

    /// Load a stored context, failing if the session does not exist
    pub async fn session(&self, session_id: &str) -> Result<SharedContext> {
        self.store
            .load(session_id)
            .await?
            .ok_or_else(|| FlowError::SessionNotFound(session_id.to_string()))
    }
}
