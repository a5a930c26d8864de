//! The orchestration loop: consult the oracle, normalize its decision, dispatch one
//! capability unit, record the result, repeat until the run terminates.
//!
//! One run is one sequential control flow over an exclusively owned
//! [`SharedContext`]. Every external call carries a timeout and cancellation is
//! only observed between iterations, so the context is always structurally valid
//! when the run returns.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    capability::{Capability, UnitOutcome},
    config::EngineConfig,
    context::{AuditEntry, SharedContext},
    decision::{self, Decision, RawDecision},
    error::{FlowError, UnitError},
    oracle::{DecisionOracle, OracleRequest},
    plan::{Route, StepStatus},
    registry::CapabilityRegistry,
};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Final response produced and the plan resolved
    Completed,
    /// Suspended until the requester answers a clarification question
    AwaitingInput,
    /// Termination invariant broken; fallback response substituted
    Aborted,
    /// Cancelled between iterations; context left in progress
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub context: SharedContext,
    pub iterations: u32,
    pub abort_reason: Option<String>,
}

impl RunOutcome {
    pub fn response(&self) -> Option<&str> {
        self.context.final_response.as_deref()
    }
}

pub struct Orchestrator {
    registry: Arc<CapabilityRegistry>,
    oracle: Arc<dyn DecisionOracle>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        oracle: Arc<dyn DecisionOracle>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            oracle,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drive one physical request to termination, suspension or cancellation
    pub async fn run(&self, mut context: SharedContext, cancel: CancellationToken) -> RunOutcome {
        let mut iteration = 0;

        loop {
            if cancel.is_cancelled() {
                info!(
                    session_id = %context.session_id,
                    iteration,
                    "Run cancelled between iterations"
                );
                return RunOutcome {
                    status: RunStatus::Cancelled,
                    context,
                    iterations: iteration,
                    abort_reason: None,
                };
            }

            if iteration >= self.config.max_iterations {
                warn!(
                    session_id = %context.session_id,
                    max_iterations = self.config.max_iterations,
                    "Iteration limit reached, finalizing run"
                );
                return self.finalize(context, iteration, Some("iteration limit reached"));
            }
            iteration += 1;

            let raw = self.consult_oracle(&context).await;
            let decision = decision::normalize(&raw, &context);
            self.log_decision(&context, iteration, &raw, &decision);

            let Decision {
                route,
                plan,
                input_override,
                reasoning,
                corrections,
            } = decision;
            context.plan = plan;
            context.next_route = Some(route);
            let corrections: Vec<String> = corrections.iter().map(|c| c.to_string()).collect();

            match route {
                Route::End => {
                    context.execution_log.push(AuditEntry {
                        iteration,
                        route,
                        from_status: None,
                        to_status: None,
                        reasoning,
                        corrections,
                        error: None,
                        at: Utc::now(),
                    });
                    return self.finalize(context, iteration, None);
                }
                Route::Dispatch(capability) => {
                    self.dispatch(
                        &mut context,
                        capability,
                        input_override.as_deref(),
                        iteration,
                        reasoning,
                        corrections,
                    )
                    .await;
                }
            }
        }
    }

    /// Ask the oracle for a decision: one retry with the shorter timeout after a
    /// timeout, then give up and let normalization pick the safe default
    async fn consult_oracle(&self, context: &SharedContext) -> RawDecision {
        let request = OracleRequest {
            context: context.snapshot(),
            plan: context.plan.clone(),
            log_tail: context.log_tail(self.config.log_tail).to_vec(),
        };

        let first = self.config.oracle_timeout();
        match timeout(first, self.oracle.decide(&request)).await {
            Ok(Ok(reply)) => return RawDecision::Reply(reply),
            Ok(Err(e)) => {
                warn!(session_id = %context.session_id, error = %e, "Decision oracle failed");
                return RawDecision::Unavailable(e.to_string());
            }
            Err(_) => {
                warn!(
                    session_id = %context.session_id,
                    timeout = ?first,
                    "Decision oracle timed out, retrying once"
                );
            }
        }

        let retry = self.config.oracle_retry_timeout();
        match timeout(retry, self.oracle.decide(&request)).await {
            Ok(Ok(reply)) => RawDecision::Reply(reply),
            Ok(Err(e)) => {
                warn!(session_id = %context.session_id, error = %e, "Decision oracle retry failed");
                RawDecision::Unavailable(e.to_string())
            }
            Err(_) => {
                let err = FlowError::OracleTimeout(retry);
                warn!(session_id = %context.session_id, error = %err, "Decision oracle retry timed out");
                RawDecision::Unavailable(err.to_string())
            }
        }
    }

    async fn dispatch(
        &self,
        context: &mut SharedContext,
        capability: Capability,
        input_override: Option<&str>,
        iteration: u32,
        reasoning: String,
        corrections: Vec<String>,
    ) {
        let route = Route::Dispatch(capability);
        let is_revision = capability == Capability::DiagnosisEngine
            && context.attempted.contains(&Capability::DiagnosisEngine);
        let goal = if is_revision {
            "revise diagnosis with critic feedback"
        } else {
            "dispatched by routing decision"
        };

        let index = match context.plan.begin(capability, goal) {
            Ok(index) => index,
            Err(e) => {
                // Only reachable if a step was left current, which dispatch never does
                error!(
                    session_id = %context.session_id,
                    capability = %capability,
                    error = %e,
                    "Cannot start plan step"
                );
                context.record_failure(capability, e.to_string());
                context.execution_log.push(AuditEntry {
                    iteration,
                    route,
                    from_status: None,
                    to_status: None,
                    reasoning,
                    corrections,
                    error: Some(e.to_string()),
                    at: Utc::now(),
                });
                return;
            }
        };

        if is_revision {
            context.revision_count += 1;
        }
        context.attempted.insert(capability);
        context.pending_request = false;

        info!(
            session_id = %context.session_id,
            iteration,
            capability = %capability,
            revision = is_revision,
            "Dispatching capability"
        );

        let result = self.invoke_unit(context, capability, input_override).await;

        let (to_status, error, plan_result) = match result {
            Ok(UnitOutcome::Updated(update)) => {
                context.apply(capability, update);
                (StepStatus::Completed, None, context.plan.complete(index, None))
            }
            Ok(UnitOutcome::Declined(reason)) => {
                info!(capability = %capability, reason = %reason, "Capability declined to act");
                let skipped = context.plan.skip(index, reason);
                (StepStatus::Skipped, None, skipped)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(
                    session_id = %context.session_id,
                    capability = %capability,
                    error = %message,
                    snapshot = %serde_json::to_string(&context.snapshot()).unwrap_or_default(),
                    "Capability failed, continuing with degraded context"
                );
                context.record_failure(capability, message.clone());
                let completed = context.plan.complete(index, Some(message.clone()));
                (StepStatus::Completed, Some(message), completed)
            }
        };
        if let Err(e) = plan_result {
            error!(capability = %capability, error = %e, "Plan step could not be resolved");
        }

        context.execution_log.push(AuditEntry {
            iteration,
            route,
            from_status: Some(StepStatus::Current),
            to_status: Some(to_status),
            reasoning,
            corrections,
            error,
            at: Utc::now(),
        });
    }

    async fn invoke_unit(
        &self,
        context: &SharedContext,
        capability: Capability,
        input_override: Option<&str>,
    ) -> Result<UnitOutcome, UnitError> {
        let unit = self
            .registry
            .unit(capability)
            .ok_or_else(|| UnitError::Failed(FlowError::MissingCapability(capability).to_string()))?;

        if let Some(missing) = unit.requires().iter().find(|f| !context.has(**f)) {
            return Err(UnitError::MissingInput(*missing));
        }

        let limit = self.config.unit_timeout();
        timeout(limit, unit.invoke(context, input_override))
            .await
            .unwrap_or(Err(UnitError::Timeout(limit)))
    }

    /// Close out the run and check the termination invariant
    fn finalize(
        &self,
        mut context: SharedContext,
        iterations: u32,
        cut_short: Option<&str>,
    ) -> RunOutcome {
        context.next_route = Some(Route::End);
        context.pending_request = false;
        context.plan.close_terminal_markers();

        if context.information_needed {
            let withdrawn = context.plan.withdraw_pending();
            info!(
                session_id = %context.session_id,
                iterations,
                withdrawn = withdrawn.len(),
                "Run suspended awaiting input"
            );
            return RunOutcome {
                status: RunStatus::AwaitingInput,
                context,
                iterations,
                abort_reason: None,
            };
        }

        if let Some(reason) = cut_short {
            context.plan.skip_all_pending(reason);
        }

        if context.has_final_response() && context.plan.is_resolved() {
            info!(session_id = %context.session_id, iterations, "Run completed");
            return RunOutcome {
                status: RunStatus::Completed,
                context,
                iterations,
                abort_reason: None,
            };
        }

        let violation = FlowError::InvariantViolation(format!(
            "run terminated with {} and {} plan",
            if context.has_final_response() {
                "a response"
            } else {
                "no response and no clarification request"
            },
            if context.plan.is_resolved() {
                "a resolved"
            } else {
                "an unresolved"
            }
        ));
        error!(
            session_id = %context.session_id,
            error = %violation,
            snapshot = %serde_json::to_string(&context.snapshot()).unwrap_or_default(),
            "Aborting run, substituting fallback response"
        );
        context.plan.skip_all_pending("run aborted");
        context.final_response = Some(self.config.fallback_message.clone());

        RunOutcome {
            status: RunStatus::Aborted,
            context,
            iterations,
            abort_reason: Some(violation.to_string()),
        }
    }

    fn log_decision(
        &self,
        context: &SharedContext,
        iteration: u32,
        raw: &RawDecision,
        decision: &Decision,
    ) {
        if decision.is_fallback() {
            warn!(
                session_id = %context.session_id,
                iteration,
                raw_output = ?raw,
                snapshot = %serde_json::to_string(&context.snapshot()).unwrap_or_default(),
                "Oracle decision rejected, using safe default"
            );
        } else if !decision.corrections.is_empty() {
            info!(
                session_id = %context.session_id,
                iteration,
                route = %decision.route,
                corrections = ?decision.corrections,
                "Oracle decision corrected"
            );
        } else {
            info!(
                session_id = %context.session_id,
                iteration,
                route = %decision.route,
                "Oracle decision accepted"
            );
        }
    }
}
