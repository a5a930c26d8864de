//! Decision normalization.
//!
//! Sits between the oracle and dispatch. [`normalize`] is a pure function of the
//! raw oracle output and the current context: it validates the reply, merges the
//! proposed plan, and applies the routing rules the oracle cannot be trusted to
//! respect (completion check, suspend-for-input, diagnosis prerequisites, the
//! revision bound and the synthesis requirement).

use std::fmt;

use crate::{
    capability::Capability,
    context::SharedContext,
    error::FlowError,
    oracle::parse_oracle_response,
    plan::{Plan, Route},
};

/// Capability used whenever the oracle's decision cannot be used
pub const SAFE_DEFAULT: Capability = Capability::GeneralConversation;

/// Oracle output as seen by the normalizer
#[derive(Debug, Clone, PartialEq)]
pub enum RawDecision {
    Reply(String),
    /// No usable reply (timeout or transport failure)
    Unavailable(String),
}

/// Why the engine deviated from what the oracle asked for
#[derive(Debug, Clone, PartialEq)]
pub enum Correction {
    /// Every step was already resolved and no new request arrived
    PlanAlreadyResolved,
    /// Diagnosis asked the user for clarification; pending steps are withdrawn
    SuspendedForInput { withdrawn: usize },
    /// Reply failed validation; previous plan kept, safe default routed
    Fallback(String),
    /// Oracle plan statuses or steps the merge rewrote
    PlanAdjusted(String),
    /// Oracle chose to end while steps were still pending
    PendingStepsRemain(Capability),
    MissingPrerequisite {
        requested: Capability,
        substituted: Capability,
    },
    /// Prerequisite already attempted this request without producing output
    PrerequisiteUnavailable(Capability),
    RevisionBoundReached { max_revisions: u32 },
    SynthesisNotRequired { inputs: usize },
}

impl fmt::Display for Correction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Correction::PlanAlreadyResolved => {
                write!(f, "plan already resolved without a new request, terminating")
            }
            Correction::SuspendedForInput { withdrawn } => write!(
                f,
                "diagnosis requested clarification, suspending ({withdrawn} pending steps withdrawn)"
            ),
            Correction::Fallback(reason) => {
                write!(f, "invalid decision ({reason}), routing to {SAFE_DEFAULT}")
            }
            Correction::PlanAdjusted(note) => write!(f, "plan adjusted: {note}"),
            Correction::PendingStepsRemain(next) => {
                write!(f, "termination requested with pending steps, continuing with {next}")
            }
            Correction::MissingPrerequisite {
                requested,
                substituted,
            } => write!(f, "{requested} needs prior output, routing to {substituted}"),
            Correction::PrerequisiteUnavailable(prerequisite) => write!(
                f,
                "{prerequisite} produced no output this request, routing to {SAFE_DEFAULT}"
            ),
            Correction::RevisionBoundReached { max_revisions } => write!(
                f,
                "diagnosis revised {max_revisions} times, accepting current output"
            ),
            Correction::SynthesisNotRequired { inputs } => write!(
                f,
                "synthesis needs two completed findings, plan has {inputs}"
            ),
        }
    }
}

/// The validated decision the orchestrator acts on
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub route: Route,
    pub plan: Plan,
    pub input_override: Option<String>,
    pub reasoning: String,
    pub corrections: Vec<Correction>,
}

impl Decision {
    fn terminate(plan: Plan, reasoning: String, correction: Correction) -> Self {
        Self {
            route: Route::End,
            plan,
            input_override: None,
            reasoning,
            corrections: vec![correction],
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.corrections
            .iter()
            .any(|c| matches!(c, Correction::Fallback(_)))
    }
}

/// Turn raw oracle output into a safe next route and plan
pub fn normalize(raw: &RawDecision, context: &SharedContext) -> Decision {
    let prior = &context.plan;
    let parsed = match raw {
        RawDecision::Reply(text) => parse_oracle_response(text),
        RawDecision::Unavailable(reason) => Err(FlowError::Oracle(reason.clone())),
    };
    let oracle_reasoning = parsed
        .as_ref()
        .map(|r| r.reasoning.clone())
        .unwrap_or_default();

    // Hard overrides come first: the oracle is not trusted to respect them.
    if suspend_requested(context) {
        let mut plan = prior.clone();
        let withdrawn = plan.withdraw_pending().len();
        return Decision::terminate(
            plan,
            oracle_reasoning,
            Correction::SuspendedForInput { withdrawn },
        );
    }
    if !prior.is_empty() && prior.is_resolved() && !context.pending_request {
        return Decision::terminate(
            prior.clone(),
            oracle_reasoning,
            Correction::PlanAlreadyResolved,
        );
    }

    let accepted = parsed.and_then(|response| {
        let merged = prior.merge(&response.plan)?;
        Ok((response, merged))
    });

    let (response, merged) = match accepted {
        Ok(accepted) => accepted,
        Err(e) => {
            return Decision {
                route: Route::Dispatch(SAFE_DEFAULT),
                plan: prior.clone(),
                input_override: None,
                reasoning: oracle_reasoning,
                corrections: vec![Correction::Fallback(e.to_string())],
            };
        }
    };

    let mut plan = merged.plan;
    let mut corrections: Vec<Correction> = merged
        .adjustments
        .into_iter()
        .map(Correction::PlanAdjusted)
        .collect();

    let requested = response.next_step;
    let route = enforce_routing_rules(requested, &mut plan, context, &mut corrections);

    Decision {
        route,
        plan,
        // An override written for one unit must not leak into another
        input_override: if route == requested {
            response.input_override
        } else {
            None
        },
        reasoning: response.reasoning,
        corrections,
    }
}

/// Diagnosis was the last thing to complete and asked the user a question
fn suspend_requested(context: &SharedContext) -> bool {
    context.information_needed
        && context.has_final_response()
        && context
            .plan
            .last_completed()
            .is_some_and(|s| s.capability == Route::Dispatch(Capability::DiagnosisEngine))
}

fn enforce_routing_rules(
    requested: Route,
    plan: &mut Plan,
    context: &SharedContext,
    corrections: &mut Vec<Correction>,
) -> Route {
    let mut route = requested;
    // Each pass either settles or resolves a pending step, so this bound is never the limiter
    let passes = plan.len() + Capability::ALL.len();

    for _ in 0..passes {
        match route {
            Route::End => match plan.next_pending_route() {
                Some(Route::Dispatch(next)) => {
                    corrections.push(Correction::PendingStepsRemain(next));
                    route = Route::Dispatch(next);
                }
                _ => break,
            },
            Route::Dispatch(Capability::DiagnosisEngine) => {
                // Any earlier attempt this request, successful or not, makes this a revision
                if context.attempted.contains(&Capability::DiagnosisEngine) {
                    if context.revision_count < context.max_revisions {
                        break;
                    }
                    plan.skip_pending(
                        Capability::DiagnosisEngine,
                        "revision bound reached, current diagnosis accepted",
                    );
                    corrections.push(Correction::RevisionBoundReached {
                        max_revisions: context.max_revisions,
                    });
                    route = plan.next_pending_route().unwrap_or(Route::End);
                    continue;
                }

                let Some(prerequisite) = missing_prerequisite(context) else {
                    break;
                };
                if context.attempted.contains(&prerequisite) {
                    plan.skip_pending(
                        Capability::DiagnosisEngine,
                        "no symptom or image findings available",
                    );
                    corrections.push(Correction::PrerequisiteUnavailable(prerequisite));
                    route = Route::Dispatch(SAFE_DEFAULT);
                    break;
                }
                plan.ensure_pending(
                    prerequisite,
                    format!("Run {prerequisite} before diagnosis"),
                    "diagnosis requires extracted findings for the current request",
                );
                corrections.push(Correction::MissingPrerequisite {
                    requested: Capability::DiagnosisEngine,
                    substituted: prerequisite,
                });
                route = Route::Dispatch(prerequisite);
                break;
            }
            Route::Dispatch(Capability::Synthesizer) => {
                let inputs = synthesis_inputs(plan);
                if inputs >= 2 {
                    break;
                }
                plan.skip_pending(
                    Capability::Synthesizer,
                    "fewer than two findings to synthesize",
                );
                corrections.push(Correction::SynthesisNotRequired { inputs });
                route = plan.next_pending_route().unwrap_or(Route::End);
            }
            Route::Dispatch(_) => break,
        }
    }
    route
}

/// The extraction capability diagnosis still needs for this request, if any
fn missing_prerequisite(context: &SharedContext) -> Option<Capability> {
    let text_done = context.produced.contains(&Capability::SymptomExtractor);
    let image_done = context.produced.contains(&Capability::ImageAnalyzer);
    if text_done || image_done {
        return None;
    }
    let has_text = !context.user_input.trim().is_empty();
    if context.image.is_some() && (!has_text || context.attempted.contains(&Capability::SymptomExtractor)) {
        Some(Capability::ImageAnalyzer)
    } else {
        Some(Capability::SymptomExtractor)
    }
}

fn synthesis_inputs(plan: &Plan) -> usize {
    let completed = plan.completed_capabilities();
    Capability::SYNTHESIS_INPUTS
        .iter()
        .filter(|c| completed.contains(c))
        .count()
}
