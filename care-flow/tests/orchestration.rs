mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use care_flow::{
    Capability, ContextUpdate, DecisionOracle, Diagnosis, EngineConfig, ImagePayload, IncomingRequest,
    InMemorySessionStore, OracleRequest, Orchestrator, Plan, RunStatus, SessionStore,
    SharedContext, Step, StepStatus, UnitError, UnitOutcome,
};
use common::*;
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn statuses(context: &SharedContext) -> Vec<(String, StepStatus)> {
    context
        .plan
        .steps()
        .iter()
        .map(|s| (s.capability.to_string(), s.status))
        .collect()
}

#[tokio::test]
async fn test_symptom_report_is_extracted_then_diagnosed() {
    let fakes = Fakes::standard();
    let oracle = ScriptedOracle::new(vec![
        decide(
            "symptom_extractor",
            plan(&[("symptom_extractor", "pending"), ("diagnosis_engine", "pending")]),
        ),
        decide(
            "diagnosis_engine",
            plan(&[("symptom_extractor", "completed"), ("diagnosis_engine", "pending")]),
        ),
        // Completed plan: the engine ends the run regardless of this proposal
        decide(
            "synthesizer",
            plan(&[
                ("symptom_extractor", "completed"),
                ("diagnosis_engine", "completed"),
                ("synthesizer", "pending"),
            ]),
        ),
    ]);
    let engine = orchestrator(&fakes, oracle.clone(), test_config());

    let outcome = engine
        .run(
            SharedContext::new("s1", "I have had a fever and a cough for three days"),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.response(), Some("This looks like a viral infection."));
    assert_eq!(
        statuses(&outcome.context),
        vec![
            ("symptom_extractor".to_string(), StepStatus::Completed),
            ("diagnosis_engine".to_string(), StepStatus::Completed),
        ]
    );
    assert_eq!(fakes.calls(Capability::Synthesizer), 0);
    assert_eq!(
        dispatched(&outcome.context),
        vec!["symptom_extractor", "diagnosis_engine"]
    );
    assert!(outcome.context.execution_log.last().unwrap().route.is_end());
    assert!(outcome.context.next_route.unwrap().is_end());

    let requests = oracle.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[0].context.new_request);
    assert!(!requests[1].context.new_request);
    assert_eq!(
        requests[1].context.produced_this_request,
        vec![Capability::SymptomExtractor]
    );
}

#[tokio::test]
async fn test_follow_up_request_extends_completed_plan() {
    let fakes = Fakes::standard();
    let oracle = ScriptedOracle::new(vec![
        decide(
            "recommender",
            plan(&[
                ("symptom_extractor", "completed"),
                ("diagnosis_engine", "completed"),
                ("recommender", "pending"),
                ("synthesizer", "pending"),
            ]),
        ),
        decide(
            "synthesizer",
            plan(&[
                ("symptom_extractor", "completed"),
                ("diagnosis_engine", "completed"),
                ("recommender", "completed"),
                ("synthesizer", "pending"),
            ]),
        ),
    ]);
    let store = Arc::new(InMemorySessionStore::new());

    let mut previous = SharedContext::new("s1", "I have a fever");
    previous.plan = Plan::from_steps(vec![
        Step::new(Capability::SymptomExtractor, "extract", "g").with_status(StepStatus::Completed),
        Step::new(Capability::DiagnosisEngine, "diagnose", "g").with_status(StepStatus::Completed),
    ])
    .unwrap();
    previous.diagnosis = Some(Diagnosis {
        summary: "Likely viral infection".to_string(),
        conditions: Vec::new(),
        confidence: None,
    });
    previous.final_response = Some("This looks like a viral infection.".to_string());
    previous.pending_request = false;
    store.save("s1", &previous).await.unwrap();

    let runner = runner(&fakes, oracle, store.clone());
    let outcome = runner
        .handle(
            IncomingRequest::new("s1", "What should I do to treat this?"),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(
        statuses(&outcome.context),
        vec![
            ("symptom_extractor".to_string(), StepStatus::Completed),
            ("diagnosis_engine".to_string(), StepStatus::Completed),
            ("recommender".to_string(), StepStatus::Completed),
            ("synthesizer".to_string(), StepStatus::Completed),
        ]
    );
    assert_eq!(dispatched(&outcome.context), vec!["recommender", "synthesizer"]);
    assert_eq!(fakes.calls(Capability::SymptomExtractor), 0);
    assert_eq!(fakes.calls(Capability::DiagnosisEngine), 0);

    let stored = store.load("s1").await.unwrap().unwrap();
    assert_eq!(stored, outcome.context);
    assert_eq!(stored.history.len(), 2);
}

#[tokio::test]
async fn test_premature_diagnosis_runs_extraction_first() {
    let fakes = Fakes::standard();
    let oracle = ScriptedOracle::new(vec![
        decide("diagnosis_engine", plan(&[("diagnosis_engine", "pending")])),
        decide(
            "diagnosis_engine",
            plan(&[("diagnosis_engine", "pending"), ("symptom_extractor", "completed")]),
        ),
    ]);
    let engine = orchestrator(&fakes, oracle, test_config());

    let outcome = engine
        .run(SharedContext::new("s1", "I have a headache"), CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(
        dispatched(&outcome.context),
        vec!["symptom_extractor", "diagnosis_engine"]
    );
    assert_eq!(
        statuses(&outcome.context),
        vec![
            ("diagnosis_engine".to_string(), StepStatus::Completed),
            ("symptom_extractor".to_string(), StepStatus::Completed),
        ]
    );
    let first = &outcome.context.execution_log[0];
    assert!(
        first
            .corrections
            .iter()
            .any(|c| c.contains("diagnosis_engine needs prior output")),
        "corrections: {:?}",
        first.corrections
    );
}

#[tokio::test]
async fn test_image_only_request_analyzes_image_before_diagnosis() {
    let fakes = Fakes::standard();
    let oracle = ScriptedOracle::new(vec![
        decide("diagnosis_engine", plan(&[("diagnosis_engine", "pending")])),
        decide(
            "diagnosis_engine",
            plan(&[("diagnosis_engine", "pending"), ("image_analyzer", "completed")]),
        ),
    ]);
    let engine = orchestrator(&fakes, oracle, test_config());
    let context = SharedContext::new("s1", "").with_image(ImagePayload {
        mime_type: "image/jpeg".to_string(),
        data_base64: "aGVsbG8=".to_string(),
    });

    let outcome = engine.run(context, CancellationToken::new()).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(dispatched(&outcome.context), vec!["image_analyzer", "diagnosis_engine"]);
    assert_eq!(fakes.calls(Capability::SymptomExtractor), 0);
    assert_eq!(
        outcome.context.image_findings.as_deref(),
        Some("erythematous rash")
    );
}

#[tokio::test]
async fn test_malformed_decision_falls_back_to_conversation() {
    let fakes = Fakes::standard();
    let oracle = ScriptedOracle::new(vec![OracleReply::Raw(
        r#"{"next_step": "symptom_extractor", "reasoning": "the user reports symptoms"}"#
            .to_string(),
    )]);
    let engine = orchestrator(&fakes, oracle, test_config());

    let outcome = engine
        .run(SharedContext::new("s1", "Hi there"), CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(dispatched(&outcome.context), vec!["general_conversation"]);
    assert_eq!(fakes.calls(Capability::SymptomExtractor), 0);
    assert!(
        outcome.context.execution_log[0]
            .corrections
            .iter()
            .any(|c| c.starts_with("invalid decision"))
    );
    assert_eq!(outcome.response(), Some("Hello! How can I help?"));
}

#[tokio::test]
async fn test_oracle_failure_falls_back_to_conversation() {
    let fakes = Fakes::standard();
    let oracle = ScriptedOracle::new(vec![OracleReply::Fail("connection refused".to_string())]);
    let engine = orchestrator(&fakes, oracle.clone(), test_config());

    let outcome = engine
        .run(SharedContext::new("s1", "Hello"), CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(dispatched(&outcome.context), vec!["general_conversation"]);
    // Transport errors are not retried
    assert_eq!(oracle.requests().len(), 2);
}

#[tokio::test]
async fn test_diagnosis_revisions_are_bounded() {
    let diagnosis = FakeUnit::standard(Capability::DiagnosisEngine);
    let fakes = Fakes::standard().replace(diagnosis.clone());
    let oracle = ScriptedOracle::new(vec![
        decide(
            "symptom_extractor",
            plan(&[
                ("symptom_extractor", "pending"),
                ("diagnosis_engine", "pending"),
                ("recommender", "pending"),
            ]),
        ),
        decide(
            "diagnosis_engine",
            plan(&[
                ("symptom_extractor", "completed"),
                ("diagnosis_engine", "pending"),
                ("recommender", "pending"),
            ]),
        ),
        decide_with_override(
            "diagnosis_engine",
            plan(&[
                ("symptom_extractor", "completed"),
                ("diagnosis_engine", "completed"),
                ("recommender", "pending"),
                ("diagnosis_engine", "pending"),
            ]),
            "Consider dehydration",
        ),
        decide_with_override(
            "diagnosis_engine",
            plan(&[
                ("symptom_extractor", "completed"),
                ("diagnosis_engine", "completed"),
                ("recommender", "pending"),
                ("diagnosis_engine", "completed"),
                ("diagnosis_engine", "pending"),
            ]),
            "Rule out influenza",
        ),
        decide_with_override(
            "diagnosis_engine",
            plan(&[
                ("symptom_extractor", "completed"),
                ("diagnosis_engine", "completed"),
                ("recommender", "pending"),
                ("diagnosis_engine", "completed"),
                ("diagnosis_engine", "completed"),
                ("diagnosis_engine", "pending"),
            ]),
            "Reconsider once more",
        ),
    ]);
    let engine = orchestrator(&fakes, oracle, test_config());

    let outcome = engine
        .run(SharedContext::new("s1", "I feel dizzy and thirsty"), CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.context.revision_count, 2);
    assert_eq!(
        diagnosis.overrides(),
        vec![
            None,
            Some("Consider dehydration".to_string()),
            Some("Rule out influenza".to_string()),
        ]
    );
    // The third revision request was redirected and its override dropped
    assert_eq!(fakes.unit(Capability::Recommender).overrides(), vec![None]);
    let last_step = outcome.context.plan.steps().last().unwrap();
    assert_eq!(last_step.capability.to_string(), "diagnosis_engine");
    assert_eq!(last_step.status, StepStatus::Skipped);
    assert!(outcome.context.plan.is_resolved());
}

#[tokio::test]
async fn test_clarification_suspends_and_resumes_same_session() {
    let diagnosis = FakeUnit::new(
        Capability::DiagnosisEngine,
        Arc::new(|context: &SharedContext, _: Option<&str>, call: usize| {
            if call == 0 {
                return Ok(UnitOutcome::Updated(
                    ContextUpdate::default().ask("How long have you had the fever?"),
                ));
            }
            (standard_behavior(Capability::DiagnosisEngine))(context, None, call)
        }),
    );
    let fakes = Fakes::standard().replace(diagnosis.clone());
    let oracle = ScriptedOracle::new(vec![
        // First request
        decide(
            "symptom_extractor",
            plan(&[("symptom_extractor", "pending"), ("diagnosis_engine", "pending")]),
        ),
        decide(
            "diagnosis_engine",
            plan(&[("symptom_extractor", "completed"), ("diagnosis_engine", "pending")]),
        ),
        decide(
            "recommender",
            plan(&[
                ("symptom_extractor", "completed"),
                ("diagnosis_engine", "completed"),
                ("recommender", "pending"),
            ]),
        ),
        // Answer to the clarification question
        decide(
            "symptom_extractor",
            plan(&[
                ("symptom_extractor", "completed"),
                ("diagnosis_engine", "completed"),
                ("symptom_extractor", "pending"),
                ("diagnosis_engine", "pending"),
            ]),
        ),
        decide(
            "diagnosis_engine",
            plan(&[
                ("symptom_extractor", "completed"),
                ("diagnosis_engine", "completed"),
                ("symptom_extractor", "completed"),
                ("diagnosis_engine", "pending"),
            ]),
        ),
    ]);
    let store = Arc::new(InMemorySessionStore::new());
    let runner = runner(&fakes, oracle, store);

    let first = runner
        .handle(IncomingRequest::new("s1", "I have a fever"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(first.status, RunStatus::AwaitingInput);
    assert!(first.context.information_needed);
    assert_eq!(first.response(), Some("How long have you had the fever?"));
    assert_eq!(fakes.calls(Capability::Recommender), 0);
    let suspended_steps = first.context.plan.steps().to_vec();
    assert_eq!(suspended_steps.len(), 2);
    assert_eq!(suspended_steps[1].status, StepStatus::Completed);

    let second = runner
        .handle(IncomingRequest::new("s1", "About three days"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(second.status, RunStatus::Completed);
    assert!(!second.context.information_needed);
    assert_eq!(&second.context.plan.steps()[..2], suspended_steps.as_slice());
    assert_eq!(second.context.plan.len(), 4);
    assert!(second.context.plan.is_resolved());
    assert_eq!(diagnosis.calls(), 2);
    assert_eq!(second.response(), Some("This looks like a viral infection."));
    assert!(
        second
            .context
            .history
            .iter()
            .any(|turn| turn.text == "How long have you had the fever?")
    );

    let stored = runner.session("s1").await.unwrap();
    assert_eq!(stored.plan, second.context.plan);
}

#[tokio::test]
async fn test_failed_unit_is_recorded_and_run_continues() {
    let extractor = FakeUnit::new(
        Capability::SymptomExtractor,
        Arc::new(|_: &SharedContext, _: Option<&str>, _: usize| {
            Err(UnitError::Failed("model unavailable".to_string()))
        }),
    );
    let fakes = Fakes::standard().replace(extractor);
    let oracle = ScriptedOracle::new(vec![
        decide(
            "symptom_extractor",
            plan(&[("symptom_extractor", "pending"), ("diagnosis_engine", "pending")]),
        ),
        decide(
            "diagnosis_engine",
            plan(&[("symptom_extractor", "completed"), ("diagnosis_engine", "pending")]),
        ),
    ]);
    let engine = orchestrator(&fakes, oracle, test_config());

    let outcome = engine
        .run(SharedContext::new("s1", "My chest hurts"), CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.context.errors.len(), 1);
    assert_eq!(outcome.context.errors[0].capability, Capability::SymptomExtractor);
    assert_eq!(outcome.context.errors[0].message, "model unavailable");

    let steps = outcome.context.plan.steps();
    assert_eq!(steps[0].status, StepStatus::Completed);
    assert_eq!(steps[0].note.as_deref(), Some("model unavailable"));
    assert_eq!(steps[1].status, StepStatus::Skipped);
    assert_eq!(steps[2].capability.to_string(), "general_conversation");
    assert_eq!(fakes.calls(Capability::DiagnosisEngine), 0);
    assert_eq!(
        outcome.context.execution_log[0].error.as_deref(),
        Some("model unavailable")
    );
}

#[tokio::test]
async fn test_declining_unit_skips_its_step() {
    let scheduler = FakeUnit::new(
        Capability::AppointmentScheduler,
        Arc::new(|_: &SharedContext, _: Option<&str>, _: usize| {
            Ok(UnitOutcome::Declined("no department requested".to_string()))
        }),
    );
    let fakes = Fakes::standard().replace(scheduler);
    let oracle = ScriptedOracle::new(vec![
        decide(
            "appointment_scheduler",
            plan(&[("appointment_scheduler", "pending"), ("general_conversation", "pending")]),
        ),
        decide(
            "general_conversation",
            plan(&[("appointment_scheduler", "skipped"), ("general_conversation", "pending")]),
        ),
    ]);
    let engine = orchestrator(&fakes, oracle, test_config());

    let outcome = engine
        .run(SharedContext::new("s1", "Can I see someone?"), CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Completed);
    let steps = outcome.context.plan.steps();
    assert_eq!(steps[0].status, StepStatus::Skipped);
    assert_eq!(steps[0].note.as_deref(), Some("no department requested"));
    assert_eq!(steps[1].status, StepStatus::Completed);
    assert!(outcome.context.errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_oracle_timeout_twice_routes_to_conversation() {
    let fakes = Fakes::standard();
    let oracle = ScriptedOracle::new(vec![OracleReply::Hang, OracleReply::Hang]);
    let engine = orchestrator(&fakes, oracle.clone(), test_config());

    let outcome = engine
        .run(SharedContext::new("s1", "Hello"), CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(dispatched(&outcome.context), vec!["general_conversation"]);
    assert!(
        outcome.context.execution_log[0]
            .corrections
            .iter()
            .any(|c| c.contains("timed out"))
    );
    assert_eq!(oracle.requests().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_oracle_retry_after_timeout_is_used() {
    let fakes = Fakes::standard();
    let oracle = ScriptedOracle::new(vec![
        OracleReply::Hang,
        decide(
            "general_conversation",
            plan(&[("general_conversation", "pending")]),
        ),
    ]);
    let engine = orchestrator(&fakes, oracle.clone(), test_config());

    let outcome = engine
        .run(SharedContext::new("s1", "How do I sleep better?"), CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(dispatched(&outcome.context), vec!["general_conversation"]);
    assert!(outcome.context.execution_log[0].corrections.is_empty());
    assert_eq!(oracle.requests().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_slow_unit_times_out_and_is_recorded() {
    let fakes = Fakes::standard()
        .replace(FakeUnit::standard(Capability::SymptomExtractor).with_delay(Duration::from_secs(30)));
    let oracle = ScriptedOracle::new(vec![
        decide(
            "symptom_extractor",
            plan(&[("symptom_extractor", "pending"), ("general_conversation", "pending")]),
        ),
        decide(
            "general_conversation",
            plan(&[("symptom_extractor", "completed"), ("general_conversation", "pending")]),
        ),
    ]);
    let engine = orchestrator(&fakes, oracle, test_config());

    let outcome = engine
        .run(SharedContext::new("s1", "I have a rash"), CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.context.errors.len(), 1);
    assert!(outcome.context.errors[0].message.contains("timed out"));
    assert!(outcome.context.symptoms.is_none());
}

#[tokio::test]
async fn test_run_without_response_is_aborted_with_fallback() {
    let silent = FakeUnit::new(
        Capability::GeneralConversation,
        Arc::new(|_: &SharedContext, _: Option<&str>, _: usize| {
            Ok(UnitOutcome::Updated(ContextUpdate::default()))
        }),
    );
    let fakes = Fakes::standard().replace(silent);
    let oracle = ScriptedOracle::new(vec![decide(
        "general_conversation",
        plan(&[("general_conversation", "pending")]),
    )]);
    let config = test_config();
    let fallback = config.fallback_message.clone();
    let engine = orchestrator(&fakes, oracle, config);

    let outcome = engine
        .run(SharedContext::new("s1", "Hello"), CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Aborted);
    assert_eq!(outcome.response(), Some(fallback.as_str()));
    assert!(outcome.abort_reason.unwrap().contains("Invariant violation"));
    assert!(outcome.context.plan.is_resolved());
}

#[tokio::test]
async fn test_cancelled_before_start_does_nothing() {
    let fakes = Fakes::standard();
    let oracle = ScriptedOracle::new(vec![]);
    let engine = orchestrator(&fakes, oracle.clone(), test_config());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = engine
        .run(SharedContext::new("s1", "Hello"), cancel)
        .await;

    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert_eq!(outcome.iterations, 0);
    assert!(oracle.requests().is_empty());
}

#[tokio::test]
async fn test_cancellation_is_observed_between_iterations() {
    let cancel = CancellationToken::new();
    let fakes = Fakes::standard()
        .replace(FakeUnit::standard(Capability::SymptomExtractor).cancelling(cancel.clone()));
    let oracle = ScriptedOracle::new(vec![decide(
        "symptom_extractor",
        plan(&[("symptom_extractor", "pending"), ("diagnosis_engine", "pending")]),
    )]);
    let engine = orchestrator(&fakes, oracle, test_config());

    let outcome = engine
        .run(SharedContext::new("s1", "I have a cough"), cancel)
        .await;

    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(fakes.calls(Capability::DiagnosisEngine), 0);
    // The in-flight unit finished and its step resolved before the run stopped
    assert!(outcome.context.symptoms.is_some());
    assert_eq!(outcome.context.plan.steps()[0].status, StepStatus::Completed);
    assert!(outcome.context.plan.current_index().is_none());
}

/// Always keeps one more conversation step queued
struct GreedyOracle;

#[async_trait]
impl DecisionOracle for GreedyOracle {
    async fn decide(&self, request: &OracleRequest) -> care_flow::Result<String> {
        let mut steps = serde_json::to_value(&request.plan)?;
        if let Some(steps) = steps.as_array_mut() {
            for _ in 0..2 {
                steps.push(json!({
                    "capability": "general_conversation",
                    "description": "Keep chatting",
                    "status": "pending",
                }));
            }
        }
        Ok(json!({
            "next_step": "general_conversation",
            "reasoning": "there is always more to say",
            "plan": steps,
        })
        .to_string())
    }
}

#[tokio::test]
async fn test_iteration_limit_ends_run_and_skips_remaining_steps() {
    let fakes = Fakes::standard();
    let config = EngineConfig {
        max_iterations: 4,
        ..test_config()
    };
    let engine = Orchestrator::new(fakes.registry(), Arc::new(GreedyOracle), config);

    let outcome = engine
        .run(SharedContext::new("s1", "Tell me a story"), CancellationToken::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.iterations, 4);
    assert_eq!(fakes.calls(Capability::GeneralConversation), 4);
    assert!(outcome.context.plan.is_resolved());
    let skipped: Vec<_> = outcome
        .context
        .plan
        .steps()
        .iter()
        .filter(|s| s.status == StepStatus::Skipped)
        .collect();
    assert!(!skipped.is_empty());
    assert!(
        skipped
            .iter()
            .all(|s| s.note.as_deref() == Some("iteration limit reached"))
    );
}

#[tokio::test]
async fn test_failing_diagnosis_retries_stop_at_revision_bound() {
    let diagnosis = FakeUnit::new(
        Capability::DiagnosisEngine,
        Arc::new(|_: &SharedContext, _: Option<&str>, _: usize| {
            Err(UnitError::Failed("diagnosis model unavailable".to_string()))
        }),
    );
    let fakes = Fakes::standard().replace(diagnosis.clone());
    let mut steps = vec![("symptom_extractor", "pending")];
    steps.extend(std::iter::repeat_n(("diagnosis_engine", "pending"), 8));
    let oracle = ScriptedOracle::new(vec![decide("symptom_extractor", plan(&steps))]);
    let config = test_config();
    let engine = orchestrator(&fakes, oracle, config.clone());

    let outcome = engine
        .run(SharedContext::new("s1", "I have a rash"), CancellationToken::new())
        .await;

    // First attempt plus two revisions, then the bound skips the rest
    assert_eq!(diagnosis.calls(), 3);
    assert_eq!(outcome.context.revision_count, config.max_revisions);
    assert!(outcome.iterations < config.max_iterations);
    assert_eq!(outcome.context.errors.len(), 3);

    let diagnosis_steps: Vec<StepStatus> = outcome
        .context
        .plan
        .steps()
        .iter()
        .filter(|s| s.capability.to_string() == "diagnosis_engine")
        .map(|s| s.status)
        .collect();
    assert_eq!(diagnosis_steps.len(), 8);
    assert_eq!(
        diagnosis_steps.iter().filter(|s| **s == StepStatus::Completed).count(),
        3
    );
    assert_eq!(
        diagnosis_steps.iter().filter(|s| **s == StepStatus::Skipped).count(),
        5
    );

    // No diagnosis ever produced a response, so the run degrades to the fallback
    assert_eq!(outcome.status, RunStatus::Aborted);
    assert_eq!(outcome.response(), Some(config.fallback_message.as_str()));
}

#[tokio::test]
async fn test_clarification_withdraws_steps_planned_past_diagnosis() {
    let diagnosis = FakeUnit::new(
        Capability::DiagnosisEngine,
        Arc::new(|context: &SharedContext, _: Option<&str>, call: usize| {
            if call == 0 {
                return Ok(UnitOutcome::Updated(ContextUpdate::default().ask("How long?")));
            }
            (standard_behavior(Capability::DiagnosisEngine))(context, None, call)
        }),
    );
    let fakes = Fakes::standard().replace(diagnosis.clone());
    let oracle = ScriptedOracle::new(vec![
        // First request: the oracle plans well past diagnosis
        decide(
            "symptom_extractor",
            plan(&[
                ("symptom_extractor", "pending"),
                ("diagnosis_engine", "pending"),
                ("recommender", "pending"),
                ("synthesizer", "pending"),
            ]),
        ),
        decide(
            "diagnosis_engine",
            plan(&[
                ("symptom_extractor", "completed"),
                ("diagnosis_engine", "pending"),
                ("recommender", "pending"),
                ("synthesizer", "pending"),
            ]),
        ),
        decide(
            "recommender",
            plan(&[
                ("symptom_extractor", "completed"),
                ("diagnosis_engine", "completed"),
                ("recommender", "pending"),
                ("synthesizer", "pending"),
            ]),
        ),
        // Answer to the clarification question
        decide(
            "symptom_extractor",
            plan(&[
                ("symptom_extractor", "completed"),
                ("diagnosis_engine", "completed"),
                ("symptom_extractor", "pending"),
                ("diagnosis_engine", "pending"),
            ]),
        ),
        decide(
            "diagnosis_engine",
            plan(&[
                ("symptom_extractor", "completed"),
                ("diagnosis_engine", "completed"),
                ("symptom_extractor", "completed"),
                ("diagnosis_engine", "pending"),
            ]),
        ),
    ]);
    let store = Arc::new(InMemorySessionStore::new());
    let runner = runner(&fakes, oracle.clone(), store);

    let first = runner
        .handle(IncomingRequest::new("s1", "I have a fever"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(first.status, RunStatus::AwaitingInput);
    assert_eq!(first.response(), Some("How long?"));
    assert_eq!(
        statuses(&first.context),
        vec![
            ("symptom_extractor".to_string(), StepStatus::Completed),
            ("diagnosis_engine".to_string(), StepStatus::Completed),
        ]
    );
    let suspend_entry = first.context.execution_log.last().unwrap();
    assert!(suspend_entry.route.is_end());
    assert!(suspend_entry.corrections[0].contains("2 pending steps withdrawn"));

    let second = runner
        .handle(IncomingRequest::new("s1", "About three days"), CancellationToken::new())
        .await
        .unwrap();

    let resume_request = &oracle.requests()[3];
    assert!(resume_request.plan.is_resolved());
    assert_eq!(resume_request.plan.len(), 2);

    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.response(), Some("This looks like a viral infection."));
    assert_eq!(fakes.calls(Capability::Recommender), 0);
    assert_eq!(fakes.calls(Capability::Synthesizer), 0);
    assert_eq!(diagnosis.calls(), 2);
    assert_eq!(second.context.plan.len(), 4);
    assert!(second.context.plan.is_resolved());
}
