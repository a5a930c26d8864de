#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use care_flow::{
    Capability, CapabilityRegistry, CapabilityUnit, ContextUpdate, DecisionOracle, Diagnosis,
    EngineConfig, FlowError, InMemorySessionStore, Investigation, OracleRequest, Orchestrator,
    SessionRunner, SharedContext, StepStatus, Symptom, SymptomProfile, UnitError, UnitOutcome,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

pub type Behavior =
    Arc<dyn Fn(&SharedContext, Option<&str>, usize) -> Result<UnitOutcome, UnitError> + Send + Sync>;

/// One scripted oracle reply
pub enum OracleReply {
    Json(Value),
    Raw(String),
    Fail(String),
    Hang,
}

/// Oracle that replays a script, then ends the run by echoing the current plan
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<OracleReply>>,
    requests: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub fn new(replies: Vec<OracleReply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn decide(&self, request: &OracleRequest) -> care_flow::Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(OracleReply::Json(value)) => Ok(value.to_string()),
            Some(OracleReply::Raw(text)) => Ok(text),
            Some(OracleReply::Fail(reason)) => Err(FlowError::Oracle(reason)),
            Some(OracleReply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(FlowError::Oracle("unreachable".to_string()))
            }
            None => Ok(json!({
                "next_step": "END",
                "reasoning": "nothing left to do",
                "plan": request.plan,
            })
            .to_string()),
        }
    }
}

/// Build an oracle reply routing to `next_step` with the given plan
pub fn decide(next_step: &str, plan: Value) -> OracleReply {
    OracleReply::Json(json!({
        "next_step": next_step,
        "reasoning": format!("route to {next_step}"),
        "plan": plan,
    }))
}

pub fn decide_with_override(next_step: &str, plan: Value, input_override: &str) -> OracleReply {
    OracleReply::Json(json!({
        "next_step": next_step,
        "reasoning": format!("route to {next_step}"),
        "plan": plan,
        "input_override": input_override,
    }))
}

/// Plan JSON from (capability, status) pairs
pub fn plan(steps: &[(&str, &str)]) -> Value {
    Value::Array(
        steps
            .iter()
            .map(|(capability, status)| {
                json!({
                    "capability": capability,
                    "description": format!("Run {capability}"),
                    "goal": "test",
                    "status": status,
                })
            })
            .collect(),
    )
}

#[derive(Clone)]
pub struct FakeUnit {
    capability: Capability,
    behavior: Behavior,
    overrides: Arc<Mutex<Vec<Option<String>>>>,
    delay: Option<Duration>,
    cancel_on_call: Option<CancellationToken>,
}

impl FakeUnit {
    pub fn new(capability: Capability, behavior: Behavior) -> Self {
        Self {
            capability,
            behavior,
            overrides: Arc::new(Mutex::new(Vec::new())),
            delay: None,
            cancel_on_call: None,
        }
    }

    pub fn standard(capability: Capability) -> Self {
        Self::new(capability, standard_behavior(capability))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_call = Some(token);
        self
    }

    pub fn calls(&self) -> usize {
        self.overrides.lock().unwrap().len()
    }

    pub fn overrides(&self) -> Vec<Option<String>> {
        self.overrides.lock().unwrap().clone()
    }
}

#[async_trait]
impl CapabilityUnit for FakeUnit {
    fn capability(&self) -> Capability {
        self.capability
    }

    async fn invoke(
        &self,
        context: &SharedContext,
        input_override: Option<&str>,
    ) -> Result<UnitOutcome, UnitError> {
        // Exactly the dispatched step is current while a unit runs
        let current: Vec<_> = context
            .plan
            .steps()
            .iter()
            .filter(|s| s.status == StepStatus::Current)
            .collect();
        assert_eq!(current.len(), 1, "expected exactly one current step");

        let call = {
            let mut overrides = self.overrides.lock().unwrap();
            overrides.push(input_override.map(str::to_string));
            overrides.len() - 1
        };
        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.behavior)(context, input_override, call)
    }
}

pub fn standard_behavior(capability: Capability) -> Behavior {
    Arc::new(move |context: &SharedContext, _override: Option<&str>, _call: usize| {
        let update = match capability {
            Capability::SymptomExtractor => ContextUpdate {
                symptoms: Some(SymptomProfile {
                    symptoms: vec![Symptom {
                        name: context.user_input.clone(),
                        duration: None,
                        severity: None,
                    }],
                    notes: None,
                }),
                ..Default::default()
            },
            Capability::ImageAnalyzer => ContextUpdate {
                image_findings: Some("erythematous rash".to_string()),
                ..Default::default()
            },
            Capability::DiagnosisEngine => ContextUpdate {
                diagnosis: Some(Diagnosis {
                    summary: "Likely viral infection".to_string(),
                    conditions: Vec::new(),
                    confidence: Some(0.7),
                }),
                ..Default::default()
            }
            .respond("This looks like a viral infection."),
            Capability::InvestigationGenerator => ContextUpdate {
                investigations: Some(vec![Investigation {
                    name: "Complete blood count".to_string(),
                    rationale: "check for infection".to_string(),
                }]),
                ..Default::default()
            }
            .respond("Consider a complete blood count."),
            Capability::Recommender => ContextUpdate {
                recommendation: Some("Rest and fluids".to_string()),
                ..Default::default()
            }
            .respond("Rest and drink fluids."),
            Capability::Synthesizer => ContextUpdate::default()
                .respond("Summary: viral infection; rest and drink fluids."),
            Capability::GeneralConversation => ContextUpdate {
                conversation_reply: Some("Hello! How can I help?".to_string()),
                ..Default::default()
            }
            .respond("Hello! How can I help?"),
            Capability::AppointmentScheduler => ContextUpdate::default()
                .respond("Your appointment is booked."),
        };
        Ok(UnitOutcome::Updated(update))
    })
}

/// A full set of fake units with individually replaceable behaviors
pub struct Fakes {
    units: HashMap<Capability, FakeUnit>,
}

impl Fakes {
    pub fn standard() -> Self {
        Self {
            units: Capability::ALL
                .into_iter()
                .map(|c| (c, FakeUnit::standard(c)))
                .collect(),
        }
    }

    pub fn replace(mut self, unit: FakeUnit) -> Self {
        self.units.insert(unit.capability, unit);
        self
    }

    pub fn unit(&self, capability: Capability) -> &FakeUnit {
        &self.units[&capability]
    }

    pub fn calls(&self, capability: Capability) -> usize {
        self.unit(capability).calls()
    }

    pub fn registry(&self) -> Arc<CapabilityRegistry> {
        let builder = self
            .units
            .values()
            .fold(CapabilityRegistry::builder(), |builder, unit| {
                builder.register(Arc::new(unit.clone()))
            });
        Arc::new(builder.build().expect("every capability has a fake"))
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        max_iterations: 10,
        oracle_timeout_secs: 2,
        oracle_retry_timeout_secs: 1,
        unit_timeout_secs: 5,
        ..EngineConfig::default()
    }
}

pub fn orchestrator(fakes: &Fakes, oracle: Arc<ScriptedOracle>, config: EngineConfig) -> Orchestrator {
    Orchestrator::new(fakes.registry(), oracle, config)
}

pub fn runner(
    fakes: &Fakes,
    oracle: Arc<ScriptedOracle>,
    store: Arc<InMemorySessionStore>,
) -> SessionRunner {
    SessionRunner::new(Arc::new(orchestrator(fakes, oracle, test_config())), store)
}

/// Capabilities dispatched during a run, in order, read from the execution log
pub fn dispatched(context: &SharedContext) -> Vec<String> {
    context
        .execution_log
        .iter()
        .filter(|entry| !entry.route.is_end())
        .map(|entry| entry.route.to_string())
        .collect()
}
