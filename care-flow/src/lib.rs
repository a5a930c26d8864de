pub mod capability;
pub mod config;
pub mod context;
pub mod decision;
pub mod error;
pub mod oracle;
pub mod orchestrator;
pub mod plan;
pub mod registry;
pub mod runner;
pub mod storage;
pub mod storage_postgres;

// Re-export commonly used types
pub use capability::{Capability, CapabilityUnit, ContextField, UnitOutcome};
pub use config::EngineConfig;
pub use context::{
    Appointment, AuditEntry, CapabilityFailure, Condition, ContextSnapshot, ContextState,
    ContextUpdate, Diagnosis, ImagePayload, Investigation, RiskAssessment, RiskLevel, Role,
    SharedContext, Symptom, SymptomProfile, Turn,
};
pub use decision::{Correction, Decision, RawDecision, SAFE_DEFAULT, normalize};
pub use error::{FlowError, PlanError, Result, UnitError};
pub use oracle::{
    DecisionOracle, OracleRequest, OracleResponse, extract_json_object, parse_oracle_response,
};
pub use orchestrator::{Orchestrator, RunOutcome, RunStatus};
pub use plan::{Plan, Route, Step, StepStatus, TERMINAL_MARKER};
pub use registry::{CapabilityRegistry, RegistryBuilder};
pub use runner::{IncomingRequest, SessionRunner};
pub use storage::{InMemorySessionStore, SessionStore};
pub use storage_postgres::PostgresSessionStore;

pub use tokio_util::sync::CancellationToken;
