pub mod models;
pub mod oracle;
pub mod safety;
pub mod service;
pub mod units;
pub mod workflow;

pub use models::{ConsultRequest, ConsultResponse, ImageUpload, SessionResponse};
pub use oracle::LlmDecisionOracle;
pub use safety::{SafetyFilter, Verdict};
pub use service::{AppState, build_router, create_app};
pub use workflow::{build_orchestrator, build_registry, create_session_runner, load_engine_config};
