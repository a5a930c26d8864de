use std::sync::Arc;

use anyhow::Context as _;
use care_flow::{
    CapabilityRegistry, EngineConfig, InMemorySessionStore, Orchestrator, PostgresSessionStore,
    SessionRunner, SessionStore,
};
use tracing::{error, info};

use crate::{
    oracle::LlmDecisionOracle,
    units::{
        AppointmentUnit, ConversationUnit, DiagnosisUnit, ImageAnalyzerUnit, InvestigationUnit,
        RecommendationUnit, SymptomExtractorUnit, SynthesisUnit,
    },
};

/// Register the LLM-backed unit for every capability
pub fn build_registry() -> care_flow::Result<CapabilityRegistry> {
    CapabilityRegistry::builder()
        .register(Arc::new(SymptomExtractorUnit))
        .register(Arc::new(ImageAnalyzerUnit))
        .register(Arc::new(DiagnosisUnit))
        .register(Arc::new(InvestigationUnit))
        .register(Arc::new(RecommendationUnit))
        .register(Arc::new(SynthesisUnit))
        .register(Arc::new(ConversationUnit))
        .register(Arc::new(AppointmentUnit))
        .build()
}

pub fn build_orchestrator(config: EngineConfig) -> anyhow::Result<Orchestrator> {
    let registry = build_registry().context("building capability registry")?;
    Ok(Orchestrator::new(
        Arc::new(registry),
        Arc::new(LlmDecisionOracle),
        config,
    ))
}

pub fn create_session_runner(
    store: Arc<dyn SessionStore>,
    config: EngineConfig,
) -> anyhow::Result<SessionRunner> {
    let orchestrator = build_orchestrator(config)?;
    Ok(SessionRunner::new(Arc::new(orchestrator), store))
}

/// Engine settings from the YAML file named by `CARE_FLOW_CONFIG`, or defaults,
/// with `CARE_FLOW_*` variables applied on top
pub fn load_engine_config() -> anyhow::Result<EngineConfig> {
    let config = match std::env::var("CARE_FLOW_CONFIG") {
        Ok(path) => {
            info!(path = %path, "Loading engine configuration");
            EngineConfig::from_yaml_file(&path)?.with_env_overrides()?
        }
        Err(_) => EngineConfig::from_env()?,
    };
    Ok(config)
}

/// PostgreSQL when `DATABASE_URL` is set and reachable, otherwise in-memory
pub async fn create_session_store() -> Arc<dyn SessionStore> {
    match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            info!("Using PostgreSQL session storage");
            match PostgresSessionStore::connect(&database_url).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    error!(
                        "Failed to connect to PostgreSQL: {}. Falling back to in-memory storage.",
                        e
                    );
                    Arc::new(InMemorySessionStore::new())
                }
            }
        }
        Err(_) => {
            info!("Using in-memory session storage (set DATABASE_URL to use PostgreSQL)");
            Arc::new(InMemorySessionStore::new())
        }
    }
}
