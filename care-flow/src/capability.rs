use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    context::{ContextUpdate, SharedContext},
    error::UnitError,
};

/// The fixed set of capability units the orchestrator can dispatch to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    SymptomExtractor,
    ImageAnalyzer,
    DiagnosisEngine,
    InvestigationGenerator,
    Recommender,
    Synthesizer,
    GeneralConversation,
    AppointmentScheduler,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Capability::SymptomExtractor,
        Capability::ImageAnalyzer,
        Capability::DiagnosisEngine,
        Capability::InvestigationGenerator,
        Capability::Recommender,
        Capability::Synthesizer,
        Capability::GeneralConversation,
        Capability::AppointmentScheduler,
    ];

    /// Capabilities whose completed steps make a synthesis step worthwhile
    pub const SYNTHESIS_INPUTS: [Capability; 3] = [
        Capability::DiagnosisEngine,
        Capability::InvestigationGenerator,
        Capability::Recommender,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::SymptomExtractor => "symptom_extractor",
            Capability::ImageAnalyzer => "image_analyzer",
            Capability::DiagnosisEngine => "diagnosis_engine",
            Capability::InvestigationGenerator => "investigation_generator",
            Capability::Recommender => "recommender",
            Capability::Synthesizer => "synthesizer",
            Capability::GeneralConversation => "general_conversation",
            Capability::AppointmentScheduler => "appointment_scheduler",
        }
    }

    /// Context fields a unit of this capability cannot run without
    pub fn default_requirements(&self) -> &'static [ContextField] {
        match self {
            Capability::SymptomExtractor => &[ContextField::UserInput],
            Capability::ImageAnalyzer => &[ContextField::Image],
            Capability::DiagnosisEngine => &[],
            Capability::InvestigationGenerator => &[ContextField::Diagnosis],
            Capability::Recommender => &[ContextField::Diagnosis],
            Capability::Synthesizer => &[ContextField::Diagnosis],
            Capability::GeneralConversation => &[ContextField::UserInput],
            Capability::AppointmentScheduler => &[ContextField::UserInput],
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown capability `{s}`"))
    }
}

/// Context fields a unit may declare as required input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextField {
    UserInput,
    Image,
    Symptoms,
    ImageFindings,
    Diagnosis,
    Investigations,
    Recommendation,
}

impl fmt::Display for ContextField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContextField::UserInput => "user_input",
            ContextField::Image => "image",
            ContextField::Symptoms => "symptoms",
            ContextField::ImageFindings => "image_findings",
            ContextField::Diagnosis => "diagnosis",
            ContextField::Investigations => "investigations",
            ContextField::Recommendation => "recommendation",
        };
        f.write_str(name)
    }
}

/// What a unit hands back to the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    /// Partial context update to merge
    Updated(ContextUpdate),
    /// The unit chose not to act; its step is marked skipped
    Declined(String),
}

/// Core trait that every capability unit implements
#[async_trait]
pub trait CapabilityUnit: Send + Sync {
    /// The capability this unit serves
    fn capability(&self) -> Capability;

    /// Fields that must be present before the unit is invoked
    fn requires(&self) -> &[ContextField] {
        self.capability().default_requirements()
    }

    /// Run the unit against a read-only view of the context.
    ///
    /// `input_override` carries oracle-supplied guidance such as critic feedback
    /// for a diagnosis revision.
    async fn invoke(
        &self,
        context: &SharedContext,
        input_override: Option<&str>,
    ) -> Result<UnitOutcome, UnitError>;
}
