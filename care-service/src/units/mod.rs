pub mod appointment;
pub mod conversation;
pub mod diagnosis;
pub mod image_analyzer;
pub mod investigation;
pub mod recommendation;
pub mod symptom_extractor;
pub mod synthesis;
pub mod utils;

pub use appointment::AppointmentUnit;
pub use conversation::ConversationUnit;
pub use diagnosis::DiagnosisUnit;
pub use image_analyzer::ImageAnalyzerUnit;
pub use investigation::InvestigationUnit;
pub use recommendation::RecommendationUnit;
pub use symptom_extractor::SymptomExtractorUnit;
pub use synthesis::SynthesisUnit;
