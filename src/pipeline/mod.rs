//! Conversation pipeline: canonical types and the stage orchestrator.

pub mod orchestrator;
pub mod types;

pub use orchestrator::Orchestrator;
pub use types::{Channel, InboundMessage, MessageMetadata, PipelineReport, StepOutcome, StepStatus};
