//! Lead qualification collaborator interface.
//!
//! Scoring lives with the CRM; the pipeline only hands it each classified
//! inbound message and records whatever it reports.

use async_trait::async_trait;

use crate::classify::Classification;
use crate::pipeline::types::InboundMessage;

/// What the qualifier made of a message.
#[derive(Debug, Clone)]
pub struct LeadAssessment {
    /// CRM lead id, present when a lead was created or updated.
    pub lead_id: Option<String>,
    /// Qualifier's own label ("hot", "nurture", ...), opaque here.
    pub label: Option<String>,
}

/// External lead-qualification collaborator.
#[async_trait]
pub trait LeadQualifier: Send + Sync {
    /// Assess one classified inbound message. Errors surface as a failed
    /// pipeline stage; they never block the rest of the run.
    async fn qualify(
        &self,
        msg: &InboundMessage,
        classification: &Classification,
    ) -> anyhow::Result<LeadAssessment>;
}

/// No-op qualifier for deployments without a CRM hookup and for tests.
pub struct NullQualifier;

#[async_trait]
impl LeadQualifier for NullQualifier {
    async fn qualify(
        &self,
        _msg: &InboundMessage,
        _classification: &Classification,
    ) -> anyhow::Result<LeadAssessment> {
        Ok(LeadAssessment {
            lead_id: None,
            label: None,
        })
    }
}
