//! Shared types for the conversation pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Channel ─────────────────────────────────────────────────────────

/// A messaging provider integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Whatsapp,
    Instagram,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Whatsapp => "whatsapp",
            Channel::Instagram => "instagram",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "whatsapp" => Ok(Channel::Whatsapp),
            "instagram" => Ok(Channel::Instagram),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}

// ── Inbound message ─────────────────────────────────────────────────

/// Channel-native identifiers carried alongside an inbound message.
///
/// Needed for echo detection (provider message id) and for reply
/// threading. Whatever else the webhook carried stays behind at the
/// normalization boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Provider-assigned message id (WhatsApp `messages[].id`,
    /// Instagram `message.mid`).
    pub provider_message_id: Option<String>,
    /// Set when the channel flags the event as an echo of our own send.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_echo: bool,
    /// Recipient id the provider expects replies to be addressed through
    /// (WhatsApp phone-number id, Instagram business account id).
    pub reply_target: Option<String>,
}

/// Canonical inbound message, one per physical message event.
///
/// Channel webhooks converge to this struct at the normalization
/// boundary; everything downstream is channel-agnostic. Immutable once
/// created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub business_id: String,
    pub channel: Channel,
    /// Deterministic, channel-scoped conversation key. Re-processing the
    /// same webhook yields the same id; all downstream idempotency hangs
    /// off this.
    pub conversation_id: String,
    pub sender_name: Option<String>,
    /// Channel-native sender handle (phone number or IG-scoped user id).
    pub sender_handle: String,
    pub message_text: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: MessageMetadata,
}

impl InboundMessage {
    /// Build the deterministic conversation id for a sender on a channel.
    pub fn conversation_id_for(business_id: &str, channel: Channel, sender_handle: &str) -> String {
        format!("{}:{}:{}", channel.as_str(), business_id, sender_handle)
    }
}

// ── Pipeline report ─────────────────────────────────────────────────

/// Outcome status of a single pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    Skipped,
    Failed,
}

/// One stage's outcome in an orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl StepOutcome {
    pub fn ok(step: &str) -> Self {
        Self {
            step: step.to_string(),
            status: StepStatus::Ok,
            detail: None,
            data: None,
        }
    }

    pub fn skipped(step: &str, detail: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            status: StepStatus::Skipped,
            detail: Some(detail.into()),
            data: None,
        }
    }

    pub fn failed(step: &str, detail: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            status: StepStatus::Failed,
            detail: Some(detail.into()),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Ordered per-stage outcomes for one inbound message.
///
/// Doubles as the audit trail and as the dev-surface JSON contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub conversation_id: String,
    pub channel: Channel,
    pub steps: Vec<StepOutcome>,
}

impl PipelineReport {
    /// Look up a step's outcome by name.
    pub fn step(&self, name: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step == name)
    }
}
