//! Outbound dispatcher: idempotent, channel-routed, always logged.
//!
//! The idempotency gate is a check-before-insert against the outbound
//! log, not a transaction. Two truly concurrent deliveries of the same
//! inbound event can still race past it and double-send; that window is
//! accepted and documented rather than locked away.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::business::BusinessDirectory;
use crate::channels::OutboundTransport;
use crate::config::PipelineConfig;
use crate::error::{DispatchError, NonFatalError};
use crate::pipeline::types::InboundMessage;
use crate::store::{Database, Direction, OutgoingLogEntry, OutgoingStatus, ThreadUpdate};

/// How a dispatch attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Sent,
    Failed,
    Skipped,
}

/// Result of one dispatch attempt.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub status: DispatchStatus,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    /// Why the dispatch was skipped, when it was.
    pub skip_reason: Option<String>,
    /// Outcome of the best-effort thread-rollup write. `None` when no
    /// rollup was attempted (skips). Never turns the dispatch into a
    /// failure.
    pub rollup: Option<std::result::Result<(), NonFatalError>>,
}

impl DispatchOutcome {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: DispatchStatus::Skipped,
            provider_message_id: None,
            error: None,
            skip_reason: Some(reason.into()),
            rollup: None,
        }
    }
}

/// Idempotent outbound sender over the channel transports.
pub struct Dispatcher {
    store: Arc<dyn Database>,
    directory: Arc<dyn BusinessDirectory>,
    transport: Arc<dyn OutboundTransport>,
    config: PipelineConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Database>,
        directory: Arc<dyn BusinessDirectory>,
        transport: Arc<dyn OutboundTransport>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            directory,
            transport,
            config,
        }
    }

    /// Send `text` as a reply to `msg` on its channel.
    ///
    /// `Err` is reserved for store failures around the gate and the log;
    /// provider and validation failures come back as a `Failed` outcome
    /// with a log row already written.
    pub async fn send(
        &self,
        msg: &InboundMessage,
        text: &str,
        dry_run: bool,
    ) -> Result<DispatchOutcome, DispatchError> {
        if text.trim().is_empty() {
            debug!(conversation_id = %msg.conversation_id, "Empty response text; nothing to send");
            return Ok(DispatchOutcome::skipped("empty response text"));
        }

        let reply_to = msg.metadata.provider_message_id.as_deref();

        // Idempotency gate: a prior non-failed log row answering the same
        // inbound message (or carrying the same text) means a webhook
        // retry already got its reply.
        if let Some(existing) = self
            .store
            .find_outbound_reply(
                &msg.business_id,
                &msg.conversation_id,
                msg.channel,
                reply_to,
                text,
            )
            .await?
        {
            info!(
                conversation_id = %msg.conversation_id,
                prior_entry = %existing.id,
                "Duplicate dispatch suppressed"
            );
            return Ok(DispatchOutcome::skipped("already dispatched"));
        }

        let recipient = msg.sender_handle.trim();
        let (status, provider_message_id, error) = if recipient.is_empty() {
            let e = DispatchError::MissingRecipient;
            (OutgoingStatus::Failed, None, Some(e.to_string()))
        } else if dry_run || self.config.dry_run {
            (OutgoingStatus::Mocked, None, None)
        } else {
            // Credentials are loaded fresh per call; nothing is cached
            // across businesses.
            match self
                .directory
                .credentials(&msg.business_id, msg.channel)
                .await
            {
                Ok(Some(creds)) => {
                    match self
                        .transport
                        .send_text(msg.channel, &creds, recipient, text)
                        .await
                    {
                        Ok(provider_id) => (OutgoingStatus::Sent, Some(provider_id), None),
                        Err(e) => (OutgoingStatus::Failed, None, Some(e.to_string())),
                    }
                }
                Ok(None) => {
                    let e = DispatchError::MissingCredentials {
                        channel: msg.channel.as_str().to_string(),
                        business_id: msg.business_id.clone(),
                    };
                    (OutgoingStatus::Failed, None, Some(e.to_string()))
                }
                Err(e) => (OutgoingStatus::Failed, None, Some(e.to_string())),
            }
        };

        let now = Utc::now();
        let entry = OutgoingLogEntry {
            id: Uuid::new_v4().to_string(),
            business_id: msg.business_id.clone(),
            conversation_id: msg.conversation_id.clone(),
            channel: msg.channel,
            recipient_handle: recipient.to_string(),
            text: text.to_string(),
            status,
            reply_to: reply_to.map(str::to_string),
            provider_message_id: provider_message_id.clone(),
            error: error.clone(),
            created_at: now,
        };
        self.store.append_outbound(&entry).await?;

        // Best-effort inbox rollup; a failure here never fails the send.
        let rollup = self
            .store
            .update_thread(&ThreadUpdate {
                conversation_id: msg.conversation_id.clone(),
                business_id: msg.business_id.clone(),
                channel: msg.channel,
                sender_handle: msg.sender_handle.clone(),
                sender_name: msg.sender_name.clone(),
                text: text.to_string(),
                at: now,
                direction: Direction::Outbound,
                intent: None,
            })
            .await
            .map_err(|e| NonFatalError::new("thread rollup after dispatch", e.to_string()));
        if let Err(ref e) = rollup {
            warn!(conversation_id = %msg.conversation_id, error = %e, "Rollup write failed");
        }

        let out_status = match status {
            OutgoingStatus::Sent | OutgoingStatus::Mocked => DispatchStatus::Sent,
            OutgoingStatus::Failed => DispatchStatus::Failed,
        };
        info!(
            conversation_id = %msg.conversation_id,
            channel = %msg.channel,
            status = status.as_str(),
            "Dispatch attempt recorded"
        );

        Ok(DispatchOutcome {
            status: out_status,
            provider_message_id,
            error,
            skip_reason: None,
            rollup: Some(rollup),
        })
    }
}
