//! Follow-up scheduler: delayed re-engagement nudges.
//!
//! Runs as a periodic batch job over the follow-up queue. Every processed
//! item leaves `pending` exactly once, into `sent`, `cancelled`, or
//! `failed`; the transition is guarded in the store so a concurrent run
//! cannot process the same item twice.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classify::{self, Language};
use crate::config::PipelineConfig;
use crate::dispatch::{DispatchStatus, Dispatcher};
use crate::error::Error;
use crate::pipeline::types::{InboundMessage, MessageMetadata};
use crate::store::{Database, Direction, FollowUpItem, FollowUpKind, FollowUpStatus};

/// Counters for one scheduler run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerReport {
    pub processed: usize,
    pub sent: usize,
    pub cancelled: usize,
    pub failed: usize,
    /// Items another run transitioned first.
    pub skipped: usize,
}

/// Nurture message templates, keyed by delay class and language.
fn nudge_text(kind: FollowUpKind, lang: Language, business_name: &str) -> String {
    match (kind, lang) {
        (FollowUpKind::H24, Language::En) => format!(
            "Hi again! Just checking in from {business_name} — happy to answer any questions whenever you're ready."
        ),
        (FollowUpKind::H24, Language::Es) => format!(
            "¡Hola de nuevo! Te escribimos de {business_name} — con gusto respondemos cualquier duda cuando quieras."
        ),
        (FollowUpKind::H48, Language::En) => format!(
            "Hey, it's {business_name}. Still thinking it over? We'd love to help you find the right option."
        ),
        (FollowUpKind::H48, Language::Es) => format!(
            "Hola, somos {business_name}. ¿Aún lo estás pensando? Nos encantaría ayudarte a encontrar la mejor opción."
        ),
        (FollowUpKind::D5, Language::En) => format!(
            "Hi! {business_name} here. We still have availability this week if you'd like to book a spot."
        ),
        (FollowUpKind::D5, Language::Es) => format!(
            "¡Hola! Somos {business_name}. Todavía tenemos disponibilidad esta semana si quieres reservar."
        ),
        (FollowUpKind::D7, Language::En) => format!(
            "Last check-in from {business_name} — if now isn't the right time, no worries. We're here when you need us!"
        ),
        (FollowUpKind::D7, Language::Es) => format!(
            "Último mensaje de {business_name} — si ahora no es buen momento, no hay problema. ¡Aquí estamos cuando nos necesites!"
        ),
    }
}

/// Batch processor for due follow-up items.
pub struct FollowUpScheduler {
    store: Arc<dyn Database>,
    directory: Arc<dyn crate::business::BusinessDirectory>,
    dispatcher: Arc<Dispatcher>,
    config: PipelineConfig,
}

impl FollowUpScheduler {
    pub fn new(
        store: Arc<dyn Database>,
        directory: Arc<dyn crate::business::BusinessDirectory>,
        dispatcher: Arc<Dispatcher>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            directory,
            dispatcher,
            config,
        }
    }

    /// Process pending items due at or before `now`.
    pub async fn process_due(&self, now: DateTime<Utc>) -> Result<SchedulerReport, Error> {
        let due = self
            .store
            .due_followups(now, self.config.followup_batch_size)
            .await
            .map_err(crate::error::Error::Database)?;

        let mut report = SchedulerReport::default();
        for item in due {
            report.processed += 1;
            match self.process_item(&item, now).await {
                Ok(transitioned) => match transitioned {
                    Some(FollowUpStatus::Sent) => report.sent += 1,
                    Some(FollowUpStatus::Cancelled) => report.cancelled += 1,
                    Some(FollowUpStatus::Failed) => report.failed += 1,
                    Some(FollowUpStatus::Pending) | None => report.skipped += 1,
                },
                Err(e) => {
                    // Item-level failures stay item-level.
                    warn!(item_id = %item.id, error = %e, "Follow-up processing error");
                    report.failed += 1;
                    let _ = self
                        .store
                        .complete_followup(
                            &item.id,
                            FollowUpStatus::Failed,
                            None,
                            Some(&e.to_string()),
                            now,
                        )
                        .await;
                }
            }
        }

        info!(
            processed = report.processed,
            sent = report.sent,
            cancelled = report.cancelled,
            failed = report.failed,
            skipped = report.skipped,
            "Follow-up run complete"
        );
        Ok(report)
    }

    /// Process one item. Returns the terminal state it was moved to, or
    /// `None` when the pending guard found it already taken.
    async fn process_item(
        &self,
        item: &FollowUpItem,
        now: DateTime<Utc>,
    ) -> Result<Option<FollowUpStatus>, Error> {
        let thread = self
            .store
            .thread(&item.conversation_id)
            .await
            .map_err(Error::Database)?;

        let Some(thread) = thread else {
            // Orphaned queue row; close it out rather than retrying forever.
            let moved = self
                .store
                .complete_followup(
                    &item.id,
                    FollowUpStatus::Failed,
                    None,
                    Some("conversation thread not found"),
                    now,
                )
                .await
                .map_err(Error::Database)?;
            return Ok(moved.then_some(FollowUpStatus::Failed));
        };

        // Re-engagement check: if the contact wrote to us inside the grace
        // window before the nudge was due, the nudge is moot.
        let grace_start = item.scheduled_for - Duration::hours(self.config.followup_grace_hours);
        if thread.last_direction == Direction::Inbound && thread.last_message_at > grace_start {
            let moved = self
                .store
                .complete_followup(
                    &item.id,
                    FollowUpStatus::Cancelled,
                    None,
                    Some("contact re-engaged before nudge"),
                    now,
                )
                .await
                .map_err(Error::Database)?;
            info!(item_id = %item.id, conversation_id = %item.conversation_id, "Follow-up cancelled");
            return Ok(moved.then_some(FollowUpStatus::Cancelled));
        }

        let ctx = self
            .directory
            .business(&item.business_id)
            .await
            .map_err(Error::Config)?;
        let lang = match ctx.language_preference {
            crate::business::LanguagePreference::En => Language::En,
            crate::business::LanguagePreference::Es => Language::Es,
            crate::business::LanguagePreference::Auto => {
                classify::classify(&thread.last_message_text).language
            }
        };
        let text = nudge_text(item.kind, lang, &ctx.name);

        // The dispatcher wants the inbound shape; rebuild the addressing
        // fields from the thread rollup. No reply-to id here, so its
        // dedup falls back to exact-text matching.
        let target = InboundMessage {
            business_id: item.business_id.clone(),
            channel: thread.channel,
            conversation_id: item.conversation_id.clone(),
            sender_name: thread.sender_name.clone(),
            sender_handle: thread.sender_handle.clone(),
            message_text: String::new(),
            timestamp: now,
            metadata: MessageMetadata::default(),
        };

        let outcome = self
            .dispatcher
            .send(&target, &text, false)
            .await
            .map_err(Error::Dispatch)?;

        let (status, sent_text, detail) = match outcome.status {
            DispatchStatus::Sent => (FollowUpStatus::Sent, Some(text.as_str()), None),
            DispatchStatus::Skipped => (
                FollowUpStatus::Cancelled,
                None,
                Some("dispatch skipped: identical nudge already sent"),
            ),
            DispatchStatus::Failed => (
                FollowUpStatus::Failed,
                None,
                outcome.error.as_deref().or(Some("dispatch failed")),
            ),
        };

        let moved = self
            .store
            .complete_followup(&item.id, status, sent_text, detail, now)
            .await
            .map_err(Error::Database)?;
        Ok(moved.then_some(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nudge_templates_cover_all_kinds_and_languages() {
        for kind in [
            FollowUpKind::H24,
            FollowUpKind::H48,
            FollowUpKind::D5,
            FollowUpKind::D7,
        ] {
            for lang in [Language::En, Language::Es] {
                let text = nudge_text(kind, lang, "Shine Auto Spa");
                assert!(text.contains("Shine Auto Spa"), "{kind:?}/{lang:?}");
                assert!(!text.trim().is_empty());
            }
        }
    }

    #[test]
    fn nudge_language_actually_differs() {
        let en = nudge_text(FollowUpKind::H24, Language::En, "X");
        let es = nudge_text(FollowUpKind::H24, Language::Es, "X");
        assert_ne!(en, es);
    }
}
