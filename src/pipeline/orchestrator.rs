//! Pipeline orchestrator: one ordered, fault-isolated run per message.
//!
//! Stages run in a fixed order and each failure is recorded as a step
//! outcome instead of aborting the run: a knowledge-base outage must not
//! prevent lead creation, and vice versa. The ordered outcome list is
//! both the audit trail and the dev-surface contract.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::business::{BusinessContext, BusinessDirectory, LanguagePreference};
use crate::classify::{self, Classification, Intent, Language};
use crate::config::PipelineConfig;
use crate::dispatch::{DispatchStatus, Dispatcher};
use crate::knowledge::KnowledgeService;
use crate::leads::LeadQualifier;
use crate::pipeline::types::{Channel, InboundMessage, PipelineReport, StepOutcome};
use crate::reply::{self, ReplyDecision, ReplyRule};
use crate::store::{Database, Direction, ThreadUpdate};

/// Copy for knowledge-based replies when no rule gave a better answer.
fn knowledge_unconfigured_copy(lang: Language) -> &'static str {
    match lang {
        Language::En => {
            "Thanks for your question! Our answer hub isn't set up yet, but a member of our team will reply personally soon."
        }
        Language::Es => {
            "¡Gracias por tu pregunta! Nuestra base de respuestas aún no está configurada, pero un miembro del equipo te responderá pronto."
        }
    }
}

fn knowledge_no_match_copy(lang: Language) -> &'static str {
    match lang {
        Language::En => {
            "Good question — could you tell us a bit more about what you're looking for? That way we can point you to the right service."
        }
        Language::Es => {
            "Buena pregunta — ¿podrías contarnos un poco más sobre lo que buscas? Así podemos orientarte al servicio correcto."
        }
    }
}

fn booking_handoff_copy(lang: Language) -> &'static str {
    match lang {
        Language::En => {
            "To book an appointment, just tell us your preferred day and time and we'll confirm it right here."
        }
        Language::Es => {
            "Para agendar una cita, solo dinos el día y la hora que prefieres y te la confirmamos por aquí."
        }
    }
}

/// Longest knowledge excerpt used as a direct reply.
const MAX_KNOWLEDGE_REPLY_CHARS: usize = 500;

/// Composes stages 1–6 into one run per inbound message.
pub struct Orchestrator {
    store: Arc<dyn Database>,
    directory: Arc<dyn BusinessDirectory>,
    knowledge: Arc<KnowledgeService>,
    dispatcher: Arc<Dispatcher>,
    qualifier: Arc<dyn LeadQualifier>,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Database>,
        directory: Arc<dyn BusinessDirectory>,
        knowledge: Arc<KnowledgeService>,
        dispatcher: Arc<Dispatcher>,
        qualifier: Arc<dyn LeadQualifier>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            directory,
            knowledge,
            dispatcher,
            qualifier,
            config,
        }
    }

    /// Run the full pipeline for one normalized inbound message.
    pub async fn run(&self, msg: &InboundMessage, dry_run: bool) -> PipelineReport {
        let dry_run = dry_run || self.config.dry_run;
        info!(
            business_id = %msg.business_id,
            conversation_id = %msg.conversation_id,
            channel = %msg.channel,
            "Pipeline run started"
        );

        let mut steps = Vec::new();

        // Classification is pure and total; computed up front so the
        // recording stage can stamp the thread's last intent.
        let classification = classify::classify(&msg.message_text);

        // Stage: record inbound. A duplicate provider id means a webhook
        // redelivery, still recorded as ok; later stages stay idempotent.
        steps.push(self.record_inbound(msg, &classification).await);

        // Stage: classify (report the result computed above).
        steps.push(
            StepOutcome::ok("classify").with_data(json!({
                "intents": classification.intents,
                "language": classification.language,
                "primary": classification.primary_intent().map(|i| i.as_str()),
            })),
        );

        // Stage: business context. Everything reply-shaped needs it.
        let ctx = match self.directory.business(&msg.business_id).await {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                warn!(business_id = %msg.business_id, error = %e, "Business lookup failed");
                None
            }
        };
        let lang = resolve_language(ctx.as_ref(), &classification);

        // Stage: lead qualification (external collaborator).
        steps.push(match self.qualifier.qualify(msg, &classification).await {
            Ok(assessment) => StepOutcome::ok("qualify_lead").with_data(json!({
                "lead_id": assessment.lead_id,
                "label": assessment.label,
            })),
            Err(e) => StepOutcome::failed("qualify_lead", e.to_string()),
        });

        // Stage: auto-reply decision.
        let (decision_step, decision) = self.decide_reply(msg, ctx.as_ref(), lang).await;
        steps.push(decision_step);

        // Stage: dispatch.
        let dispatch_step = match &decision {
            Some(d) => self.dispatch(msg, &d.text, dry_run, "dispatch").await,
            None => StepOutcome::skipped("dispatch", "no reply decided"),
        };
        steps.push(dispatch_step);

        // Stage: booking hand-off (WhatsApp only).
        steps.push(
            self.booking_handoff(msg, &classification, lang, dry_run)
                .await,
        );

        let report = PipelineReport {
            conversation_id: msg.conversation_id.clone(),
            channel: msg.channel,
            steps,
        };
        info!(
            conversation_id = %msg.conversation_id,
            steps = report.steps.len(),
            "Pipeline run complete"
        );
        report
    }

    async fn record_inbound(
        &self,
        msg: &InboundMessage,
        classification: &Classification,
    ) -> StepOutcome {
        let recorded = match self.store.record_inbound(msg).await {
            Ok(r) => r,
            Err(e) => return StepOutcome::failed("record_inbound", e.to_string()),
        };

        if !recorded.duplicate {
            // Best-effort rollup; never fails the stage.
            let update = ThreadUpdate {
                conversation_id: msg.conversation_id.clone(),
                business_id: msg.business_id.clone(),
                channel: msg.channel,
                sender_handle: msg.sender_handle.clone(),
                sender_name: msg.sender_name.clone(),
                text: msg.message_text.clone(),
                at: msg.timestamp,
                direction: Direction::Inbound,
                intent: classification.primary_intent().map(|i| i.as_str().to_string()),
            };
            if let Err(e) = self.store.update_thread(&update).await {
                warn!(conversation_id = %msg.conversation_id, error = %e, "Rollup write failed");
            }
        }

        StepOutcome::ok("record_inbound").with_data(json!({
            "message_id": recorded.id,
            "duplicate": recorded.duplicate,
        }))
    }

    /// Rule-engine decision, with the fallback rule's text upgraded to a
    /// knowledge-grounded answer when AI replies are enabled.
    async fn decide_reply(
        &self,
        msg: &InboundMessage,
        ctx: Option<&BusinessContext>,
        lang: Language,
    ) -> (StepOutcome, Option<ReplyDecision>) {
        let Some(ctx) = ctx else {
            return (
                StepOutcome::failed("auto_reply", "business context unavailable"),
                None,
            );
        };

        let decision = match reply::decide(msg, ctx, lang, Utc::now(), self.store.as_ref()).await {
            Ok(d) => d,
            Err(e) => return (StepOutcome::failed("auto_reply", e.to_string()), None),
        };

        let Some(mut decision) = decision else {
            return (
                StepOutcome::skipped("auto_reply", "rules disabled or echo"),
                None,
            );
        };

        let mut source = "rules";
        if decision.rule == ReplyRule::Fallback && ctx.ai_reply_enabled {
            match self.knowledge_reply(msg, lang).await {
                Ok(Some(text)) => {
                    decision.text = text;
                    source = "knowledge";
                }
                Ok(None) => {}
                Err(e) => {
                    // Knowledge outage degrades to the plain fallback text.
                    warn!(conversation_id = %msg.conversation_id, error = %e, "Knowledge lookup failed");
                }
            }
        }

        let step = StepOutcome::ok("auto_reply").with_data(json!({
            "rule": decision.rule.as_str(),
            "source": source,
        }));
        (step, Some(decision))
    }

    /// Knowledge-grounded reply text, or `None` to keep the rule text.
    async fn knowledge_reply(
        &self,
        msg: &InboundMessage,
        lang: Language,
    ) -> Result<Option<String>, crate::error::KnowledgeError> {
        if !self.knowledge.has_content(&msg.business_id).await? {
            return Ok(Some(knowledge_unconfigured_copy(lang).to_string()));
        }

        let chunks = self
            .knowledge
            .retrieve(&msg.business_id, &msg.message_text, self.config.retrieve_limit)
            .await?;

        match chunks.first() {
            Some(chunk) => {
                let mut text = chunk.content.clone();
                if text.len() > MAX_KNOWLEDGE_REPLY_CHARS {
                    // Cut on a char boundary, then back to the last word.
                    let mut cut = MAX_KNOWLEDGE_REPLY_CHARS;
                    while !text.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    text.truncate(cut);
                    if let Some(space) = text.rfind(' ') {
                        text.truncate(space);
                    }
                    text.push('…');
                }
                Ok(Some(text))
            }
            None => Ok(Some(knowledge_no_match_copy(lang).to_string())),
        }
    }

    async fn dispatch(
        &self,
        msg: &InboundMessage,
        text: &str,
        dry_run: bool,
        step_name: &str,
    ) -> StepOutcome {
        match self.dispatcher.send(msg, text, dry_run).await {
            Ok(outcome) => {
                let data = json!({
                    "status": outcome.status,
                    "provider_message_id": outcome.provider_message_id,
                    "error": outcome.error,
                });
                match outcome.status {
                    DispatchStatus::Sent => StepOutcome::ok(step_name).with_data(data),
                    DispatchStatus::Skipped => StepOutcome::skipped(
                        step_name,
                        outcome.skip_reason.unwrap_or_else(|| "skipped".into()),
                    )
                    .with_data(data),
                    DispatchStatus::Failed => StepOutcome::failed(
                        step_name,
                        outcome.error.clone().unwrap_or_else(|| "send failed".into()),
                    )
                    .with_data(data),
                }
            }
            Err(e) => StepOutcome::failed(step_name, e.to_string()),
        }
    }

    async fn booking_handoff(
        &self,
        msg: &InboundMessage,
        classification: &Classification,
        lang: Language,
        dry_run: bool,
    ) -> StepOutcome {
        if msg.channel != Channel::Whatsapp {
            return StepOutcome::skipped("booking_handoff", "whatsapp only");
        }
        if !classification.has(Intent::Booking) {
            return StepOutcome::skipped("booking_handoff", "no booking intent");
        }

        // Second message answering the same inbound event: drop the
        // reply-to id so the dispatcher's gate dedups it on text instead
        // of colliding with the main reply.
        let mut handoff_target = msg.clone();
        handoff_target.metadata.provider_message_id = None;

        self.dispatch(
            &handoff_target,
            booking_handoff_copy(lang),
            dry_run,
            "booking_handoff",
        )
        .await
    }
}

fn resolve_language(ctx: Option<&BusinessContext>, classification: &Classification) -> Language {
    match ctx.map(|c| c.language_preference) {
        Some(LanguagePreference::En) => Language::En,
        Some(LanguagePreference::Es) => Language::Es,
        Some(LanguagePreference::Auto) | None => classification.language,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_resolution_prefers_business_setting() {
        let es_pref = BusinessContext {
            business_id: "b".into(),
            name: "n".into(),
            language_preference: LanguagePreference::Es,
            office_hours: None,
            greeting_message: None,
            auto_reply_rules: Default::default(),
            ai_reply_enabled: false,
            services: Vec::new(),
        };
        let c = classify::classify("hello there, how much?");
        assert_eq!(c.language, Language::En);
        assert_eq!(resolve_language(Some(&es_pref), &c), Language::Es);
        assert_eq!(resolve_language(None, &c), Language::En);
    }

    #[test]
    fn handoff_copy_exists_in_both_languages() {
        assert!(booking_handoff_copy(Language::En).contains("book"));
        assert!(booking_handoff_copy(Language::Es).contains("cita"));
    }
}
