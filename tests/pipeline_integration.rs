//! End-to-end pipeline tests over an in-memory libSQL store.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use secrecy::SecretString;

use replyflow::business::{
    AutoReplyRules, BusinessContext, BusinessDirectory, ChannelCredentials, FallbackRule,
    GreetingRule, HoursWindow, LanguagePreference, OutOfOfficeRule, StaticDirectory,
};
use replyflow::channels::OutboundTransport;
use replyflow::classify::Language;
use replyflow::config::PipelineConfig;
use replyflow::dispatch::{DispatchStatus, Dispatcher};
use replyflow::error::DispatchError;
use replyflow::followup::FollowUpScheduler;
use replyflow::knowledge::KnowledgeService;
use replyflow::leads::{LeadQualifier, NullQualifier};
use replyflow::pipeline::types::{Channel, InboundMessage, MessageMetadata, StepStatus};
use replyflow::pipeline::Orchestrator;
use replyflow::reply;
use replyflow::store::{
    Database, Direction, FollowUpItem, FollowUpKind, FollowUpStatus, LibSqlBackend, SourceType,
    ThreadUpdate,
};

const BIZ: &str = "biz-test";
const GREETING: &str = "Welcome to Shine Auto Spa! How can we help?";
const FALLBACK: &str = "Thanks! We'll be right with you.";
const OOO: &str = "We're closed right now, back at 9am.";

/// Transport that records sends and returns generated provider ids.
#[derive(Default)]
struct MockTransport {
    sends: Mutex<Vec<(Channel, String, String)>>,
    fail: bool,
}

impl MockTransport {
    fn failing() -> Self {
        Self {
            sends: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    fn sent(&self) -> Vec<(Channel, String, String)> {
        self.sends.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutboundTransport for MockTransport {
    async fn send_text(
        &self,
        channel: Channel,
        _creds: &ChannelCredentials,
        recipient: &str,
        text: &str,
    ) -> Result<String, DispatchError> {
        if self.fail {
            return Err(DispatchError::Provider {
                channel: channel.as_str().to_string(),
                reason: "simulated provider outage".into(),
            });
        }
        let mut sends = self.sends.lock().unwrap();
        sends.push((channel, recipient.to_string(), text.to_string()));
        Ok(format!("out.{}", sends.len()))
    }
}

struct FailingQualifier;

#[async_trait]
impl LeadQualifier for FailingQualifier {
    async fn qualify(
        &self,
        _msg: &InboundMessage,
        _classification: &replyflow::classify::Classification,
    ) -> anyhow::Result<replyflow::leads::LeadAssessment> {
        anyhow::bail!("CRM unreachable")
    }
}

fn test_business(always_open: bool) -> BusinessContext {
    BusinessContext {
        business_id: BIZ.into(),
        name: "Shine Auto Spa".into(),
        language_preference: LanguagePreference::Auto,
        office_hours: None,
        greeting_message: None,
        auto_reply_rules: AutoReplyRules {
            enabled: true,
            greeting: GreetingRule {
                enabled: true,
                text: Some(GREETING.into()),
            },
            out_of_office: OutOfOfficeRule {
                enabled: true,
                text: Some(OOO.into()),
                timezone: Some("UTC".into()),
                hours: HoursWindow {
                    start: Some("00:00".into()),
                    end: Some(if always_open { "23:59" } else { "18:00" }.into()),
                    days: vec![1, 2, 3, 4, 5, 6, 7],
                },
            },
            fallback: FallbackRule {
                text: Some(FALLBACK.into()),
            },
        },
        ai_reply_enabled: false,
        services: Vec::new(),
    }
}

fn directory(ctx: BusinessContext) -> Arc<StaticDirectory> {
    Arc::new(
        StaticDirectory::new()
            .with_business(ctx)
            .with_credentials(
                BIZ,
                Channel::Whatsapp,
                ChannelCredentials {
                    access_token: SecretString::from("test-token"),
                    sender_id: "108500".into(),
                },
            )
            .with_credentials(
                BIZ,
                Channel::Instagram,
                ChannelCredentials {
                    access_token: SecretString::from("test-token"),
                    sender_id: "17840001".into(),
                },
            ),
    )
}

struct Env {
    store: Arc<dyn Database>,
    transport: Arc<MockTransport>,
    dispatcher: Arc<Dispatcher>,
    knowledge: Arc<KnowledgeService>,
    orchestrator: Arc<Orchestrator>,
    scheduler: FollowUpScheduler,
}

async fn env_with(ctx: BusinessContext, transport: MockTransport) -> Env {
    let config = PipelineConfig::default();
    let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let directory = directory(ctx);
    let transport = Arc::new(transport);
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        directory.clone(),
        transport.clone(),
        config.clone(),
    ));
    let knowledge = Arc::new(KnowledgeService::new(store.clone(), config.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        directory.clone(),
        knowledge.clone(),
        dispatcher.clone(),
        Arc::new(NullQualifier),
        config.clone(),
    ));
    let scheduler = FollowUpScheduler::new(
        store.clone(),
        directory.clone(),
        dispatcher.clone(),
        config,
    );
    Env {
        store,
        transport,
        dispatcher,
        knowledge,
        orchestrator,
        scheduler,
    }
}

async fn env() -> Env {
    env_with(test_business(true), MockTransport::default()).await
}

fn inbound(text: &str, provider_id: &str) -> InboundMessage {
    InboundMessage {
        business_id: BIZ.into(),
        channel: Channel::Whatsapp,
        conversation_id: InboundMessage::conversation_id_for(BIZ, Channel::Whatsapp, "15550001111"),
        sender_name: Some("Ana".into()),
        sender_handle: "15550001111".into(),
        message_text: text.into(),
        timestamp: Utc::now(),
        metadata: MessageMetadata {
            provider_message_id: Some(provider_id.into()),
            is_echo: false,
            reply_target: Some("108500".into()),
        },
    }
}

// ── Dispatcher properties ───────────────────────────────────────────

#[tokio::test]
async fn dispatch_is_idempotent_per_reply_to() {
    let env = env().await;
    let msg = inbound("hi", "wamid.1");

    let first = env.dispatcher.send(&msg, "hello!", false).await.unwrap();
    assert_eq!(first.status, DispatchStatus::Sent);
    assert!(first.provider_message_id.is_some());

    let second = env.dispatcher.send(&msg, "hello!", false).await.unwrap();
    assert_eq!(second.status, DispatchStatus::Skipped);

    assert_eq!(env.transport.sent().len(), 1);
}

#[tokio::test]
async fn dispatch_empty_text_is_skipped_without_log() {
    let env = env().await;
    let msg = inbound("hi", "wamid.2");

    let outcome = env.dispatcher.send(&msg, "   ", false).await.unwrap();
    assert_eq!(outcome.status, DispatchStatus::Skipped);
    assert!(outcome.rollup.is_none());
    assert!(env.transport.sent().is_empty());

    // No log row means a later real reply still goes out.
    let real = env.dispatcher.send(&msg, "hello", false).await.unwrap();
    assert_eq!(real.status, DispatchStatus::Sent);
}

#[tokio::test]
async fn dispatch_missing_recipient_fails_and_logs() {
    let env = env().await;
    let mut msg = inbound("hi", "wamid.3");
    msg.sender_handle = String::new();

    let outcome = env.dispatcher.send(&msg, "hello", false).await.unwrap();
    assert_eq!(outcome.status, DispatchStatus::Failed);
    assert!(outcome.error.unwrap().contains("recipient"));
    // Rollup was still attempted.
    assert!(matches!(outcome.rollup, Some(Ok(()))));
}

#[tokio::test]
async fn dispatch_missing_credentials_fails() {
    let config = PipelineConfig::default();
    let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    // Directory without any channel credentials.
    let bare = Arc::new(StaticDirectory::new().with_business(test_business(true)));
    let dispatcher = Dispatcher::new(
        store,
        bare,
        Arc::new(MockTransport::default()),
        config,
    );

    let outcome = dispatcher
        .send(&inbound("hi", "wamid.4"), "hello", false)
        .await
        .unwrap();
    assert_eq!(outcome.status, DispatchStatus::Failed);
    assert!(outcome.error.unwrap().contains("credentials"));
}

#[tokio::test]
async fn dispatch_provider_failure_is_logged_not_propagated() {
    let env = env_with(test_business(true), MockTransport::failing()).await;
    let msg = inbound("hi", "wamid.5");

    let outcome = env.dispatcher.send(&msg, "hello", false).await.unwrap();
    assert_eq!(outcome.status, DispatchStatus::Failed);
    assert!(outcome.error.unwrap().contains("outage"));

    // A failed attempt does not trip the idempotency gate, so a retry
    // can still go through once the provider recovers.
    let gate = env
        .store
        .find_outbound_reply(
            BIZ,
            &msg.conversation_id,
            Channel::Whatsapp,
            Some("wamid.5"),
            "hello",
        )
        .await
        .unwrap();
    assert!(gate.is_none());
}

// ── Loop prevention ─────────────────────────────────────────────────

#[tokio::test]
async fn echo_of_our_own_send_gets_no_reply() {
    let env = env().await;
    let ctx = test_business(true);

    // We send a reply; the provider assigns it id "out.1".
    let msg = inbound("hi", "wamid.10");
    let outcome = env.dispatcher.send(&msg, "hello!", false).await.unwrap();
    let our_id = outcome.provider_message_id.unwrap();

    // The webhook then echoes our own message back at us.
    let mut echo = inbound("hello!", &our_id);
    echo.metadata.is_echo = false; // matched purely via the outbound log

    let decision = reply::decide(&echo, &ctx, Language::En, Utc::now(), env.store.as_ref())
        .await
        .unwrap();
    assert!(decision.is_none());
}

#[tokio::test]
async fn instagram_echo_flag_suppresses_reply() {
    let env = env().await;
    let ctx = test_business(true);
    let mut msg = inbound("our own text", "mid.echo");
    msg.metadata.is_echo = true;

    let decision = reply::decide(&msg, &ctx, Language::En, Utc::now(), env.store.as_ref())
        .await
        .unwrap();
    assert!(decision.is_none());
}

// ── Rule engine scenarios ───────────────────────────────────────────

#[tokio::test]
async fn cold_greeting_scenario() {
    let env = env().await;
    let msg = inbound("Hi, do you do ceramic coating?", "wamid.20");

    let report = env.orchestrator.run(&msg, true).await;

    let auto_reply = report.step("auto_reply").unwrap();
    assert_eq!(auto_reply.status, StepStatus::Ok);
    assert_eq!(auto_reply.data.as_ref().unwrap()["rule"], "greeting");

    assert_eq!(report.step("dispatch").unwrap().status, StepStatus::Ok);

    // The configured greeting went out, not the fallback.
    let thread = env.store.thread(&msg.conversation_id).await.unwrap().unwrap();
    assert_eq!(thread.last_message_text, GREETING);
    assert_eq!(thread.last_direction, Direction::Outbound);
}

#[tokio::test]
async fn greeting_fires_only_once() {
    let env = env().await;

    let first = env
        .orchestrator
        .run(&inbound("hello!", "wamid.21"), true)
        .await;
    assert_eq!(
        first.step("auto_reply").unwrap().data.as_ref().unwrap()["rule"],
        "greeting"
    );

    let second = env
        .orchestrator
        .run(&inbound("are you there?", "wamid.22"), true)
        .await;
    assert_eq!(
        second.step("auto_reply").unwrap().data.as_ref().unwrap()["rule"],
        "fallback"
    );
}

#[tokio::test]
async fn fallback_reply_uses_generic_greeting_message() {
    let mut ctx = test_business(true);
    ctx.greeting_message = Some("Generic hello from the business".into());
    ctx.auto_reply_rules.fallback.text = None;
    let env = env_with(ctx.clone(), MockTransport::default()).await;

    env.store
        .record_inbound(&inbound("hello", "wamid.25"))
        .await
        .unwrap();
    let msg = inbound("what are your prices?", "wamid.26");
    env.store.record_inbound(&msg).await.unwrap();

    let decision = reply::decide(&msg, &ctx, Language::En, Utc::now(), env.store.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(decision.rule, reply::ReplyRule::Fallback);
    assert_eq!(decision.text, "Generic hello from the business");
}

#[tokio::test]
async fn after_hours_on_fifth_message() {
    let env = env().await;
    let ctx = test_business(false); // 00:00–18:00 UTC window

    // Five prior inbound messages on the conversation.
    for i in 0..5 {
        let m = inbound("earlier message", &format!("wamid.3{i}"));
        env.store.record_inbound(&m).await.unwrap();
    }

    // Wednesday 22:00 UTC, outside the window.
    let late = Utc.with_ymd_and_hms(2026, 1, 7, 22, 0, 0).unwrap();
    let msg = inbound("anyone there?", "wamid.39");
    let decision = reply::decide(&msg, &ctx, Language::En, late, env.store.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(decision.rule, reply::ReplyRule::OutOfOffice);
    assert_eq!(decision.text, OOO);
}

#[tokio::test]
async fn duplicate_webhook_delivery_replies_once() {
    let env = env().await;
    let msg = inbound("hola, precio?", "wamid.40");

    let first = env.orchestrator.run(&msg, true).await;
    assert_eq!(first.step("dispatch").unwrap().status, StepStatus::Ok);

    // Redelivery of the exact same webhook event.
    let second = env.orchestrator.run(&msg, true).await;
    assert_eq!(
        second.step("record_inbound").unwrap().data.as_ref().unwrap()["duplicate"],
        true
    );
    assert_eq!(second.step("dispatch").unwrap().status, StepStatus::Skipped);
}

// ── Knowledge base ──────────────────────────────────────────────────

#[tokio::test]
async fn chunk_round_trip_finds_verbatim_phrase() {
    let env = env().await;
    let text = "Our ceramic coating package takes three days to cure fully. \
                We also offer interior detailing and paint correction. \
                Pricing starts at 300 for sedans.";
    env.knowledge
        .ingest(BIZ, SourceType::Text, Some("services"), text)
        .await
        .unwrap();

    let results = env
        .knowledge
        .retrieve(BIZ, "how long does ceramic coating take to cure", 4)
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert!(results[0].content.contains("ceramic coating"));
}

#[tokio::test]
async fn knowledge_clear_reports_counts_and_empties_retrieval() {
    let env = env().await;
    for i in 0..3 {
        env.knowledge
            .ingest(BIZ, SourceType::Text, None, &format!("source number {i} about detailing"))
            .await
            .unwrap();
    }
    assert!(env.knowledge.has_content(BIZ).await.unwrap());

    let receipt = env.knowledge.clear(BIZ).await.unwrap();
    assert_eq!(receipt.source_count, 3);
    assert_eq!(receipt.chunk_count, 3);

    assert!(!env.knowledge.has_content(BIZ).await.unwrap());
    let results = env.knowledge.retrieve(BIZ, "detailing", 4).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn ingest_empty_content_is_rejected() {
    let env = env().await;
    let err = env
        .knowledge
        .ingest(BIZ, SourceType::Text, None, "  \n\t ")
        .await
        .unwrap_err();
    assert!(matches!(err, replyflow::error::KnowledgeError::EmptyContent));
}

#[tokio::test]
async fn recency_fallback_when_nothing_matches() {
    let env = env().await;
    env.knowledge
        .ingest(BIZ, SourceType::Text, None, "we detail cars and motorcycles")
        .await
        .unwrap();

    // Query shares no keywords with the content; the newest chunks come
    // back instead of nothing.
    let results = env.knowledge.retrieve(BIZ, "zzqx unrelated", 4).await.unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn chunk_search_matches_like_wildcards_literally() {
    let env = env().await;
    env.knowledge
        .ingest(BIZ, SourceType::Text, None, "we offer a 100% satisfaction guarantee")
        .await
        .unwrap();
    env.knowledge
        .ingest(BIZ, SourceType::Text, None, "a ceramic coat lasts 100 washes")
        .await
        .unwrap();

    // A term containing a LIKE wildcard matches only its literal text.
    let hits = env
        .store
        .search_chunks(BIZ, &["100%".to_string()], 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].content.contains("100% satisfaction"));
}

#[tokio::test]
async fn ai_reply_uses_unconfigured_copy_without_knowledge() {
    let mut ctx = test_business(true);
    ctx.ai_reply_enabled = true;
    let env = env_with(ctx, MockTransport::default()).await;

    // Second message so the fallback path (not greeting) is taken.
    env.orchestrator
        .run(&inbound("hello", "wamid.50"), true)
        .await;
    let report = env
        .orchestrator
        .run(&inbound("what services do you offer?", "wamid.51"), true)
        .await;

    let auto_reply = report.step("auto_reply").unwrap();
    assert_eq!(auto_reply.data.as_ref().unwrap()["source"], "knowledge");
    let conv = InboundMessage::conversation_id_for(BIZ, Channel::Whatsapp, "15550001111");
    let thread = env.store.thread(&conv).await.unwrap().unwrap();
    assert!(thread.last_message_text.contains("isn't set up yet"));
}

// ── Orchestrator isolation ──────────────────────────────────────────

#[tokio::test]
async fn failing_qualifier_does_not_stop_dispatch() {
    let config = PipelineConfig::default();
    let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let dir = directory(test_business(true));
    let transport = Arc::new(MockTransport::default());
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        dir.clone(),
        transport,
        config.clone(),
    ));
    let knowledge = Arc::new(KnowledgeService::new(store.clone(), config.clone()));
    let orchestrator = Orchestrator::new(
        store,
        dir,
        knowledge,
        dispatcher,
        Arc::new(FailingQualifier),
        config,
    );

    let report = orchestrator.run(&inbound("hello", "wamid.60"), true).await;
    let qualify = report.step("qualify_lead").unwrap();
    assert_eq!(qualify.status, StepStatus::Failed);
    assert!(qualify.detail.as_ref().unwrap().contains("CRM"));

    // Later stages still ran.
    assert_eq!(report.step("auto_reply").unwrap().status, StepStatus::Ok);
    assert_eq!(report.step("dispatch").unwrap().status, StepStatus::Ok);
}

#[tokio::test]
async fn booking_intent_on_whatsapp_adds_handoff() {
    let env = env().await;
    let report = env
        .orchestrator
        .run(&inbound("I want to book an appointment", "wamid.61"), true)
        .await;
    assert_eq!(report.step("booking_handoff").unwrap().status, StepStatus::Ok);

    // Not on Instagram.
    let mut ig = inbound("I want to book an appointment", "mid.62");
    ig.channel = Channel::Instagram;
    ig.conversation_id =
        InboundMessage::conversation_id_for(BIZ, Channel::Instagram, &ig.sender_handle);
    let report = env.orchestrator.run(&ig, true).await;
    assert_eq!(
        report.step("booking_handoff").unwrap().status,
        StepStatus::Skipped
    );
}

// ── Follow-up scheduler ─────────────────────────────────────────────

fn followup_at(scheduled_for: chrono::DateTime<Utc>, conversation_id: &str) -> FollowUpItem {
    FollowUpItem {
        id: uuid::Uuid::new_v4().to_string(),
        business_id: BIZ.into(),
        conversation_id: conversation_id.into(),
        kind: FollowUpKind::H24,
        scheduled_for,
        status: FollowUpStatus::Pending,
        sent_text: None,
        detail: None,
        created_at: scheduled_for - Duration::hours(24),
        processed_at: None,
    }
}

fn thread_touch(conversation_id: &str, at: chrono::DateTime<Utc>, direction: Direction) -> ThreadUpdate {
    ThreadUpdate {
        conversation_id: conversation_id.into(),
        business_id: BIZ.into(),
        channel: Channel::Whatsapp,
        sender_handle: "15550001111".into(),
        sender_name: Some("Ana".into()),
        text: "hola, quiero más información".into(),
        at,
        direction,
        intent: None,
    }
}

#[tokio::test]
async fn followup_cancelled_when_contact_re_engaged() {
    let env = env().await;
    let t = Utc::now();
    let conv = InboundMessage::conversation_id_for(BIZ, Channel::Whatsapp, "15550001111");

    // Inbound 2h before the scheduled time, inside the 24h grace window.
    env.store
        .update_thread(&thread_touch(&conv, t - Duration::hours(2), Direction::Inbound))
        .await
        .unwrap();
    let item = followup_at(t, &conv);
    env.store.insert_followup(&item).await.unwrap();

    let report = env.scheduler.process_due(t).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.cancelled, 1);
    assert_eq!(report.sent, 0);

    let stored = env.store.followup(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, FollowUpStatus::Cancelled);
    // The dispatcher was never called.
    assert!(env.transport.sent().is_empty());
}

#[tokio::test]
async fn followup_sends_when_contact_stayed_quiet() {
    let env = env().await;
    let t = Utc::now();
    let conv = InboundMessage::conversation_id_for(BIZ, Channel::Whatsapp, "15550001111");

    // Last inbound 30h before the scheduled time, outside the window.
    env.store
        .update_thread(&thread_touch(&conv, t - Duration::hours(30), Direction::Inbound))
        .await
        .unwrap();
    let item = followup_at(t, &conv);
    env.store.insert_followup(&item).await.unwrap();

    let report = env.scheduler.process_due(t).await.unwrap();
    assert_eq!(report.sent, 1);

    let stored = env.store.followup(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, FollowUpStatus::Sent);
    let sent_text = stored.sent_text.unwrap();
    assert!(sent_text.contains("Shine Auto Spa"));
    assert_eq!(env.transport.sent().len(), 1);

    // Terminal states are final: a second run finds nothing pending.
    let again = env.scheduler.process_due(t + Duration::hours(1)).await.unwrap();
    assert_eq!(again.processed, 0);
}

#[tokio::test]
async fn followup_orphan_thread_is_failed_not_retried() {
    let env = env().await;
    let t = Utc::now();
    let item = followup_at(t, "whatsapp:biz-test:no-such-thread");
    env.store.insert_followup(&item).await.unwrap();

    let report = env.scheduler.process_due(t).await.unwrap();
    assert_eq!(report.failed, 1);

    let stored = env.store.followup(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, FollowUpStatus::Failed);
    assert!(stored.detail.unwrap().contains("not found"));

    let again = env.scheduler.process_due(t + Duration::hours(1)).await.unwrap();
    assert_eq!(again.processed, 0);
}

#[tokio::test]
async fn followup_dispatch_failure_marks_failed() {
    let env = env_with(test_business(true), MockTransport::failing()).await;
    let t = Utc::now();
    let conv = InboundMessage::conversation_id_for(BIZ, Channel::Whatsapp, "15550001111");
    env.store
        .update_thread(&thread_touch(&conv, t - Duration::hours(30), Direction::Inbound))
        .await
        .unwrap();
    let item = followup_at(t, &conv);
    env.store.insert_followup(&item).await.unwrap();

    let report = env.scheduler.process_due(t).await.unwrap();
    assert_eq!(report.failed, 1);

    let stored = env.store.followup(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, FollowUpStatus::Failed);
    assert!(stored.detail.unwrap().contains("outage"));
}

// ── Store invariants ────────────────────────────────────────────────

#[tokio::test]
async fn thread_last_message_at_is_monotone() {
    let env = env().await;
    let conv = "whatsapp:biz-test:15550001111";
    let t = Utc::now();

    env.store
        .update_thread(&thread_touch(conv, t, Direction::Inbound))
        .await
        .unwrap();
    // An older write arrives late; the rollup must not move backwards.
    env.store
        .update_thread(&thread_touch(conv, t - Duration::hours(5), Direction::Outbound))
        .await
        .unwrap();

    let thread = env.store.thread(conv).await.unwrap().unwrap();
    assert_eq!(thread.last_message_at.timestamp(), t.timestamp());
    assert_eq!(thread.last_direction, Direction::Inbound);
}

#[tokio::test]
async fn local_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("replyflow.db");
    let conv = InboundMessage::conversation_id_for(BIZ, Channel::Whatsapp, "15550001111");

    {
        let store = LibSqlBackend::new_local(&path).await.unwrap();
        store.record_inbound(&inbound("hi", "wamid.80")).await.unwrap();
    }

    // Reopening reruns migrations as a no-op and sees the old rows.
    let store = LibSqlBackend::new_local(&path).await.unwrap();
    assert_eq!(store.count_inbound(&conv).await.unwrap(), 1);
}

#[tokio::test]
async fn record_inbound_dedups_on_provider_id() {
    let env = env().await;
    let msg = inbound("hola", "wamid.70");

    let first = env.store.record_inbound(&msg).await.unwrap();
    assert!(!first.duplicate);
    let second = env.store.record_inbound(&msg).await.unwrap();
    assert!(second.duplicate);
    assert_eq!(first.id, second.id);

    assert_eq!(env.store.count_inbound(&msg.conversation_id).await.unwrap(), 1);
}
