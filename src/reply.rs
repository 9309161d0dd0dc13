//! Auto-reply rule engine.
//!
//! Decides greeting / out-of-office / fallback text for an inbound
//! message. The echo check runs before every other branch; it is the
//! loop-prevention mechanism that keeps the business from answering its
//! own outbound messages forever.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::business::{BusinessContext, HoursWindow};
use crate::classify::Language;
use crate::error::ReplyError;
use crate::pipeline::types::InboundMessage;
use crate::store::Database;

/// Which rule produced the reply, for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyRule {
    Greeting,
    OutOfOffice,
    Fallback,
}

impl ReplyRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyRule::Greeting => "greeting",
            ReplyRule::OutOfOffice => "out_of_office",
            ReplyRule::Fallback => "fallback",
        }
    }
}

/// The rule engine's verdict: what to say and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyDecision {
    pub text: String,
    pub rule: ReplyRule,
}

// ── Business-hours math ─────────────────────────────────────────────

/// Minutes since local midnight for a `"HH:MM"` string.
fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.trim().split_once(':')?;
    let h: u32 = h.trim().parse().ok()?;
    let m: u32 = m.trim().parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

// Two clock times separated by a dash/"to"/"a".
static HOURS_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\d{1,2})(?::(\d{2}))?\s*(am|pm)?\s*(?:-|–|—|to|a)\s*(\d{1,2})(?::(\d{2}))?\s*(am|pm)?",
    )
    .expect("hours pattern is valid")
});

/// Parse a free-text office-hours string like `"9:00am - 6:00pm"` or
/// `"9 a 18"` into `(start, end)` minutes-since-midnight.
fn parse_office_hours_text(text: &str) -> Option<(u32, u32)> {
    let caps = HOURS_TEXT_RE.captures(text)?;

    let to_minutes = |hour: &str, min: Option<&str>, ampm: Option<&str>| -> Option<u32> {
        let mut h: u32 = hour.parse().ok()?;
        let m: u32 = min.map(|m| m.parse().ok()).unwrap_or(Some(0))?;
        match ampm.map(str::to_lowercase).as_deref() {
            Some("pm") if h < 12 => h += 12,
            Some("am") if h == 12 => h = 0,
            _ => {}
        }
        if h > 23 || m > 59 {
            return None;
        }
        Some(h * 60 + m)
    };

    let start = to_minutes(
        caps.get(1)?.as_str(),
        caps.get(2).map(|m| m.as_str()),
        caps.get(3).map(|m| m.as_str()),
    )?;
    let end = to_minutes(
        caps.get(4)?.as_str(),
        caps.get(5).map(|m| m.as_str()),
        caps.get(6).map(|m| m.as_str()),
    )?;
    Some((start, end))
}

/// Resolve the hours window: structured `HH:MM` first, free text second.
fn resolve_window(hours: &HoursWindow, office_hours_text: Option<&str>) -> Option<(u32, u32)> {
    if let (Some(start), Some(end)) = (
        hours.start.as_deref().and_then(parse_hhmm),
        hours.end.as_deref().and_then(parse_hhmm),
    ) {
        return Some((start, end));
    }
    office_hours_text.and_then(parse_office_hours_text)
}

/// Whether `now` falls outside the business's configured hours.
///
/// A day not in `days` (default Mon–Fri) counts as outside. Overnight
/// windows where `start > end` wrap past midnight with the inverted
/// inside test. Without any parseable window, the business is treated as
/// always open; out-of-office never fires on missing configuration.
pub fn is_outside_hours(now: DateTime<Utc>, ctx: &BusinessContext) -> bool {
    let ooo = &ctx.auto_reply_rules.out_of_office;

    let tz: Tz = ooo
        .timezone
        .as_deref()
        .and_then(|name| name.parse().ok())
        .unwrap_or(chrono_tz::UTC);
    let local = now.with_timezone(&tz);

    let weekday = local.weekday().number_from_monday() as u8;
    let open_days: &[u8] = if ooo.hours.days.is_empty() {
        &[1, 2, 3, 4, 5]
    } else {
        &ooo.hours.days
    };
    if !open_days.contains(&weekday) {
        return true;
    }

    let Some((start, end)) = resolve_window(&ooo.hours, ctx.office_hours.as_deref()) else {
        return false;
    };

    let minute = local.hour() * 60 + local.minute();
    let inside = if start > end {
        // Overnight window, e.g. 22:00–06:00.
        minute >= start || minute < end
    } else {
        minute >= start && minute < end
    };
    !inside
}

// ── Default copy ────────────────────────────────────────────────────

fn default_greeting(lang: Language) -> &'static str {
    match lang {
        Language::En => "Hi! Thanks for reaching out — we'll get back to you shortly.",
        Language::Es => "¡Hola! Gracias por escribirnos — te responderemos en breve.",
    }
}

fn default_out_of_office(lang: Language) -> &'static str {
    match lang {
        Language::En => "We're currently closed, but we'll reply as soon as we're back.",
        Language::Es => "En este momento estamos cerrados, pero te responderemos en cuanto volvamos.",
    }
}

fn default_fallback(lang: Language) -> &'static str {
    match lang {
        Language::En => "Thanks for your message! A member of our team will be with you soon.",
        Language::Es => "¡Gracias por tu mensaje! Un miembro de nuestro equipo te atenderá pronto.",
    }
}

/// Text precedence, the same for every rule: the per-rule override when
/// set and non-empty, else the business's general greeting message, else
/// the bilingual default copy.
fn rule_text(override_text: Option<&str>, ctx: &BusinessContext, default: &'static str) -> String {
    override_text
        .filter(|t| !t.trim().is_empty())
        .or_else(|| {
            ctx.greeting_message
                .as_deref()
                .filter(|t| !t.trim().is_empty())
        })
        .map(str::to_string)
        .unwrap_or_else(|| default.to_string())
}

// ── Decision ────────────────────────────────────────────────────────

/// Decide whether and what to auto-reply.
///
/// Returns `None` when rules are disabled or the message is an echo of
/// our own outbound send. Cross-call checks (echo, greeting-once) go
/// through the durable store, never in-memory state.
pub async fn decide(
    msg: &InboundMessage,
    ctx: &BusinessContext,
    lang: Language,
    now: DateTime<Utc>,
    store: &dyn Database,
) -> Result<Option<ReplyDecision>, ReplyError> {
    let rules = &ctx.auto_reply_rules;
    if !rules.enabled {
        return Ok(None);
    }

    // Echo suppression comes before everything else.
    if msg.metadata.is_echo {
        debug!(conversation_id = %msg.conversation_id, "Echo flag set; no auto-reply");
        return Ok(None);
    }
    if let Some(ref provider_id) = msg.metadata.provider_message_id {
        if store
            .find_outbound_by_provider_id(&msg.business_id, provider_id)
            .await?
            .is_some()
        {
            debug!(
                conversation_id = %msg.conversation_id,
                provider_id = %provider_id,
                "Inbound matches our own outbound; no auto-reply"
            );
            return Ok(None);
        }
    }

    let outside = is_outside_hours(now, ctx);
    let prior_inbound = store.count_inbound(&msg.conversation_id).await?;

    // First contact: greet, folding in the out-of-office note when the
    // message also arrived outside hours.
    if prior_inbound <= 1 && rules.greeting.enabled {
        let mut text = rule_text(rules.greeting.text.as_deref(), ctx, default_greeting(lang));
        if outside && rules.out_of_office.enabled {
            let ooo = rule_text(
                rules.out_of_office.text.as_deref(),
                ctx,
                default_out_of_office(lang),
            );
            text = format!("{text}\n\n{ooo}");
        }
        return Ok(Some(ReplyDecision {
            text,
            rule: ReplyRule::Greeting,
        }));
    }

    if outside && rules.out_of_office.enabled {
        return Ok(Some(ReplyDecision {
            text: rule_text(
                rules.out_of_office.text.as_deref(),
                ctx,
                default_out_of_office(lang),
            ),
            rule: ReplyRule::OutOfOffice,
        }));
    }

    Ok(Some(ReplyDecision {
        text: rule_text(rules.fallback.text.as_deref(), ctx, default_fallback(lang)),
        rule: ReplyRule::Fallback,
    }))
}
