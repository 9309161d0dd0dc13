//! Webhook payload normalization.
//!
//! Decodes channel-native webhook JSON into the canonical
//! [`InboundMessage`]. Each channel has its own typed payload structs,
//! validated at this boundary; nothing channel-shaped leaks downstream.
//!
//! Payloads that are well-formed but carry no message events (delivery
//! receipts, read receipts) normalize to an empty vec, not an error.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::NormalizeError;
use crate::pipeline::types::{Channel, InboundMessage, MessageMetadata};

// ── WhatsApp Cloud API ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WhatsAppWebhook {
    entry: Vec<WhatsAppEntry>,
}

#[derive(Debug, Deserialize)]
struct WhatsAppEntry {
    changes: Vec<WhatsAppChange>,
}

#[derive(Debug, Deserialize)]
struct WhatsAppChange {
    value: WhatsAppValue,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsAppValue {
    #[serde(default)]
    metadata: Option<WhatsAppMetadata>,
    #[serde(default)]
    contacts: Vec<WhatsAppContact>,
    /// Absent on status/delivery-receipt deliveries.
    #[serde(default)]
    messages: Vec<WhatsAppMessage>,
}

#[derive(Debug, Deserialize)]
struct WhatsAppMetadata {
    #[serde(default)]
    phone_number_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhatsAppContact {
    #[serde(default)]
    profile: Option<WhatsAppProfile>,
    #[serde(default)]
    wa_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhatsAppProfile {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhatsAppMessage {
    from: String,
    id: String,
    /// Unix seconds, as a string.
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    text: Option<WhatsAppText>,
}

#[derive(Debug, Deserialize)]
struct WhatsAppText {
    body: String,
}

// ── Instagram Messaging ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct InstagramWebhook {
    entry: Vec<InstagramEntry>,
}

#[derive(Debug, Deserialize)]
struct InstagramEntry {
    /// IG business account id receiving the event.
    #[serde(default)]
    id: Option<String>,
    messaging: Vec<InstagramMessaging>,
}

#[derive(Debug, Deserialize)]
struct InstagramMessaging {
    sender: InstagramParty,
    #[serde(default)]
    recipient: Option<InstagramParty>,
    /// Unix milliseconds.
    #[serde(default)]
    timestamp: Option<i64>,
    /// Absent on read receipts and postbacks.
    #[serde(default)]
    message: Option<InstagramMessage>,
}

#[derive(Debug, Deserialize)]
struct InstagramParty {
    id: String,
}

#[derive(Debug, Deserialize)]
struct InstagramMessage {
    #[serde(default)]
    mid: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    is_echo: bool,
}

// ── Normalization ───────────────────────────────────────────────────

/// Decode one webhook delivery into canonical inbound messages.
///
/// `business_id` is resolved by the intake layer (webhook routing) before
/// this is called. Pure: no side effects, and the same
/// redelivered payload yields the same conversation ids.
pub fn normalize(
    business_id: &str,
    channel: Channel,
    raw: &serde_json::Value,
) -> Result<Vec<InboundMessage>, NormalizeError> {
    match channel {
        Channel::Whatsapp => normalize_whatsapp(business_id, raw),
        Channel::Instagram => normalize_instagram(business_id, raw),
    }
}

fn invalid(channel: Channel, reason: impl Into<String>) -> NormalizeError {
    NormalizeError::InvalidPayload {
        channel: channel.as_str().to_string(),
        reason: reason.into(),
    }
}

fn normalize_whatsapp(
    business_id: &str,
    raw: &serde_json::Value,
) -> Result<Vec<InboundMessage>, NormalizeError> {
    let payload: WhatsAppWebhook = serde_json::from_value(raw.clone())
        .map_err(|e| invalid(Channel::Whatsapp, format!("missing entry/changes: {e}")))?;

    let mut out = Vec::new();
    for entry in &payload.entry {
        for change in &entry.changes {
            let value = &change.value;
            let reply_target = value
                .metadata
                .as_ref()
                .and_then(|m| m.phone_number_id.clone());

            for msg in &value.messages {
                // Contact entry matching the sender carries the profile name.
                let sender_name = value
                    .contacts
                    .iter()
                    .find(|c| c.wa_id.as_deref() == Some(msg.from.as_str()))
                    .or(value.contacts.first())
                    .and_then(|c| c.profile.as_ref())
                    .and_then(|p| p.name.clone());

                let text = match (&msg.text, msg.kind.as_deref()) {
                    (Some(t), _) => t.body.clone(),
                    // Non-text messages keep the thread coherent with a
                    // placeholder body.
                    (None, Some(kind)) => format!("[{kind}]"),
                    (None, None) => String::new(),
                };

                let timestamp = msg
                    .timestamp
                    .as_deref()
                    .and_then(|s| s.parse::<i64>().ok())
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                    .unwrap_or_else(Utc::now);

                out.push(InboundMessage {
                    business_id: business_id.to_string(),
                    channel: Channel::Whatsapp,
                    conversation_id: InboundMessage::conversation_id_for(
                        business_id,
                        Channel::Whatsapp,
                        &msg.from,
                    ),
                    sender_name,
                    sender_handle: msg.from.clone(),
                    message_text: text,
                    timestamp,
                    metadata: MessageMetadata {
                        provider_message_id: Some(msg.id.clone()),
                        is_echo: false,
                        reply_target: reply_target.clone(),
                    },
                });
            }
        }
    }

    debug!(count = out.len(), "WhatsApp webhook normalized");
    Ok(out)
}

fn normalize_instagram(
    business_id: &str,
    raw: &serde_json::Value,
) -> Result<Vec<InboundMessage>, NormalizeError> {
    let payload: InstagramWebhook = serde_json::from_value(raw.clone())
        .map_err(|e| invalid(Channel::Instagram, format!("missing entry/messaging: {e}")))?;

    let mut out = Vec::new();
    for entry in &payload.entry {
        for event in &entry.messaging {
            // Read receipts and postbacks carry no message.
            let Some(ref message) = event.message else {
                continue;
            };

            let timestamp = event
                .timestamp
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .unwrap_or_else(Utc::now);

            // Echo events come from the business account, so the customer
            // is the recipient. Key the conversation by the customer either
            // way, keeping echoes on the thread they belong to.
            let customer_id = if message.is_echo {
                event
                    .recipient
                    .as_ref()
                    .map(|r| r.id.as_str())
                    .unwrap_or(event.sender.id.as_str())
            } else {
                event.sender.id.as_str()
            };

            out.push(InboundMessage {
                business_id: business_id.to_string(),
                channel: Channel::Instagram,
                conversation_id: InboundMessage::conversation_id_for(
                    business_id,
                    Channel::Instagram,
                    customer_id,
                ),
                sender_name: None,
                sender_handle: event.sender.id.clone(),
                message_text: message.text.clone().unwrap_or_else(|| "[media]".into()),
                timestamp,
                metadata: MessageMetadata {
                    provider_message_id: message.mid.clone(),
                    is_echo: message.is_echo,
                    reply_target: entry.id.clone(),
                },
            });
        }
    }

    debug!(count = out.len(), "Instagram webhook normalized");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wa_payload(body: &str, msg_id: &str) -> serde_json::Value {
        json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "metadata": {"phone_number_id": "108500"},
                        "contacts": [{"profile": {"name": "Ana"}, "wa_id": "15550001111"}],
                        "messages": [{
                            "from": "15550001111",
                            "id": msg_id,
                            "timestamp": "1693500000",
                            "type": "text",
                            "text": {"body": body}
                        }]
                    }
                }]
            }]
        })
    }

    #[test]
    fn whatsapp_text_message_normalizes() {
        let msgs = normalize("biz1", Channel::Whatsapp, &wa_payload("hola", "wamid.1")).unwrap();
        assert_eq!(msgs.len(), 1);
        let m = &msgs[0];
        assert_eq!(m.sender_handle, "15550001111");
        assert_eq!(m.sender_name.as_deref(), Some("Ana"));
        assert_eq!(m.message_text, "hola");
        assert_eq!(m.conversation_id, "whatsapp:biz1:15550001111");
        assert_eq!(m.metadata.provider_message_id.as_deref(), Some("wamid.1"));
        assert_eq!(m.metadata.reply_target.as_deref(), Some("108500"));
        assert_eq!(m.timestamp.timestamp(), 1693500000);
    }

    #[test]
    fn whatsapp_retry_yields_same_conversation_id() {
        let payload = wa_payload("hi", "wamid.2");
        let a = normalize("biz1", Channel::Whatsapp, &payload).unwrap();
        let b = normalize("biz1", Channel::Whatsapp, &payload).unwrap();
        assert_eq!(a[0].conversation_id, b[0].conversation_id);
    }

    #[test]
    fn whatsapp_status_receipt_is_zero_messages() {
        let payload = json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "metadata": {"phone_number_id": "108500"},
                        "statuses": [{"id": "wamid.3", "status": "delivered"}]
                    }
                }]
            }]
        });
        let msgs = normalize("biz1", Channel::Whatsapp, &payload).unwrap();
        assert!(msgs.is_empty());
    }

    #[test]
    fn whatsapp_missing_entry_is_invalid() {
        let err = normalize("biz1", Channel::Whatsapp, &json!({"object": "whatsapp"}));
        assert!(matches!(
            err,
            Err(NormalizeError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn whatsapp_image_message_gets_placeholder() {
        let payload = json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [{
                            "from": "15550001111",
                            "id": "wamid.4",
                            "type": "image"
                        }]
                    }
                }]
            }]
        });
        let msgs = normalize("biz1", Channel::Whatsapp, &payload).unwrap();
        assert_eq!(msgs[0].message_text, "[image]");
    }

    #[test]
    fn instagram_message_normalizes() {
        let payload = json!({
            "entry": [{
                "id": "17840001",
                "messaging": [{
                    "sender": {"id": "890123"},
                    "recipient": {"id": "17840001"},
                    "timestamp": 1693500000123_i64,
                    "message": {"mid": "mid.abc", "text": "do you do nails?"}
                }]
            }]
        });
        let msgs = normalize("biz1", Channel::Instagram, &payload).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].conversation_id, "instagram:biz1:890123");
        assert_eq!(msgs[0].metadata.provider_message_id.as_deref(), Some("mid.abc"));
        assert!(!msgs[0].metadata.is_echo);
    }

    #[test]
    fn instagram_echo_flag_survives() {
        let payload = json!({
            "entry": [{
                "id": "17840001",
                "messaging": [{
                    "sender": {"id": "17840001"},
                    "recipient": {"id": "890123"},
                    "timestamp": 1693500000123_i64,
                    "message": {"mid": "mid.echo", "text": "our own reply", "is_echo": true}
                }]
            }]
        });
        let msgs = normalize("biz1", Channel::Instagram, &payload).unwrap();
        assert!(msgs[0].metadata.is_echo);
    }

    #[test]
    fn instagram_echo_lands_on_the_customer_thread() {
        let payload = json!({
            "entry": [{
                "id": "17840001",
                "messaging": [{
                    "sender": {"id": "17840001"},
                    "recipient": {"id": "890123"},
                    "timestamp": 1693500000123_i64,
                    "message": {"mid": "mid.echo2", "text": "our own reply", "is_echo": true}
                }]
            }]
        });
        let msgs = normalize("biz1", Channel::Instagram, &payload).unwrap();
        // Keyed by the customer (the recipient of the echo), not by the
        // business account that sent it.
        assert_eq!(msgs[0].conversation_id, "instagram:biz1:890123");
        assert_eq!(msgs[0].sender_handle, "17840001");
    }

    #[test]
    fn instagram_read_receipt_is_zero_messages() {
        let payload = json!({
            "entry": [{
                "id": "17840001",
                "messaging": [{
                    "sender": {"id": "890123"},
                    "read": {"mid": "mid.abc"}
                }]
            }]
        });
        let msgs = normalize("biz1", Channel::Instagram, &payload).unwrap();
        assert!(msgs.is_empty());
    }

    #[test]
    fn instagram_missing_messaging_is_invalid() {
        let payload = json!({"entry": [{"id": "17840001"}]});
        assert!(normalize("biz1", Channel::Instagram, &payload).is_err());
    }
}
