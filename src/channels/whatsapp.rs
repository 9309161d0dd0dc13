//! WhatsApp Cloud API send client.

use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::business::ChannelCredentials;
use crate::error::DispatchError;

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v21.0";

/// Shape of a successful Cloud API send response.
#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

/// WhatsApp Cloud API client. Holds no credentials; those arrive per
/// call, loaded fresh for the business being served.
pub struct WhatsAppClient {
    client: reqwest::Client,
    base_url: String,
}

impl WhatsAppClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: GRAPH_API_BASE.to_string(),
        }
    }

    /// Point the client at a different API base (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Send a text message. Returns the provider-assigned message id.
    pub async fn send_text(
        &self,
        creds: &ChannelCredentials,
        to: &str,
        body: &str,
    ) -> Result<String, DispatchError> {
        let url = format!("{}/{}/messages", self.base_url, creds.sender_id);
        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": {"body": body},
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(creds.access_token.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| DispatchError::Provider {
                channel: "whatsapp".into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DispatchError::Provider {
                channel: "whatsapp".into(),
                reason: format!("HTTP {status}: {body}"),
            });
        }

        let sent: SendResponse = resp.json().await.map_err(|e| DispatchError::Provider {
            channel: "whatsapp".into(),
            reason: format!("invalid send response: {e}"),
        })?;

        sent.messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| DispatchError::Provider {
                channel: "whatsapp".into(),
                reason: "send response carried no message id".into(),
            })
    }
}
