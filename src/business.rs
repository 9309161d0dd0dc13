//! Business configuration consumed from the settings collaborator.
//!
//! The CRM settings UI owns these records; the pipeline only reads them.
//! Everything here is loaded fresh per call through [`BusinessDirectory`];
//! no process-wide credential cache.

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pipeline::types::Channel;

/// Preferred reply language for a business, or auto-detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguagePreference {
    En,
    Es,
    #[default]
    Auto,
}

/// One service the business offers, for price/duration answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceItem {
    pub name: String,
    pub price: Option<Decimal>,
    /// Duration in minutes.
    pub duration_min: Option<u32>,
}

/// Greeting rule: fires on a conversation's first inbound message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GreetingRule {
    pub enabled: bool,
    #[serde(default)]
    pub text: Option<String>,
}

/// Days/hours window inside `out_of_office`, parsed from settings JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HoursWindow {
    /// `"HH:MM"` local start.
    #[serde(default)]
    pub start: Option<String>,
    /// `"HH:MM"` local end. May be earlier than `start` (overnight wrap).
    #[serde(default)]
    pub end: Option<String>,
    /// Weekday numbers, Monday = 1 .. Sunday = 7. Empty means Mon–Fri.
    #[serde(default)]
    pub days: Vec<u8>,
}

/// Out-of-office rule: fires outside the configured hours window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutOfOfficeRule {
    pub enabled: bool,
    #[serde(default)]
    pub text: Option<String>,
    /// IANA timezone name, e.g. `"America/Mexico_City"`.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub hours: HoursWindow,
}

/// Fallback rule: fires when nothing more specific applies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FallbackRule {
    #[serde(default)]
    pub text: Option<String>,
}

/// Structured auto-reply rules, stored as JSON on the business record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoReplyRules {
    pub enabled: bool,
    #[serde(default)]
    pub greeting: GreetingRule,
    #[serde(default)]
    pub out_of_office: OutOfOfficeRule,
    #[serde(default)]
    pub fallback: FallbackRule,
}

/// Read-only business configuration, one per tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessContext {
    pub business_id: String,
    pub name: String,
    #[serde(default)]
    pub language_preference: LanguagePreference,
    /// Free-text office hours (`"9:00am - 6:00pm"`), the fallback when
    /// `auto_reply_rules.out_of_office.hours` is not structured.
    #[serde(default)]
    pub office_hours: Option<String>,
    /// Generic greeting message, used when rule text is not overridden.
    #[serde(default)]
    pub greeting_message: Option<String>,
    #[serde(default)]
    pub auto_reply_rules: AutoReplyRules,
    #[serde(default)]
    pub ai_reply_enabled: bool,
    #[serde(default)]
    pub services: Vec<ServiceItem>,
}

/// Per-business credentials for one channel's send API.
#[derive(Clone)]
pub struct ChannelCredentials {
    pub access_token: SecretString,
    /// WhatsApp phone-number id or Instagram business-account id.
    pub sender_id: String,
}

impl std::fmt::Debug for ChannelCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelCredentials")
            .field("access_token", &"<redacted>")
            .field("sender_id", &self.sender_id)
            .finish()
    }
}

/// Settings-collaborator interface the pipeline depends on.
///
/// The concrete implementation lives with the CRM; tests use an in-memory
/// directory.
#[async_trait]
pub trait BusinessDirectory: Send + Sync {
    /// Load a business's context. Fails with `UnknownBusiness` when the id
    /// does not resolve.
    async fn business(&self, business_id: &str) -> Result<BusinessContext, ConfigError>;

    /// Load a business's credentials for one channel, or `None` when the
    /// channel is not connected.
    async fn credentials(
        &self,
        business_id: &str,
        channel: Channel,
    ) -> Result<Option<ChannelCredentials>, ConfigError>;
}

/// In-memory directory for tests and the dev simulate surface.
#[derive(Default)]
pub struct StaticDirectory {
    businesses: std::collections::HashMap<String, BusinessContext>,
    credentials: std::collections::HashMap<(String, Channel), ChannelCredentials>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_business(mut self, ctx: BusinessContext) -> Self {
        self.businesses.insert(ctx.business_id.clone(), ctx);
        self
    }

    pub fn with_credentials(
        mut self,
        business_id: &str,
        channel: Channel,
        creds: ChannelCredentials,
    ) -> Self {
        self.credentials
            .insert((business_id.to_string(), channel), creds);
        self
    }
}

#[async_trait]
impl BusinessDirectory for StaticDirectory {
    async fn business(&self, business_id: &str) -> Result<BusinessContext, ConfigError> {
        self.businesses
            .get(business_id)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownBusiness(business_id.to_string()))
    }

    async fn credentials(
        &self,
        business_id: &str,
        channel: Channel,
    ) -> Result<Option<ChannelCredentials>, ConfigError> {
        Ok(self
            .credentials
            .get(&(business_id.to_string(), channel))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_reply_rules_parse_from_settings_json() {
        let json = r#"{
            "enabled": true,
            "greeting": {"enabled": true, "text": "Welcome!"},
            "out_of_office": {
                "enabled": true,
                "timezone": "America/New_York",
                "hours": {"start": "09:00", "end": "18:00", "days": [1,2,3,4,5]}
            },
            "fallback": {"text": "We'll get back to you."}
        }"#;
        let rules: AutoReplyRules = serde_json::from_str(json).unwrap();
        assert!(rules.enabled);
        assert_eq!(rules.greeting.text.as_deref(), Some("Welcome!"));
        assert_eq!(rules.out_of_office.hours.start.as_deref(), Some("09:00"));
        assert_eq!(rules.out_of_office.hours.days, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn partial_rules_json_fills_defaults() {
        let rules: AutoReplyRules = serde_json::from_str(r#"{"enabled": false}"#).unwrap();
        assert!(!rules.enabled);
        assert!(!rules.greeting.enabled);
        assert!(rules.out_of_office.hours.days.is_empty());
    }

    #[test]
    fn service_price_serializes_as_string() {
        let item = ServiceItem {
            name: "Full detail".into(),
            price: Some(rust_decimal_macros::dec!(150.00)),
            duration_min: Some(90),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert!(json["price"].is_string());
        assert!(json["price"].as_str().unwrap().starts_with("150"));
    }

    #[test]
    fn credentials_debug_redacts_token() {
        let creds = ChannelCredentials {
            access_token: SecretString::from("super-secret"),
            sender_id: "12345".into(),
        };
        let debug = format!("{creds:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("12345"));
    }
}
