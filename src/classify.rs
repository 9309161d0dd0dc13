//! Intent and language classification.
//!
//! Pure keyword-substring matching; no model call, no failure mode.
//! A message can match several intents; callers use
//! [`Classification::primary_intent`] when they need exactly one
//! (escalation-first priority order).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Customer intent categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Pricing,
    Booking,
    Services,
    Hours,
    Complaint,
}

impl Intent {
    /// Escalation-first priority: complaints beat everything, bookings
    /// come last because they get their own hand-off path.
    fn priority(&self) -> u8 {
        match self {
            Intent::Complaint => 5,
            Intent::Hours => 4,
            Intent::Services => 3,
            Intent::Pricing => 2,
            Intent::Booking => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Pricing => "pricing",
            Intent::Booking => "booking",
            Intent::Services => "services",
            Intent::Hours => "hours",
            Intent::Complaint => "complaint",
        }
    }
}

/// Detected message language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Es,
}

/// Classifier output: zero or more intents plus a language guess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub intents: BTreeSet<Intent>,
    pub language: Language,
}

impl Classification {
    /// Highest-priority matched intent, if any.
    pub fn primary_intent(&self) -> Option<Intent> {
        self.intents.iter().max_by_key(|i| i.priority()).copied()
    }

    pub fn has(&self, intent: Intent) -> bool {
        self.intents.contains(&intent)
    }
}

/// Bilingual keyword vocabulary per intent. Substring matches against the
/// lowercased message.
const PRICING_KEYWORDS: &[&str] = &[
    "price", "pricing", "cost", "how much", "quote", "rate", "precio", "cuánto", "cuanto",
    "costo", "cotiza", "tarifa",
];

const BOOKING_KEYWORDS: &[&str] = &[
    "book", "booking", "appointment", "schedule", "reserve", "available", "availability",
    "cita", "reservar", "agendar", "turno", "disponib",
];

const SERVICES_KEYWORDS: &[&str] = &[
    "service", "services", "what do you do", "do you offer", "do you do", "servicio",
    "qué hacen", "que hacen", "ofrecen",
];

const HOURS_KEYWORDS: &[&str] = &[
    "open", "close", "hours", "when are you", "what time", "horario", "abierto", "cierran",
    "a qué hora", "a que hora",
];

const COMPLAINT_KEYWORDS: &[&str] = &[
    "complaint", "complain", "refund", "terrible", "awful", "disappointed", "unacceptable",
    "manager", "queja", "reclamo", "reembolso", "pésimo", "pesimo", "inaceptable",
];

/// Hint words for language detection. English wins ties by default.
const ES_HINTS: &[&str] = &[
    "hola", "gracias", "buenos", "buenas", "por favor", "cuánto", "cuanto", "precio",
    "cita", "horario", "quiero", "necesito", "dónde", "donde", "cuándo", "cuando",
    "tienen", "ustedes", "señor", "está",
];

const EN_HINTS: &[&str] = &[
    "hello", "hi ", "hey", "thanks", "thank you", "please", "how much", "price",
    "appointment", "when", "where", "the ", "you ", "i need", "i want", "do you",
];

/// Classify a message's intents and language.
///
/// Total and deterministic: any input produces a classification.
pub fn classify(text: &str) -> Classification {
    let lower = text.to_lowercase();

    let mut intents = BTreeSet::new();
    let vocab: &[(Intent, &[&str])] = &[
        (Intent::Pricing, PRICING_KEYWORDS),
        (Intent::Booking, BOOKING_KEYWORDS),
        (Intent::Services, SERVICES_KEYWORDS),
        (Intent::Hours, HOURS_KEYWORDS),
        (Intent::Complaint, COMPLAINT_KEYWORDS),
    ];
    for (intent, keywords) in vocab {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            intents.insert(*intent);
        }
    }

    let es_hits = ES_HINTS.iter().filter(|h| lower.contains(*h)).count();
    let en_hits = EN_HINTS.iter().filter(|h| lower.contains(*h)).count();
    let language = if es_hits > en_hits {
        Language::Es
    } else {
        Language::En
    };

    Classification { intents, language }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pricing_intent_in_english() {
        let c = classify("Hi, how much is a full detail?");
        assert!(c.has(Intent::Pricing));
        assert_eq!(c.language, Language::En);
    }

    #[test]
    fn booking_intent_in_spanish() {
        let c = classify("Hola, quiero agendar una cita para mañana");
        assert!(c.has(Intent::Booking));
        assert_eq!(c.language, Language::Es);
    }

    #[test]
    fn multiple_intents_match() {
        let c = classify("What are your hours and how much does a wash cost?");
        assert!(c.has(Intent::Hours));
        assert!(c.has(Intent::Pricing));
    }

    #[test]
    fn complaint_outranks_everything() {
        let c = classify("I want a refund, how much did I even pay for this booking");
        assert!(c.has(Intent::Complaint));
        assert_eq!(c.primary_intent(), Some(Intent::Complaint));
    }

    #[test]
    fn hours_outranks_pricing() {
        let c = classify("what time do you open and what's the price");
        assert_eq!(c.primary_intent(), Some(Intent::Hours));
    }

    #[test]
    fn no_intent_is_fine() {
        let c = classify("ok");
        assert!(c.intents.is_empty());
        assert_eq!(c.primary_intent(), None);
    }

    #[test]
    fn defaults_to_english_without_hints() {
        let c = classify("1234");
        assert_eq!(c.language, Language::En);
    }

    #[test]
    fn deterministic() {
        let a = classify("Hola, precio?");
        let b = classify("Hola, precio?");
        assert_eq!(a.intents, b.intents);
        assert_eq!(a.language, b.language);
    }
}
