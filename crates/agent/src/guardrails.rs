use serde::{Deserialize, Serialize};

use concierge_core::domain::event::GuardrailCheck;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailKind {
    Relevance,
    Jailbreak,
}

impl GuardrailKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Relevance => "relevance_guardrail",
            Self::Jailbreak => "jailbreak_guardrail",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [Self::Relevance, Self::Jailbreak].into_iter().find(|kind| kind.name() == name)
    }

    /// Reply shown to the customer in place of the blocked answer.
    pub fn refusal_message(&self) -> &'static str {
        match self {
            Self::Relevance => {
                "Sorry, I can only answer questions related to airline travel, such as bookings, seats, flight status, baggage, and cancellations."
            }
            Self::Jailbreak => {
                "Sorry, I can't help with that request. I can assist with your flight, seat, baggage, or booking questions."
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailVerdict {
    pub passed: bool,
    pub reasoning: String,
}

impl GuardrailVerdict {
    fn pass(reasoning: impl Into<String>) -> Self {
        Self { passed: true, reasoning: reasoning.into() }
    }

    fn trip(reasoning: impl Into<String>) -> Self {
        Self { passed: false, reasoning: reasoning.into() }
    }
}

/// A screening step run before the active agent is invoked. Implementations
/// only see the candidate text; they never touch conversation context.
pub trait Guardrail: Send + Sync {
    fn kind(&self) -> GuardrailKind;
    fn evaluate(&self, input: &str) -> GuardrailVerdict;
}

const AIRLINE_VOCABULARY: &[&str] = &[
    "flight", "fly", "flying", "plane", "aircraft", "airline", "airport", "seat", "aisle",
    "window", "row", "exit", "economy", "business", "bag", "baggage", "luggage", "carry-on",
    "checked", "fee", "allowance", "wifi", "wi-fi", "cancel", "cancellation", "refund", "booking",
    "book", "reservation", "confirmation", "ticket", "trip", "travel", "gate", "boarding",
    "board", "depart", "departure", "arrival", "arrive", "delay", "delayed", "status", "on-time",
    "schedule", "passenger", "account", "check-in", "upgrade", "change", "map", "meal",
];

const CONVERSATIONAL: &[&str] = &[
    "hi", "hello", "hey", "thanks", "thank", "yes", "yeah", "yep", "no", "nope", "ok", "okay",
    "sure", "please", "confirm", "confirmed", "correct", "right", "bye", "goodbye", "help",
    "great", "perfect", "cool",
];

#[derive(Clone, Copy, Debug, Default)]
pub struct RelevanceGuardrail;

impl Guardrail for RelevanceGuardrail {
    fn kind(&self) -> GuardrailKind {
        GuardrailKind::Relevance
    }

    fn evaluate(&self, input: &str) -> GuardrailVerdict {
        let tokens = tokenize(input);
        if tokens.is_empty() {
            return GuardrailVerdict::pass("empty input carries no off-topic content");
        }

        if let Some(term) = tokens.iter().find(|token| AIRLINE_VOCABULARY.contains(&token.as_str())) {
            return GuardrailVerdict::pass(format!("mentions airline topic `{term}`"));
        }

        if let Some(token) = tokens.iter().find(|token| looks_like_booking_reference(token)) {
            return GuardrailVerdict::pass(format!("references booking data `{token}`"));
        }

        if tokens.iter().all(|token| CONVERSATIONAL.contains(&token.as_str()) || is_filler(token)) {
            return GuardrailVerdict::pass("conversational reply within an airline conversation");
        }

        GuardrailVerdict::trip("message is not related to airline customer service")
    }
}

const JAILBREAK_PHRASES: &[&str] = &[
    "ignore your instructions",
    "ignore previous instructions",
    "ignore all previous",
    "ignore the above",
    "ignore all instructions",
    "disregard your instructions",
    "disregard previous",
    "system prompt",
    "your prompt",
    "developer mode",
    "jailbreak",
    "pretend you are",
    "pretend to be",
    "act as",
    "you are now",
    "bypass",
    "override your",
    "drop table",
];

#[derive(Clone, Copy, Debug, Default)]
pub struct JailbreakGuardrail;

impl Guardrail for JailbreakGuardrail {
    fn kind(&self) -> GuardrailKind {
        GuardrailKind::Jailbreak
    }

    fn evaluate(&self, input: &str) -> GuardrailVerdict {
        let normalized = format!(" {} ", tokenize(input).join(" "));

        if let Some(phrase) =
            JAILBREAK_PHRASES.iter().find(|phrase| normalized.contains(&format!(" {phrase} ")))
        {
            return GuardrailVerdict::trip(format!(
                "attempt to override agent instructions (`{phrase}`)"
            ));
        }

        let mentions_instructions =
            normalized.contains("instruction") || normalized.contains("rules");
        let asks_to_drop_them = [" ignore ", " forget ", " reveal ", " disregard "]
            .iter()
            .any(|verb| normalized.contains(verb));
        if mentions_instructions && asks_to_drop_them {
            return GuardrailVerdict::trip("asks the agent to reveal or drop its instructions");
        }

        GuardrailVerdict::pass("no attempt to override instructions detected")
    }
}

/// Result of screening one input against an agent's guardrail list.
#[derive(Clone, Debug, Default)]
pub struct GuardrailOutcome {
    /// Every evaluation that ran, in order, ending with the trip if any.
    pub checks: Vec<GuardrailCheck>,
}

impl GuardrailOutcome {
    pub fn tripped(&self) -> Option<&GuardrailCheck> {
        self.checks.iter().find(|check| !check.passed)
    }

    pub fn passed(&self) -> impl Iterator<Item = &GuardrailCheck> {
        self.checks.iter().filter(|check| check.passed)
    }
}

pub struct GuardrailPipeline {
    guardrails: Vec<Box<dyn Guardrail>>,
}

impl Default for GuardrailPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl GuardrailPipeline {
    pub fn standard() -> Self {
        Self { guardrails: vec![Box::new(RelevanceGuardrail), Box::new(JailbreakGuardrail)] }
    }

    /// Runs the requested guardrails in the given order and stops at the
    /// first one that fails. Kinds without a registered evaluator are skipped.
    pub fn evaluate(&self, kinds: &[GuardrailKind], input: &str) -> GuardrailOutcome {
        let mut outcome = GuardrailOutcome::default();

        for kind in kinds {
            let Some(guardrail) = self.guardrails.iter().find(|guardrail| guardrail.kind() == *kind)
            else {
                continue;
            };

            let verdict = guardrail.evaluate(input);
            let passed = verdict.passed;
            outcome.checks.push(GuardrailCheck::new(kind.name(), input, verdict.reasoning, passed));
            if !passed {
                break;
            }
        }

        outcome
    }
}

fn tokenize(input: &str) -> Vec<String> {
    input
        .split(|ch: char| !(ch.is_alphanumeric() || ch == '-'))
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn is_filler(token: &str) -> bool {
    matches!(token, "a" | "an" | "the" | "it" | "that" | "is" | "do" | "so" | "you" | "i" | "me")
}

/// Seat numbers like `23c`, flight numbers like `fl123`, or a six character
/// confirmation code.
fn looks_like_booking_reference(token: &str) -> bool {
    let digits = token.chars().filter(char::is_ascii_digit).count();
    let letters = token.chars().filter(char::is_ascii_alphabetic).count();
    digits > 0 && letters > 0 && token.len() <= 8
}
