//! Deterministic stand-in for a hosted model.
//!
//! Each agent follows its prompt routine with simple keyword matching, which
//! is enough to drive every tool and handoff without network access. Used by
//! the `offline` provider and throughout the test suite.

use async_trait::async_trait;
use serde_json::{json, Value};

use concierge_core::domain::session::TranscriptItem;

use super::{ModelClient, ModelError, ModelRequest, ModelResponse, ToolCallRequest};
use crate::registry::AgentKind;
use crate::tools::is_seat_number;

const TRIAGE_GREETING: &str = "Welcome! I can help with seat changes, flight status, cancellations, and questions about baggage or the aircraft. What can I do for you?";
const TRIAGE_RETRY: &str = "I can help with that, but I need to route you from here first. Could you ask once more so I can connect you with the right specialist?";
const NOT_AVAILABLE: &str = "not available";

#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineModel;

#[async_trait]
impl ModelClient for OfflineModel {
    fn name(&self) -> &str {
        "offline"
    }

    async fn respond(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let message = request.latest_user_message().unwrap_or_default();
        let turn = Turn { message, lowered: message.to_lowercase(), since: request.since_latest_user_message() };

        Ok(match request.agent {
            AgentKind::Triage => turn.triage(),
            AgentKind::Faq => turn.faq(),
            AgentKind::SeatBooking => turn.seat_booking(),
            AgentKind::FlightStatus => turn.flight_status(),
            AgentKind::Cancellation => turn.cancellation(),
        })
    }
}

struct Turn<'a> {
    message: &'a str,
    lowered: String,
    since: &'a [TranscriptItem],
}

impl Turn<'_> {
    fn triage(&self) -> ModelResponse {
        if self.handoff_was_rejected() {
            return ModelResponse::Text(TRIAGE_RETRY.to_string());
        }

        match topic_for(&self.lowered) {
            Some(kind) if kind != AgentKind::Triage => self.handoff(kind),
            _ => ModelResponse::Text(TRIAGE_GREETING.to_string()),
        }
    }

    fn faq(&self) -> ModelResponse {
        if let Some(answer) = self.result_of("baggage_tool").or_else(|| self.result_of("faq_lookup_tool"))
        {
            return ModelResponse::Text(value_text(answer));
        }
        if let Some(response) = self.hand_back_unless(AgentKind::Faq) {
            return response;
        }

        if self.lowered.contains("fee") || self.lowered.contains("allowance") {
            self.call("baggage_tool", json!({ "query": self.message }))
        } else {
            self.call("faq_lookup_tool", json!({ "question": self.message }))
        }
    }

    fn seat_booking(&self) -> ModelResponse {
        if let Some(result) = self.result_of("update_seat") {
            return ModelResponse::Text(value_text(result));
        }
        if self.result_of("display_seat_map").is_some() {
            return ModelResponse::Text(
                "Pick your preferred seat on the map and I'll update your booking.".to_string(),
            );
        }

        let requested_seat = find_seat(self.message);
        if requested_seat.is_none() {
            if let Some(response) = self.hand_back_unless(AgentKind::SeatBooking) {
                return response;
            }
        }

        if let Some(details) = self.result_of("booking_details") {
            let confirmation = field(details, "confirmation_number");
            let current_seat = field(details, "seat_number");
            return match requested_seat {
                Some(_) if confirmation == NOT_AVAILABLE => ModelResponse::Text(
                    "What is your confirmation number? I need it before I can change your seat."
                        .to_string(),
                ),
                Some(seat) => self.call(
                    "update_seat",
                    json!({ "confirmation_number": confirmation, "new_seat": seat }),
                ),
                None => ModelResponse::Text(format!(
                    "Your current seat is {current_seat} on confirmation number {confirmation}. Tell me the seat you would like, or ask for the seat map."
                )),
            };
        }

        if requested_seat.is_none() && self.wants_seat_map() {
            return self.call("display_seat_map", json!({}));
        }

        self.call("booking_details", json!({}))
    }

    fn flight_status(&self) -> ModelResponse {
        if let Some(status) = self.result_of("flight_status_tool") {
            return ModelResponse::Text(value_text(status));
        }
        if let Some(response) = self.hand_back_unless(AgentKind::FlightStatus) {
            return response;
        }

        if let Some(flight) = find_flight_number(self.message) {
            return self.call("flight_status_tool", json!({ "flight_number": flight }));
        }

        match self.result_of("booking_details") {
            Some(details) if field(details, "flight_number") == NOT_AVAILABLE => {
                ModelResponse::Text(
                    "I couldn't find a flight on your booking. What is your flight number?"
                        .to_string(),
                )
            }
            Some(details) => self.call(
                "flight_status_tool",
                json!({ "flight_number": field(details, "flight_number") }),
            ),
            None => self.call("booking_details", json!({})),
        }
    }

    fn cancellation(&self) -> ModelResponse {
        if let Some(result) = self.result_of("cancel_flight") {
            if result.get("error").is_some() {
                return ModelResponse::Text(
                    "I need your flight number before I can cancel anything. Which flight are you on?"
                        .to_string(),
                );
            }
            return ModelResponse::Text(value_text(result));
        }
        if let Some(response) = self.hand_back_unless(AgentKind::Cancellation) {
            return response;
        }

        if self.confirms() {
            return self.call("cancel_flight", json!({}));
        }

        match self.result_of("booking_details") {
            Some(details) => ModelResponse::Text(format!(
                "I can cancel flight {} on confirmation number {}. Should I go ahead? Reply yes to confirm.",
                field(details, "flight_number"),
                field(details, "confirmation_number"),
            )),
            None => self.call("booking_details", json!({})),
        }
    }

    /// Hands the customer back to triage when the message belongs to a
    /// different specialist.
    fn hand_back_unless(&self, own: AgentKind) -> Option<ModelResponse> {
        match topic_for(&self.lowered) {
            Some(kind) if kind != own => Some(self.handoff(AgentKind::Triage)),
            _ => None,
        }
    }

    fn handoff(&self, target: AgentKind) -> ModelResponse {
        ModelResponse::Handoff { call_id: self.call_id(), target: target.name().to_string() }
    }

    fn call(&self, name: &str, arguments: Value) -> ModelResponse {
        ModelResponse::ToolCalls(vec![ToolCallRequest {
            call_id: self.call_id(),
            name: name.to_string(),
            arguments,
        }])
    }

    fn call_id(&self) -> String {
        format!("offline-call-{}", self.since.len())
    }

    fn result_of(&self, tool: &str) -> Option<&Value> {
        self.since.iter().rev().find_map(|item| match item {
            TranscriptItem::ToolResult { name, output, .. } if name == tool => Some(output),
            _ => None,
        })
    }

    fn handoff_was_rejected(&self) -> bool {
        self.since.iter().any(|item| {
            matches!(item, TranscriptItem::ToolResult { name, .. } if name.starts_with("transfer_to_"))
        })
    }

    fn wants_seat_map(&self) -> bool {
        ["map", "choose", "pick", "select", "change", "switch", "another"]
            .iter()
            .any(|word| self.lowered.contains(word))
    }

    fn confirms(&self) -> bool {
        let words: Vec<&str> = self
            .lowered
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .collect();
        ["yes", "yeah", "yep", "confirm", "confirmed", "sure"].iter().any(|word| words.contains(word))
            || self.lowered.contains("go ahead")
    }
}

/// Specialist responsible for a message, if any keyword points at one.
fn topic_for(lowered: &str) -> Option<AgentKind> {
    const CANCELLATION: &[&str] = &["cancel", "refund"];
    const FAQ: &[&str] =
        &["bag", "luggage", "wifi", "wi-fi", "plane", "aircraft", "allowance", "carry-on", "fee"];
    const FLIGHT_STATUS: &[&str] =
        &["status", "delay", "on time", "gate", "depart", "arriv", "late", "landing"];
    const SEAT_BOOKING: &[&str] = &["seat", "aisle", "window", "row"];

    let matches = |keywords: &[&str]| keywords.iter().any(|keyword| lowered.contains(keyword));

    if matches(CANCELLATION) {
        Some(AgentKind::Cancellation)
    } else if matches(FAQ) {
        Some(AgentKind::Faq)
    } else if matches(FLIGHT_STATUS) {
        Some(AgentKind::FlightStatus)
    } else if matches(SEAT_BOOKING) {
        Some(AgentKind::SeatBooking)
    } else {
        None
    }
}

fn words(message: &str) -> impl Iterator<Item = &str> {
    message
        .split_whitespace()
        .map(|word| word.trim_matches(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '-')))
        .filter(|word| !word.is_empty())
}

fn find_seat(message: &str) -> Option<String> {
    words(message).map(str::to_ascii_uppercase).find(|word| is_seat_number(word))
}

/// Flight designators such as `FL123` or `FLT-456`.
fn find_flight_number(message: &str) -> Option<String> {
    words(message).map(str::to_ascii_uppercase).find(|word| {
        let prefix: String = word.chars().take_while(char::is_ascii_alphabetic).collect();
        let rest = word[prefix.len()..].trim_start_matches('-');
        (2..=3).contains(&prefix.len())
            && (1..=4).contains(&rest.len())
            && rest.chars().all(|ch| ch.is_ascii_digit())
    })
}

fn field<'a>(details: &'a Value, name: &str) -> &'a str {
    details.get(name).and_then(Value::as_str).unwrap_or(NOT_AVAILABLE)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use concierge_core::domain::session::TranscriptItem;

    use super::{find_flight_number, find_seat, topic_for, OfflineModel};
    use crate::llm::{ModelClient, ModelRequest, ModelResponse};
    use crate::registry::AgentKind;

    fn request(agent: AgentKind, transcript: Vec<TranscriptItem>) -> ModelRequest {
        ModelRequest {
            agent,
            system_prompt: String::new(),
            transcript,
            tools: Vec::new(),
            handoffs: Vec::new(),
        }
    }

    fn user(content: &str) -> TranscriptItem {
        TranscriptItem::User { content: content.to_string() }
    }

    fn result(name: &str, output: serde_json::Value) -> TranscriptItem {
        TranscriptItem::ToolResult {
            agent: "test".to_string(),
            call_id: "call".to_string(),
            name: name.to_string(),
            output,
        }
    }

    #[test]
    fn topics_route_by_keyword() {
        assert_eq!(topic_for("what is my seat?"), Some(AgentKind::SeatBooking));
        assert_eq!(topic_for("how many seats are on the plane?"), Some(AgentKind::Faq));
        assert_eq!(topic_for("is my flight delayed?"), Some(AgentKind::FlightStatus));
        assert_eq!(topic_for("please cancel my trip"), Some(AgentKind::Cancellation));
        assert_eq!(topic_for("hello there"), None);
    }

    #[test]
    fn tokens_are_extracted_from_free_text() {
        assert_eq!(find_seat("Move me to 23c, please"), Some("23C".to_string()));
        assert_eq!(find_seat("What is my seat?"), None);
        assert_eq!(find_flight_number("Status of FL123?"), Some("FL123".to_string()));
        assert_eq!(find_flight_number("flight FLT-456 please"), Some("FLT-456".to_string()));
        assert_eq!(find_flight_number("seat 12A"), None);
    }

    #[tokio::test]
    async fn triage_hands_off_to_specialist() {
        let response = OfflineModel
            .respond(&request(AgentKind::Triage, vec![user("What is my seat?")]))
            .await
            .expect("respond");

        assert!(matches!(
            response,
            ModelResponse::Handoff { ref target, .. } if target == "seat_booking_agent"
        ));
    }

    #[tokio::test]
    async fn seat_booking_reads_details_then_answers() {
        let first = OfflineModel
            .respond(&request(AgentKind::SeatBooking, vec![user("What is my seat?")]))
            .await
            .expect("first step");
        assert!(matches!(
            first,
            ModelResponse::ToolCalls(ref calls) if calls[0].name == "booking_details"
        ));

        let second = OfflineModel
            .respond(&request(
                AgentKind::SeatBooking,
                vec![
                    user("What is my seat?"),
                    result(
                        "booking_details",
                        json!({ "seat_number": "12A", "confirmation_number": "ABC123" }),
                    ),
                ],
            ))
            .await
            .expect("second step");
        assert!(matches!(second, ModelResponse::Text(ref text) if text.contains("12A")));
    }

    #[tokio::test]
    async fn specialist_returns_unrelated_requests_to_triage() {
        let response = OfflineModel
            .respond(&request(AgentKind::SeatBooking, vec![user("Is there wifi on board?")]))
            .await
            .expect("respond");

        assert!(matches!(
            response,
            ModelResponse::Handoff { ref target, .. } if target == "triage_agent"
        ));
    }

    #[tokio::test]
    async fn cancellation_waits_for_confirmation() {
        let ask = OfflineModel
            .respond(&request(
                AgentKind::Cancellation,
                vec![
                    user("I want to cancel my flight"),
                    result(
                        "booking_details",
                        json!({ "flight_number": "FL123", "confirmation_number": "ABC123" }),
                    ),
                ],
            ))
            .await
            .expect("ask");
        assert!(matches!(ask, ModelResponse::Text(ref text) if text.contains("FL123")));

        let confirm = OfflineModel
            .respond(&request(AgentKind::Cancellation, vec![user("Yes, please cancel it")]))
            .await
            .expect("confirm");
        assert!(matches!(
            confirm,
            ModelResponse::ToolCalls(ref calls) if calls[0].name == "cancel_flight"
        ));
    }
}
