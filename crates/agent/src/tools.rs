use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use concierge_core::domain::context::{ContextField, ConversationContext};

/// Token returned by the seat map tool; the caller opens the seat picker.
pub const SEAT_MAP_SENTINEL: &str = "DISPLAY_SEAT_MAP";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCapability {
    Pure,
    ReadContext,
    WriteContext,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ToolOutput {
    Text(String),
    Json(Value),
    /// Passed through to the caller untouched as a user-visible message.
    Sentinel(&'static str),
}

impl ToolOutput {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.clone()),
            Self::Json(value) => value.clone(),
            Self::Sentinel(token) => Value::String((*token).to_string()),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("required context field `{field}` is not set")]
    PreconditionMissing { field: ContextField },
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: String, reason: String },
    #[error("tool `{0}` is not available")]
    UnknownTool(String),
    #[error("tool `{tool}` is not permitted to write `{field}`")]
    NotPermitted { tool: String, field: ContextField },
}

impl ToolError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::PreconditionMissing { .. } => "precondition_missing",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::UnknownTool(_) => "unknown_tool",
            Self::NotPermitted { .. } => "not_permitted",
        }
    }

    /// Shape handed back to the model so the agent can recover.
    pub fn to_value(&self) -> Value {
        json!({ "error": self.code(), "message": self.to_string() })
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn capability(&self) -> ToolCapability;

    /// Context fields the tool may see. Declared writes are visible too.
    fn reads(&self) -> &'static [ContextField] {
        &[]
    }

    fn writes(&self) -> &'static [ContextField] {
        &[]
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {}, "required": [] })
    }

    async fn execute(
        &self,
        args: &Value,
        context: &mut ConversationContext,
    ) -> Result<ToolOutput, ToolError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn standard() -> Self {
        let mut registry = Self::default();
        registry.register(FaqLookupTool);
        registry.register(BaggageTool);
        registry.register(FlightStatusTool);
        registry.register(BookingDetailsTool);
        registry.register(UpdateSeatTool);
        registry.register(DisplaySeatMapTool);
        registry.register(CancelFlightTool);
        registry
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn capability(&self, name: &str) -> Option<ToolCapability> {
        self.tools.get(name).map(|tool| tool.capability())
    }

    pub fn schemas(&self, names: &[&str]) -> Vec<ToolSchema> {
        names
            .iter()
            .filter_map(|name| self.tools.get(*name))
            .map(|tool| ToolSchema {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Runs `name` against a view of `context` holding only the fields the
    /// tool declared. Declared writes are copied back on success; on any
    /// failure `context` is untouched.
    pub async fn invoke(
        &self,
        name: &str,
        args: &Value,
        context: &mut ConversationContext,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self.tools.get(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let visible: Vec<ContextField> =
            tool.reads().iter().chain(tool.writes()).copied().collect();
        let before = context.projected(&visible);
        let mut view = before.clone();

        let output = tool.execute(args, &mut view).await?;

        let changed = view.changed_fields(&before);
        if let Some(field) = changed.iter().find(|field| !tool.writes().contains(field)) {
            return Err(ToolError::NotPermitted { tool: name.to_string(), field: *field });
        }
        for field in changed {
            if let Some(value) = view.get(field) {
                context.set(field, value);
            }
        }

        Ok(output)
    }
}

fn required_str<'a>(args: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    match args.get(name) {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value.trim()),
        Some(Value::String(_)) => Err(ToolError::InvalidArgument {
            name: name.to_string(),
            reason: "must not be empty".to_string(),
        }),
        Some(_) => Err(ToolError::InvalidArgument {
            name: name.to_string(),
            reason: "must be a string".to_string(),
        }),
        None => Err(ToolError::InvalidArgument {
            name: name.to_string(),
            reason: "is required".to_string(),
        }),
    }
}

fn string_parameter(name: &str, description: &str) -> Value {
    json!({
        "type": "object",
        "properties": { name: { "type": "string", "description": description } },
        "required": [name],
    })
}

pub struct FaqLookupTool;

#[async_trait]
impl Tool for FaqLookupTool {
    fn name(&self) -> &'static str {
        "faq_lookup_tool"
    }

    fn description(&self) -> &'static str {
        "Lookup answers to frequently asked questions."
    }

    fn capability(&self) -> ToolCapability {
        ToolCapability::Pure
    }

    fn parameters(&self) -> Value {
        string_parameter("question", "The question to look up.")
    }

    async fn execute(
        &self,
        args: &Value,
        _context: &mut ConversationContext,
    ) -> Result<ToolOutput, ToolError> {
        let question = required_str(args, "question")?.to_lowercase();

        let answer = if question.contains("bag") || question.contains("baggage") {
            "You are allowed to bring one bag on the plane. It must be under 50 pounds and 22 inches x 14 inches x 9 inches."
        } else if question.contains("seats") || question.contains("plane") {
            "There are 120 seats on the plane. There are 22 business class seats and 98 economy seats. Exit rows are rows 4 and 16. Rows 5-8 are Economy Plus, with extra legroom."
        } else if question.contains("wifi") {
            "We have free wifi on the plane, join Airline-Wifi"
        } else {
            "I'm sorry, I don't know the answer to that question."
        };

        Ok(ToolOutput::Text(answer.to_string()))
    }
}

pub struct BaggageTool;

#[async_trait]
impl Tool for BaggageTool {
    fn name(&self) -> &'static str {
        "baggage_tool"
    }

    fn description(&self) -> &'static str {
        "Lookup baggage allowance and fees."
    }

    fn capability(&self) -> ToolCapability {
        ToolCapability::Pure
    }

    fn parameters(&self) -> Value {
        string_parameter("query", "The baggage-related question to answer.")
    }

    async fn execute(
        &self,
        args: &Value,
        _context: &mut ConversationContext,
    ) -> Result<ToolOutput, ToolError> {
        let query = required_str(args, "query")?.to_lowercase();

        let answer = if query.contains("fee") {
            "Overweight bag fee is $75."
        } else if query.contains("allowance") {
            "One carry-on and one checked bag (up to 50 lbs) are included."
        } else {
            "Please provide details about your baggage inquiry."
        };

        Ok(ToolOutput::Text(answer.to_string()))
    }
}

pub struct FlightStatusTool;

#[async_trait]
impl Tool for FlightStatusTool {
    fn name(&self) -> &'static str {
        "flight_status_tool"
    }

    fn description(&self) -> &'static str {
        "Lookup the status for a flight."
    }

    fn capability(&self) -> ToolCapability {
        ToolCapability::Pure
    }

    fn parameters(&self) -> Value {
        string_parameter("flight_number", "The flight number to check.")
    }

    async fn execute(
        &self,
        args: &Value,
        _context: &mut ConversationContext,
    ) -> Result<ToolOutput, ToolError> {
        let flight_number = required_str(args, "flight_number")?;
        Ok(ToolOutput::Text(format!(
            "Flight {flight_number} is on time and scheduled to depart at gate A10."
        )))
    }
}

pub struct BookingDetailsTool;

#[async_trait]
impl Tool for BookingDetailsTool {
    fn name(&self) -> &'static str {
        "booking_details"
    }

    fn description(&self) -> &'static str {
        "Read the passenger's current booking details (name, confirmation, flight, seat)."
    }

    fn capability(&self) -> ToolCapability {
        ToolCapability::ReadContext
    }

    fn reads(&self) -> &'static [ContextField] {
        &ContextField::ALL
    }

    async fn execute(
        &self,
        _args: &Value,
        context: &mut ConversationContext,
    ) -> Result<ToolOutput, ToolError> {
        let details: serde_json::Map<String, Value> = ContextField::ALL
            .iter()
            .map(|field| (field.as_str().to_string(), Value::String(context.display(*field).to_string())))
            .collect();
        Ok(ToolOutput::Json(Value::Object(details)))
    }
}

pub struct UpdateSeatTool;

#[async_trait]
impl Tool for UpdateSeatTool {
    fn name(&self) -> &'static str {
        "update_seat"
    }

    fn description(&self) -> &'static str {
        "Update the seat for a given confirmation number."
    }

    fn capability(&self) -> ToolCapability {
        ToolCapability::WriteContext
    }

    fn writes(&self) -> &'static [ContextField] {
        &[ContextField::ConfirmationNumber, ContextField::SeatNumber]
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "confirmation_number": {
                    "type": "string",
                    "description": "The confirmation number for the flight."
                },
                "new_seat": { "type": "string", "description": "The new seat to assign." }
            },
            "required": ["confirmation_number", "new_seat"],
        })
    }

    async fn execute(
        &self,
        args: &Value,
        context: &mut ConversationContext,
    ) -> Result<ToolOutput, ToolError> {
        let confirmation_number = required_str(args, "confirmation_number")?.to_string();
        let new_seat = required_str(args, "new_seat")?.to_ascii_uppercase();
        if !is_seat_number(&new_seat) {
            return Err(ToolError::InvalidArgument {
                name: "new_seat".to_string(),
                reason: format!("`{new_seat}` is not a seat number like 23C"),
            });
        }

        context.set(ContextField::ConfirmationNumber, confirmation_number.clone());
        context.set(ContextField::SeatNumber, new_seat.clone());

        Ok(ToolOutput::Text(format!(
            "Updated seat to {new_seat} for confirmation number {confirmation_number}"
        )))
    }
}

pub struct DisplaySeatMapTool;

#[async_trait]
impl Tool for DisplaySeatMapTool {
    fn name(&self) -> &'static str {
        "display_seat_map"
    }

    fn description(&self) -> &'static str {
        "Display an interactive seat map to the customer so they can choose a new seat."
    }

    fn capability(&self) -> ToolCapability {
        ToolCapability::Pure
    }

    async fn execute(
        &self,
        _args: &Value,
        _context: &mut ConversationContext,
    ) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::Sentinel(SEAT_MAP_SENTINEL))
    }
}

pub struct CancelFlightTool;

#[async_trait]
impl Tool for CancelFlightTool {
    fn name(&self) -> &'static str {
        "cancel_flight"
    }

    fn description(&self) -> &'static str {
        "Cancel the flight in the context."
    }

    fn capability(&self) -> ToolCapability {
        ToolCapability::ReadContext
    }

    fn reads(&self) -> &'static [ContextField] {
        &[ContextField::FlightNumber]
    }

    async fn execute(
        &self,
        _args: &Value,
        context: &mut ConversationContext,
    ) -> Result<ToolOutput, ToolError> {
        let flight_number = context
            .get(ContextField::FlightNumber)
            .ok_or(ToolError::PreconditionMissing { field: ContextField::FlightNumber })?;
        Ok(ToolOutput::Text(format!("Flight {flight_number} successfully cancelled")))
    }
}

/// Row number followed by a single seat letter, e.g. `4A` or `23C`.
pub fn is_seat_number(candidate: &str) -> bool {
    let Some(letter) = candidate.chars().last() else {
        return false;
    };
    let row = &candidate[..candidate.len() - letter.len_utf8()];

    letter.is_ascii_alphabetic()
        && !row.is_empty()
        && row.len() <= 2
        && row.chars().all(|ch| ch.is_ascii_digit())
        && !row.starts_with('0')
}
