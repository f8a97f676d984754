use std::fmt;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const DEMO_PASSENGER_NAME: &str = "John Doe";
pub const DEMO_FLIGHT_NUMBER: &str = "FL123";
pub const DEMO_SEAT_NUMBER: &str = "12A";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextField {
    PassengerName,
    ConfirmationNumber,
    SeatNumber,
    FlightNumber,
    AccountNumber,
}

impl ContextField {
    pub const ALL: [ContextField; 5] = [
        Self::PassengerName,
        Self::ConfirmationNumber,
        Self::SeatNumber,
        Self::FlightNumber,
        Self::AccountNumber,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PassengerName => "passenger_name",
            Self::ConfirmationNumber => "confirmation_number",
            Self::SeatNumber => "seat_number",
            Self::FlightNumber => "flight_number",
            Self::AccountNumber => "account_number",
        }
    }
}

impl fmt::Display for ContextField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Booking facts shared by every agent and tool during one conversation.
///
/// Fields start out unset and are only ever overwritten with a new value;
/// there is deliberately no way to clear one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub passenger_name: Option<String>,
    pub confirmation_number: Option<String>,
    pub seat_number: Option<String>,
    pub flight_number: Option<String>,
    pub account_number: Option<String>,
}

impl ConversationContext {
    /// Fully populated context for a brand new conversation. Identifiers are
    /// generated demo values until a real customer record is attached.
    pub fn initial_demo() -> Self {
        let mut rng = rand::thread_rng();
        let account_number = rng.gen_range(10_000_000..=99_999_999_u32).to_string();
        let confirmation_number = (&mut rng)
            .sample_iter(Alphanumeric)
            .map(|byte| char::from(byte).to_ascii_uppercase())
            .take(6)
            .collect::<String>();

        Self {
            passenger_name: Some(DEMO_PASSENGER_NAME.to_string()),
            confirmation_number: Some(confirmation_number),
            seat_number: Some(DEMO_SEAT_NUMBER.to_string()),
            flight_number: Some(DEMO_FLIGHT_NUMBER.to_string()),
            account_number: Some(account_number),
        }
    }

    pub fn get(&self, field: ContextField) -> Option<&str> {
        match field {
            ContextField::PassengerName => self.passenger_name.as_deref(),
            ContextField::ConfirmationNumber => self.confirmation_number.as_deref(),
            ContextField::SeatNumber => self.seat_number.as_deref(),
            ContextField::FlightNumber => self.flight_number.as_deref(),
            ContextField::AccountNumber => self.account_number.as_deref(),
        }
    }

    pub fn set(&mut self, field: ContextField, value: impl Into<String>) {
        let slot = match field {
            ContextField::PassengerName => &mut self.passenger_name,
            ContextField::ConfirmationNumber => &mut self.confirmation_number,
            ContextField::SeatNumber => &mut self.seat_number,
            ContextField::FlightNumber => &mut self.flight_number,
            ContextField::AccountNumber => &mut self.account_number,
        };
        *slot = Some(value.into());
    }

    /// Value for prompt rendering, with the placeholder used when the field is
    /// still unknown.
    pub fn display(&self, field: ContextField) -> &str {
        self.get(field).unwrap_or("not available")
    }

    pub fn is_fully_populated(&self) -> bool {
        ContextField::ALL.iter().all(|field| self.get(*field).is_some())
    }

    /// Copy holding only `fields`; everything else is unset.
    pub fn projected(&self, fields: &[ContextField]) -> Self {
        let mut view = Self::default();
        for field in fields {
            if let Some(value) = self.get(*field) {
                view.set(*field, value);
            }
        }
        view
    }

    /// Fields whose value differs between `self` and `other`.
    pub fn changed_fields(&self, other: &ConversationContext) -> Vec<ContextField> {
        ContextField::ALL.into_iter().filter(|field| self.get(*field) != other.get(*field)).collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
