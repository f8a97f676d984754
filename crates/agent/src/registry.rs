use std::fmt;

use serde::{Deserialize, Serialize};

use concierge_core::domain::context::{ContextField, ConversationContext};

use crate::guardrails::GuardrailKind;
use crate::hooks::{ensure_cancellation_details, ContextHook};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Triage,
    Faq,
    SeatBooking,
    FlightStatus,
    Cancellation,
}

impl AgentKind {
    pub const ALL: [AgentKind; 5] =
        [Self::Triage, Self::Faq, Self::SeatBooking, Self::FlightStatus, Self::Cancellation];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Triage => "triage_agent",
            Self::Faq => "faq_agent",
            Self::SeatBooking => "seat_booking_agent",
            Self::FlightStatus => "flight_status_agent",
            Self::Cancellation => "cancellation_agent",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static definition of one agent. Built once, never mutated.
pub struct AgentDescriptor {
    pub kind: AgentKind,
    pub description: &'static str,
    pub tools: &'static [&'static str],
    pub handoffs: &'static [AgentKind],
    pub guardrails: &'static [GuardrailKind],
    /// Run, in order, whenever a handoff makes this agent active.
    pub entry_hooks: &'static [ContextHook],
    prompt: fn(&ConversationContext) -> String,
}

impl AgentDescriptor {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn instructions(&self, context: &ConversationContext) -> String {
        (self.prompt)(context)
    }

    pub fn can_hand_off_to(&self, target: AgentKind) -> bool {
        self.handoffs.contains(&target)
    }

    pub fn allows_tool(&self, tool: &str) -> bool {
        self.tools.contains(&tool)
    }

    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            name: self.name().to_string(),
            description: self.description.to_string(),
            handoffs: self.handoffs.iter().map(|kind| kind.name().to_string()).collect(),
            tools: self.tools.iter().map(|tool| (*tool).to_string()).collect(),
            input_guardrails: self.guardrails.iter().map(|kind| kind.name().to_string()).collect(),
        }
    }
}

impl fmt::Debug for AgentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentDescriptor")
            .field("kind", &self.kind)
            .field("tools", &self.tools)
            .field("handoffs", &self.handoffs)
            .field("guardrails", &self.guardrails)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub name: String,
    pub description: String,
    pub handoffs: Vec<String>,
    pub tools: Vec<String>,
    pub input_guardrails: Vec<String>,
}

const SPECIALISTS: &[AgentKind] =
    &[AgentKind::FlightStatus, AgentKind::Cancellation, AgentKind::SeatBooking, AgentKind::Faq];
const BACK_TO_TRIAGE: &[AgentKind] = &[AgentKind::Triage];
const FULL_SCREENING: &[GuardrailKind] = &[GuardrailKind::Jailbreak, GuardrailKind::Relevance];
const JAILBREAK_ONLY: &[GuardrailKind] = &[GuardrailKind::Jailbreak];

static DESCRIPTORS: [AgentDescriptor; 5] = [
    AgentDescriptor {
        kind: AgentKind::Triage,
        description:
            "A triage agent that can delegate a customer's request to the appropriate agent.",
        tools: &[],
        handoffs: SPECIALISTS,
        guardrails: FULL_SCREENING,
        entry_hooks: &[],
        prompt: triage_prompt,
    },
    AgentDescriptor {
        kind: AgentKind::Faq,
        description: "A helpful agent that can answer questions about the airline.",
        tools: &["faq_lookup_tool", "baggage_tool"],
        handoffs: BACK_TO_TRIAGE,
        guardrails: JAILBREAK_ONLY,
        entry_hooks: &[],
        prompt: faq_prompt,
    },
    AgentDescriptor {
        kind: AgentKind::SeatBooking,
        description: "A helpful agent that can update a seat on a flight.",
        tools: &["booking_details", "update_seat", "display_seat_map"],
        handoffs: BACK_TO_TRIAGE,
        guardrails: FULL_SCREENING,
        entry_hooks: &[],
        prompt: seat_booking_prompt,
    },
    AgentDescriptor {
        kind: AgentKind::FlightStatus,
        description: "An agent to provide flight status information.",
        tools: &["booking_details", "flight_status_tool"],
        handoffs: BACK_TO_TRIAGE,
        guardrails: FULL_SCREENING,
        entry_hooks: &[],
        prompt: flight_status_prompt,
    },
    AgentDescriptor {
        kind: AgentKind::Cancellation,
        description: "An agent to cancel flights.",
        tools: &["booking_details", "cancel_flight"],
        handoffs: BACK_TO_TRIAGE,
        guardrails: JAILBREAK_ONLY,
        entry_hooks: &[ensure_cancellation_details],
        prompt: cancellation_prompt,
    },
];

/// The fixed agent graph. Triage is the single entry node.
#[derive(Clone, Copy, Debug)]
pub struct AgentRegistry {
    descriptors: &'static [AgentDescriptor],
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl AgentRegistry {
    pub fn standard() -> Self {
        Self { descriptors: &DESCRIPTORS }
    }

    pub fn entry(&self) -> &'static AgentDescriptor {
        self.get(AgentKind::Triage)
    }

    pub fn get(&self, kind: AgentKind) -> &'static AgentDescriptor {
        self.descriptors.iter().find(|descriptor| descriptor.kind == kind).unwrap_or(&DESCRIPTORS[0])
    }

    pub fn by_name(&self, name: &str) -> Option<&'static AgentDescriptor> {
        AgentKind::from_name(name).map(|kind| self.get(kind))
    }

    pub fn all(&self) -> &'static [AgentDescriptor] {
        self.descriptors
    }

    pub fn summaries(&self) -> Vec<AgentSummary> {
        self.descriptors.iter().map(AgentDescriptor::summary).collect()
    }
}

fn triage_prompt(_context: &ConversationContext) -> String {
    "You are a helpful triaging agent. You can use your tools to delegate questions to other appropriate agents.".to_string()
}

fn faq_prompt(_context: &ConversationContext) -> String {
    "You are an FAQ agent. If you are speaking to a customer, you probably were transferred to from the triage agent.

Use the following routine to support the customer.
    1. Identify the last question asked by the customer.
    2. Use the faq lookup tool to get the answer, or the baggage tool for baggage fees and allowances. Do not rely on your own knowledge.
    3. Respond to the customer with the answer.

If the customer asks a question that is not covered by the FAQ, transfer back to the triage agent."
        .to_string()
}

fn seat_booking_prompt(context: &ConversationContext) -> String {
    let confirmation = context.display(ContextField::ConfirmationNumber);
    let seat = context.display(ContextField::SeatNumber);
    format!(
        "You are a seat booking agent. If you are speaking to a customer, you probably were transferred to from the triage agent.

Use the following routine to support the customer.
    1. The customer's confirmation number is {confirmation} and their current seat is {seat}.
        - If the confirmation number is not available, ask the customer for it.
        - If you have it, confirm that is the confirmation number they are referencing.
    2. Ask the customer what their desired seat number is. You can also use the display_seat_map tool to show them an interactive seat map where they can click to select their preferred seat.
    3. You MUST return the output of display_seat_map as it is i.e. no extra text.
    4. Use the update_seat tool to update the seat on the flight.

If the customer asks a question that is not related to the routine, transfer back to the triage agent."
    )
}

fn flight_status_prompt(context: &ConversationContext) -> String {
    let confirmation = context.display(ContextField::ConfirmationNumber);
    let flight = context.display(ContextField::FlightNumber);
    format!(
        "You are a Flight Status Agent. Use the following routine to support the customer:
    1. The customer's confirmation number is {confirmation} and flight number is {flight}.
       - If either is not available, ask the customer for the missing information.
       - If you have both, confirm with the customer that these are correct.
    2. Use the flight_status_tool to report the status of the flight.

If the customer asks a question that is not related to flight status, transfer back to the triage agent."
    )
}

fn cancellation_prompt(context: &ConversationContext) -> String {
    let confirmation = context.display(ContextField::ConfirmationNumber);
    let flight = context.display(ContextField::FlightNumber);
    format!(
        "You are a Cancellation Agent. Use the following routine to support the customer:
    1. The customer's confirmation number is {confirmation} and flight number is {flight}.
        - If either is not available, ask the customer for the missing information.
        - If you have both, confirm with the customer that these are correct.
    2. If the customer confirms, use the cancel_flight tool to cancel their flight.

If the customer asks anything else, transfer back to the triage agent."
    )
}

#[cfg(test)]
mod tests {
    use concierge_core::domain::context::ConversationContext;

    use super::{AgentKind, AgentRegistry};
    use crate::guardrails::GuardrailKind;

    #[test]
    fn triage_reaches_every_specialist_and_specialists_return_to_triage() {
        let registry = AgentRegistry::standard();
        let triage = registry.entry();

        for kind in AgentKind::ALL.into_iter().filter(|kind| *kind != AgentKind::Triage) {
            assert!(triage.can_hand_off_to(kind), "triage should reach {kind}");
            let specialist = registry.get(kind);
            assert_eq!(specialist.handoffs, &[AgentKind::Triage]);
        }
        assert!(!triage.can_hand_off_to(AgentKind::Triage));
    }

    #[test]
    fn names_resolve_both_ways() {
        let registry = AgentRegistry::standard();
        for descriptor in registry.all() {
            assert_eq!(AgentKind::from_name(descriptor.name()), Some(descriptor.kind));
        }
        assert!(registry.by_name("billing_agent").is_none());
    }

    #[test]
    fn prompts_substitute_placeholder_for_unset_fields() {
        let registry = AgentRegistry::standard();
        let prompt =
            registry.get(AgentKind::Cancellation).instructions(&ConversationContext::default());

        assert!(prompt.contains("confirmation number is not available"));
        assert!(prompt.contains("flight number is not available"));
    }

    #[test]
    fn prompts_render_known_fields() {
        let registry = AgentRegistry::standard();
        let context = ConversationContext::initial_demo();
        let prompt = registry.get(AgentKind::SeatBooking).instructions(&context);

        assert!(prompt.contains("current seat is 12A"));
    }

    #[test]
    fn summaries_list_guardrails_in_order() {
        let registry = AgentRegistry::standard();
        let summaries = registry.summaries();

        assert_eq!(summaries.len(), 5);
        assert_eq!(summaries[0].name, "triage_agent");
        assert_eq!(
            summaries[0].input_guardrails,
            vec![GuardrailKind::Jailbreak.name(), GuardrailKind::Relevance.name()]
        );
        let faq = summaries.iter().find(|summary| summary.name == "faq_agent").expect("faq");
        assert_eq!(faq.tools, vec!["faq_lookup_tool", "baggage_tool"]);
    }
}
