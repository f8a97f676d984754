use concierge_core::domain::context::{ContextField, ConversationContext};

/// A pure context transformation run by the orchestrator when an agent
/// becomes active.
pub type ContextHook = fn(&ConversationContext) -> ConversationContext;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub fn apply_hooks(hooks: &[ContextHook], context: &ConversationContext) -> ConversationContext {
    hooks.iter().fold(context.clone(), |current, hook| hook(&current))
}

/// Makes sure a cancellation has something to act on. Missing values are
/// derived from a hash of the current context so replaying the same turn
/// yields the same identifiers.
pub fn ensure_cancellation_details(context: &ConversationContext) -> ConversationContext {
    let mut next = context.clone();
    if next.confirmation_number.is_some() && next.flight_number.is_some() {
        return next;
    }

    let seed = serde_json::to_vec(context).unwrap_or_default();
    let digest = blake3::hash(&seed);
    let bytes = digest.as_bytes();

    if next.confirmation_number.is_none() {
        let code: String = bytes[..6]
            .iter()
            .map(|byte| char::from(CODE_ALPHABET[usize::from(*byte) % CODE_ALPHABET.len()]))
            .collect();
        next.set(ContextField::ConfirmationNumber, code);
    }

    if next.flight_number.is_none() {
        let raw = u16::from_le_bytes([bytes[6], bytes[7]]);
        next.set(ContextField::FlightNumber, format!("FLT-{}", 100 + raw % 900));
    }

    next
}

#[cfg(test)]
mod tests {
    use concierge_core::domain::context::ConversationContext;

    use super::{apply_hooks, ensure_cancellation_details, ContextHook};

    #[test]
    fn fills_missing_cancellation_fields_deterministically() {
        let context = ConversationContext {
            passenger_name: Some("John Doe".to_string()),
            ..ConversationContext::default()
        };

        let first = ensure_cancellation_details(&context);
        let second = ensure_cancellation_details(&context);

        assert_eq!(first, second);
        let confirmation = first.confirmation_number.clone().expect("confirmation filled");
        assert_eq!(confirmation.len(), 6);
        assert!(confirmation.chars().all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit()));

        let flight = first.flight_number.expect("flight filled");
        let number: u16 = flight.trim_start_matches("FLT-").parse().expect("numeric suffix");
        assert!((100..=999).contains(&number));
    }

    #[test]
    fn leaves_populated_context_untouched() {
        let context = ConversationContext::initial_demo();
        assert_eq!(ensure_cancellation_details(&context), context);
    }

    #[test]
    fn hooks_apply_in_order() {
        fn rename(context: &ConversationContext) -> ConversationContext {
            let mut next = context.clone();
            next.passenger_name = Some("Jane Roe".to_string());
            next
        }

        let hooks: [ContextHook; 2] = [rename, ensure_cancellation_details];
        let result = apply_hooks(&hooks, &ConversationContext::default());

        assert_eq!(result.passenger_name.as_deref(), Some("Jane Roe"));
        assert!(result.flight_number.is_some());
    }
}
