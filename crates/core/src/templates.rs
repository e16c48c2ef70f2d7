use crate::flows::states::{FlowSnapshot, FlowState};

/// Returned whenever a reply must be produced and no snapshot state can be
/// derived (e.g. an unparseable persisted state).
pub const FALLBACK_REPLY: &str = "I didn't catch that, mind rephrasing?";

/// The customer-facing reply for a flow snapshot. These strings are sent
/// verbatim over SMS; changing one changes the product.
///
/// Total over the state set; this function cannot fail.
pub fn reply_for_state(snapshot: &FlowSnapshot) -> &'static str {
    match snapshot.flow_state {
        FlowState::Start => "Hey! Quick check-in—are you still seeing any pest activity?",
        FlowState::Interested => {
            "Great—roughly how many square feet is the area you want serviced?"
        }
        FlowState::ActionSqft => "Please let me know the square footage of your property.",
        FlowState::FollowUp => "Thanks I've noted those details. We will reach out with a booking",
        FlowState::Done => "All set—thanks! We will reach out if anything is needed",
        FlowState::NotInterested => "Thank you, no problem. Bye",
        FlowState::Pause => "Let's pause for now. Ping me 'resume' when you're ready.",
        FlowState::Stop => "You're opted out",
        FlowState::Confused => "Sorry, could you clarify?",
    }
}

#[cfg(test)]
mod tests {
    use crate::flows::states::{FlowSnapshot, FlowState};
    use crate::templates::{reply_for_state, FALLBACK_REPLY};

    fn snapshot(state: FlowState) -> FlowSnapshot {
        FlowSnapshot { flow_state: state, confused_count: 0, was_ever_interested: false }
    }

    #[test]
    fn every_state_has_a_nonempty_reply() {
        for state in [
            FlowState::Start,
            FlowState::Interested,
            FlowState::ActionSqft,
            FlowState::Confused,
            FlowState::NotInterested,
            FlowState::FollowUp,
            FlowState::Pause,
            FlowState::Stop,
            FlowState::Done,
        ] {
            assert!(!reply_for_state(&snapshot(state)).is_empty(), "{state}");
        }
    }

    #[test]
    fn exact_strings_are_preserved() {
        assert_eq!(
            reply_for_state(&snapshot(FlowState::Start)),
            "Hey! Quick check-in—are you still seeing any pest activity?"
        );
        assert_eq!(reply_for_state(&snapshot(FlowState::Stop)), "You're opted out");
        assert_eq!(
            reply_for_state(&snapshot(FlowState::Pause)),
            "Let's pause for now. Ping me 'resume' when you're ready."
        );
    }

    #[test]
    fn fallback_reply_is_distinct_from_state_replies() {
        assert_eq!(FALLBACK_REPLY, "I didn't catch that, mind rephrasing?");
    }
}
