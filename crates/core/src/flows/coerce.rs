use crate::flows::states::{FlowState, FlowTrigger};

/// How a requested trigger was reinterpreted before validation.
///
/// `DeferToValidation` is deliberately distinct from `Coerced`: the trigger
/// passes through unchanged and downstream allowed-trigger validation is
/// expected to reject it. Both carry a reason string that is part of the
/// transition-report contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoercionOutcome {
    Unchanged,
    Coerced { reason: &'static str },
    DeferToValidation { reason: &'static str },
}

impl CoercionOutcome {
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Self::Unchanged => None,
            Self::Coerced { reason } | Self::DeferToValidation { reason } => Some(reason),
        }
    }
}

/// Remap a requested trigger to the contextually correct one. Rules are
/// evaluated in order, first match wins. Pure; never consults the
/// allowed-trigger resolver.
pub fn coerce_trigger(
    state: FlowState,
    requested: FlowTrigger,
) -> (FlowTrigger, CoercionOutcome) {
    use FlowTrigger::{
        GoToSqft, PoliteAck, ReceiveFollowup, ReceivePositiveResponse, ResumeFlow, RetryConfused,
        UserStopped,
    };

    // Awaiting closure: short acknowledgements are completions, not new
    // confusion or positivity signals.
    if state == FlowState::FollowUp
        && matches!(requested, RetryConfused | ReceivePositiveResponse | ResumeFlow)
    {
        return (PoliteAck, CoercionOutcome::Coerced { reason: "coerced_from_follow_up_ack" });
    }

    // A repeated "give me sqft" signal while already collecting square
    // footage means the number was just supplied.
    if state == FlowState::ActionSqft && requested == GoToSqft {
        return (ReceiveFollowup, CoercionOutcome::Coerced { reason: "coerced_from_gotosqft" });
    }

    if state == FlowState::Interested && requested == GoToSqft {
        return (
            ReceiveFollowup,
            CoercionOutcome::Coerced { reason: "coerced_from_gotosqft_and_interested" },
        );
    }

    // In pause only an explicit stop passes; everything else is left for
    // validation to refuse.
    if state == FlowState::Pause && requested != UserStopped {
        return (requested, CoercionOutcome::DeferToValidation { reason: "noop_if_invalid_in_pause" });
    }

    (requested, CoercionOutcome::Unchanged)
}

#[cfg(test)]
mod tests {
    use crate::flows::coerce::{coerce_trigger, CoercionOutcome};
    use crate::flows::states::{FlowState, FlowTrigger};

    #[test]
    fn follow_up_acknowledgements_become_polite_ack() {
        for requested in [
            FlowTrigger::RetryConfused,
            FlowTrigger::ReceivePositiveResponse,
            FlowTrigger::ResumeFlow,
        ] {
            let (trigger, outcome) = coerce_trigger(FlowState::FollowUp, requested);
            assert_eq!(trigger, FlowTrigger::PoliteAck);
            assert_eq!(outcome.reason(), Some("coerced_from_follow_up_ack"));
        }
    }

    #[test]
    fn follow_up_explicit_finishes_pass_through() {
        let (trigger, outcome) = coerce_trigger(FlowState::FollowUp, FlowTrigger::CompleteFlow);
        assert_eq!(trigger, FlowTrigger::CompleteFlow);
        assert_eq!(outcome, CoercionOutcome::Unchanged);
    }

    #[test]
    fn repeated_gotosqft_means_number_was_supplied() {
        let (trigger, outcome) = coerce_trigger(FlowState::ActionSqft, FlowTrigger::GoToSqft);
        assert_eq!(trigger, FlowTrigger::ReceiveFollowup);
        assert_eq!(outcome.reason(), Some("coerced_from_gotosqft"));

        let (trigger, outcome) = coerce_trigger(FlowState::Interested, FlowTrigger::GoToSqft);
        assert_eq!(trigger, FlowTrigger::ReceiveFollowup);
        assert_eq!(outcome.reason(), Some("coerced_from_gotosqft_and_interested"));
    }

    #[test]
    fn pause_defers_everything_but_stop_to_validation() {
        let (trigger, outcome) =
            coerce_trigger(FlowState::Pause, FlowTrigger::ReceivePositiveResponse);
        assert_eq!(trigger, FlowTrigger::ReceivePositiveResponse);
        assert_eq!(
            outcome,
            CoercionOutcome::DeferToValidation { reason: "noop_if_invalid_in_pause" }
        );

        let (trigger, outcome) = coerce_trigger(FlowState::Pause, FlowTrigger::UserStopped);
        assert_eq!(trigger, FlowTrigger::UserStopped);
        assert_eq!(outcome, CoercionOutcome::Unchanged);
    }

    #[test]
    fn unlisted_pairs_are_unchanged() {
        for (state, trigger) in [
            (FlowState::Start, FlowTrigger::ReceivePositiveResponse),
            (FlowState::Start, FlowTrigger::UserStopped),
            (FlowState::Confused, FlowTrigger::RetryConfused),
            (FlowState::Interested, FlowTrigger::ReceiveFollowup),
            (FlowState::Done, FlowTrigger::PoliteAck),
        ] {
            let (coerced, outcome) = coerce_trigger(state, trigger);
            assert_eq!(coerced, trigger);
            assert_eq!(outcome, CoercionOutcome::Unchanged);
        }
    }
}
