use std::collections::{BTreeSet, VecDeque};

use thiserror::Error;

use crate::flows::states::{FlowSnapshot, FlowState, FlowTrigger, TransitionOutcome};

/// Number of consecutive clarification attempts before the flow parks itself.
pub const CONFUSION_PAUSE_THRESHOLD: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceStates {
    Any,
    Listed(&'static [FlowState]),
}

impl SourceStates {
    pub fn contains(&self, state: FlowState) -> bool {
        match self {
            Self::Any => true,
            Self::Listed(states) => states.contains(&state),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionRule {
    pub trigger: FlowTrigger,
    pub sources: SourceStates,
    pub dest: FlowState,
}

/// The one transition table. Both `fire` and `allowed_triggers` are computed
/// from it, so the reachable graph stays statically enumerable.
pub const TRANSITION_TABLE: &[TransitionRule] = &[
    TransitionRule {
        trigger: FlowTrigger::ReceivePositiveResponse,
        sources: SourceStates::Listed(&[FlowState::Start, FlowState::Confused, FlowState::Pause]),
        dest: FlowState::Interested,
    },
    TransitionRule {
        trigger: FlowTrigger::GoToSqft,
        sources: SourceStates::Listed(&[
            FlowState::Interested,
            FlowState::Start,
            FlowState::Confused,
        ]),
        dest: FlowState::ActionSqft,
    },
    TransitionRule {
        trigger: FlowTrigger::ReceiveFollowup,
        sources: SourceStates::Listed(&[FlowState::ActionSqft, FlowState::Interested]),
        dest: FlowState::FollowUp,
    },
    TransitionRule {
        trigger: FlowTrigger::CompleteFlow,
        sources: SourceStates::Listed(&[FlowState::FollowUp]),
        dest: FlowState::Done,
    },
    TransitionRule {
        trigger: FlowTrigger::ReceiveNegativeResponse,
        sources: SourceStates::Any,
        dest: FlowState::NotInterested,
    },
    TransitionRule {
        trigger: FlowTrigger::UserStopped,
        sources: SourceStates::Any,
        dest: FlowState::Stop,
    },
    TransitionRule {
        trigger: FlowTrigger::RetryConfused,
        sources: SourceStates::Any,
        dest: FlowState::Confused,
    },
    TransitionRule {
        trigger: FlowTrigger::PauseFlow,
        sources: SourceStates::Listed(&[FlowState::Confused]),
        dest: FlowState::Pause,
    },
    TransitionRule {
        trigger: FlowTrigger::ResumeFlow,
        sources: SourceStates::Listed(&[FlowState::Pause]),
        dest: FlowState::Start,
    },
    TransitionRule {
        trigger: FlowTrigger::PoliteAck,
        sources: SourceStates::Listed(&[FlowState::FollowUp]),
        dest: FlowState::Done,
    },
];

/// Triggers with a table rule whose sources include `state`. Guards are not
/// evaluated here; `pause_flow` is listed for `confused` even below the
/// confusion threshold.
pub fn allowed_triggers(state: FlowState) -> BTreeSet<FlowTrigger> {
    TRANSITION_TABLE
        .iter()
        .filter(|rule| rule.sources.contains(state))
        .map(|rule| rule.trigger)
        .collect()
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state} using trigger {trigger}")]
    InvalidTransition { state: FlowState, trigger: FlowTrigger },
}

/// Finite-state machine tracking one customer's progress through the
/// re-engagement conversation. Pure in-memory logic; persistence and
/// reconciliation live with the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntentionFlow {
    name: String,
    state: FlowState,
    confused_count: u32,
    was_ever_interested: bool,
    flow_version: u32,
}

impl IntentionFlow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: FlowState::Start,
            confused_count: 0,
            was_ever_interested: false,
            flow_version: 1,
        }
    }

    /// Rebuild a flow from persisted fields.
    pub fn restore(name: impl Into<String>, state: FlowState, was_ever_interested: bool) -> Self {
        Self {
            name: name.into(),
            state,
            confused_count: 0,
            was_ever_interested,
            flow_version: 1,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn confused_count(&self) -> u32 {
        self.confused_count
    }

    pub fn was_ever_interested(&self) -> bool {
        self.was_ever_interested
    }

    pub fn flow_version(&self) -> u32 {
        self.flow_version
    }

    /// One-way: interest is never reset within a flow instance's lifetime.
    pub fn mark_interested(&mut self) {
        self.was_ever_interested = true;
    }

    /// Adopt a persisted state during reconciliation. Not a transition; the
    /// confusion counter and interest flag are left untouched.
    pub fn rebase(&mut self, state: FlowState) {
        self.state = state;
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            flow_state: self.state,
            confused_count: self.confused_count,
            was_ever_interested: self.was_ever_interested,
        }
    }

    /// Fire `trigger`, then any follow-up triggers its transition hook
    /// returned, in order. A trigger with no rule for the current state is
    /// refused without mutation. An `Ok` outcome with `to == from` means a
    /// guard no-oped the transition (e.g. `pause_flow` below the confusion
    /// threshold).
    pub fn fire(&mut self, trigger: FlowTrigger) -> Result<TransitionOutcome, FlowTransitionError> {
        let from = self.state;
        let mut fired = Vec::new();
        let mut pending = VecDeque::from([trigger]);

        while let Some(next) = pending.pop_front() {
            let followups = self.apply(next)?;
            fired.push(next);
            pending.extend(followups);
        }

        Ok(TransitionOutcome { from, to: self.state, trigger, fired })
    }

    /// Apply a single transition and return the follow-up triggers to chain.
    fn apply(&mut self, trigger: FlowTrigger) -> Result<Vec<FlowTrigger>, FlowTransitionError> {
        let rule = TRANSITION_TABLE
            .iter()
            .find(|rule| rule.trigger == trigger && rule.sources.contains(self.state))
            .ok_or(FlowTransitionError::InvalidTransition { state: self.state, trigger })?;

        // Guard: pause only engages once the confusion threshold is reached.
        if trigger == FlowTrigger::PauseFlow && self.confused_count < CONFUSION_PAUSE_THRESHOLD {
            return Ok(Vec::new());
        }

        self.state = rule.dest;

        if matches!(rule.dest, FlowState::Interested | FlowState::ActionSqft) {
            self.mark_interested();
        }

        let mut followups = Vec::new();
        if trigger == FlowTrigger::RetryConfused {
            self.confused_count += 1;
            if self.confused_count >= CONFUSION_PAUSE_THRESHOLD {
                followups.push(FlowTrigger::PauseFlow);
            }
        }

        Ok(followups)
    }
}

#[cfg(test)]
mod tests {
    use crate::flows::engine::{
        allowed_triggers, FlowTransitionError, IntentionFlow, CONFUSION_PAUSE_THRESHOLD,
    };
    use crate::flows::states::{FlowState, FlowTrigger};

    const ALL_STATES: [FlowState; 9] = [
        FlowState::Start,
        FlowState::Interested,
        FlowState::ActionSqft,
        FlowState::Confused,
        FlowState::NotInterested,
        FlowState::FollowUp,
        FlowState::Pause,
        FlowState::Stop,
        FlowState::Done,
    ];

    const ALL_TRIGGERS: [FlowTrigger; 10] = [
        FlowTrigger::ReceivePositiveResponse,
        FlowTrigger::GoToSqft,
        FlowTrigger::ReceiveFollowup,
        FlowTrigger::CompleteFlow,
        FlowTrigger::ReceiveNegativeResponse,
        FlowTrigger::UserStopped,
        FlowTrigger::RetryConfused,
        FlowTrigger::PauseFlow,
        FlowTrigger::ResumeFlow,
        FlowTrigger::PoliteAck,
    ];

    #[test]
    fn positive_happy_path_reaches_done() {
        let mut flow = IntentionFlow::new("user-a");
        assert_eq!(flow.state(), FlowState::Start);

        flow.fire(FlowTrigger::ReceivePositiveResponse).expect("start -> interested");
        assert_eq!(flow.state(), FlowState::Interested);
        assert!(flow.was_ever_interested());

        flow.fire(FlowTrigger::GoToSqft).expect("interested -> action_sqft");
        assert_eq!(flow.state(), FlowState::ActionSqft);

        flow.fire(FlowTrigger::ReceiveFollowup).expect("action_sqft -> follow_up");
        assert_eq!(flow.state(), FlowState::FollowUp);

        flow.fire(FlowTrigger::CompleteFlow).expect("follow_up -> done");
        assert_eq!(flow.state(), FlowState::Done);
        assert!(flow.was_ever_interested());
    }

    #[test]
    fn three_confusions_chain_into_pause_then_resume_restarts() {
        let mut flow = IntentionFlow::new("user-b");

        flow.fire(FlowTrigger::RetryConfused).expect("first confusion");
        assert_eq!(flow.state(), FlowState::Confused);
        assert_eq!(flow.confused_count(), 1);

        flow.fire(FlowTrigger::RetryConfused).expect("second confusion");
        assert_eq!(flow.confused_count(), 2);

        let outcome = flow.fire(FlowTrigger::RetryConfused).expect("third confusion");
        assert_eq!(flow.state(), FlowState::Pause);
        assert_eq!(flow.confused_count(), CONFUSION_PAUSE_THRESHOLD);
        assert_eq!(outcome.fired, vec![FlowTrigger::RetryConfused, FlowTrigger::PauseFlow]);
        assert_eq!(outcome.to, FlowState::Pause);

        flow.fire(FlowTrigger::ResumeFlow).expect("pause -> start");
        assert_eq!(flow.state(), FlowState::Start);
    }

    #[test]
    fn user_stopped_reaches_stop_from_any_reachable_state() {
        for seed in [
            Vec::new(),
            vec![FlowTrigger::ReceivePositiveResponse],
            vec![FlowTrigger::RetryConfused],
            vec![
                FlowTrigger::RetryConfused,
                FlowTrigger::RetryConfused,
                FlowTrigger::RetryConfused,
            ],
            vec![FlowTrigger::ReceivePositiveResponse, FlowTrigger::ReceiveFollowup],
        ] {
            let mut flow = IntentionFlow::new("user-c");
            for trigger in seed {
                flow.fire(trigger).expect("seed transition");
            }
            flow.fire(FlowTrigger::UserStopped).expect("stop is universal");
            assert_eq!(flow.state(), FlowState::Stop);
        }
    }

    #[test]
    fn disallowed_triggers_are_refused_without_mutation() {
        for state in ALL_STATES {
            let allowed = allowed_triggers(state);
            for trigger in ALL_TRIGGERS {
                if allowed.contains(&trigger) {
                    continue;
                }
                let mut flow = IntentionFlow::restore("user-d", state, false);
                let error = flow.fire(trigger).expect_err("trigger must be refused");
                assert_eq!(error, FlowTransitionError::InvalidTransition { state, trigger });
                assert_eq!(flow.state(), state);
                assert_eq!(flow.confused_count(), 0);
                assert!(!flow.was_ever_interested());
            }
        }
    }

    #[test]
    fn universal_triggers_are_allowed_everywhere() {
        for state in ALL_STATES {
            let allowed = allowed_triggers(state);
            assert!(allowed.contains(&FlowTrigger::ReceiveNegativeResponse), "{state}");
            assert!(allowed.contains(&FlowTrigger::UserStopped), "{state}");
        }
    }

    #[test]
    fn allowed_triggers_excludes_guard_only_entries_elsewhere() {
        assert!(allowed_triggers(FlowState::Confused).contains(&FlowTrigger::PauseFlow));
        assert!(!allowed_triggers(FlowState::Start).contains(&FlowTrigger::PauseFlow));
        assert!(!allowed_triggers(FlowState::Pause).contains(&FlowTrigger::PauseFlow));
    }

    #[test]
    fn pause_guard_noops_below_threshold() {
        let mut flow = IntentionFlow::new("user-e");
        flow.fire(FlowTrigger::RetryConfused).expect("enter confused");
        assert_eq!(flow.confused_count(), 1);

        let outcome = flow.fire(FlowTrigger::PauseFlow).expect("guard no-op is not an error");
        assert!(!outcome.changed());
        assert_eq!(flow.state(), FlowState::Confused);
    }

    #[test]
    fn interest_is_monotone_across_later_transitions() {
        let mut flow = IntentionFlow::new("user-f");
        flow.fire(FlowTrigger::ReceivePositiveResponse).expect("mark interested");
        assert!(flow.was_ever_interested());

        flow.fire(FlowTrigger::ReceiveNegativeResponse).expect("back out");
        assert_eq!(flow.state(), FlowState::NotInterested);
        assert!(flow.was_ever_interested());

        let mut flow = IntentionFlow::new("user-g");
        flow.fire(FlowTrigger::GoToSqft).expect("sqft marks interest too");
        flow.fire(FlowTrigger::UserStopped).expect("opt out");
        assert!(flow.was_ever_interested());
    }

    #[test]
    fn confusion_count_only_grows_via_retry_confused() {
        let mut flow = IntentionFlow::new("user-h");
        flow.fire(FlowTrigger::ReceivePositiveResponse).expect("interested");
        flow.fire(FlowTrigger::ReceiveFollowup).expect("follow up");
        flow.fire(FlowTrigger::CompleteFlow).expect("done");
        assert_eq!(flow.confused_count(), 0);
    }

    #[test]
    fn snapshot_is_a_pure_read() {
        let mut flow = IntentionFlow::new("user-i");
        flow.fire(FlowTrigger::RetryConfused).expect("confused");

        let first = flow.snapshot();
        let second = flow.snapshot();
        assert_eq!(first, second);
        assert_eq!(first.flow_state, FlowState::Confused);
        assert_eq!(first.confused_count, 1);
        assert!(!first.was_ever_interested);
    }
}
