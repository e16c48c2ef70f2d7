pub mod coerce;
pub mod engine;
pub mod states;

pub use coerce::{coerce_trigger, CoercionOutcome};
pub use engine::{
    allowed_triggers, FlowTransitionError, IntentionFlow, SourceStates, TransitionRule,
    CONFUSION_PAUSE_THRESHOLD, TRANSITION_TABLE,
};
pub use states::{
    FlowSnapshot, FlowState, FlowTrigger, TransitionOutcome, UnknownStateName, UnknownTriggerName,
};
