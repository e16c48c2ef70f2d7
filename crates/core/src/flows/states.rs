use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Conversation position in the re-engagement pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Start,
    Interested,
    ActionSqft,
    Confused,
    NotInterested,
    FollowUp,
    Pause,
    Stop,
    Done,
}

impl FlowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Interested => "interested",
            Self::ActionSqft => "action_sqft",
            Self::Confused => "confused",
            Self::NotInterested => "not_interested",
            Self::FollowUp => "follow_up",
            Self::Pause => "pause",
            Self::Stop => "stop",
            Self::Done => "done",
        }
    }

    /// States where the conversation no longer advances on its own; console
    /// loops stop reading input here and outreach counts them as inactive
    /// only for `done`.
    pub fn is_resting(&self) -> bool {
        matches!(self, Self::NotInterested | Self::Pause | Self::Stop | Self::Done)
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown flow state `{0}`")]
pub struct UnknownStateName(pub String);

impl FromStr for FlowState {
    type Err = UnknownStateName;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "start" => Ok(Self::Start),
            "interested" => Ok(Self::Interested),
            "action_sqft" => Ok(Self::ActionSqft),
            "confused" => Ok(Self::Confused),
            "not_interested" => Ok(Self::NotInterested),
            "follow_up" => Ok(Self::FollowUp),
            "pause" => Ok(Self::Pause),
            "stop" => Ok(Self::Stop),
            "done" => Ok(Self::Done),
            other => Err(UnknownStateName(other.to_owned())),
        }
    }
}

/// Explicitly defined triggers only. Convenience aliases such as `to_<state>`
/// do not exist in this machine and are rejected at the parse step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowTrigger {
    ReceivePositiveResponse,
    GoToSqft,
    ReceiveFollowup,
    CompleteFlow,
    ReceiveNegativeResponse,
    UserStopped,
    RetryConfused,
    PauseFlow,
    ResumeFlow,
    PoliteAck,
}

impl FlowTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReceivePositiveResponse => "receive_positive_response",
            Self::GoToSqft => "go_to_sqft",
            Self::ReceiveFollowup => "receive_followup",
            Self::CompleteFlow => "complete_flow",
            Self::ReceiveNegativeResponse => "receive_negative_response",
            Self::UserStopped => "user_stopped",
            Self::RetryConfused => "retry_confused",
            Self::PauseFlow => "pause_flow",
            Self::ResumeFlow => "resume_flow",
            Self::PoliteAck => "polite_ack",
        }
    }
}

impl fmt::Display for FlowTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown flow trigger `{0}`")]
pub struct UnknownTriggerName(pub String);

impl FromStr for FlowTrigger {
    type Err = UnknownTriggerName;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "receive_positive_response" => Ok(Self::ReceivePositiveResponse),
            "go_to_sqft" => Ok(Self::GoToSqft),
            "receive_followup" => Ok(Self::ReceiveFollowup),
            "complete_flow" => Ok(Self::CompleteFlow),
            "receive_negative_response" => Ok(Self::ReceiveNegativeResponse),
            "user_stopped" => Ok(Self::UserStopped),
            "retry_confused" => Ok(Self::RetryConfused),
            "pause_flow" => Ok(Self::PauseFlow),
            "resume_flow" => Ok(Self::ResumeFlow),
            "polite_ack" => Ok(Self::PoliteAck),
            other => Err(UnknownTriggerName(other.to_owned())),
        }
    }
}

/// Point-in-time view of a flow instance. Field names are part of the tool
/// payload contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSnapshot {
    pub flow_state: FlowState,
    pub confused_count: u32,
    pub was_ever_interested: bool,
}

/// Result of firing a trigger, including any follow-up triggers chained by a
/// post-transition hook.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: FlowState,
    pub to: FlowState,
    pub trigger: FlowTrigger,
    pub fired: Vec<FlowTrigger>,
}

impl TransitionOutcome {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::{FlowState, FlowTrigger};

    #[test]
    fn state_names_round_trip() {
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
            assert_eq!(FlowState::from_str(state.as_str()), Ok(state));
        }
    }

    #[test]
    fn trigger_names_round_trip() {
        for trigger in [
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
        ] {
            assert_eq!(FlowTrigger::from_str(trigger.as_str()), Ok(trigger));
        }
    }

    #[test]
    fn auto_generated_alias_triggers_are_rejected() {
        assert!(FlowTrigger::from_str("to_interested").is_err());
        assert!(FlowTrigger::from_str("to_done").is_err());
    }

    #[test]
    fn serde_uses_snake_case_names() {
        let json = serde_json::to_string(&FlowState::ActionSqft).expect("serialize");
        assert_eq!(json, "\"action_sqft\"");
        let json = serde_json::to_string(&FlowTrigger::ReceivePositiveResponse).expect("serialize");
        assert_eq!(json, "\"receive_positive_response\"");
    }
}
