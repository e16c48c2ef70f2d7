use std::collections::BTreeSet;
use std::str::FromStr;

use serde::Serialize;
use serde_json::{json, Value};

use winback_core::flows::{
    allowed_triggers, coerce_trigger, CoercionOutcome, FlowSnapshot, FlowState, FlowTrigger,
};
use winback_core::store::ConversationStore;
use winback_core::templates;

use crate::context::{ContextError, UserContext};
use crate::llm::ToolSpec;

pub const TOOL_GET_USER_CONTEXT: &str = "get_user_context";
pub const TOOL_UPDATE_FSM: &str = "update_fsm";
pub const TOOL_GET_FSM_REPLY: &str = "get_fsm_reply";

/// Classification hint surfaced with every context payload.
pub const NLU_HINT: &str = "If current_state is 'follow_up', map acknowledgements like \
                            'ok/thanks/got it' to 'polite_ack' or 'complete_flow', not \
                            'retry_confused'.";

/// Schemas for the three tools exposed to the generation service.
pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec::function(
            TOOL_GET_USER_CONTEXT,
            "Read the customer's current conversation state, the triggers valid from it, and \
             identity data. Never changes anything.",
            json!({ "type": "object", "properties": {}, "additionalProperties": false }),
        ),
        ToolSpec::function(
            TOOL_UPDATE_FSM,
            "Request a single state transition for this conversation. Returns whether it was \
             applied and the triggers valid from the resulting state.",
            json!({
                "type": "object",
                "properties": {
                    "event_name": {
                        "type": "string",
                        "description": "Trigger to fire, e.g. receive_positive_response."
                    },
                    "kwargs": {
                        "type": "object",
                        "description": "Optional trigger arguments.",
                        "additionalProperties": true
                    }
                },
                "required": ["event_name"]
            }),
        ),
        ToolSpec::function(
            TOOL_GET_FSM_REPLY,
            "Produce the customer-facing reply for the current state. Call this exactly once, \
             as the final step of the turn.",
            json!({ "type": "object", "properties": {}, "additionalProperties": false }),
        ),
    ]
}

fn sorted_trigger_names(triggers: &BTreeSet<FlowTrigger>) -> Vec<String> {
    let mut names: Vec<String> =
        triggers.iter().map(|trigger| trigger.as_str().to_owned()).collect();
    names.sort();
    names
}

/// Full context snapshot for the generation service. Read-only; a store
/// failure degrades to the in-memory state rather than failing the tool.
pub async fn user_context_payload(
    user: &mut UserContext,
    store: &dyn ConversationStore,
) -> Value {
    let current_state =
        user.current_state(store).await.unwrap_or_else(|_| user.fsm.state());
    let allowed = allowed_triggers(current_state);

    json!({
        "current_state": current_state,
        "allowed_triggers": sorted_trigger_names(&allowed),
        "phone_number": user.phone_number,
        "user_data": user.user_data,
        "twilio_data": user.twilio_data,
        "fsm": user.fsm_snapshot(),
        "nlu_hint": NLU_HINT,
    })
}

/// Outcome of one `update_fsm` attempt. Field sets differ per branch to
/// match the tool payload contract; `reason` distinguishes them.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum TransitionReport {
    Rejected {
        applied: bool,
        reason: &'static str,
        coercion: Option<&'static str>,
        event_requested: String,
        event_fired: Option<String>,
        state_before: FlowState,
        state_after: FlowState,
        allowed_triggers: Vec<String>,
        fsm: FlowSnapshot,
    },
    Fired {
        applied: bool,
        reason: Option<&'static str>,
        event: String,
        from_state: FlowState,
        to_state: FlowState,
        allowed_triggers: Vec<String>,
        fsm: FlowSnapshot,
    },
    Failed {
        applied: bool,
        reason: &'static str,
        error: String,
        event: String,
        from_state: FlowState,
        to_state: FlowState,
        allowed_triggers: Vec<String>,
        fsm: FlowSnapshot,
    },
}

impl TransitionReport {
    pub fn applied(&self) -> bool {
        match self {
            Self::Rejected { applied, .. }
            | Self::Fired { applied, .. }
            | Self::Failed { applied, .. } => *applied,
        }
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Self::Rejected { reason, .. } | Self::Failed { reason, .. } => Some(reason),
            Self::Fired { reason, .. } => *reason,
        }
    }
}

/// The transition transaction boundary: validate, coerce, fire, and report.
/// Never fails outward; every branch carries the allowed triggers for the
/// resulting state so the caller can self-correct without re-querying.
pub async fn update_fsm(
    user: &mut UserContext,
    store: &dyn ConversationStore,
    requested_name: &str,
    kwargs: Option<&Value>,
) -> TransitionReport {
    // Triggers take no arguments today; the field is accepted for protocol
    // compatibility.
    let _ = kwargs;

    let state_before = match user.current_state(store).await {
        Ok(state) => state,
        Err(_) => user.fsm.state(),
    };
    let snapshot_before = user.fsm_snapshot();
    let allowed = allowed_triggers(state_before);
    let allowed_names = sorted_trigger_names(&allowed);

    // A name that parses to no known trigger cannot match the allowed set;
    // it takes the same rejection path as a known-but-illegal trigger.
    let Ok(requested) = FlowTrigger::from_str(requested_name) else {
        return TransitionReport::Rejected {
            applied: false,
            reason: "invalid_trigger_for_state",
            coercion: None,
            event_requested: requested_name.to_owned(),
            event_fired: None,
            state_before,
            state_after: state_before,
            allowed_triggers: allowed_names,
            fsm: snapshot_before,
        };
    };

    let (final_trigger, coercion) = coerce_trigger(state_before, requested);

    // A deferred coercion is an instruction to refuse here: in pause nothing
    // but an explicit stop may fire, even though the static table would admit
    // more.
    let deferred = matches!(coercion, CoercionOutcome::DeferToValidation { .. });
    if deferred || (!allowed.is_empty() && !allowed.contains(&final_trigger)) {
        return TransitionReport::Rejected {
            applied: false,
            reason: "invalid_trigger_for_state",
            coercion: coercion.reason(),
            event_requested: requested.as_str().to_owned(),
            event_fired: None,
            state_before,
            state_after: state_before,
            allowed_triggers: allowed_names,
            fsm: snapshot_before,
        };
    }

    match user.trigger_event(final_trigger, store).await {
        Ok(outcome) => {
            let state_after = user.fsm.state();
            let changed = outcome.changed();
            TransitionReport::Fired {
                applied: changed,
                reason: if changed { None } else { Some("no_state_change") },
                event: final_trigger.as_str().to_owned(),
                from_state: state_before,
                to_state: state_after,
                allowed_triggers: sorted_trigger_names(&allowed_triggers(state_after)),
                fsm: user.fsm_snapshot(),
            }
        }
        Err(ContextError::Flow(error)) => TransitionReport::Failed {
            applied: false,
            reason: "machine_error",
            error: error.to_string(),
            event: final_trigger.as_str().to_owned(),
            from_state: state_before,
            to_state: state_before,
            allowed_triggers: allowed_names,
            fsm: snapshot_before,
        },
        Err(error) => {
            let error_type = match &error {
                ContextError::Store(_) => "StoreError",
                ContextError::Flow(_) => "FlowTransitionError",
                ContextError::UnknownTrigger(_) | ContextError::UnknownIntent(_) => "ContextError",
            };
            TransitionReport::Failed {
                applied: false,
                reason: "unexpected_error",
                error: format!("{error_type}: {error}"),
                event: final_trigger.as_str().to_owned(),
                from_state: state_before,
                to_state: state_before,
                allowed_triggers: allowed_names,
                fsm: snapshot_before,
            }
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct FsmReply {
    pub reply: String,
    pub fsm: FlowSnapshot,
}

/// The templated reply for the current snapshot. This is the only source of
/// outward-facing text; it cannot fail.
pub fn fsm_reply(user: &UserContext) -> FsmReply {
    let fsm = user.fsm_snapshot();
    FsmReply { reply: templates::reply_for_state(&fsm).to_owned(), fsm }
}
