use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use winback_core::flows::{
    FlowSnapshot, FlowState, FlowTransitionError, FlowTrigger, IntentionFlow, TransitionOutcome,
};
use winback_core::store::{ConversationStore, StoreError};
use winback_core::templates;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TwilioData {
    pub last_sid: Option<String>,
    pub last_message: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub name: Option<String>,
    pub previous_services: Option<String>,
    pub days_since_cancelled: Option<i64>,
    pub last_service: Option<String>,
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Flow(#[from] FlowTransitionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The trigger name does not exist on the machine at all. This is a
    /// wiring bug in the caller, not a model-data problem, and is not
    /// absorbed the way "not legal right now" is.
    #[error("no flow trigger named `{0}`")]
    UnknownTrigger(String),
    #[error("no trigger mapped for intent `{0}`")]
    UnknownIntent(String),
}

/// Per-phone aggregate binding the state machine to identity, delivery
/// metadata, and persistence. Constructed per inbound message or outreach
/// send and dropped at the end of the turn; the store is the source of truth
/// between turns.
#[derive(Debug)]
pub struct UserContext {
    pub phone_number: String,
    pub fsm: IntentionFlow,
    pub twilio_data: TwilioData,
    pub user_data: UserProfile,
}

impl UserContext {
    /// Ensure the identity row exists and hydrate the flow from persisted
    /// state. A persisted interest flag always propagates into memory; an
    /// unreadable persisted state falls back to a fresh flow rather than
    /// failing the turn.
    pub async fn load(
        phone: impl Into<String>,
        store: &dyn ConversationStore,
    ) -> Result<Self, StoreError> {
        let phone = phone.into();
        store.ensure_contact(&phone).await?;

        let mut fsm = IntentionFlow::new(phone.clone());
        match store.flow_state(&phone).await {
            Ok(Some(persisted)) => {
                fsm.rebase(persisted.statename);
                if persisted.was_interested {
                    fsm.mark_interested();
                }
            }
            Ok(None) => {}
            Err(StoreError::Decode(detail)) => {
                tracing::warn!(
                    event_name = "context.flow_state_undecodable",
                    phone_number = %phone,
                    detail = %detail,
                    "starting from a fresh flow"
                );
            }
            Err(error) => return Err(error),
        }

        Ok(Self {
            phone_number: phone,
            fsm,
            twilio_data: TwilioData::default(),
            user_data: UserProfile::default(),
        })
    }

    /// Reconcile the in-memory flow with the persisted row and return the
    /// current state. The persisted state wins on divergence; the interest
    /// flag is sticky in both directions.
    pub async fn current_state(
        &mut self,
        store: &dyn ConversationStore,
    ) -> Result<FlowState, StoreError> {
        match store.flow_state(&self.phone_number).await {
            Ok(None) => {
                store
                    .put_flow_state(
                        &self.phone_number,
                        self.fsm.state(),
                        self.fsm.was_ever_interested(),
                    )
                    .await?;
                Ok(self.fsm.state())
            }
            Ok(Some(persisted)) => {
                if persisted.was_interested {
                    self.fsm.mark_interested();
                }
                if persisted.statename != self.fsm.state() {
                    self.fsm.rebase(persisted.statename);
                }
                if self.fsm.was_ever_interested() && !persisted.was_interested {
                    store
                        .put_flow_state(&self.phone_number, self.fsm.state(), true)
                        .await?;
                }
                Ok(self.fsm.state())
            }
            Err(StoreError::Decode(detail)) => {
                tracing::warn!(
                    event_name = "context.flow_state_undecodable",
                    phone_number = %self.phone_number,
                    detail = %detail,
                    "keeping in-memory state"
                );
                Ok(self.fsm.state())
            }
            Err(error) => Err(error),
        }
    }

    pub fn fsm_snapshot(&self) -> FlowSnapshot {
        self.fsm.snapshot()
    }

    /// Fire a trigger and persist the resulting state. The flow refuses
    /// illegal triggers before any mutation; a persistence failure after a
    /// successful fire surfaces as a store error and is reconciled away on
    /// the next `current_state` read.
    pub async fn trigger_event(
        &mut self,
        trigger: FlowTrigger,
        store: &dyn ConversationStore,
    ) -> Result<TransitionOutcome, ContextError> {
        let outcome = self.fsm.fire(trigger)?;
        store
            .put_flow_state(&self.phone_number, self.fsm.state(), self.fsm.was_ever_interested())
            .await?;
        Ok(outcome)
    }

    pub async fn trigger_event_by_name(
        &mut self,
        name: &str,
        store: &dyn ConversationStore,
    ) -> Result<TransitionOutcome, ContextError> {
        let trigger = FlowTrigger::from_str(name)
            .map_err(|_| ContextError::UnknownTrigger(name.to_owned()))?;
        self.trigger_event(trigger, store).await
    }

    /// Map a high-level intent word onto a trigger and fire it.
    pub async fn change_state_from_intent(
        &mut self,
        intent: &str,
        store: &dyn ConversationStore,
    ) -> Result<TransitionOutcome, ContextError> {
        let trigger = trigger_for_intent(intent)
            .ok_or_else(|| ContextError::UnknownIntent(intent.to_owned()))?;
        self.trigger_event(trigger, store).await
    }

    pub fn reply_for_state(&self) -> &'static str {
        templates::reply_for_state(&self.fsm.snapshot())
    }

    pub fn set_user_info(
        &mut self,
        name: &str,
        services: &[String],
        days_since_cancelled: i64,
        last_service: &str,
    ) {
        self.user_data.name = Some(name.to_owned());
        self.user_data.previous_services = Some(services.join(", "));
        self.user_data.days_since_cancelled = Some(days_since_cancelled);
        self.user_data.last_service = Some(last_service.to_owned());
    }

    pub fn set_twilio_sid(&mut self, sid: impl Into<String>) {
        self.twilio_data.last_sid = Some(sid.into());
    }

    pub fn set_twilio_message(&mut self, message: impl Into<String>) {
        self.twilio_data.last_message = Some(message.into());
    }
}

pub fn trigger_for_intent(intent: &str) -> Option<FlowTrigger> {
    match intent {
        "yes" => Some(FlowTrigger::ReceivePositiveResponse),
        "no" => Some(FlowTrigger::ReceiveNegativeResponse),
        "stop" => Some(FlowTrigger::UserStopped),
        "confused" => Some(FlowTrigger::RetryConfused),
        "resume" => Some(FlowTrigger::ResumeFlow),
        "sqft_ready" => Some(FlowTrigger::GoToSqft),
        "followup" => Some(FlowTrigger::ReceiveFollowup),
        "complete" => Some(FlowTrigger::CompleteFlow),
        _ => None,
    }
}
