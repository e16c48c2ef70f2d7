//! Core domain for the winback SMS re-engagement agent: the intention-flow
//! state machine, trigger coercion, reply templates, the persistence boundary
//! the rest of the system consumes, and shared config/error/audit plumbing.

pub mod audit;
pub mod config;
pub mod errors;
pub mod flows;
pub mod store;
pub mod templates;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use errors::{ApplicationError, InterfaceError};
pub use flows::{
    allowed_triggers, coerce_trigger, CoercionOutcome, FlowSnapshot, FlowState, FlowTransitionError,
    FlowTrigger, IntentionFlow, TransitionOutcome,
};
pub use store::{
    ConversationStore, MessageDirection, OutreachRunRecord, PersistedFlow, StoreError,
    StoredMessage,
};
pub use templates::{reply_for_state, FALLBACK_REPLY};
