//! Agent runtime - the tool-calling loop between the generation service and
//! the intention-flow state machine.
//!
//! # Safety principle
//!
//! The generation service is strictly a classifier. It never writes the
//! customer-facing text: every outward reply is templated from the flow
//! state, either through the `get_fsm_reply` short-circuit or the fallback
//! path when the service misbehaves.
//!
//! # Key types
//!
//! - `AgentRuntime` - drives one conversation turn (see `runtime`)
//! - `GenerationClient` - pluggable chat-with-tools client (see `llm`)
//! - `UserContext` - per-phone aggregate binding flow to persistence
//! - `update_fsm` - the transition transaction boundary (see `tools`)

pub mod context;
pub mod llm;
pub mod runtime;
pub mod tools;

pub use context::{trigger_for_intent, ContextError, TwilioData, UserContext, UserProfile};
pub use llm::{
    ChatMessage, ChatTurn, FunctionCall, GenerationClient, GenerationError, OpenAiChatClient,
    ScriptedGenerationClient, ToolCallRequest, ToolChoice, ToolSpec,
};
pub use runtime::{AgentRuntime, OrchestratorError, DEFAULT_BASE_PROMPT};
pub use tools::{fsm_reply, tool_specs, update_fsm, user_context_payload, FsmReply, TransitionReport, NLU_HINT};
