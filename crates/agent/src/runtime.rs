use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use winback_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use winback_core::config::ConversationConfig;
use winback_core::store::{ConversationStore, StoreError};

use crate::context::UserContext;
use crate::llm::{ChatMessage, GenerationClient, GenerationError, ToolChoice};
use crate::tools::{
    fsm_reply, tool_specs, update_fsm, user_context_payload, TOOL_GET_FSM_REPLY,
    TOOL_GET_USER_CONTEXT, TOOL_UPDATE_FSM,
};

/// Instructions sent as the system message when no base prompt file is
/// configured.
pub const DEFAULT_BASE_PROMPT: &str = "\
You are the conversation controller for an SMS re-engagement assistant that checks in with \
past pest-control customers. You never write the customer-facing text yourself; the reply \
always comes from the conversation state. On each turn: call get_user_context to read the \
current state and the triggers valid from it, classify the customer's message as one of \
those triggers, apply it with update_fsm, and finish by calling get_fsm_reply. If update_fsm \
reports applied=false, re-read the context and choose a valid trigger instead of answering \
in prose. Follow the nlu_hint field when classifying short acknowledgements.";

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Deserialize)]
struct UpdateFsmArgs {
    event_name: String,
    #[serde(default)]
    kwargs: Option<Value>,
}

/// Drives the tool-calling loop against the generation service. Every reply
/// this produces is templated from flow state; the service's free text is
/// never forwarded to a customer.
pub struct AgentRuntime {
    client: Arc<dyn GenerationClient>,
    audit: Arc<dyn AuditSink>,
    base_prompt: String,
    readback_limit: u32,
    max_tool_rounds: u32,
}

impl AgentRuntime {
    pub fn new(client: Arc<dyn GenerationClient>, conversation: &ConversationConfig) -> Self {
        Self {
            client,
            audit: Arc::new(TracingAuditSink),
            base_prompt: DEFAULT_BASE_PROMPT.to_owned(),
            readback_limit: conversation.readback_limit,
            max_tool_rounds: conversation.max_tool_rounds,
        }
    }

    pub fn with_base_prompt(mut self, base_prompt: impl Into<String>) -> Self {
        self.base_prompt = base_prompt.into();
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Run one conversation turn. Returns the outward-facing reply; the
    /// caller is responsible for persisting and sending it.
    pub async fn generate_response(
        &self,
        user_input: &str,
        user: &mut UserContext,
        store: &dyn ConversationStore,
    ) -> Result<String, OrchestratorError> {
        let correlation_id = Uuid::new_v4().to_string();

        let mut messages = vec![ChatMessage::system(&self.base_prompt)];
        for stored in store.recent_messages(&user.phone_number, self.readback_limit).await? {
            messages.push(ChatMessage::stored(stored.role, stored.content));
        }
        messages.push(ChatMessage::user(user_input));

        let tools = tool_specs();
        let mut force_tool_next = false;

        // First round always requires tool usage.
        let mut turn = self.client.chat(&messages, &tools, ToolChoice::Required).await?;
        let mut rounds = 1u32;

        loop {
            if !turn.tool_calls.is_empty() {
                messages.push(ChatMessage::assistant_tool_calls(turn.tool_calls.clone()));
                force_tool_next = false;

                for call in &turn.tool_calls {
                    let tool_name = call.function.name.as_str();
                    let result = match tool_name {
                        TOOL_GET_USER_CONTEXT => {
                            user_context_payload(user, store).await.to_string()
                        }
                        TOOL_UPDATE_FSM => {
                            match serde_json::from_str::<UpdateFsmArgs>(&call.function.arguments) {
                                Ok(args) => {
                                    let report = update_fsm(
                                        user,
                                        store,
                                        &args.event_name,
                                        args.kwargs.as_ref(),
                                    )
                                    .await;
                                    self.audit.emit(
                                        AuditEvent::new(
                                            Some(user.phone_number.clone()),
                                            correlation_id.clone(),
                                            if report.applied() {
                                                "flow.transition_applied"
                                            } else {
                                                "flow.transition_refused"
                                            },
                                            AuditCategory::Flow,
                                            if report.applied() {
                                                AuditOutcome::Success
                                            } else {
                                                AuditOutcome::Rejected
                                            },
                                        )
                                        .with_metadata("event_requested", args.event_name.as_str())
                                        .with_metadata(
                                            "reason",
                                            report.reason().unwrap_or("applied"),
                                        ),
                                    );
                                    if !report.applied() {
                                        // Do not let the service answer in
                                        // prose right after a refused or
                                        // no-op transition.
                                        force_tool_next = true;
                                    }
                                    serde_json::to_string(&report).unwrap_or_else(|error| {
                                        json!({ "error": error.to_string() }).to_string()
                                    })
                                }
                                Err(error) => json!({
                                    "error": format!("malformed arguments for update_fsm: {error}")
                                })
                                .to_string(),
                            }
                        }
                        TOOL_GET_FSM_REPLY => {
                            // Short-circuit: this is the sole path producing
                            // the outward reply when tools are used correctly.
                            let reply = fsm_reply(user);
                            return Ok(reply.reply);
                        }
                        unknown => {
                            json!({ "error": format!("unknown tool {unknown}") }).to_string()
                        }
                    };
                    messages.push(ChatMessage::tool_result(call.id.clone(), tool_name, result));
                }

                if rounds >= self.max_tool_rounds {
                    break;
                }
                let tool_choice =
                    if force_tool_next { ToolChoice::Required } else { ToolChoice::Auto };
                turn = self.client.chat(&messages, &tools, tool_choice).await?;
                rounds += 1;
                continue;
            }

            // The service produced no tool calls.
            if force_tool_next && rounds < self.max_tool_rounds {
                force_tool_next = false;
                turn = self.client.chat(&messages, &tools, ToolChoice::Required).await?;
                rounds += 1;
                continue;
            }

            break;
        }

        // Protocol violation or round budget exhausted: fall back to the
        // templated reply for the current persisted state.
        self.audit.emit(AuditEvent::new(
            Some(user.phone_number.clone()),
            correlation_id,
            "generation.fallback_reply",
            AuditCategory::Generation,
            AuditOutcome::Failed,
        ));
        user.current_state(store).await?;
        Ok(fsm_reply(user).reply)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use winback_core::audit::InMemoryAuditSink;
    use winback_core::config::ConversationConfig;
    use winback_core::flows::FlowState;
    use winback_core::store::ConversationStore;
    use winback_db::MemoryConversationStore;

    use crate::context::UserContext;
    use crate::llm::{ChatTurn, ScriptedGenerationClient, ToolCallRequest, ToolChoice};
    use crate::runtime::{AgentRuntime, OrchestratorError};

    fn conversation_config() -> ConversationConfig {
        ConversationConfig {
            readback_limit: 15,
            max_tool_rounds: 8,
            intro_message: String::new(),
            base_prompt_file: None,
            max_active_outreach: None,
        }
    }

    fn runtime(client: Arc<ScriptedGenerationClient>) -> AgentRuntime {
        AgentRuntime::new(client, &conversation_config())
    }

    fn call(id: &str, name: &str, arguments: &str) -> ToolCallRequest {
        ToolCallRequest::function(id, name, arguments)
    }

    #[tokio::test]
    async fn happy_path_short_circuits_on_get_fsm_reply() {
        let store = MemoryConversationStore::new();
        let mut user = UserContext::load("4805553000", &store).await.expect("load");

        let client = Arc::new(ScriptedGenerationClient::new([
            ChatTurn::tools(vec![
                call("c1", "get_user_context", "{}"),
                call("c2", "update_fsm", "{\"event_name\":\"receive_positive_response\"}"),
            ]),
            ChatTurn::tools(vec![call("c3", "get_fsm_reply", "{}")]),
            // Never reached; the loop must stop at get_fsm_reply.
            ChatTurn::text("leftover"),
        ]));

        let reply = runtime(client.clone())
            .generate_response("yes still seeing ants", &mut user, &store)
            .await
            .expect("reply");

        assert!(reply.contains("square feet"));
        assert_eq!(user.fsm.state(), FlowState::Interested);
        assert_eq!(client.remaining_turns(), 1, "no further service calls after short-circuit");
        assert_eq!(client.requested_choices(), vec![ToolChoice::Required, ToolChoice::Auto]);
    }

    #[tokio::test]
    async fn get_fsm_reply_short_circuits_even_mid_batch() {
        let store = MemoryConversationStore::new();
        let mut user = UserContext::load("4805553001", &store).await.expect("load");

        let client = Arc::new(ScriptedGenerationClient::new([ChatTurn::tools(vec![
            call("c1", "get_fsm_reply", "{}"),
            call("c2", "update_fsm", "{\"event_name\":\"user_stopped\"}"),
        ])]));

        let reply = runtime(client)
            .generate_response("hello", &mut user, &store)
            .await
            .expect("reply");

        assert!(reply.contains("Quick check-in"));
        assert_eq!(user.fsm.state(), FlowState::Start, "calls after the short-circuit never run");
    }

    #[tokio::test]
    async fn rejected_transition_forces_a_required_tool_round() {
        let store = MemoryConversationStore::new();
        store.put_flow_state("4805553002", FlowState::Pause, false).await.expect("seed");
        let mut user = UserContext::load("4805553002", &store).await.expect("load");

        let client = Arc::new(ScriptedGenerationClient::new([
            ChatTurn::tools(vec![call(
                "c1",
                "update_fsm",
                "{\"event_name\":\"receive_positive_response\"}",
            )]),
            ChatTurn::tools(vec![call("c2", "get_fsm_reply", "{}")]),
        ]));

        let reply = runtime(client.clone())
            .generate_response("sounds good", &mut user, &store)
            .await
            .expect("reply");

        assert!(reply.contains("pause"));
        assert_eq!(user.fsm.state(), FlowState::Pause);
        assert_eq!(
            client.requested_choices(),
            vec![ToolChoice::Required, ToolChoice::Required],
            "a refused transition forbids a free-text round"
        );
    }

    #[tokio::test]
    async fn free_text_after_rejection_is_forced_back_into_tools() {
        let store = MemoryConversationStore::new();
        store.put_flow_state("4805553003", FlowState::Pause, false).await.expect("seed");
        let mut user = UserContext::load("4805553003", &store).await.expect("load");

        let client = Arc::new(ScriptedGenerationClient::new([
            ChatTurn::tools(vec![call(
                "c1",
                "update_fsm",
                "{\"event_name\":\"retry_confused\"}",
            )]),
            // Violation: plain text right after a refusal.
            ChatTurn::text("Sure, marking you as interested!"),
            ChatTurn::tools(vec![call("c2", "get_fsm_reply", "{}")]),
        ]));

        let reply = runtime(client.clone())
            .generate_response("umm", &mut user, &store)
            .await
            .expect("reply");

        assert!(reply.contains("pause"));
        assert_eq!(
            client.requested_choices(),
            vec![ToolChoice::Required, ToolChoice::Required, ToolChoice::Required],
        );
    }

    #[tokio::test]
    async fn zero_tool_calls_falls_back_to_templated_state_reply() {
        let store = MemoryConversationStore::new();
        store.put_flow_state("4805553004", FlowState::FollowUp, true).await.expect("seed");
        let mut user = UserContext::load("4805553004", &store).await.expect("load");

        let audit = InMemoryAuditSink::default();
        let client = Arc::new(ScriptedGenerationClient::new([ChatTurn::text(
            "I think we should chat about your pest problem!",
        )]));

        let reply = runtime(client)
            .with_audit(Arc::new(audit.clone()))
            .generate_response("ok", &mut user, &store)
            .await
            .expect("reply");

        assert_eq!(reply, "Thanks I've noted those details. We will reach out with a booking");
        assert!(audit
            .events()
            .iter()
            .any(|event| event.event_type == "generation.fallback_reply"));
    }

    #[tokio::test]
    async fn fallback_reply_reflects_persisted_state_not_memory() {
        let store = MemoryConversationStore::new();
        let mut user = UserContext::load("4805553005", &store).await.expect("load");

        // Persisted state moves after the context was constructed.
        store.put_flow_state("4805553005", FlowState::Stop, false).await.expect("seed");

        let client = Arc::new(ScriptedGenerationClient::new([ChatTurn::text("free text")]));
        let reply = runtime(client)
            .generate_response("hi", &mut user, &store)
            .await
            .expect("reply");

        assert_eq!(reply, "You're opted out");
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_payload_and_loop_continues() {
        let store = MemoryConversationStore::new();
        let mut user = UserContext::load("4805553006", &store).await.expect("load");

        let client = Arc::new(ScriptedGenerationClient::new([
            ChatTurn::tools(vec![call("c1", "send_discount_code", "{}")]),
            ChatTurn::tools(vec![call("c2", "get_fsm_reply", "{}")]),
        ]));

        let reply = runtime(client.clone())
            .generate_response("hi", &mut user, &store)
            .await
            .expect("reply");

        assert!(reply.contains("Quick check-in"));
        assert_eq!(client.remaining_turns(), 0);
    }

    #[tokio::test]
    async fn malformed_tool_arguments_yield_error_payload_not_crash() {
        let store = MemoryConversationStore::new();
        let mut user = UserContext::load("4805553007", &store).await.expect("load");

        let client = Arc::new(ScriptedGenerationClient::new([
            ChatTurn::tools(vec![call("c1", "update_fsm", "{\"event\": \"oops\"")]),
            ChatTurn::tools(vec![call("c2", "get_fsm_reply", "{}")]),
        ]));

        let reply = runtime(client)
            .generate_response("hi", &mut user, &store)
            .await
            .expect("reply");

        assert!(reply.contains("Quick check-in"));
        assert_eq!(user.fsm.state(), FlowState::Start, "nothing fired");
    }

    #[tokio::test]
    async fn round_budget_exhaustion_degrades_to_templated_reply() {
        let store = MemoryConversationStore::new();
        let mut user = UserContext::load("4805553008", &store).await.expect("load");

        let mut config = conversation_config();
        config.max_tool_rounds = 2;
        let client = Arc::new(ScriptedGenerationClient::new([
            ChatTurn::tools(vec![call("c1", "get_user_context", "{}")]),
            ChatTurn::tools(vec![call("c2", "get_user_context", "{}")]),
            ChatTurn::tools(vec![call("c3", "get_user_context", "{}")]),
        ]));

        let runtime = AgentRuntime::new(client.clone(), &config);
        let reply = runtime.generate_response("hi", &mut user, &store).await.expect("reply");

        assert!(reply.contains("Quick check-in"));
        assert_eq!(client.remaining_turns(), 1, "loop stops at the round budget");
    }

    #[tokio::test]
    async fn service_unavailability_surfaces_as_generation_error() {
        let store = MemoryConversationStore::new();
        let mut user = UserContext::load("4805553009", &store).await.expect("load");

        let client = Arc::new(ScriptedGenerationClient::new([]));
        let error = runtime(client)
            .generate_response("hi", &mut user, &store)
            .await
            .expect_err("empty script means the service is down");

        assert!(matches!(error, OrchestratorError::Generation(_)));
    }

    #[tokio::test]
    async fn readback_window_is_included_in_the_prompt() {
        // The scripted client cannot inspect messages, so this exercises the
        // store path end to end: a prior turn is readable and the loop still
        // produces a state reply.
        let store = MemoryConversationStore::new();
        store
            .append_message(
                "4805553010",
                "assistant",
                "Hey! Quick check-in—are you still seeing any pest activity?",
                winback_core::store::MessageDirection::Outbound,
            )
            .await
            .expect("seed history");
        let mut user = UserContext::load("4805553010", &store).await.expect("load");

        let client = Arc::new(ScriptedGenerationClient::new([
            ChatTurn::tools(vec![
                call("c1", "update_fsm", "{\"event_name\":\"receive_positive_response\"}"),
            ]),
            ChatTurn::tools(vec![call("c2", "get_fsm_reply", "{}")]),
        ]));

        let reply = runtime(client)
            .generate_response("yes", &mut user, &store)
            .await
            .expect("reply");
        assert!(reply.contains("square feet"));
        assert_eq!(user.fsm.state(), FlowState::Interested);
    }
}
