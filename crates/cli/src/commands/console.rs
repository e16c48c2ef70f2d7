use std::io::{self, BufRead, Write};
use std::sync::Arc;

use winback_agent::context::UserContext;
use winback_agent::llm::OpenAiChatClient;
use winback_agent::runtime::{AgentRuntime, OrchestratorError};
use winback_core::config::{AppConfig, LoadOptions};
use winback_core::flows::FlowTrigger;
use winback_core::store::{ConversationStore, MessageDirection};
use winback_core::templates::FALLBACK_REPLY;
use winback_db::{connect_with_settings, migrations, SqlConversationStore};

use crate::commands::CommandResult;

/// Keywords that end the console session by opting the user out.
pub fn is_stop_keyword(text: &str) -> bool {
    matches!(text.to_ascii_lowercase().as_str(), "exit" | "quit" | "stop")
}

pub fn run(phone: &str, reset: bool) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "console",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "console",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let store = SqlConversationStore::new(pool.clone());
        let client = Arc::new(
            OpenAiChatClient::from_config(&config.llm)
                .map_err(|error| ("generation_client", error.to_string(), 6u8))?,
        );
        let agent = AgentRuntime::new(client, &config.conversation);

        if reset {
            store
                .reset_conversation(phone)
                .await
                .map_err(|error| ("reset", error.to_string(), 7u8))?;
        }

        let mut user = UserContext::load(phone, &store)
            .await
            .map_err(|error| ("user_context", error.to_string(), 7u8))?;

        println!();
        println!("--- winback SMS conversation simulator ---");

        let intro = config.conversation.intro_message.clone();
        if !intro.is_empty() {
            store
                .append_message(phone, "assistant", &intro, MessageDirection::Outbound)
                .await
                .map_err(|error| ("message_log", error.to_string(), 7u8))?;
            println!("Agent: {intro}");
        }

        let stdin = io::stdin();
        let mut turns = 0u64;
        loop {
            match user.current_state(&store).await {
                Ok(state) if state.is_resting() => break,
                Ok(_) => {}
                Err(error) => return Err(("state_read", error.to_string(), 7u8)),
            }

            print!("You: ");
            let _ = io::stdout().flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
                break;
            }
            let text = line.trim();
            if text.is_empty() {
                continue;
            }

            if is_stop_keyword(text) {
                store
                    .append_message(phone, "user", text, MessageDirection::Inbound)
                    .await
                    .map_err(|error| ("message_log", error.to_string(), 7u8))?;
                user.trigger_event(FlowTrigger::UserStopped, &store)
                    .await
                    .map_err(|error| ("stop_trigger", error.to_string(), 7u8))?;
                println!("Agent: {}", user.reply_for_state());
                break;
            }

            store
                .append_message(phone, "user", text, MessageDirection::Inbound)
                .await
                .map_err(|error| ("message_log", error.to_string(), 7u8))?;

            let reply = match agent.generate_response(text, &mut user, &store).await {
                Ok(reply) => reply,
                Err(OrchestratorError::Generation(error)) => {
                    eprintln!("(generation degraded: {error})");
                    FALLBACK_REPLY.to_owned()
                }
                Err(OrchestratorError::Store(error)) => {
                    return Err(("state_write", error.to_string(), 7u8));
                }
            };

            store
                .append_message(phone, "assistant", &reply, MessageDirection::Outbound)
                .await
                .map_err(|error| ("message_log", error.to_string(), 7u8))?;

            let snapshot = serde_json::to_string(&user.fsm_snapshot())
                .unwrap_or_else(|_| "<unavailable>".to_owned());
            println!("Snapshot: {snapshot}");
            println!("Agent: {reply}");
            println!();
            turns += 1;
        }

        pool.close().await;
        Ok::<u64, (&'static str, String, u8)>(turns)
    });

    match result {
        Ok(turns) => {
            CommandResult::success("console", format!("conversation ended after {turns} turns"))
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("console", error_class, message, exit_code)
        }
    }
}
