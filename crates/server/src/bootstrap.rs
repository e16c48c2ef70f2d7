use std::fs;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use winback_agent::llm::{GenerationError, OpenAiChatClient};
use winback_agent::runtime::AgentRuntime;
use winback_core::config::{AppConfig, ConfigError, LoadOptions};
use winback_db::{connect_with_settings, migrations, DbPool, SqlConversationStore};
use winback_sms::transport::{NoopSmsTransport, SmsTransport, TransportError, TwilioRestClient};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub store: Arc<SqlConversationStore>,
    pub runtime: Arc<AgentRuntime>,
    pub transport: Arc<dyn SmsTransport>,
    pub twilio_enabled: bool,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("generation client could not be constructed: {0}")]
    GenerationClient(#[from] GenerationError),
    #[error("sms transport could not be constructed: {0}")]
    Transport(#[from] TransportError),
    #[error("base prompt file could not be read: {0}")]
    BasePrompt(#[source] std::io::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let store = Arc::new(SqlConversationStore::new(db_pool.clone()));

    let client = Arc::new(OpenAiChatClient::from_config(&config.llm)?);
    let mut runtime = AgentRuntime::new(client, &config.conversation);
    if let Some(path) = &config.conversation.base_prompt_file {
        let base_prompt = fs::read_to_string(path).map_err(BootstrapError::BasePrompt)?;
        runtime = runtime.with_base_prompt(base_prompt);
    }

    let twilio_enabled = config.twilio.enabled();
    let transport: Arc<dyn SmsTransport> = if twilio_enabled {
        Arc::new(TwilioRestClient::from_config(&config.twilio)?)
    } else {
        Arc::new(NoopSmsTransport::new())
    };

    Ok(Application {
        config,
        db_pool,
        store,
        runtime: Arc::new(runtime),
        transport,
        twilio_enabled,
    })
}

#[cfg(test)]
mod tests {
    use winback_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn memory_options() -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:?cache=shared".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_defaults_to_noop_transport() {
        let app = bootstrap(memory_options()).await.expect("bootstrap");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('contact', 'flow_state', 'message', 'outreach_run')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("query sqlite_master");
        assert_eq!(table_count, 4, "bootstrap should expose the baseline tables");
        assert!(!app.twilio_enabled, "no twilio config means the noop transport");

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_partial_twilio_config() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                twilio_account_sid: Some("AC123".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("partial twilio config must fail").to_string();
        assert!(message.contains("twilio"));
    }
}
