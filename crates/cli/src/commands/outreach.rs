use std::fs;
use std::path::Path;
use std::sync::Arc;

use winback_core::config::{AppConfig, LoadOptions};
use winback_db::{connect_with_settings, migrations, SqlConversationStore};
use winback_sms::outreach::{OutreachCoordinator, OutreachTarget};
use winback_sms::transport::{NoopSmsTransport, SmsTransport, TwilioRestClient};

use crate::commands::CommandResult;

pub fn run(targets_path: &Path, max_active: Option<u64>, template: Option<&str>) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "outreach",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let targets = match read_targets(targets_path) {
        Ok(targets) => targets,
        Err(message) => {
            return CommandResult::failure("outreach", "targets_file", message, 2);
        }
    };
    if targets.is_empty() {
        return CommandResult::success("outreach", "no targets to contact");
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "outreach",
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

        let store = Arc::new(SqlConversationStore::new(pool.clone()));
        let transport: Arc<dyn SmsTransport> = if config.twilio.enabled() {
            Arc::new(
                TwilioRestClient::from_config(&config.twilio)
                    .map_err(|error| ("transport", error.to_string(), 6u8))?,
            )
        } else {
            // Without carrier credentials the run is a dry run; sends are
            // recorded but nothing leaves the machine.
            Arc::new(NoopSmsTransport::new())
        };

        let coordinator = OutreachCoordinator::new(store, transport)
            .with_max_active(config.conversation.max_active_outreach);
        let (summary, _dispatches) =
            coordinator.send_bulk(&targets, template, max_active).await;

        pool.close().await;
        serde_json::to_string(&summary)
            .map_err(|error| ("serialization", error.to_string(), 6u8))
    });

    match result {
        Ok(summary_json) => CommandResult::success("outreach", summary_json),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("outreach", error_class, message, exit_code)
        }
    }
}

fn read_targets(path: &Path) -> Result<Vec<OutreachTarget>, String> {
    let raw = fs::read_to_string(path)
        .map_err(|error| format!("could not read {}: {error}", path.display()))?;
    serde_json::from_str(&raw)
        .map_err(|error| format!("could not parse {}: {error}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use crate::commands::outreach::read_targets;

    #[test]
    fn targets_file_parses_a_json_array() {
        let mut file = tempfile_path("winback-targets-ok.json");
        write!(
            file.1,
            "[{{\"phone_number\": \"4805551000\", \"name\": \"Ana\"}}, \
              {{\"phone_number\": \"4805551001\"}}]"
        )
        .expect("write");

        let targets = read_targets(&file.0).expect("parse");
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].name.as_deref(), Some("Ana"));
        assert_eq!(targets[1].phone_number, "4805551001");

        let _ = std::fs::remove_file(&file.0);
    }

    #[test]
    fn unreadable_targets_file_reports_the_path() {
        let error =
            read_targets(std::path::Path::new("/nonexistent/targets.json")).expect_err("missing");
        assert!(error.contains("/nonexistent/targets.json"));
    }

    fn tempfile_path(name: &str) -> (std::path::PathBuf, std::fs::File) {
        let path = std::env::temp_dir().join(name);
        let file = std::fs::File::create(&path).expect("create temp file");
        (path, file)
    }
}
