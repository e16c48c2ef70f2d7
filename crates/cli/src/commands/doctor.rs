use serde::Serialize;

use winback_core::config::{AppConfig, LoadOptions};
use winback_db::{connect_with_settings, ping};

use crate::commands::CommandResult;

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: &'static str,
    detail: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    status: &'static str,
    checks: Vec<DoctorCheck>,
}

pub fn run(json: bool) -> CommandResult {
    let mut checks = Vec::new();

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config",
                status: "ok",
                detail: "configuration loaded and validated".to_string(),
            });
            Some(config)
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config",
                status: "error",
                detail: error.to_string(),
            });
            None
        }
    };

    if let Some(config) = &config {
        checks.push(DoctorCheck {
            name: "twilio",
            status: "ok",
            detail: if config.twilio.enabled() {
                "transport configured".to_string()
            } else {
                "not configured; sends run in no-op mode".to_string()
            },
        });

        checks.push(DoctorCheck {
            name: "llm",
            status: if config.llm.api_key.is_some() { "ok" } else { "warn" },
            detail: if config.llm.api_key.is_some() {
                format!("model {} via {}", config.llm.model, config.llm.base_url)
            } else {
                "no api key configured".to_string()
            },
        });

        let database_check = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime.block_on(async {
                match connect_with_settings(&config.database.url, 1, 5).await {
                    Ok(pool) => {
                        let result = ping(&pool).await;
                        pool.close().await;
                        match result {
                            Ok(_) => DoctorCheck {
                                name: "database",
                                status: "ok",
                                detail: format!("reachable at {}", config.database.url),
                            },
                            Err(error) => DoctorCheck {
                                name: "database",
                                status: "error",
                                detail: error.to_string(),
                            },
                        }
                    }
                    Err(error) => DoctorCheck {
                        name: "database",
                        status: "error",
                        detail: error.to_string(),
                    },
                }
            }),
            Err(error) => DoctorCheck {
                name: "database",
                status: "error",
                detail: format!("failed to initialize async runtime: {error}"),
            },
        };
        checks.push(database_check);
    }

    let failed = checks.iter().any(|check| check.status == "error");
    let report =
        DoctorReport { status: if failed { "degraded" } else { "ready" }, checks };

    let output = if json {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| error.to_string())
    } else {
        let mut lines = vec![format!("status: {}", report.status)];
        for check in &report.checks {
            lines.push(format!("  {:<10} {:<6} {}", check.name, check.status, check.detail));
        }
        lines.join("\n")
    };

    CommandResult { exit_code: u8::from(failed), output }
}
