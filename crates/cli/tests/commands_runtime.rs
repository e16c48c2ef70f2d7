use winback_cli::commands::console::is_stop_keyword;
use winback_cli::commands::CommandResult;

#[test]
fn stop_keywords_cover_the_console_exit_vocabulary() {
    for keyword in ["stop", "STOP", "exit", "Quit"] {
        assert!(is_stop_keyword(keyword), "{keyword}");
    }
    assert!(!is_stop_keyword("stopping"));
    assert!(!is_stop_keyword("yes"));
}

#[test]
fn command_results_serialize_to_structured_json() {
    let success = CommandResult::success("migrate", "applied pending migrations");
    assert_eq!(success.exit_code, 0);
    let payload: serde_json::Value = serde_json::from_str(&success.output).expect("json");
    assert_eq!(payload["command"], "migrate");
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["error_class"], serde_json::Value::Null);

    let failure = CommandResult::failure("doctor", "db_connectivity", "no such host", 4);
    assert_eq!(failure.exit_code, 4);
    let payload: serde_json::Value = serde_json::from_str(&failure.output).expect("json");
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["error_class"], "db_connectivity");
}
