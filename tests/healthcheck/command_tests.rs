use std::time::Duration;

use cabourotte::healthcheck::{CheckConfig, CommandCheck, CommandCheckConfig};
use cabourotte::registry::execute_with_deadline;

use crate::common::base;

fn command_config(name: &str, command: &str, arguments: &[&str]) -> CommandCheckConfig {
    CommandCheckConfig {
        base: base(name),
        command: command.to_string(),
        arguments: arguments.iter().map(|s| s.to_string()).collect(),
    }
}

#[tokio::test]
async fn test_command_check_success() {
    let check = CommandCheck::new(command_config("c1", "true", &[]));
    assert!(check.execute().await.is_ok());
}

#[tokio::test]
async fn test_command_check_nonzero_exit() {
    let check = CommandCheck::new(command_config("c1", "false", &[]));
    let err = check.execute().await.unwrap_err().to_string();
    assert!(err.contains("exit code 1"), "{}", err);
}

#[tokio::test]
async fn test_command_check_captures_stderr_and_exit_code() {
    let check = CommandCheck::new(command_config(
        "c1",
        "sh",
        &["-c", "echo boom >&2; exit 3"],
    ));
    let err = check.execute().await.unwrap_err().to_string();
    assert!(err.contains("exit code 3"), "{}", err);
    assert!(err.contains("boom"), "{}", err);
}

#[tokio::test]
async fn test_command_check_spawn_error() {
    let check = CommandCheck::new(command_config("c1", "/nonexistent/cabourotte-probe", &[]));
    let err = check.execute().await.unwrap_err().to_string();
    assert!(err.contains("cannot execute"), "{}", err);
}

#[tokio::test]
async fn test_command_check_deadline() {
    let config = command_config("c1", "sleep", &["5"]);
    let check = CheckConfig::Command(config).build();
    let outcome = execute_with_deadline(&check, Some(Duration::from_millis(200))).await;
    let err = outcome.unwrap_err().to_string();
    assert!(err.contains("timed out"), "{}", err);
}
