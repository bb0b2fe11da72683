//! Tests for provisioning command execution.
//!
//! Commands run locally through the shell; their output lands in scratch
//! files.

use nspawn_fleet::provision::run_pipeline;
use nspawn_fleet::{CommandSpec, CommandStages, Error};
use std::net::IpAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::TempDir;
use tracing::Span;

fn shell(script: &str) -> CommandSpec {
    let mut cmd = CommandSpec::new(["sh", "-c", script]);
    cmd.local = true;
    cmd
}

fn append_to(log: &Path, tag: &str) -> CommandSpec {
    let mut cmd = shell(&format!("echo {}", tag));
    cmd.stdout_file = log.display().to_string();
    cmd.stdout_append = true;
    cmd
}

fn lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

// =============================================================================
// Pipeline Tests
// =============================================================================

#[tokio::test]
async fn test_pipeline_order_created_and_started() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("order.log");
    let stages = CommandStages {
        commands_pre: vec![append_to(&log, "P")],
        creation: vec![append_to(&log, "C")],
        startup: vec![append_to(&log, "S")],
        creation_post: vec![append_to(&log, "Q")],
        commands: vec![append_to(&log, "R")],
    };

    let pipeline = stages.assemble(true, true);
    run_pipeline(&pipeline, "web01.example.com", &[], &Span::none())
        .await
        .unwrap();

    assert_eq!(lines(&log), vec!["P", "C", "S", "Q", "R"]);
}

#[tokio::test]
async fn test_pipeline_aborts_on_first_failure() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("order.log");
    let stages = CommandStages {
        commands_pre: vec![append_to(&log, "P")],
        commands: vec![shell("exit 3"), append_to(&log, "R")],
        ..Default::default()
    };

    let pipeline = stages.assemble(false, false);
    let result = run_pipeline(&pipeline, "web01.example.com", &[], &Span::none()).await;

    match result {
        Err(Error::CommandFailed { program, .. }) => assert_eq!(program, "sh"),
        other => panic!("expected CommandFailed, got {:?}", other),
    }
    assert_eq!(lines(&log), vec!["P"]);
}

#[tokio::test]
async fn test_missing_program_is_spawn_error() {
    let mut cmd = CommandSpec::new(["/nonexistent/provision-step"]);
    cmd.local = true;

    let result = cmd.run("web01.example.com", &[]).await;

    assert!(matches!(result, Err(Error::CommandSpawn { .. })));
}

#[tokio::test]
async fn test_missing_stdin_file_is_spawn_error() {
    let dir = TempDir::new().unwrap();
    let mut cmd = shell("cat");
    cmd.stdin_file = dir.path().join("absent.txt").display().to_string();

    let result = cmd.run("web01.example.com", &[]).await;

    match result {
        Err(Error::CommandSpawn { reason, .. }) => assert!(reason.starts_with("stdin ")),
        other => panic!("expected CommandSpawn, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unwritable_stdout_is_spawn_error() {
    let dir = TempDir::new().unwrap();
    let mut cmd = shell("true");
    cmd.stdout_file = dir.path().join("no/such/dir/out").display().to_string();

    let result = cmd.run("web01.example.com", &[]).await;

    match result {
        Err(Error::CommandSpawn { reason, .. }) => assert!(reason.starts_with("stdout ")),
        other => panic!("expected CommandSpawn, got {:?}", other),
    }
}

// =============================================================================
// Argument Tests
// =============================================================================

#[tokio::test]
async fn test_appends_fqdn_and_addresses() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("args.out");
    let mut cmd = shell("echo \"$@\"");
    cmd.command.push("sh".to_string());
    cmd.append_fqdn = true;
    cmd.append_addr = true;
    cmd.stdout_file = out.display().to_string();

    let addrs: Vec<IpAddr> = vec!["203.0.113.5".parse().unwrap()];
    cmd.run("web01.example.com", &addrs).await.unwrap();

    assert_eq!(lines(&out), vec!["web01.example.com 203.0.113.5"]);
}

// =============================================================================
// Redirection Tests
// =============================================================================

#[tokio::test]
async fn test_inline_stdin() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("stdin.out");
    let mut cmd = shell("cat");
    cmd.stdin = "hello from stdin\n".to_string();
    cmd.stdout_file = out.display().to_string();

    cmd.run("m", &[]).await.unwrap();

    assert_eq!(lines(&out), vec!["hello from stdin"]);
}

#[tokio::test]
async fn test_stdin_file_wins_over_inline() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.txt");
    let out = dir.path().join("stdin.out");
    std::fs::write(&input, "from file\n").unwrap();

    let mut cmd = shell("cat");
    cmd.stdin = "inline\n".to_string();
    cmd.stdin_file = input.display().to_string();
    cmd.stdout_file = out.display().to_string();

    cmd.run("m", &[]).await.unwrap();

    assert_eq!(lines(&out), vec!["from file"]);
}

#[tokio::test]
async fn test_truncate_replaces_output() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("trunc.out");
    std::fs::write(&out, "old\nold\n").unwrap();

    let mut cmd = shell("echo new");
    cmd.stdout_file = out.display().to_string();
    cmd.run("m", &[]).await.unwrap();

    assert_eq!(lines(&out), vec!["new"]);
}

#[tokio::test]
async fn test_stderr_append() {
    let dir = TempDir::new().unwrap();
    let err = dir.path().join("err.out");

    let mut cmd = shell("echo oops >&2");
    cmd.stderr_file = err.display().to_string();
    cmd.stderr_append = true;
    cmd.run("m", &[]).await.unwrap();
    cmd.run("m", &[]).await.unwrap();

    assert_eq!(lines(&err), vec!["oops", "oops"]);
}

#[tokio::test]
async fn test_output_file_mode() {
    let dir = TempDir::new().unwrap();
    let default_mode = dir.path().join("default.out");
    let custom_mode = dir.path().join("custom.out");

    let mut cmd = shell("true");
    cmd.stdout_file = default_mode.display().to_string();
    cmd.run("m", &[]).await.unwrap();

    cmd.stdout_file = custom_mode.display().to_string();
    cmd.mode = Some(0o640);
    cmd.run("m", &[]).await.unwrap();

    let mode_of = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode_of(&default_mode), 0o600);
    // The process umask can only clear bits.
    assert_eq!(mode_of(&custom_mode) & !0o640, 0);
}
