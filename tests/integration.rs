//! Integration tests for the fibpipe CLI.
//!
//! These run the real binary: the server re-executes it as the interface, so
//! every end-to-end test exercises both processes, the FIFO and the reaping.

use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command as StdCommand, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

/// Get a command for the fibpipe binary.
fn fibpipe() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("fibpipe").unwrap();
    cmd.env_remove("FIBPIPE_PIPE")
        .env_remove("FIBPIPE_LOG")
        .env_remove("RUST_LOG")
        .timeout(Duration::from_secs(120));
    cmd
}

/// A server run with colors off, a short drain interval and the given input.
fn serve(pipe: &Path, extra: &[&str], input: &str) -> Command {
    let mut cmd = fibpipe();
    cmd.arg("--no-color")
        .args(["serve", "100", "--drain-interval", "50", "--pipe"])
        .arg(pipe)
        .args(extra)
        .write_stdin(input);
    cmd
}

fn occurrences(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

#[test]
fn test_help() {
    fibpipe()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("interface"));
}

#[test]
fn test_version() {
    fibpipe()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_serve_computes_each_request_once() {
    let dir = tempdir().unwrap();
    let pipe = dir.path().join("requests.fifo");

    let output = serve(&pipe, &[], "10\n20\n0\n").output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "stdout: {stdout}");
    assert_eq!(occurrences(&stdout, "S: Fibonacci 10 is 55"), 1, "{stdout}");
    assert_eq!(occurrences(&stdout, "S: Fibonacci 20 is 6765"), 1, "{stdout}");
    assert_eq!(occurrences(&stdout, "Created and detached the worker"), 2);
    assert!(stdout.contains("S: Setting CPU limit to 100s"));
    assert!(stdout.contains("Received 10 from interface"));
    assert!(stdout.contains("I: Interface is exiting"));
    assert!(stdout.contains("exited with code 0"));
    assert!(!pipe.exists(), "FIFO should be removed");
}

#[test]
fn test_serve_sentinel_first() {
    let dir = tempdir().unwrap();
    let pipe = dir.path().join("requests.fifo");

    serve(&pipe, &[], "0\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created and detached").not())
        .stdout(predicate::str::contains("Resource usage"));
    assert!(!pipe.exists());
}

#[test]
fn test_serve_strict_rejects_garbage() {
    let dir = tempdir().unwrap();
    let pipe = dir.path().join("requests.fifo");

    serve(&pipe, &[], "abc\n7\n0\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Ignoring input"))
        .stdout(predicate::str::contains("Fibonacci 7 is 13"));
}

#[test]
fn test_serve_lenient_garbage_ends_input() {
    let dir = tempdir().unwrap();
    let pipe = dir.path().join("requests.fifo");

    serve(&pipe, &["--lenient"], "4\nabc\n9\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Fibonacci 4 is 3"))
        .stdout(predicate::str::contains("Fibonacci 9").not());
}

#[test]
fn test_serve_end_of_input_acts_as_sentinel() {
    let dir = tempdir().unwrap();
    let pipe = dir.path().join("requests.fifo");

    serve(&pipe, &[], "6\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("End of input"))
        .stdout(predicate::str::contains("Fibonacci 6 is 8"));
    assert!(!pipe.exists());
}

#[test]
fn test_serve_overflowing_request_is_reported() {
    let dir = tempdir().unwrap();
    let pipe = dir.path().join("requests.fifo");

    serve(&pipe, &[], "94\n0\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("does not fit in 64 bits"));
}

#[test]
fn test_serve_refuses_non_fifo_path() {
    let dir = tempdir().unwrap();
    let pipe = dir.path().join("requests.fifo");
    std::fs::write(&pipe, "precious").unwrap();

    serve(&pipe, &[], "0\n")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error"))
        .stderr(predicate::str::contains("not a FIFO"));
    assert_eq!(std::fs::read_to_string(&pipe).unwrap(), "precious");
}

#[test]
fn test_serve_fails_when_interface_cannot_start() {
    let dir = tempdir().unwrap();
    let pipe = dir.path().join("requests.fifo");

    serve(&pipe, &["--interface-exe", "/nonexistent/fibpipe"], "0\n")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to launch interface"));
    assert!(!pipe.exists());
}

#[test]
fn test_invalid_arguments_exit_one() {
    fibpipe().args(["serve", "0"]).assert().code(1);
    fibpipe().args(["serve", "lots"]).assert().code(1);
    fibpipe().arg("serve").assert().code(1);
    fibpipe().arg("bogus").assert().code(1);
    fibpipe().assert().code(1);
}

#[test]
fn test_interface_without_server_pipe_fails() {
    let dir = tempdir().unwrap();
    fibpipe()
        .arg("--no-color")
        .arg("interface")
        .arg(dir.path().join("missing.fifo"))
        .write_stdin("5\n0\n")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("missing.fifo"));
}

/// Runs a server with its stdin held open, so the interface only stops when
/// the server cancels it.
fn serve_with_open_stdin(pipe: &Path, limit: &str, input: &str) -> (ExitStatus, String) {
    let mut child = StdCommand::new(env!("CARGO_BIN_EXE_fibpipe"))
        .env_remove("FIBPIPE_PIPE")
        .env_remove("FIBPIPE_LOG")
        .env_remove("RUST_LOG")
        .arg("--no-color")
        .args(["serve", limit, "--drain-interval", "200", "--pipe"])
        .arg(pipe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(input.as_bytes()).unwrap();
    stdin.flush().unwrap();

    let mut stdout = child.stdout.take().unwrap();
    let reader = thread::spawn(move || {
        let mut out = String::new();
        stdout.read_to_string(&mut out).unwrap();
        out
    });

    let deadline = Instant::now() + Duration::from_secs(120);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if Instant::now() > deadline {
            child.kill().unwrap();
            panic!("server did not finish within 120s");
        }
        thread::sleep(Duration::from_millis(50));
    };
    drop(stdin);

    (status, reader.join().unwrap())
}

#[test]
fn test_serve_budget_cancels_waiting_interface() {
    let dir = tempdir().unwrap();
    let pipe = dir.path().join("requests.fifo");

    let (status, stdout) = serve_with_open_stdin(&pipe, "1", "43\n44\n");

    assert!(status.success(), "stdout: {stdout}");
    assert!(stdout.contains("S: CPU budget exceeded"), "{stdout}");
    assert!(stdout.contains("I: Reading from user abandoned"), "{stdout}");
    assert!(stdout.contains("S: Waiting for 2 workers"), "{stdout}");
    assert_eq!(occurrences(&stdout, "Fibonacci 43 is 433494437"), 1, "{stdout}");
    assert_eq!(occurrences(&stdout, "Fibonacci 44 is 701408733"), 1, "{stdout}");
    assert!(stdout.contains("I: Interface is exiting"));
    assert!(stdout.contains("exited with code 0"));
    assert!(stdout.contains("Interface resource usage"));
    assert!(!stdout.contains("End of input"), "interface must stop on cancellation");
    assert!(!pipe.exists());
}
