//! CLI smoke tests: run the real binary end to end.

use std::io::Write;
use std::process::{Command, Stdio};

use kontur_core::{decode, encode, Intent, Packet};
use serde_json::{json, Value};

fn cli_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_kontur"));
    for key in [
        "KONTUR_CONFIG",
        "KONTUR_LLM_PROVIDER",
        "KONTUR_MEMORY_SNAPSHOT",
        "KONTUR_MAX_ATTEMPTS",
        "RUST_LOG",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

#[test]
fn test_help_flag() {
    let output = cli_bin().arg("--help").output().expect("failed to run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage"), "Expected usage info in --help output");
}

#[test]
fn test_version_flag() {
    let output = cli_bin().arg("--version").output().expect("failed to run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("kontur"), "Expected binary name in --version output");
}

#[test]
fn test_missing_config_uses_defaults() {
    let output = cli_bin()
        .arg("--config")
        .arg("/tmp/nonexistent_kontur_config_12345.toml")
        .args(["audit", "noop"])
        .output()
        .expect("failed to run");
    assert!(output.status.success());
    let result: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["allowed"], true);
    assert_eq!(result["assessment"]["score"], 0);
}

#[test]
fn test_invalid_config_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kontur.toml");
    std::fs::write(&path, "[guardian\nbroken").unwrap();

    let output = cli_bin()
        .arg("--config")
        .arg(&path)
        .args(["audit", "noop"])
        .output()
        .expect("failed to run");
    assert!(!output.status.success());
}

#[test]
fn test_audit_scores_operation() {
    let output = cli_bin()
        .arg("--config")
        .arg("/tmp/nonexistent_kontur_config_12345.toml")
        .args(["audit", "execute_code", "--args", r#"{"code":"eval(x)"}"#])
        .output()
        .expect("failed to run");
    assert!(output.status.success());

    let result: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["operation"], "execute_code");
    assert_eq!(result["assessment"]["score"], 8);
    assert_eq!(result["assessment"]["level"], "medium");
    assert_eq!(result["allowed"], true);
}

#[test]
fn test_audit_rejects_bad_args() {
    let output = cli_bin()
        .arg("--config")
        .arg("/tmp/nonexistent_kontur_config_12345.toml")
        .args(["audit", "noop", "--args", "{not json"])
        .output()
        .expect("failed to run");
    assert!(!output.status.success());
}

#[test]
fn test_guardian_organ_speaks_only_packets_on_stdout() {
    let mut audit = Packet::new(
        "kontur://organ/test",
        "kontur://organ/grisha",
        Intent::Query,
        "AUDIT",
        json!({"operation": "execute_code", "args": {"code": "eval(x)"}}),
    );
    let mut shutdown = Packet::new(
        "kontur://organ/test",
        "kontur://organ/grisha",
        Intent::Command,
        "SHUTDOWN",
        json!({}),
    );
    let input = format!(
        "{}\nnot a packet\n{}\n",
        encode(&mut audit).unwrap(),
        encode(&mut shutdown).unwrap()
    );

    let mut child = cli_bin()
        .arg("--config")
        .arg("/tmp/nonexistent_kontur_config_12345.toml")
        .args(["organ", "guardian"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    let output = child.wait_with_output().expect("failed to wait");
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let packets: Vec<Packet> = stdout
        .lines()
        .map(|line| decode(line).expect("stdout line is not a packet"))
        .collect();
    assert_eq!(packets.len(), 2);

    assert!(packets[0].instruction.is_op("AUDIT"));
    assert_eq!(packets[0].payload["audit"]["assessment"]["score"], 8);
    assert_eq!(packets[0].route.to, "kontur://organ/test");
    assert_eq!(packets[0].extra["correlation_id"], audit.id.as_str());
    assert!(packets[1].instruction.is_op("STOPPING"));
}

#[cfg(unix)]
#[test]
fn test_task_runs_fallback_and_remembers_it() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("memory.json");
    let config = dir.path().join("kontur.toml");
    std::fs::write(
        &config,
        format!(
            r#"
[automation]
program = "sh"
args = ["-c"]

[orchestrator]
fallback_action = "echo hi"
execution_deadline_secs = 10

[memory]
snapshot_path = "{}"
"#,
            snapshot.display()
        ),
    )
    .unwrap();

    let output = cli_bin()
        .arg("--config")
        .arg(&config)
        .args(["task", "say", "hello"])
        .output()
        .expect("failed to run");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let outcome: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(outcome["status"], "SUCCESS");
    assert_eq!(outcome["goal"], "say hello");
    assert_eq!(outcome["last_output"], "hi");
    assert!(snapshot.exists());

    // The second run recalls the stored episode instead of falling back.
    let output = cli_bin()
        .arg("--config")
        .arg(&config)
        .args(["task", "say", "hello"])
        .output()
        .expect("failed to run");
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Indexed 1 remembered solutions"), "stderr: {stderr}");
}

#[cfg(unix)]
#[test]
fn test_task_failure_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("kontur.toml");
    std::fs::write(
        &config,
        r#"
[automation]
program = "sh"
args = ["-c"]

[orchestrator]
fallback_action = "exit 4"
max_attempts = 2
"#,
    )
    .unwrap();

    let output = cli_bin()
        .arg("--config")
        .arg(&config)
        .args(["task", "break", "things"])
        .output()
        .expect("failed to run");
    assert_eq!(output.status.code(), Some(1));

    let outcome: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(outcome["status"], "FAILURE");
    assert_eq!(outcome["attempts"], 2);
    assert_eq!(outcome["last_error_kind"], "BACKEND_ERROR");
}
