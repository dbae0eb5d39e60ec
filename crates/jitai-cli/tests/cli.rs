use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;

const T0: &str = "2024-03-05T14:00:00Z";

fn jitai(state: &Path, now: &str) -> Command {
    let mut cmd = Command::cargo_bin("jitai").expect("binary builds");
    cmd.env("RUST_LOG", "warn")
        .arg("--state-dir")
        .arg(state)
        .arg("--now")
        .arg(now);
    cmd
}

fn json_of(cmd: &mut Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("stdout is JSON")
}

#[test]
fn evaluate_then_answer_then_collect() {
    let dir = tempfile::tempdir().expect("tempdir");
    let decision = json_of(jitai(dir.path(), T0).args(["evaluate", "--app", "video"]));
    assert_eq!(decision["decision"], "SHOW", "{decision}");
    let id = decision["intervention_id"]
        .as_str()
        .expect("shown decisions carry an id")
        .to_string();
    assert!(dir.path().join("store.json").exists());

    let outcome = json_of(jitai(dir.path(), "2024-03-05T14:00:04Z").args([
        "outcome",
        "--id",
        &id,
        "--choice",
        "go-back",
        "--latency-ms",
        "4000",
    ]));
    assert_eq!(outcome["proximal_collected"], true);

    let pass = json_of(jitai(dir.path(), "2024-03-05T14:45:00Z").args(["collect", "short"]));
    assert_eq!(pass["rewards_applied"], 1);

    let summary = json_of(jitai(dir.path(), "2024-03-05T15:00:00Z").args(["stats", "decisions"]));
    assert_eq!(summary["total"], 1);
    assert_eq!(summary["shown"], 1);

    let metrics =
        json_of(jitai(dir.path(), "2024-03-05T15:00:00Z").args(["stats", "effectiveness"]));
    assert_eq!(metrics["horizons"]["rewards_applied"], 1);
}

#[test]
fn switch_off_blocks_evaluation() {
    let dir = tempfile::tempdir().expect("tempdir");
    jitai(dir.path(), T0).args(["switch", "off"]).assert().success();
    let decision = json_of(jitai(dir.path(), T0).args(["evaluate", "--app", "video"]));
    assert_eq!(decision["decision"], "SKIP");
    assert_eq!(decision["blocking_reason"], "FEATURE_DISABLED");
}

#[test]
fn context_file_is_read() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ctx = dir.path().join("ctx.json");
    std::fs::write(
        &ctx,
        r#"{"target_app": "video", "overlay_permission_granted": false}"#,
    )
    .expect("write context");
    let decision = json_of(
        jitai(dir.path(), T0)
            .arg("evaluate")
            .arg("--context")
            .arg(&ctx),
    );
    assert_eq!(decision["blocking_reason"], "PERMISSION_DENIED");
    assert_eq!(decision["explanation"]["target_app"], "video");
}

#[test]
fn rollout_at_zero_is_control() {
    let dir = tempfile::tempdir().expect("tempdir");
    let status = json_of(jitai(dir.path(), T0).args(["rollout", "set", "--percent", "0"]));
    assert_eq!(status["percentage"], 0);
    assert_eq!(status["variant"], "CONTROL");

    let again = json_of(jitai(dir.path(), T0).args(["rollout", "status"]));
    assert_eq!(again["percentage"], 0);
}

#[test]
fn rejects_unknown_choice() {
    let dir = tempfile::tempdir().expect("tempdir");
    jitai(dir.path(), T0)
        .args(["outcome", "--id", "x", "--choice", "maybe"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown value"));
}
