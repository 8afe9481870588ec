//! Exit codes and output of the `git-topology` and `session-monitor` binaries.

use std::fs;
use std::process::Command;

use serde_json::Value;

use orchestrator::exit_codes;
use orchestrator::test_support::TestRepo;

#[test]
fn topology_without_resolvable_base_exits_with_failure() {
    let repo = TestRepo::init("work");

    let output = Command::new(env!("CARGO_BIN_EXE_git-topology"))
        .arg("--repo-root")
        .arg(repo.path())
        .output()
        .expect("git-topology");

    assert_eq!(output.status.code(), Some(exit_codes::FAILURE));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no base branch"));
    assert!(stderr.contains("--main-branch"));
}

#[test]
fn topology_recommends_a_single_rebase_for_a_diverged_branch() {
    let repo = TestRepo::new();
    repo.branch("feature/x");
    repo.commit_on("feature/x", "x.txt", "x1");
    repo.commit_on("feature/x", "x.txt", "x2");
    for n in 1..=3 {
        repo.commit("main.txt", &format!("m{n}"));
    }

    let output = Command::new(env!("CARGO_BIN_EXE_git-topology"))
        .arg("--json")
        .arg("--repo-root")
        .arg(repo.path())
        .output()
        .expect("git-topology");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let report: Value = serde_json::from_slice(&output.stdout).expect("json");
    let recs = report["recommendations"].as_array().expect("recommendations");
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0]["kind"], "rebase");
    assert_eq!(recs[0]["subject"], "feature/x");
    let command = recs[0]["commands"][0].as_str().expect("command");
    assert!(command.ends_with("rebase main feature/x"));
}

#[test]
fn topology_never_touches_the_repository() {
    let repo = TestRepo::new();
    repo.branch("feature/y");
    repo.commit_on("feature/y", "y.txt", "y1");
    fs::write(repo.path().join("notes.txt"), "wip\n").expect("write");
    let head_before = repo.git(&["rev-parse", "HEAD"]);
    let status_before = repo.git(&["status", "--porcelain"]);

    let output = Command::new(env!("CARGO_BIN_EXE_git-topology"))
        .arg("--repo-root")
        .arg(repo.path())
        .output()
        .expect("git-topology");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[stash]"));
    assert_eq!(repo.git(&["rev-parse", "HEAD"]), head_before);
    assert_eq!(repo.git(&["status", "--porcelain"]), status_before);
}

#[test]
fn invalid_arguments_exit_with_usage_code() {
    let output = Command::new(env!("CARGO_BIN_EXE_session-monitor"))
        .args(["inventory", "--recent", "many"])
        .output()
        .expect("session-monitor");
    assert_eq!(output.status.code(), Some(exit_codes::USAGE));

    let output = Command::new(env!("CARGO_BIN_EXE_git-topology"))
        .arg("--no-such-flag")
        .output()
        .expect("git-topology");
    assert_eq!(output.status.code(), Some(exit_codes::USAGE));
}
