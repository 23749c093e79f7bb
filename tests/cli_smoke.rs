mod support;

use assert_cmd::Command;
use predicates::str::{contains, is_match};

use support::TestRoot;

#[test]
fn ifm_help_works() {
    Command::cargo_bin("ifm")
        .expect("binary")
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("IdeaFlow"));
}

#[test]
fn subcommand_help_works() {
    let subcommands = ["task", "state", "note", "subtask", "activity", "timeline"];

    for cmd in subcommands {
        Command::cargo_bin("ifm")
            .expect("binary")
            .arg(cmd)
            .arg("--help")
            .assert()
            .success();
    }
}

#[test]
fn task_new_prints_human_summary() {
    let root = TestRoot::new();
    root.ifm()
        .args(["task", "new", "refactor parser", "--description", "split lexer"])
        .assert()
        .success()
        .stdout(contains("Task created"))
        .stdout(is_match(r"(?m)^  ID\s+1$").unwrap())
        .stdout(is_match(r"(?m)^  Description\s+split lexer$").unwrap());
}

#[test]
fn quiet_suppresses_human_output() {
    let root = TestRoot::new();
    root.ifm()
        .args(["--quiet", "task", "new", "silent"])
        .assert()
        .success()
        .stdout("");
}

#[test]
fn root_flag_overrides_env() {
    let root = TestRoot::new();
    let other = TestRoot::new();
    root.ifm()
        .arg("--root")
        .arg(other.path())
        .args(["task", "new", "elsewhere"])
        .assert()
        .success();

    assert!(other.data_dir().join("tasks.json").exists());
    assert!(!root.data_dir().join("tasks.json").exists());
}
