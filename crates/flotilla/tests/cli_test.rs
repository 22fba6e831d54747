#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

mod common;

use assert_cmd::Command;
use common::TestProject;
use predicates::prelude::*;

fn flotilla() -> Command {
    let mut cmd = Command::cargo_bin("flotilla").unwrap();
    cmd.env_remove("FLOTILLA_PROJECT_ROOT")
        .env_remove("FLOTILLA_ENV")
        .env_remove("RUST_LOG");
    cmd
}

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    flotilla()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("依存関係の順に"))
        .stdout(predicate::str::contains("up"))
        .stdout(predicate::str::contains("down"))
        .stdout(predicate::str::contains("exec"))
        .stdout(predicate::str::contains("aws-profile"));
}

/// バージョン表示が正しく動作することを確認
#[test]
fn test_cli_version() {
    flotilla()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("flotilla"));
}

#[test]
fn test_deploy_help() {
    flotilla()
        .args(["deploy", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--image"))
        .stdout(predicate::str::contains("--ecs-cluster"))
        .stdout(predicate::str::contains("--task-definition-arn"));
}

#[test]
fn test_up_apps_help() {
    flotilla()
        .args(["up", "apps", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--explain"));
}

/// 無効なコマンドでエラーになることを確認
#[test]
fn test_invalid_command() {
    flotilla().arg("invalid-command").assert().failure();
}

/// 全体の削除は --auto-approve なしでは失敗する
#[test]
fn test_down_all_requires_auto_approve() {
    let project = TestProject::new();
    flotilla()
        .current_dir(project.path())
        .arg("down")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--auto-approve"));
}

/// プロジェクト外では up apps が失敗する
#[test]
fn test_up_apps_outside_project() {
    let project = TestProject::new();
    flotilla()
        .current_dir(project.path())
        .args(["up", "apps"])
        .assert()
        .failure();
}

#[test]
fn test_tunnel_down_without_env_dir() {
    let project = TestProject::new();
    project.write_config(
        r#"
        project "acme"
        env "dev"
        "#,
    );

    flotilla()
        .current_dir(project.path())
        .args(["tunnel", "down"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("アクセスできません"));
}

#[test]
fn test_tunnel_down_requires_env() {
    let project = TestProject::new();
    project.write_config(r#"project "acme""#);

    flotilla()
        .current_dir(project.path())
        .args(["tunnel", "down"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("env"));
}

#[test]
fn test_aws_profile_appends_credentials() {
    let home = TestProject::new();
    flotilla()
        .env("HOME", home.path())
        .env("AWS_ACCESS_KEY_ID", "AKIAEXAMPLE")
        .env("AWS_SECRET_ACCESS_KEY", "secret")
        .env("AWS_REGION", "us-east-1")
        .env("AWS_PROFILE", "acme-dev")
        .env("LOCALSTACK", "1")
        .env_remove("LOCALSTACK_ENDPOINT")
        .arg("aws-profile")
        .assert()
        .success()
        .stdout(predicate::str::contains("acme-dev"));

    let credentials =
        std::fs::read_to_string(home.path().join(".aws").join("credentials")).unwrap();
    assert!(credentials.contains("[acme-dev]\naws_access_key_id = AKIAEXAMPLE\n"));
    assert!(credentials.contains("region = us-east-1\n"));
    assert!(credentials.contains("endpoint_url = http://127.0.0.1:4566\n"));
}

#[test]
fn test_aws_profile_missing_variables() {
    let home = TestProject::new();
    flotilla()
        .env("HOME", home.path())
        .env_remove("AWS_ACCESS_KEY_ID")
        .env_remove("AWS_SECRET_ACCESS_KEY")
        .arg("aws-profile")
        .assert()
        .failure()
        .stderr(predicate::str::contains("AWS_ACCESS_KEY_ID"));

    assert!(!home.path().join(".aws").join("credentials").exists());
}
