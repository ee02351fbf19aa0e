//! Integration tests for the Nulls CLI
//!
//! These tests run the actual binary against template trees in temp dirs.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Get the binary to test
fn nulls_cmd() -> Command {
    Command::cargo_bin("nulls").unwrap()
}

fn site(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (rel, content) in files {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    dir
}

#[test]
fn test_help_flag() {
    nulls_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("declarative HTML templating engine"));
}

#[test]
fn test_check_reports_registrations() {
    let dir = site(&[
        (
            "root/index.html",
            r#"<body><main null-id="main" null-container="'feed'"></main><form null-api="/post" null-api-action="'ok'"></form></body>"#,
        ),
        ("root/main/feed.html", r#"<p null-id="msg" null-data="'hi'"></p>"#),
    ]);
    nulls_cmd()
        .args(["check", "--templates"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("2 templates"))
        .stdout(predicate::str::contains("1 actions"))
        .stdout(predicate::str::contains("root/main/feed"))
        .stdout(predicate::str::contains("/post"));
}

#[test]
fn test_check_missing_root_suggests_fix() {
    let dir = site(&[("root/other.html", "<p></p>")]);
    nulls_cmd()
        .args(["check", "--templates"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("NULLS-001"))
        .stderr(predicate::str::contains("Fix:"));
}

#[test]
fn test_render_page_for_url() {
    let dir = site(&[(
        "root/index.html",
        r#"<html><body><h1 null-id="t" null-data="request.path"></h1></body></html>"#,
    )]);
    nulls_cmd()
        .args(["render", "/chat", "--templates"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"<body null-id="root" null-type="index">"#))
        .stdout(predicate::str::contains(">/chat</h1>"));
}

#[test]
fn test_render_single_template() {
    let dir = site(&[
        ("root/index.html", "<body></body>"),
        ("root/main/feed.html", r#"<p null-id="msg" null-data="'hi'"></p>"#),
    ]);
    nulls_cmd()
        .args(["render", "--template", "root/main/feed", "--templates"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"<p null-id="msg" null-role="data">hi</p>"#));
}

#[test]
fn test_render_unknown_template_fails() {
    let dir = site(&[("root/index.html", "<body></body>")]);
    nulls_cmd()
        .args(["render", "--template", "root/nope", "--templates"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("root/nope"));
}

#[test]
fn test_config_file_sets_root_type() {
    let dir = site(&[("root/home.html", "<body><p>home</p></body>")]);
    let config = dir.path().join("nulls.yaml");
    fs::write(
        &config,
        format!("templates: {}\nroot_type: home\n", dir.path().display()),
    )
    .unwrap();
    nulls_cmd()
        .arg("render")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"null-type="home""#));
}
