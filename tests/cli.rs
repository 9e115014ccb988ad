mod common;
use common::*;

use assert_cmd::Command;

fn ormold() -> Command {
    let mut cmd = Command::cargo_bin("ormold").unwrap();
    cmd.env_remove("DATABASE_URL")
        .env_remove("ORMOLD_CONFIG")
        .env_remove("ORMOLD_DIALECT")
        .env_remove("ORMOLD_SCHEMA");
    cmd
}

fn run(cmd: &mut Command) -> (bool, String, String) {
    let output = cmd.output().unwrap();
    (
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    )
}

fn declarations(registry: &Registry) -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("entities.json");
    std::fs::write(&path, registry.to_json().unwrap()).unwrap();
    let path = path.display().to_string();
    (dir, path)
}

#[test]
fn offline_plan_prints_create_statements() {
    let (_dir, path) = declarations(&blog_registry());
    let (ok, stdout, stderr) =
        run(ormold().args(["--dialect", "postgres", "--declarations", &path, "plan", "--offline"]));
    assert!(ok, "{stderr}");
    assert!(stdout.contains("CREATE TABLE \"post_categories_category\""));
    assert!(stdout.contains("FOREIGN KEY"));
}

#[test]
fn offline_plan_for_mysql_uses_backticks() {
    let (_dir, path) = declarations(&comment_registry());
    let (ok, stdout, stderr) =
        run(ormold().args(["--dialect", "mysql", "--declarations", &path, "plan", "--offline"]));
    assert!(ok, "{stderr}");
    assert!(stdout.contains("CREATE TABLE `comment`"));
}

#[test]
fn resolve_prints_metadata_json() {
    let (_dir, path) = declarations(&comment_registry());
    let output = ormold()
        .args(["--declarations", &path, "--json", "resolve"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let graph: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let text = graph.to_string();
    assert!(text.contains("\"postId\""));
}

#[test]
fn config_file_supplies_settings() {
    let (dir, path) = declarations(&comment_registry());
    let config = dir.path().join("ormold.json");
    std::fs::write(
        &config,
        serde_json::json!({ "dialect": "mysql", "declarations": [path] }).to_string(),
    )
    .unwrap();
    let (ok, stdout, stderr) =
        run(ormold().args(["--config", &config.display().to_string(), "plan", "--offline"]));
    assert!(ok, "{stderr}");
    assert!(stdout.contains("ENGINE=InnoDB"));
}

#[test]
fn sync_without_database_url_fails() {
    let (_dir, path) = declarations(&comment_registry());
    let (ok, _, stderr) = run(ormold().args(["--declarations", &path, "sync"]));
    assert!(!ok);
    assert!(stderr.contains("no database url"), "{stderr}");
}

#[test]
fn invalid_declarations_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "[{\"target\": \"Post\"}]").unwrap();
    let path = path.display().to_string();
    let (ok, _, stderr) = run(ormold().args(["--dialect", "postgres", "--declarations", &path, "resolve"]));
    assert!(!ok);
    assert!(stderr.contains("Failed to parse declarations"), "{stderr}");
}
