use assert_cmd::prelude::*;
use std::{fs, process::Command};
use tempfile::TempDir;

fn write_env(dir: &TempDir, extra: &str) -> String {
    let env_path = dir.path().join("env");
    let content = format!(
        "DATA_DIR={}\nPROFILE=desktop\nVERIFY_SIG=0\n{extra}",
        dir.path().join("data").display()
    );
    fs::write(&env_path, content).unwrap();
    env_path.to_str().unwrap().to_string()
}

fn stdout_json(output: std::process::Output) -> serde_json::Value {
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn init_writes_env_and_relay_list() {
    let dir = TempDir::new().unwrap();
    let env_path = dir.path().join("fresh.env");

    Command::cargo_bin("lookmarks")
        .unwrap()
        .args(["--env", env_path.to_str().unwrap(), "init"])
        .assert()
        .success();

    let env = fs::read_to_string(&env_path).unwrap();
    assert!(env.contains("DATA_DIR="));
    let data = dir.path().join("lookmarks-data");
    assert!(data.join("cache").is_dir());
    let relays: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(data.join("relays.json")).unwrap()).unwrap();
    assert_eq!(relays["relays"].as_array().unwrap().len(), 3);
}

#[test]
fn relays_prints_env_relays() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir, "RELAYS=wss://one.example,wss://two.example\n");

    let out = Command::cargo_bin("lookmarks")
        .unwrap()
        .args(["--env", &env_path, "relays"])
        .output()
        .unwrap();
    let json = stdout_json(out);
    let urls: Vec<&str> = json["relays"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["url"].as_str().unwrap())
        .collect();
    assert_eq!(urls, vec!["wss://one.example", "wss://two.example"]);
    assert_eq!(json["relays"][0]["source"], "user");
}

#[test]
fn invalid_lookups_skip_network() {
    let dir = TempDir::new().unwrap();
    // no reachable relays are configured; invalid input must not need any
    let env_path = write_env(&dir, "RELAYS=ws://127.0.0.1:9\n");

    let out = Command::cargo_bin("lookmarks")
        .unwrap()
        .args(["--env", &env_path, "event", "not-an-id"])
        .output()
        .unwrap();
    assert!(stdout_json(out).is_null());

    Command::cargo_bin("lookmarks")
        .unwrap()
        .args(["--env", &env_path, "address", "bad:format"])
        .assert()
        .failure();
}

#[test]
fn cache_clear_empties_cache_dir() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir, "");
    let cache_dir = dir.path().join("data/cache");
    fs::create_dir_all(&cache_dir).unwrap();
    fs::write(cache_dir.join("deadbeef.json"), "{}").unwrap();

    Command::cargo_bin("lookmarks")
        .unwrap()
        .args(["--env", &env_path, "cache-clear"])
        .assert()
        .success();
    assert!(!cache_dir.join("deadbeef.json").exists());
}
