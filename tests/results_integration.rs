use nuttx_crate_bench::results::{BuildRecord, JsonResultManager};
use nuttx_crate_bench::{EchoStatus, RunOutcome, RunResult, SizeMetrics};
use std::time::Duration;

fn metrics(text: u64, data: u64, bss: u64) -> SizeMetrics {
    SizeMetrics::new(text, data, bss).unwrap()
}

fn record(crate_name: &str) -> BuildRecord {
    BuildRecord::new(
        "rv-virt:nsh",
        crate_name,
        metrics(156540, 1016, 27456),
        metrics(160000, 1016, 27456),
        1_760_000_000,
    )
}

#[test]
fn test_missing_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let manager = JsonResultManager::new(Some(dir.path().join("results.json"))).unwrap();
    assert!(manager.results().builds.is_empty());
}

#[test]
fn test_invalid_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.json");
    std::fs::write(&path, "{ not json").unwrap();

    let manager = JsonResultManager::new(Some(path)).unwrap();
    assert!(manager.results().builds.is_empty());
}

#[test]
fn test_inconsistent_totals_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.json");
    std::fs::write(
        &path,
        r#"{"builds": [{
            "board_config": "rv-virt:nsh",
            "crate_name": "regex",
            "baseline": {"text": 1, "data": 1, "bss": 1, "total": 3},
            "crate_build": {"text": 2, "data": 1, "bss": 1, "total": 99},
            "differences": {"text": 1, "data": 0, "bss": 0, "total": 1},
            "timestamp": 1
        }]}"#,
    )
    .unwrap();

    let manager = JsonResultManager::new(Some(path)).unwrap();
    assert!(manager.results().builds.is_empty());
}

#[test]
fn test_flush_and_reload_appends() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.json");

    let mut first = JsonResultManager::new(Some(path.clone())).unwrap();
    first.append_result(record("regex"));
    first.flush().unwrap();

    let mut second = JsonResultManager::new(Some(path.clone())).unwrap();
    assert_eq!(second.results().builds.len(), 1);

    let run = RunResult::new(Duration::from_secs(3), "Hello", RunOutcome::Success)
        .with_echo(Some(EchoStatus::Confirmed));
    second.append_result(record("once_cell").with_run("hello", &run));
    second.flush().unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    let builds = value["builds"].as_array().unwrap();
    assert_eq!(builds.len(), 2);
    assert_eq!(builds[0]["crate_name"], "regex");
    assert_eq!(builds[0]["differences"]["text"], 3460);
    assert_eq!(builds[0]["baseline"]["total"], 185012);
    assert!(builds[0].get("run").is_none());
    assert_eq!(builds[1]["run"]["outcome"], "success");
    assert_eq!(builds[1]["run"]["echo"], "confirmed");

    // Pretty-printed.
    assert!(text.contains("\n  \"builds\""));
}
