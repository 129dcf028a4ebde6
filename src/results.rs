//! Persisting build measurements as JSON.
//!
//! The file holds one object with a `builds` list. Records are appended in
//! memory and written back with [`JsonResultManager::flush`].

use crate::core::error::Result;
use crate::measure::{SizeMetrics, diff};
use crate::runner::{EchoStatus, RunOutcome, RunResult};
use crate::util::fs::ensure_dir_exists;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Contents of a results file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildResults {
    #[serde(default)]
    pub builds: Vec<BuildRecord>,
}

/// Signed per-segment byte differences, candidate minus baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDifferences {
    pub text: i64,
    pub data: i64,
    pub bss: i64,
    pub total: i64,
}

/// One crate build compared against the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub board_config: String,
    pub crate_name: String,
    pub baseline: SizeMetrics,
    pub crate_build: SizeMetrics,
    pub differences: SegmentDifferences,
    /// Unix seconds of the build session.
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<RunRecord>,
}

impl BuildRecord {
    pub fn new(
        board_config: impl Into<String>,
        crate_name: impl Into<String>,
        baseline: SizeMetrics,
        crate_build: SizeMetrics,
        timestamp: u64,
    ) -> Self {
        let delta = diff(&baseline, &crate_build);
        Self {
            board_config: board_config.into(),
            crate_name: crate_name.into(),
            baseline,
            crate_build,
            differences: SegmentDifferences {
                text: delta.text.absolute,
                data: delta.data.absolute,
                bss: delta.bss.absolute,
                total: delta.total.absolute,
            },
            timestamp,
            run: None,
        }
    }

    /// Attach the result of booting the image and running `command`.
    pub fn with_run(mut self, command: impl Into<String>, result: &RunResult) -> Self {
        self.run = Some(RunRecord {
            command: command.into(),
            duration_secs: result.duration.as_secs_f64(),
            outcome: result.outcome,
            output: result.output.clone(),
            echo: result.echo,
            free_memory_before: result.free_memory_before,
            free_memory_after: result.free_memory_after,
        });
        self
    }
}

/// Summary of a boot test stored next to a build record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub command: String,
    pub duration_secs: f64,
    pub outcome: RunOutcome,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo: Option<EchoStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_memory_before: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_memory_after: Option<u64>,
}

/// Reads, accumulates and writes build records.
///
/// Without a path, records are collected in memory and never written.
#[derive(Debug)]
pub struct JsonResultManager {
    path: Option<PathBuf>,
    data: BuildResults,
}

impl JsonResultManager {
    /// Load existing records from `path`. A missing or malformed file starts empty.
    pub fn new(path: Option<PathBuf>) -> Result<Self> {
        let data = match &path {
            Some(p) => load(p)?,
            None => BuildResults::default(),
        };
        Ok(Self { path, data })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn append_result(&mut self, record: BuildRecord) {
        self.data.builds.push(record);
    }

    /// Write all records back, pretty-printed.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir_exists(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.data)?;
        std::fs::write(path, json)?;
        log::debug!(
            "wrote {} build records to {}",
            self.data.builds.len(),
            path.display()
        );
        Ok(())
    }

    pub fn results(&self) -> &BuildResults {
        &self.data
    }
}

fn load(path: &Path) -> Result<BuildResults> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BuildResults::default()),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_str(&content) {
        Ok(data) => Ok(data),
        Err(e) => {
            log::warn!(
                "ignoring unreadable results in {}: {}",
                path.display(),
                e
            );
            Ok(BuildResults::default())
        }
    }
}

/// Seconds since the Unix epoch, for [`BuildRecord::timestamp`].
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn metrics(text: u64, data: u64, bss: u64) -> SizeMetrics {
        SizeMetrics::new(text, data, bss).unwrap()
    }

    #[test]
    fn test_record_differences() {
        let record = BuildRecord::new(
            "rv-virt:nsh",
            "regex",
            metrics(1000, 100, 50),
            metrics(1500, 90, 50),
            1_700_000_000,
        );
        assert_eq!(
            record.differences,
            SegmentDifferences {
                text: 500,
                data: -10,
                bss: 0,
                total: 490
            }
        );
        assert!(record.run.is_none());
    }

    #[test]
    fn test_in_memory_manager_never_writes() {
        let mut manager = JsonResultManager::new(None).unwrap();
        manager.append_result(BuildRecord::new(
            "rv-virt:nsh",
            "regex",
            SizeMetrics::zero(),
            SizeMetrics::zero(),
            1,
        ));
        manager.flush().unwrap();
        assert_eq!(manager.results().builds.len(), 1);
        assert!(manager.path().is_none());
    }

    #[test]
    fn test_flush_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/rv-virt/results.json");
        let mut manager = JsonResultManager::new(Some(path.clone())).unwrap();
        manager.append_result(BuildRecord::new(
            "rv-virt:nsh",
            "regex",
            SizeMetrics::zero(),
            SizeMetrics::zero(),
            1,
        ));
        manager.flush().unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn test_serialized_shape() {
        let record = BuildRecord::new("a:b", "c", metrics(1, 2, 3), metrics(2, 2, 3), 5);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["crate_build"]["total"], 7);
        assert_eq!(value["differences"]["text"], 1);
        assert!(value.get("run").is_none());
    }

    #[test]
    fn test_with_run() {
        let result = RunResult::new(Duration::from_millis(1500), "hello", RunOutcome::Success)
            .with_echo(Some(EchoStatus::Confirmed))
            .with_memory(Some(800), Some(760));
        let record = BuildRecord::new("a:b", "c", SizeMetrics::zero(), SizeMetrics::zero(), 5)
            .with_run("hello", &result);

        let run = record.run.unwrap();
        assert_eq!(run.command, "hello");
        assert_eq!(run.duration_secs, 1.5);
        assert_eq!(run.outcome, RunOutcome::Success);
        assert_eq!(run.free_memory_after, Some(760));
    }

    #[test]
    fn test_unix_timestamp_is_recent() {
        assert!(unix_timestamp() > 1_600_000_000);
    }
}
