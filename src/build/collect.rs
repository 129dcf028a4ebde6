//! Discovery of crate directories that plug into the NuttX build.

use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Files a directory must contain to count as a buildable crate.
pub const CRATE_MARKER_FILES: [&str; 3] = ["Cargo.toml", "CMakeLists.txt", "Kconfig"];

static RUST_CONFIG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"config\s+(RUST_[A-Za-z0-9_]+)").expect("valid regex"));

/// Crate directories found under a base path.
#[derive(Debug, Clone)]
pub struct Collector {
    base_path: PathBuf,
    crate_dirs: Vec<PathBuf>,
}

impl Collector {
    /// Walk `base_path` and record every directory holding all of
    /// [`CRATE_MARKER_FILES`]. Unreadable directories are skipped.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        let mut crate_dirs = Vec::new();
        visit(&base_path, &mut crate_dirs);
        crate_dirs.sort();
        log::debug!(
            "found {} crate directories under {}",
            crate_dirs.len(),
            base_path.display()
        );
        Self {
            base_path,
            crate_dirs,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn crate_dirs(&self) -> &[PathBuf] {
        &self.crate_dirs
    }

    /// Each crate directory mapped to the option that enables it, such as
    /// `CONFIG_RUST_CRATE_REGEX`. Crates without a `config RUST_*` entry are left out.
    pub fn config_mapping(&self) -> BTreeMap<PathBuf, String> {
        self.crate_dirs
            .iter()
            .filter_map(|dir| {
                kconfig_main_config(&dir.join("Kconfig"))
                    .map(|config| (dir.clone(), format!("CONFIG_{}", config)))
            })
            .collect()
    }
}

/// Crate name shown in reports: the directory's last component.
pub fn crate_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

/// First `config RUST_*` symbol declared in a Kconfig file.
pub fn kconfig_main_config(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => RUST_CONFIG
            .captures(&content)
            .map(|caps| caps[1].to_string()),
        Err(e) => {
            log::warn!("error reading Kconfig file {}: {}", path.display(), e);
            None
        }
    }
}

fn visit(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::debug!("skipping {}: {}", dir.display(), e);
            return;
        }
    };

    let mut files = Vec::new();
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            subdirs.push(entry.path());
        } else {
            files.push(entry.file_name());
        }
    }

    if CRATE_MARKER_FILES
        .iter()
        .all(|marker| files.iter().any(|f| f == *marker))
    {
        out.push(dir.to_path_buf());
    }

    for sub in subdirs {
        visit(&sub, out);
    }
}
