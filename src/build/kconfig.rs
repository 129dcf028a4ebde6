//! Kconfig adjustments applied with `kconfig-tweak`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One `kconfig-tweak` operation.
///
/// In TOML: `{ action = "enable", option = "CONFIG_FS_PROCFS" }` or
/// `{ action = "set-val", option = "CONFIG_TLS_NELEM", value = "16" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum KconfigOption {
    Enable { option: String },
    Disable { option: String },
    SetVal { option: String, value: String },
}

impl KconfigOption {
    pub fn enable(option: impl Into<String>) -> Self {
        Self::Enable {
            option: option.into(),
        }
    }

    pub fn disable(option: impl Into<String>) -> Self {
        Self::Disable {
            option: option.into(),
        }
    }

    pub fn set_val(option: impl Into<String>, value: impl Into<String>) -> Self {
        Self::SetVal {
            option: option.into(),
            value: value.into(),
        }
    }

    /// Name of the option being changed.
    pub fn option(&self) -> &str {
        match self {
            Self::Enable { option } | Self::Disable { option } | Self::SetVal { option, .. } => {
                option
            }
        }
    }

    /// Arguments for `kconfig-tweak`, which runs inside the build directory.
    pub fn tweak_args(&self) -> Vec<String> {
        match self {
            Self::Enable { option } => vec!["--enable".into(), option.clone()],
            Self::Disable { option } => vec!["--disable".into(), option.clone()],
            Self::SetVal { option, value } => {
                vec!["--set-val".into(), option.clone(), value.clone()]
            }
        }
    }
}

impl fmt::Display for KconfigOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enable { option } => write!(f, "{}=y", option),
            Self::Disable { option } => write!(f, "{}=n", option),
            Self::SetVal { option, value } => write!(f, "{}={}", option, value),
        }
    }
}

/// Options every build needs for Rust applications to link and run.
pub fn rust_support_options() -> Vec<KconfigOption> {
    let enabled = [
        "CONFIG_SYSTEM_TIME64",
        "CONFIG_FS_LARGEFILE",
        "CONFIG_DEV_URANDOM",
        "CONFIG_DEBUG_FULLOPT",
        "CONFIG_FRAME_POINTER",
        "CONFIG_FS_TMPFS",
        "CONFIG_SCHED_BACKTRACE",
        "CONFIG_MM_BACKTRACE_DEFAULT",
        "CONFIG_FS_PROCFS",
        "CONFIG_SCHED_DUMP_LEAK",
    ];
    let values = [
        ("CONFIG_TLS_NELEM", "16"),
        ("CONFIG_DEFAULT_TASK_STACKSIZE", "4096"),
        ("CONFIG_INIT_STACKSIZE", "4096"),
        ("CONFIG_MM_BACKTRACE", "16"),
    ];

    enabled
        .into_iter()
        .map(KconfigOption::enable)
        .chain(values.into_iter().map(|(o, v)| KconfigOption::set_val(o, v)))
        .collect()
}

/// Board-specific options, keyed by board name.
pub fn default_board_options() -> BTreeMap<String, Vec<KconfigOption>> {
    let mut boards = BTreeMap::new();
    boards.insert(
        "rv-virt".to_string(),
        vec![KconfigOption::disable("CONFIG_ARCH_FPU")],
    );
    boards
}
