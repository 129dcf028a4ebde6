//! Configuration types: session timeouts, the board registry and build settings.

use crate::build::kconfig::{self, KconfigOption};
use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod env;
mod loader;
pub use loader::ConfigLoader;

/// Placeholder in a launch template that is replaced by the firmware path.
pub const BINARY_PLACEHOLDER: &str = "{binary}";

/// Complete configuration for the bench.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Interactive session timing.
    #[serde(default)]
    pub session: SessionConfig,

    /// Boards added to (or replacing entries of) the built-in registry.
    #[serde(default)]
    pub boards: BTreeMap<String, BoardProfile>,

    /// Firmware build settings.
    #[serde(default)]
    pub build: BuildConfig,

    /// Enable verbose output.
    #[serde(default)]
    pub verbose: bool,
}

impl Config {
    /// Parse a configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load a configuration from a standalone TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Built-in boards overlaid with the configured ones.
    pub fn board_registry(&self) -> BTreeMap<String, BoardProfile> {
        let mut registry = builtin_boards();
        for (name, profile) in &self.boards {
            registry.insert(name.clone(), profile.clone());
        }
        for (name, profile) in registry.iter_mut() {
            profile.name = name.clone();
        }
        registry
    }

    /// Names of every supported board, sorted.
    pub fn supported_boards(&self) -> Vec<String> {
        self.board_registry().into_keys().collect()
    }

    /// Look up a board profile by its key.
    pub fn board(&self, name: &str) -> Result<BoardProfile> {
        let mut registry = self.board_registry();
        registry.remove(name).ok_or_else(|| {
            Error::config(format!(
                "unsupported board '{}'. Supported boards: {}",
                name,
                registry.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })
    }
}

/// Timeouts and switches for one interactive session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long to wait for the boot banner.
    #[serde(with = "duration_secs")]
    pub boot_timeout: Duration,

    /// How long to wait for the first prompt once the banner appeared.
    #[serde(with = "duration_secs")]
    pub prompt_timeout: Duration,

    /// How long to wait for the shell to echo a sent command.
    #[serde(with = "duration_secs")]
    pub echo_timeout: Duration,

    /// Grace period for the emulator to quit before it is killed.
    #[serde(with = "duration_secs")]
    pub stop_grace: Duration,

    /// Sample free memory before and after the command.
    pub sample_memory: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            boot_timeout: Duration::from_secs(10),
            prompt_timeout: Duration::from_secs(5),
            echo_timeout: Duration::from_secs(1),
            stop_grace: Duration::from_secs(5),
            sample_memory: false,
        }
    }
}

/// One emulation target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardProfile {
    /// Registry key; filled in on lookup.
    #[serde(skip)]
    pub name: String,

    /// Emulator argv. Every `{binary}` is replaced by the firmware path.
    pub launch: Vec<String>,

    /// Shell prompt printed when the shell is ready for input.
    pub prompt: String,

    /// Text that marks a successful boot.
    pub boot_banner: String,

    /// Default time a command may take.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// Bytes that ask the emulator to quit (QEMU: Ctrl-A x).
    pub quit_sequence: String,

    /// Substrings that indicate the kernel crashed.
    pub crash_markers: Vec<String>,

    /// Substrings that turn an otherwise clean command output into a failure.
    pub error_markers: Vec<String>,

    /// Text the shell prints for an unknown command.
    pub not_found_marker: String,

    /// How to read free memory from the shell, if supported.
    pub memory_probe: Option<MemoryProbe>,
}

impl Default for BoardProfile {
    fn default() -> Self {
        Self {
            name: String::new(),
            launch: Vec::new(),
            prompt: "nsh>".to_string(),
            boot_banner: "NuttShell ".to_string(),
            timeout: Duration::from_secs(5),
            quit_sequence: "\u{1}x".to_string(),
            crash_markers: vec!["stack_dump".to_string()],
            error_markers: vec!["panicked at".to_string()],
            not_found_marker: "command not found".to_string(),
            memory_probe: Some(MemoryProbe::default()),
        }
    }
}

impl BoardProfile {
    /// Create a profile for a QEMU-style launch command with NSH defaults.
    pub fn new(name: impl Into<String>, launch: &[&str]) -> Self {
        Self {
            name: name.into(),
            launch: launch.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Render the launch argv for the given firmware image.
    pub fn launch_argv(&self, binary: &Path) -> Vec<String> {
        let binary = binary.display().to_string();
        self.launch
            .iter()
            .map(|arg| arg.replace(BINARY_PLACEHOLDER, &binary))
            .collect()
    }
}

/// Where the free-memory figure lives in the output of a status command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryProbe {
    /// Command to send, e.g. `free`.
    pub command: String,
    /// Marker that identifies the line to read.
    pub line_marker: String,
    /// Zero-based index of the numeric field after the marker.
    pub field: usize,
}

impl Default for MemoryProbe {
    fn default() -> Self {
        Self {
            command: "free".to_string(),
            line_marker: "Umem:".to_string(),
            field: 2,
        }
    }
}

/// The boards that ship with the bench.
pub fn builtin_boards() -> BTreeMap<String, BoardProfile> {
    let boards = [
        BoardProfile::new(
            "mps2-an521",
            &[
                "qemu-system-arm",
                "-machine",
                "mps2-an521",
                "-nographic",
                "-kernel",
                BINARY_PLACEHOLDER,
            ],
        ),
        BoardProfile::new(
            "sabre-6quad",
            &[
                "qemu-system-arm",
                "-machine",
                "sabrelite",
                "-nographic",
                "-kernel",
                BINARY_PLACEHOLDER,
            ],
        ),
        BoardProfile::new(
            "rv-virt",
            &[
                "qemu-system-riscv32",
                "-semihosting",
                "-M",
                "virt,aclint=on",
                "-cpu",
                "rv32",
                "-smp",
                "8",
                "-bios",
                "none",
                "-nographic",
                "-kernel",
                BINARY_PLACEHOLDER,
            ],
        ),
    ];

    boards
        .into_iter()
        .map(|board| (board.name.clone(), board))
        .collect()
}

/// Firmware build settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// NuttX source tree.
    pub nuttx_path: PathBuf,

    /// CMake build directory.
    pub build_dir: PathBuf,

    /// CMake generator.
    pub generator: String,

    /// Options applied to every build.
    pub kconfig: Vec<KconfigOption>,

    /// Extra options keyed by board (`rv-virt`) or board config (`rv-virt:nsh`).
    pub board_kconfig: BTreeMap<String, Vec<KconfigOption>>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            nuttx_path: PathBuf::from("nuttx"),
            build_dir: PathBuf::from("build"),
            generator: "Ninja".to_string(),
            kconfig: kconfig::rust_support_options(),
            board_kconfig: kconfig::default_board_options(),
        }
    }
}

/// Serialize a [`Duration`] as fractional seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();
        assert_eq!(config.session.boot_timeout, Duration::from_secs(10));
        assert_eq!(config.session.prompt_timeout, Duration::from_secs(5));
        assert_eq!(config.session.echo_timeout, Duration::from_secs(1));
        assert_eq!(config.session.stop_grace, Duration::from_secs(5));
        assert!(!config.session.sample_memory);
        assert!(config.boards.is_empty());
        assert_eq!(config.build.nuttx_path, PathBuf::from("nuttx"));
        assert_eq!(config.build.build_dir, PathBuf::from("build"));
        assert_eq!(config.build.generator, "Ninja");
        assert!(!config.build.kconfig.is_empty());
        assert!(!config.verbose);
    }

    #[test]
    fn test_builtin_registry() {
        let config = Config::default();
        assert_eq!(
            config.supported_boards(),
            vec!["mps2-an521", "rv-virt", "sabre-6quad"]
        );

        let board = config.board("mps2-an521").unwrap();
        assert_eq!(board.name, "mps2-an521");
        assert_eq!(board.prompt, "nsh>");
        assert_eq!(board.boot_banner, "NuttShell ");
        assert_eq!(board.timeout, Duration::from_secs(5));
        assert_eq!(board.quit_sequence, "\u{1}x");
    }

    #[test]
    fn test_unknown_board_lists_supported() {
        let err = Config::default().board("esp32c3").unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("Configuration error: unsupported board 'esp32c3'"));
        assert!(msg.contains("mps2-an521, rv-virt, sabre-6quad"));
    }

    #[test]
    fn test_launch_argv_substitutes_binary() {
        let board = Config::default().board("sabre-6quad").unwrap();
        let argv = board.launch_argv(Path::new("/tmp/build/nuttx"));
        assert_eq!(
            argv,
            vec![
                "qemu-system-arm",
                "-machine",
                "sabrelite",
                "-nographic",
                "-kernel",
                "/tmp/build/nuttx"
            ]
        );
    }

    #[test]
    fn test_config_deserialize_full() {
        let toml_str = r#"
        verbose = true

        [session]
        boot_timeout = 20
        prompt_timeout = 2.5
        sample_memory = true

        [boards.fake]
        launch = ["sh", "{binary}"]
        prompt = "$ "
        crash_markers = ["Segmentation fault"]

        [boards.mps2-an521]
        launch = ["my-qemu", "-kernel", "{binary}"]

        [build]
        nuttx_path = "/src/nuttx"
        kconfig = [
            { action = "enable", option = "CONFIG_FS_PROCFS" },
            { action = "set-val", option = "CONFIG_INIT_STACKSIZE", value = "8192" },
        ]
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.verbose);
        assert_eq!(config.session.boot_timeout, Duration::from_secs(20));
        assert_eq!(config.session.prompt_timeout, Duration::from_millis(2500));
        assert_eq!(config.session.echo_timeout, Duration::from_secs(1));
        assert!(config.session.sample_memory);

        let fake = config.board("fake").unwrap();
        assert_eq!(fake.launch, vec!["sh", "{binary}"]);
        assert_eq!(fake.prompt, "$ ");
        assert_eq!(fake.crash_markers, vec!["Segmentation fault"]);
        assert_eq!(fake.boot_banner, "NuttShell ");

        let overridden = config.board("mps2-an521").unwrap();
        assert_eq!(overridden.launch[0], "my-qemu");

        assert_eq!(config.build.nuttx_path, PathBuf::from("/src/nuttx"));
        assert_eq!(config.build.kconfig.len(), 2);
        assert_eq!(
            config.build.kconfig[1],
            KconfigOption::SetVal {
                option: "CONFIG_INIT_STACKSIZE".to_string(),
                value: "8192".to_string()
            }
        );
    }

    #[test]
    fn test_negative_timeout_rejected() {
        let result = Config::from_toml_str("[session]\nboot_timeout = -1\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_session_config_roundtrips_through_toml() {
        let mut config = Config::default();
        config.session.echo_timeout = Duration::from_millis(250);
        let text = toml::to_string(&config).unwrap();
        let parsed = Config::from_toml_str(&text).unwrap();
        assert_eq!(parsed.session.echo_timeout, Duration::from_millis(250));
    }
}
