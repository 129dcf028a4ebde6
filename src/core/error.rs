/// Result type alias for nuttx-crate-bench operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for nuttx-crate-bench.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration-related errors, including unknown boards.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidConfig { field: String, value: String },

    /// The emulator process could not be spawned.
    #[error("Launch error: {0}")]
    Launch(String),

    /// The boot banner or shell prompt never showed up.
    #[error("Boot failure: {stage} not observed")]
    BootFailure {
        /// Which boot step was being waited for.
        stage: String,
        /// Console text captured before giving up.
        output: String,
    },

    /// I/O trouble while talking to a running emulator.
    #[error("Runner error: {0}")]
    Runner(String),

    /// Unexpected console or report shape.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Firmware build pipeline errors.
    #[error("Build error: {0}")]
    Build(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML deserialization error.
    #[error("TOML parsing error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a launch error.
    pub fn launch(msg: impl Into<String>) -> Self {
        Error::Launch(msg.into())
    }

    /// Create a boot failure for the given stage.
    pub fn boot_failure(stage: impl Into<String>, output: impl Into<String>) -> Self {
        Error::BootFailure {
            stage: stage.into(),
            output: output.into(),
        }
    }

    /// Create a runner error.
    pub fn runner(msg: impl Into<String>) -> Self {
        Error::Runner(msg.into())
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }

    /// Create a build error.
    pub fn build(msg: impl Into<String>) -> Self {
        Error::Build(msg.into())
    }

    /// Whether this error is a boot failure.
    pub fn is_boot_failure(&self) -> bool {
        matches!(self, Error::BootFailure { .. })
    }
}
