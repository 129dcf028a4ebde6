//! Firmware build pipeline: CMake configure, Kconfig tweaks, Ninja build and
//! size measurement.

use crate::config::BuildConfig;
use crate::core::error::{Error, Result};
use crate::measure::{SizeMetrics, parse_size_report};
use crate::util::fs::{check_command_available, remove_dir_if_exists};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub mod collect;
pub mod kconfig;

pub use collect::Collector;
pub use kconfig::KconfigOption;

/// Executes external build tools.
pub trait CommandRunner {
    /// Run `program` with `args` in `cwd` (or the current directory) and
    /// return its standard output. A non-zero exit is an error.
    fn run(&mut self, program: &str, args: &[String], cwd: Option<&Path>) -> Result<String>;
}

/// External tools the build pipeline invokes.
pub const REQUIRED_TOOLS: [&str; 4] = ["cmake", "ninja", "kconfig-tweak", "size"];

/// The subset of `tools` that cannot be launched.
pub fn missing_tools<'a>(tools: &[&'a str]) -> Vec<&'a str> {
    tools
        .iter()
        .copied()
        .filter(|tool| !check_command_available(tool))
        .collect()
}

/// Runs commands as child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&mut self, program: &str, args: &[String], cwd: Option<&Path>) -> Result<String> {
        let rendered = render_command(program, args);
        log::debug!("running: {}", rendered);

        let mut cmd = Command::new(program);
        cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .map_err(|e| Error::build(format!("failed to run: {}: {}", rendered, e)))?;

        if !output.status.success() {
            return Err(Error::build(format!(
                "failed to run: {}\n{}",
                rendered,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn render_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Configures and builds NuttX for one `board:config` target.
#[derive(Debug)]
pub struct Builder<R: CommandRunner = SystemCommandRunner> {
    board_config: String,
    board: String,
    settings: BuildConfig,
    runner: R,
}

impl Builder<SystemCommandRunner> {
    /// Create a builder for `board:config` (e.g. `rv-virt:nsh`).
    pub fn new(board_config: &str, settings: BuildConfig) -> Result<Self> {
        Self::with_runner(board_config, settings, SystemCommandRunner)
    }
}

impl<R: CommandRunner> Builder<R> {
    /// Create a builder that runs its tools through `runner`.
    pub fn with_runner(board_config: &str, settings: BuildConfig, runner: R) -> Result<Self> {
        let (board, config) = board_config.split_once(':').ok_or_else(|| Error::InvalidConfig {
            field: "board_config".to_string(),
            value: board_config.to_string(),
        })?;
        if board.is_empty() || config.is_empty() {
            return Err(Error::InvalidConfig {
                field: "board_config".to_string(),
                value: board_config.to_string(),
            });
        }

        Ok(Self {
            board_config: board_config.to_string(),
            board: board.to_string(),
            settings,
            runner,
        })
    }

    pub fn board_config(&self) -> &str {
        &self.board_config
    }

    /// Board part of the target, used to pick an emulator profile.
    pub fn board(&self) -> &str {
        &self.board
    }

    pub fn build_dir(&self) -> &Path {
        &self.settings.build_dir
    }

    /// Where the linked firmware image ends up.
    pub fn binary_path(&self) -> PathBuf {
        self.settings.build_dir.join("nuttx")
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Start from a clean build directory, run CMake and apply Kconfig
    /// options, followed by `extra`.
    pub fn configure(&mut self, extra: &[KconfigOption]) -> Result<()> {
        log::info!("configuring {}", self.board_config);
        remove_dir_if_exists(&self.settings.build_dir)?;
        self.configure_cmake()?;

        let defaults = self.settings.kconfig.clone();
        self.apply_kconfig(&defaults)?;
        let board_options = self.board_options();
        self.apply_kconfig(&board_options)?;
        self.olddefconfig()?;

        if !extra.is_empty() {
            self.apply_kconfig(extra)?;
        }
        self.olddefconfig()
    }

    /// Build with Ninja and measure the resulting image.
    pub fn build(&mut self) -> Result<SizeMetrics> {
        log::info!("building {}", self.board_config);
        let dir = self.settings.build_dir.clone();
        self.runner.run("ninja", &[], Some(&dir))?;
        Ok(self.measure())
    }

    /// Segment sizes of the built image. Zeros when it cannot be measured.
    pub fn measure(&mut self) -> SizeMetrics {
        let binary = self.binary_path();
        if !binary.exists() {
            log::warn!("NuttX binary not found at {}", binary.display());
            return SizeMetrics::zero();
        }

        match self
            .runner
            .run("size", &[binary.display().to_string()], None)
        {
            Ok(report) => parse_size_report(&report),
            Err(e) => {
                log::warn!("size command failed: {}", e);
                SizeMetrics::zero()
            }
        }
    }

    /// Options configured for this board, then for this exact board config.
    fn board_options(&self) -> Vec<KconfigOption> {
        [self.board.as_str(), self.board_config.as_str()]
            .iter()
            .filter_map(|key| self.settings.board_kconfig.get(*key))
            .flatten()
            .cloned()
            .collect()
    }

    fn configure_cmake(&mut self) -> Result<()> {
        let args = vec![
            format!("-B{}", self.settings.build_dir.display()),
            format!("-G{}", self.settings.generator),
            format!("-DBOARD_CONFIG={}", self.board_config),
            self.settings.nuttx_path.display().to_string(),
        ];
        self.runner.run("cmake", &args, None)?;
        Ok(())
    }

    fn apply_kconfig(&mut self, options: &[KconfigOption]) -> Result<()> {
        let dir = self.settings.build_dir.clone();
        for option in options {
            log::debug!("kconfig: {}", option);
            self.runner
                .run("kconfig-tweak", &option.tweak_args(), Some(&dir))?;
        }
        Ok(())
    }

    fn olddefconfig(&mut self) -> Result<()> {
        let dir = self.settings.build_dir.clone();
        self.runner
            .run("ninja", &["olddefconfig".to_string()], Some(&dir))?;
        Ok(())
    }
}
