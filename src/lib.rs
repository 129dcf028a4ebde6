//! nuttx-crate-bench: measures what optional Rust crates cost in a NuttX
//! firmware image and checks that each image still boots and runs.
//!
//! A benchmark pass builds a baseline image for a `board:config` target, then
//! rebuilds it once per crate with that crate's Kconfig option enabled,
//! compares segment sizes and optionally boots every image under QEMU to run
//! a shell command on it.
//!
//! # Running a command on an image
//!
//! ```no_run
//! use nuttx_crate_bench::{Config, SessionController};
//! use std::time::Duration;
//!
//! # fn main() -> nuttx_crate_bench::Result<()> {
//! let config = Config::default();
//! let mut controller = SessionController::new("build/nuttx", "rv-virt", &config)?;
//! let result = controller.run("hello", Some(Duration::from_secs(10)))?;
//! println!("{:?} in {:?}: {}", result.outcome, result.duration, result.output);
//! # Ok(())
//! # }
//! ```
//!
//! # Comparing builds
//!
//! ```no_run
//! use nuttx_crate_bench::build::{Builder, KconfigOption};
//! use nuttx_crate_bench::measure::{SizeReportFormatter, diff};
//! use nuttx_crate_bench::Config;
//!
//! # fn main() -> nuttx_crate_bench::Result<()> {
//! let config = Config::default();
//! let mut builder = Builder::new("rv-virt:nsh", config.build.clone())?;
//! builder.configure(&[])?;
//! let baseline = builder.build()?;
//!
//! builder.configure(&[KconfigOption::enable("CONFIG_RUST_CRATE_REGEX")])?;
//! let with_crate = builder.build()?;
//!
//! let report = SizeReportFormatter::new().render(
//!     "regex",
//!     &baseline,
//!     &with_crate,
//!     &diff(&baseline, &with_crate),
//! );
//! print!("{}", report);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! Settings come from defaults, an optional TOML file and
//! `NUTTX_CRATE_BENCH_*` environment variables, in that order:
//!
//! ```toml
//! [session]
//! boot_timeout = 20.0
//! sample_memory = true
//!
//! [boards.my-board]
//! launch = ["qemu-system-arm", "-M", "virt", "-nographic", "-kernel", "{binary}"]
//! prompt = "nsh>"
//! ```

pub mod build;
pub mod config;
pub mod core;
pub mod measure;
pub mod results;
pub mod runner;
pub mod util;

// Re-export commonly used types
pub use crate::core::{Error, Result};
pub use config::{BoardProfile, Config, ConfigLoader};
pub use measure::{SizeDiff, SizeMetrics};
pub use runner::{EchoStatus, RunOutcome, RunResult, SessionController};
