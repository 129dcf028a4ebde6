//! Filesystem and tool-probing helpers.

pub mod fs;

pub use fs::{check_command_available, ensure_dir_exists, remove_dir_if_exists};
