use clap::{Parser, Subcommand};
use nuttx_crate_bench::build::{
    Builder, Collector, KconfigOption, REQUIRED_TOOLS, collect::crate_name, missing_tools,
};
use nuttx_crate_bench::config::env::detect_active_overrides;
use nuttx_crate_bench::measure::{SizeReportFormatter, diff};
use nuttx_crate_bench::results::{BuildRecord, JsonResultManager, unix_timestamp};
use nuttx_crate_bench::runner::io::TeeHandler;
use nuttx_crate_bench::{
    Config, ConfigLoader, Error, Result, RunOutcome, RunResult, SessionController,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

/// Measure Rust crate footprints in NuttX images and boot-test them under QEMU
#[derive(Parser, Debug)]
#[command(name = "nuttx-crate-bench")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Boot a firmware image and run one shell command on it
    Run {
        /// Firmware image
        binary: PathBuf,

        /// Board profile used to launch the emulator
        #[arg(short, long, default_value = "rv-virt")]
        board: String,

        /// Command to run once the shell is up
        #[arg(long, default_value = "hello")]
        command: String,

        /// Command timeout in seconds (defaults to the board's timeout)
        #[arg(short, long, value_parser = parse_secs)]
        timeout: Option<Duration>,

        /// Sample free heap before and after the command
        #[arg(long)]
        sample_memory: bool,

        /// Echo the emulator console while running
        #[arg(long)]
        show_console: bool,
    },

    /// Build a baseline image, then one image per crate, and compare sizes
    Build {
        /// Target as board:config, e.g. rv-virt:nsh
        board_config: String,

        /// NuttX source tree
        #[arg(long)]
        path: Option<PathBuf>,

        /// Directory searched for crates
        #[arg(long, default_value = "crates")]
        crates_dir: PathBuf,

        /// Append results to this JSON file
        #[arg(long)]
        json: Option<PathBuf>,

        /// Board profile for boot tests (defaults to the target's board)
        #[arg(long)]
        run_board: Option<String>,

        /// Boot each crate image and run this command
        #[arg(long)]
        run_command: Option<String>,
    },

    /// List the board profiles that can be launched
    Boards,
}

fn parse_secs(s: &str) -> std::result::Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("invalid number: {}", e))?;
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.config_file(path);
    }
    let config = match loader.load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let default_level = if cli.verbose || config.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let result = match cli.command {
        Commands::Run {
            binary,
            board,
            command,
            timeout,
            sample_memory,
            show_console,
        } => run_command(
            config,
            binary,
            &board,
            &command,
            timeout,
            sample_memory,
            show_console,
        ),
        Commands::Build {
            board_config,
            path,
            crates_dir,
            json,
            run_board,
            run_command,
        } => build_command(
            config,
            &board_config,
            path,
            crates_dir,
            json,
            run_board,
            run_command,
        ),
        Commands::Boards => {
            list_boards(&config);
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            if let Error::BootFailure { output, .. } = &e {
                if !output.is_empty() {
                    eprintln!("--- captured console ---\n{}", output);
                }
            }
            ExitCode::FAILURE
        }
    }
}

fn run_command(
    mut config: Config,
    binary: PathBuf,
    board: &str,
    command: &str,
    timeout: Option<Duration>,
    sample_memory: bool,
    show_console: bool,
) -> Result<ExitCode> {
    config.session.sample_memory |= sample_memory;

    let mut controller = SessionController::new(binary, board, &config)?;
    if show_console {
        controller = controller.with_observer(TeeHandler::new());
    }

    let result = controller.run(command, timeout)?;
    print_run_result(command, &result);

    Ok(match result.outcome {
        RunOutcome::Failure => ExitCode::FAILURE,
        RunOutcome::Success | RunOutcome::Skipped => ExitCode::SUCCESS,
    })
}

fn print_run_result(command: &str, result: &RunResult) {
    println!("Command:  {}", command);
    println!("Outcome:  {}", result.outcome);
    println!("Duration: {:.2}s", result.duration.as_secs_f64());
    if let Some(echo) = result.echo {
        println!("Echo:     {:?}", echo);
    }
    if let Some(before) = result.free_memory_before {
        println!("Free before: {} bytes", before);
    }
    if let Some(after) = result.free_memory_after {
        println!("Free after:  {} bytes", after);
    }
    if let Some(delta) = result.memory_delta() {
        println!("Free delta:  {:+} bytes", delta);
    }
    println!("{}", result.output);
}

fn build_command(
    mut config: Config,
    board_config: &str,
    path: Option<PathBuf>,
    crates_dir: PathBuf,
    json: Option<PathBuf>,
    run_board: Option<String>,
    run_command: Option<String>,
) -> Result<ExitCode> {
    if let Some(path) = path {
        config.build.nuttx_path = path;
    }

    let missing = missing_tools(&REQUIRED_TOOLS);
    if !missing.is_empty() {
        return Err(Error::build(format!(
            "required tools not found: {}",
            missing.join(", ")
        )));
    }

    let mut builder = Builder::new(board_config, config.build.clone())?;
    let run_board = run_board.unwrap_or_else(|| builder.board().to_string());
    if run_command.is_some() {
        // Reject an unknown board before spending time on builds.
        config.board(&run_board)?;
    }

    let collector = Collector::new(&crates_dir);
    println!("Found {} crate directories:", collector.crate_dirs().len());
    for dir in collector.crate_dirs() {
        println!("  - {}", crate_name(dir));
    }
    let mapping = collector.config_mapping();

    let mut results = JsonResultManager::new(json)?;
    let timestamp = unix_timestamp();

    println!("Building NuttX baseline");
    builder.configure(&[])?;
    let baseline = builder.build()?;
    log::info!("baseline total: {} bytes", baseline.total());

    let mut failures = 0usize;
    for (dir, option) in &mapping {
        let name = crate_name(dir);
        println!("Building crate: {} with option: {}", name, option);

        let started = Instant::now();
        let candidate = match builder
            .configure(&[KconfigOption::enable(option.as_str())])
            .and_then(|_| builder.build())
        {
            Ok(metrics) => metrics,
            Err(e) => {
                log::error!("build of {} failed: {}", name, e);
                failures += 1;
                continue;
            }
        };
        let elapsed = started.elapsed();

        let report = SizeReportFormatter::new().with_build_time(elapsed).render(
            &name,
            &baseline,
            &candidate,
            &diff(&baseline, &candidate),
        );
        print!("{}", report);

        let mut record = BuildRecord::new(board_config, &name, baseline, candidate, timestamp);
        if let Some(command) = &run_command {
            let result = boot_test(&config, &builder.binary_path(), &run_board, command);
            println!(
                "🚀 {} `{}`: {} ({:.2}s)",
                name,
                command,
                result.outcome,
                result.duration.as_secs_f64()
            );
            if result.outcome == RunOutcome::Failure {
                failures += 1;
            }
            record = record.with_run(command.as_str(), &result);
        }
        results.append_result(record);
    }

    results.flush()?;

    if failures > 0 {
        log::warn!("{} of {} crates failed", failures, mapping.len());
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Boot a freshly built image. Launch and boot errors become failures.
fn boot_test(config: &Config, binary: &std::path::Path, board: &str, command: &str) -> RunResult {
    let outcome = SessionController::new(binary, board, config)
        .and_then(|mut controller| controller.run(command, None));
    match outcome {
        Ok(result) => result,
        Err(e) => {
            log::error!("boot test failed: {}", e);
            RunResult::new(Duration::ZERO, e.to_string(), RunOutcome::Failure)
        }
    }
}

fn list_boards(config: &Config) {
    for (name, board) in config.board_registry() {
        println!("{:<14} {}", name, board.launch.join(" "));
    }

    let overrides = detect_active_overrides();
    if !overrides.is_empty() {
        println!();
        println!("Environment overrides:");
        for (key, value) in overrides {
            println!("  {}={}", key, value);
        }
    }
}
