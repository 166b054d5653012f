//! Logger setup for the `kb` binary.

use std::fs::File;
use std::path::{Path, PathBuf};

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

pub const DEFAULT_LOG_FILE: &str = "./kb.log";

/// Where log records go. Command output always goes to stdout, so the
/// terminal logger writes to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogDestination {
    #[default]
    File,
    Terminal,
    Both,
}

impl LogDestination {
    fn to_file(self) -> bool {
        matches!(self, LogDestination::File | LogDestination::Both)
    }

    fn to_terminal(self) -> bool {
        matches!(self, LogDestination::Terminal | LogDestination::Both)
    }
}

/// Installs the global logger. A log file that cannot be created is
/// reported on stderr and skipped; the returned flag says whether any
/// logger was installed.
pub fn initialize(destination: LogDestination, level: LevelFilter, log_file: &Path) -> bool {
    let config = record_format();
    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();

    if destination.to_terminal() {
        loggers.push(TermLogger::new(
            level,
            config.clone(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        ));
    }
    if destination.to_file() {
        match File::create(log_file) {
            Ok(file) => loggers.push(WriteLogger::new(level, config, file)),
            Err(err) => eprintln!("kb: cannot create log file {}: {}", log_file.display(), err),
        }
    }

    !loggers.is_empty() && CombinedLogger::init(loggers).is_ok()
}

pub fn default_log_file() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_FILE)
}

fn record_format() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Error)
        .build()
}
