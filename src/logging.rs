//! Logger setup: `log` facade with an `env_logger` backend.
//!
//! Lines go to stdout and are appended to the log file.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Writes every buffer to stdout and to an append-mode file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write_all(buf)?;
        // A full disk must not take the run down with it.
        let _ = self.file.write_all(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()?;
        self.file.flush()
    }
}

/// `[HH:MM:SS.mmm] LEVEL target: message`
fn format_line(now: DateTime<Local>, level: log::Level, target: &str, args: &std::fmt::Arguments) -> String {
    format!("[{}] {:<5} {}: {}", now.format("%H:%M:%S%.3f"), level, target, args)
}

/// Installs the global logger.
///
/// `level` is the configured default; `RUST_LOG` directives take precedence.
pub fn init(log_file: &Path, level: LevelFilter) -> Result<()> {
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))?;

    Builder::new()
        .filter_level(level)
        .filter_module("reqwest", LevelFilter::Warn)
        .filter_module("hyper", LevelFilter::Warn)
        .filter_module("hyper_util", LevelFilter::Warn)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}",
                format_line(Local::now(), record.level(), record.target(), record.args())
            )
        })
        .target(Target::Pipe(Box::new(Tee { file })))
        .try_init()
        .context("Logger already initialized")?;

    Ok(())
}
