//! Log sinks. While the terminal UI owns the screen, records go to a file
//! that is echoed to stderr once the terminal is restored.

use std::fs::{self, File};
use std::io::{LineWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use env_logger::{Builder, Target, WriteStyle};
use log::LevelFilter;

/// Headless runs log straight to stderr. `RUST_LOG` overrides `level`.
pub fn init_stderr(level: LevelFilter) -> Result<()> {
    Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init()
        .context("Failed to install logger")
}

/// Sends every record to `path`, truncating it first.
pub fn init_file(path: &Path, level: LevelFilter) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create log file {}", path.display()))?;
    Builder::new()
        .filter_level(level)
        .parse_default_env()
        .write_style(WriteStyle::Never)
        .target(Target::Pipe(Box::new(LineWriter::new(file))))
        .try_init()
        .context("Failed to install logger")
}

/// Copies the log file to `out` and returns how many lines it held.
pub fn echo_file(path: &Path, out: &mut impl Write) -> Result<usize> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read log file {}", path.display()))?;
    out.write_all(text.as_bytes())?;
    out.flush()?;
    Ok(text.lines().count())
}
