//! Phase reporting and coloured user-facing messages.
//!
//! The planner narrates its progress as numbered steps, each opened with a
//! magenta banner and closed with a green `Completed` or red `Failed`
//! marker. All output goes to the stream selected on the command line, which
//! may be standard output or a report file.

use colored::Colorize;
use std::io::{self, Write};

/// Tracker for the numbered step banners.
///
/// The per-date part of the pipeline re-runs the same steps for every
/// linearized date, so the tracker is `Clone`: the date loop clones it once
/// per date and the step numbering restarts from the shared position.
#[derive(Clone)]
pub struct PhaseReport {
    step: usize,
}

impl PhaseReport {
    pub fn new() -> Self {
        PhaseReport { step: 0 }
    }

    /// Opens the next step and prints its banner.
    pub fn begin(&mut self, stream: &mut dyn Write, name: &str) -> io::Result<()> {
        self.step += 1;
        writeln!(stream, "{}", format!("Step {}) - {}", self.step, name).magenta())
    }

    /// Marks the current step as completed.
    pub fn complete(&self, stream: &mut dyn Write, name: &str) -> io::Result<()> {
        writeln!(
            stream,
            "{} {}",
            format!("Step {}) - {} -", self.step, name).magenta(),
            "Completed".green()
        )
    }

    /// Skips the numbering of steps reported elsewhere, such as the
    /// per-date steps run inside the date loop.
    pub fn advance(&mut self, steps: usize) {
        self.step += steps;
    }

    /// Marks the current step as failed.
    pub fn fail(&self, stream: &mut dyn Write, name: &str) -> io::Result<()> {
        writeln!(
            stream,
            "{} {}",
            format!("Step {}) - {} -", self.step, name).magenta(),
            "Failed".red()
        )
    }
}

impl Default for PhaseReport {
    fn default() -> Self {
        Self::new()
    }
}

pub fn error(stream: &mut dyn Write, message: &str) -> io::Result<()> {
    writeln!(stream, "{}", message.red())?;
    stream.flush()
}

pub fn warning(stream: &mut dyn Write, message: &str) -> io::Result<()> {
    writeln!(stream, "{}", message.yellow())?;
    stream.flush()
}

pub fn info(stream: &mut dyn Write, message: &str) -> io::Result<()> {
    writeln!(stream, "{}", message.blue())
}

pub fn news(stream: &mut dyn Write, message: &str) -> io::Result<()> {
    writeln!(stream, "{}", message.green())
}
