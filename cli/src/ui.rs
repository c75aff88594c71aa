//! Terminal output for `wsync`.
//!
//! Progress and results go to stdout, problems go to stderr, so piping
//! `wsync rpc` into `jq` keeps working when something goes wrong.

use colored::{ColoredString, Colorize};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Step,
    Success,
    Failure,
    Warning,
}

impl Tone {
    fn marker(self) -> ColoredString {
        match self {
            Tone::Step => "→".blue().bold(),
            Tone::Success => "✓".green().bold(),
            Tone::Failure => "✗".red().bold(),
            Tone::Warning => "!".yellow().bold(),
        }
    }

    fn to_stderr(self) -> bool {
        matches!(self, Tone::Failure | Tone::Warning)
    }
}

fn emit(tone: Tone, message: &str) {
    let line = format!("{} {}", tone.marker(), message);
    if tone.to_stderr() {
        eprintln!("{}", line);
    } else {
        println!("{}", line);
    }
}

pub fn print_step(message: &str) {
    emit(Tone::Step, message);
}

pub fn print_success(message: &str) {
    emit(Tone::Success, message);
}

pub fn print_error(message: &str) {
    emit(Tone::Failure, message);
}

pub fn print_warning(message: &str) {
    emit(Tone::Warning, message);
}

/// Indented detail under the previous line.
pub fn print_info(message: &str) {
    println!("  {}", message.dimmed());
}

/// Heading for a block of output such as one merged view.
pub fn print_section(title: &str) {
    let rule = "─".repeat(title.chars().count().clamp(20, 60));
    println!("\n{}\n{}", title.bold(), rule.dimmed());
}

/// Spinner shown while waiting on the router. Clear it before printing.
pub fn create_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner().with_message(message.to_string());
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(style.tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "));
    }
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Filled dot when a sport has anything live, hollow otherwise.
pub fn live_marker(live_events: u32) -> ColoredString {
    if live_events > 0 {
        "●".green()
    } else {
        "○".dimmed()
    }
}
