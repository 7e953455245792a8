//! Colored CLI display utilities for supervisor output.
//!
//! This module provides functions for printing colored, formatted output
//! to the terminal while a script is supervised.

use std::io::{self, Write};
use std::path::Path;

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::buffer::Channel;
use crate::supervisor::{Failure, Outcome, SupervisorEvent};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Maximum length for truncated display strings.
const DEFAULT_MAX_LEN: usize = 200;

/// Truncate a string to a maximum number of characters, adding ellipsis if truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize, raw_mode: bool) -> String {
    if raw_mode || s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return "...".to_string();
    }
    let kept: String = s.chars().take(max_len - 3).collect();
    format!("{kept}...")
}

/// Print that a run is starting.
pub fn print_run_start(path: &Path, args: &[String]) {
    println!(
        "{} {} {} {}",
        timestamp().dimmed(),
        "[RUN]".blue().bold(),
        path.display().cyan(),
        args.join(" ").dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print one completed piece.
pub fn print_piece(channel: Channel, text: &str, raw_mode: bool) {
    let text = truncate(text, DEFAULT_MAX_LEN, raw_mode);
    match channel {
        Channel::Stdout => println!("{} {}", "[OUT]".green().bold(), text),
        Channel::Stderr => println!("{} {}", "[ERR]".yellow().bold(), text.yellow()),
    }
    let _ = io::stdout().flush();
}

/// Print the outcome of a run.
pub fn print_outcome(outcome: &Outcome, raw_mode: bool) {
    let ts = timestamp();
    match outcome {
        Outcome::Success(output) => {
            println!("{} {} Run succeeded", ts.dimmed(), "[DONE]".green().bold());
            if !output.is_empty() {
                println!("{}", truncate(output, DEFAULT_MAX_LEN, raw_mode));
            }
        }
        Outcome::Failure(Failure::ManualTermination) => {
            println!("{} {} Run stopped", ts.dimmed(), "[STOP]".yellow().bold());
        }
        Outcome::Failure(Failure::SyntaxError { stderr, exit_code }) => {
            println!(
                "{} {} Syntax error (exit {})",
                ts.dimmed(),
                "[FAIL]".red().bold(),
                exit_code
            );
            println!("{}", truncate(stderr, DEFAULT_MAX_LEN, raw_mode).red());
        }
        Outcome::Failure(Failure::Generic { output, exit_code }) => {
            println!(
                "{} {} Run failed (exit {})",
                ts.dimmed(),
                "[FAIL]".red().bold(),
                exit_code
            );
            if !output.is_empty() {
                println!("{}", truncate(output, DEFAULT_MAX_LEN, raw_mode).red());
            }
        }
    }
    let _ = io::stdout().flush();
}

/// Print an event as a single JSON line.
pub fn print_json_event(event: &SupervisorEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::error!(error = %e, "Failed to serialize event"),
    }
    let _ = io::stdout().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), message.red());
}
