//! Operator-facing terminal output.
//!
//! Every line the CLI prints to a human goes through here so that progress,
//! results and summaries share one look.

use std::fmt::Display;
use std::time::Duration;

use colored::{ColoredString, Colorize};
use indicatif::{ProgressBar, ProgressStyle};

const RULE_WIDTH: usize = 70;
const INDENT: &str = "  ";

const BANNER: &str = r"
   ____ _____ ____  _____ ____
  / ___| ____|  _ \| ____/ ___|
 | |   |  _| | |_) |  _| \___ \
 | |___| |___|  _ <| |___ ___) |
  \____|_____|_| \_\_____|____/
";

fn rule() -> ColoredString {
    "═".repeat(RULE_WIDTH).bright_black()
}

fn marked(mark: ColoredString, text: impl Display) {
    println!("{mark} {text}");
}

pub fn print_banner() {
    println!("\n{}", BANNER.cyan());
    println!("{INDENT}{}\n", "Platform deployment and operations".bright_black());
}

/// Framed heading that opens a phase of a command.
pub fn print_section(title: &str) {
    println!("\n{}\n{}\n{}\n", rule(), title.cyan().bold(), rule());
}

pub fn print_step(message: &str) {
    marked("▶".cyan(), message.bold());
}

/// Step line prefixed with `[current/total]`.
pub fn print_progress_step(current: usize, total: usize, message: &str) {
    let counter = format!("[{current}/{total}]").bright_black();
    println!("{counter} {} {}", "▶".cyan(), message.bold());
}

pub fn print_success(message: &str) {
    marked("✓".green().bold(), message.green());
}

pub fn print_warning(message: &str) {
    marked("⚠".yellow().bold(), message.yellow());
}

/// Errors go to stderr so piped stdout stays clean.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

pub fn print_info(message: &str) {
    marked("ℹ".blue().bold(), message);
}

/// One prerequisite or health line, optionally with a detail after a dash.
pub fn print_check_result(name: &str, passed: bool, message: Option<&str>) {
    let mark = if passed { "✓".green() } else { "✗".red() };
    match message {
        Some(detail) => println!("{INDENT}{mark} {name} - {detail}"),
        None => println!("{INDENT}{mark} {name}"),
    }
}

pub fn print_kv(key: &str, value: &str) {
    let label = format!("{key}:").bright_black();
    println!("{INDENT}{label} {}", value.green());
}

pub fn print_list_item(item: &str) {
    println!("{INDENT}{} {item}", "•".bright_black());
}

/// Raw command output, indented under the current step.
pub fn print_block(text: &str) {
    text.lines().for_each(|line| println!("{INDENT}{INDENT}{line}"));
}

/// Spinner for a bounded wait; hidden when stdout is not a terminal.
#[must_use]
pub fn spinner(message: &str) -> ProgressBar {
    let style = ProgressStyle::with_template("  {spinner:.cyan} {msg} {elapsed:.dim}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let bar = ProgressBar::new_spinner().with_style(style);
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}
