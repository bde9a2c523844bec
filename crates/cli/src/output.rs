//! Output formatting utilities

use chrono::{TimeZone, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a rounded table, or a note when there is nothing to show
pub fn print_rows<T: Tabled>(rows: Vec<T>, empty_message: &str) {
    if rows.is_empty() {
        print_warning(empty_message);
        return;
    }
    println!("{}", Table::new(rows).with(Style::rounded()));
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Epoch seconds as `YYYY-MM-DD HH:MM:SS UTC`
pub fn format_epoch(epoch: i64) -> String {
    match Utc.timestamp_opt(epoch, 0).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => epoch.to_string(),
    }
}

pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

pub fn format_pct(pct: f64) -> String {
    format!("{:.0}%", pct)
}

/// Color a status word by severity
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "succeeded" | "ok" | "valid" | "initiate" => status.green().to_string(),
        "not attempted" | "deferred" | "missing" => status.yellow().to_string(),
        "failed" | "error" | "ambiguous" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Color battery level relative to the shutdown threshold
pub fn color_battery(pct: f64, threshold: f64) -> String {
    let formatted = format_pct(pct);
    if pct <= threshold {
        formatted.red().to_string()
    } else if pct <= threshold * 2.0 {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}
