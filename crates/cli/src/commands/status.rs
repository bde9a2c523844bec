//! Shutdown history inspection

use crate::output::{self, OutputFormat};
use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;
use upsguard_lib::decision::fence_remaining;
use upsguard_lib::state::StateStore;
use upsguard_lib::StateMap;

#[derive(Tabled, Serialize)]
struct StatusRow {
    #[tabled(rename = "Deployment")]
    deployment: String,
    #[tabled(rename = "Attempts")]
    attempts: usize,
    #[tabled(rename = "Last attempt")]
    last_attempt: String,
    #[tabled(rename = "Last result")]
    last_result: String,
    #[tabled(rename = "Fence")]
    fence: String,
}

fn rows(state: &StateMap, now: i64) -> Vec<StatusRow> {
    state
        .iter()
        .map(|(name, record)| StatusRow {
            deployment: name.clone(),
            attempts: record.shutdown_times.len(),
            last_attempt: record
                .last_attempt()
                .map(output::format_epoch)
                .unwrap_or_else(|| "never".to_string()),
            last_result: output::color_status(record.last_shutdown_result.label()),
            fence: match fence_remaining(record, now) {
                Some(secs) => format!("{} left", output::format_duration(secs)),
                None => "clear".to_string(),
            },
        })
        .collect()
}

pub fn show(path: &Path, format: OutputFormat) -> Result<()> {
    let state = StateStore::new(path).load()?;

    match format {
        OutputFormat::Json => output::print_json(&state)?,
        OutputFormat::Table => {
            output::print_info(&format!("State file: {}", path.display()));
            output::print_rows(
                rows(&state, chrono::Utc::now().timestamp()),
                "No shutdown has been attempted yet",
            );
        }
    }

    Ok(())
}
