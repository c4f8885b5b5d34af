//! Service status command

use anyhow::Result;
use chrono::{TimeZone, Utc};
use colored::Colorize;
use serde_json::json;
use tabled::Tabled;

use replay_lib::ComponentStatus;

use crate::client::ApiClient;
use crate::output::{color_status, format_timestamp, print_heading, print_json, print_rows, OutputFormat};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Checked")]
    checked: String,
}

/// Show server health and readiness
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health = client.health().await?;
    let readiness = client.readiness().await?;

    match format {
        OutputFormat::Json => {
            print_json(&json!({ "health": health, "readiness": readiness }))?;
        }
        OutputFormat::Table => {
            print_heading("Replay Server Status");
            println!("Health:                 {}", color_status(status_label(health.status)));
            match (readiness.ready, &readiness.reason) {
                (true, _) => println!("Ready:                  {}", "yes".green()),
                (false, reason) => println!(
                    "Ready:                  {} ({})",
                    "no".red(),
                    reason.as_deref().unwrap_or("no reason given")
                ),
            }
            println!();

            let rows = health
                .components
                .iter()
                .map(|(name, c)| ComponentRow {
                    name: name.clone(),
                    status: color_status(status_label(c.status)),
                    message: c.message.clone().unwrap_or_else(|| "-".to_string()),
                    checked: Utc
                        .timestamp_opt(c.last_check_timestamp, 0)
                        .single()
                        .map(|ts| format_timestamp(&ts))
                        .unwrap_or_else(|| "-".to_string()),
                })
                .collect();
            print_rows(rows, "No components registered");
        }
    }

    Ok(())
}

fn status_label(status: ComponentStatus) -> &'static str {
    match status {
        ComponentStatus::Healthy => "healthy",
        ComponentStatus::Degraded => "degraded",
        ComponentStatus::Unhealthy => "unhealthy",
    }
}
