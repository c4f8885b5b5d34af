//! Fleet Replay CLI
//!
//! A command-line tool for viewing the fleet as it was at a past instant,
//! stepping through its history, and checking the replay server's health.

mod client;
mod commands;
mod config;
mod output;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use commands::{fleet, host, status};

/// Fleet Replay CLI
#[derive(Parser)]
#[command(name = "replayctl")]
#[command(author, version, about = "CLI for the Fleet Replay service", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via REPLAY_API_URL env var)
    #[arg(long, env = "REPLAY_API_URL")]
    pub api_url: Option<String>,

    /// Output format (defaults to the config file, then table)
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reconstruct fleet views
    #[command(subcommand)]
    Fleet(FleetCommands),

    /// Inspect recorded hosts
    #[command(subcommand)]
    Host(HostCommands),

    /// Show server health and readiness
    Status,
}

#[derive(Subcommand)]
pub enum FleetCommands {
    /// Show the fleet at one instant
    At {
        /// RFC 3339 timestamp or unix seconds (now if not specified)
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<DateTime<Utc>>,
    },

    /// Show a fleet view for every recorded change in a range
    Eventful {
        /// Range start, RFC 3339 or unix seconds
        #[arg(long, value_parser = parse_timestamp)]
        begin: DateTime<Utc>,

        /// Range end, RFC 3339 or unix seconds
        #[arg(long, value_parser = parse_timestamp)]
        end: DateTime<Utc>,
    },

    /// Show fleet views sampled on a fixed step
    Interval {
        /// Range start, RFC 3339 or unix seconds
        #[arg(long, value_parser = parse_timestamp)]
        begin: DateTime<Utc>,

        /// Range end, RFC 3339 or unix seconds
        #[arg(long, value_parser = parse_timestamp)]
        end: DateTime<Utc>,

        /// Step between views (e.g., 30s, 5m, 1h, 1d)
        #[arg(long, default_value = "5m", value_parser = parse_duration_secs)]
        every: i64,
    },
}

#[derive(Subcommand)]
pub enum HostCommands {
    /// Show a host's attributes, snapshots and workloads
    Get {
        /// Host ID
        host_id: String,
    },
}

/// Accepts RFC 3339 (`2024-05-01T12:00:00Z`) or integer unix seconds
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    let secs: i64 = value
        .parse()
        .with_context(|| format!("'{value}' is neither RFC 3339 nor unix seconds"))?;
    Utc.timestamp_opt(secs, 0)
        .single()
        .with_context(|| format!("unix seconds out of range: {secs}"))
}

/// Parse durations like `90`, `30s`, `5m`, `2h` or `7d` into seconds
fn parse_duration_secs(value: &str) -> Result<i64> {
    let value = value.trim();
    let (digits, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => value.split_at(idx),
        None => (value, "s"),
    };
    let amount: i64 = digits
        .parse()
        .with_context(|| format!("invalid duration: '{value}'"))?;
    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        other => bail!("unknown duration unit '{other}' (use s, m, h or d)"),
    };
    if amount <= 0 {
        bail!("duration must be positive: '{value}'");
    }
    amount
        .checked_mul(multiplier)
        .with_context(|| format!("duration too large: '{value}'"))
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::Config::load()?;
    let api_url = config.api_url(cli.api_url);
    let format = config.format(cli.format)?;

    if cli.verbose {
        output::print_info(&format!("Using API at {api_url}"));
    }

    let client = client::ApiClient::new(&api_url)?;

    match cli.command {
        Commands::Fleet(fleet_cmd) => match fleet_cmd {
            FleetCommands::At { at } => {
                fleet::show_at(&client, at, format).await?;
            }
            FleetCommands::Eventful { begin, end } => {
                fleet::show_eventful(&client, begin, end, format).await?;
            }
            FleetCommands::Interval { begin, end, every } => {
                fleet::show_interval(&client, begin, end, every, format).await?;
            }
        },
        Commands::Host(host_cmd) => match host_cmd {
            HostCommands::Get { host_id } => {
                host::show_host(&client, &host_id, format).await?;
            }
        },
        Commands::Status => {
            status::show_status(&client, format).await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_timestamp() {
        let expected = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(parse_timestamp("1700000000").unwrap(), expected);
        assert_eq!(
            parse_timestamp("2023-11-14T22:13:20Z").unwrap(),
            expected
        );
        assert_eq!(
            parse_timestamp("2023-11-14T23:13:20+01:00").unwrap(),
            expected
        );
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_parse_duration_secs() {
        assert_eq!(parse_duration_secs("90").unwrap(), 90);
        assert_eq!(parse_duration_secs("30s").unwrap(), 30);
        assert_eq!(parse_duration_secs("5m").unwrap(), 300);
        assert_eq!(parse_duration_secs("2h").unwrap(), 7_200);
        assert_eq!(parse_duration_secs("7d").unwrap(), 604_800);
        assert!(parse_duration_secs("0s").is_err());
        assert!(parse_duration_secs("5w").is_err());
        assert!(parse_duration_secs("m").is_err());
    }

    #[test]
    fn test_interval_args() {
        let cli = Cli::try_parse_from([
            "replayctl",
            "--format",
            "json",
            "fleet",
            "interval",
            "--begin",
            "100",
            "--end",
            "2023-11-14T22:13:20Z",
            "--every",
            "1h",
        ])
        .unwrap();

        assert_eq!(cli.format, Some(output::OutputFormat::Json));
        match cli.command {
            Commands::Fleet(FleetCommands::Interval { begin, end, every }) => {
                assert_eq!(begin.timestamp(), 100);
                assert_eq!(end.timestamp(), 1_700_000_000);
                assert_eq!(every, 3_600);
            }
            _ => panic!("expected fleet interval"),
        }
    }
}
