//! Fleet view commands

use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use replay_lib::{FleetView, HostCondition, WorkloadPhase};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_status, format_timestamp, or_dash, print_heading, print_json, print_rows,
    print_warning, OutputFormat,
};

#[derive(Tabled)]
struct HostRow {
    #[tabled(rename = "Host")]
    host_id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Condition")]
    condition: String,
    #[tabled(rename = "Observed")]
    observed: String,
    #[tabled(rename = "Workloads")]
    workloads: usize,
    #[tabled(rename = "Schedulable")]
    schedulable: String,
}

#[derive(Tabled)]
struct WorkloadRow {
    #[tabled(rename = "Host")]
    host_id: String,
    #[tabled(rename = "Workload")]
    workload_id: String,
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "Ready")]
    ready: String,
    #[tabled(rename = "Observed")]
    observed: String,
}

#[derive(Tabled)]
struct TimelineRow {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Hosts")]
    hosts: usize,
    #[tabled(rename = "Not Ready")]
    not_ready: usize,
    #[tabled(rename = "Workloads")]
    workloads: usize,
    #[tabled(rename = "Running")]
    running: usize,
    #[tabled(rename = "Omitted (h/w)")]
    omitted: String,
}

impl TimelineRow {
    fn from_view(view: &FleetView) -> Self {
        let workloads = view.hosts.iter().flat_map(|h| h.workloads.iter());
        Self {
            timestamp: format_timestamp(&view.timestamp),
            hosts: view.hosts.len(),
            not_ready: view
                .hosts
                .iter()
                .filter(|h| h.snapshot.condition != HostCondition::Ready)
                .count(),
            workloads: view.workload_count(),
            running: workloads
                .filter(|w| w.snapshot.phase == WorkloadPhase::Running)
                .count(),
            omitted: format!("{}/{}", view.omitted_hosts, view.omitted_workloads),
        }
    }
}

/// Show the fleet at one instant
pub async fn show_at(
    client: &ApiClient,
    at: Option<DateTime<Utc>>,
    format: OutputFormat,
) -> Result<()> {
    let view = client.fleet_at(at).await?;

    match format {
        OutputFormat::Json => print_json(&view)?,
        OutputFormat::Table => print_view(&view),
    }

    Ok(())
}

/// Show one fleet view per change within a range
pub async fn show_eventful(
    client: &ApiClient,
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
    format: OutputFormat,
) -> Result<()> {
    let views = client.fleet_eventful(begin, end).await?;
    print_timeline(&views, "Fleet changes", format)
}

/// Show fleet views sampled on a fixed interval
pub async fn show_interval(
    client: &ApiClient,
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
    interval_secs: i64,
    format: OutputFormat,
) -> Result<()> {
    let views = client.fleet_interval(begin, end, interval_secs).await?;
    print_timeline(&views, &format!("Fleet every {interval_secs}s"), format)
}

fn print_view(view: &FleetView) {
    print_heading(&format!("Fleet at {}", format_timestamp(&view.timestamp)));

    let hosts = view
        .hosts
        .iter()
        .map(|h| HostRow {
            host_id: h.host_id.clone(),
            name: or_dash(&h.attributes.name),
            condition: color_status(h.snapshot.condition.as_str()),
            observed: format_timestamp(&h.snapshot.timestamp),
            workloads: h.workloads.len(),
            schedulable: if h.snapshot.unschedulable {
                "no".red().to_string()
            } else {
                "yes".to_string()
            },
        })
        .collect();
    print_rows(hosts, "No hosts had been observed at this time");

    let workloads: Vec<WorkloadRow> = view
        .hosts
        .iter()
        .flat_map(|h| {
            h.workloads.iter().map(move |w| WorkloadRow {
                host_id: h.host_id.clone(),
                workload_id: w.workload_id.clone(),
                namespace: or_dash(&w.attributes.namespace),
                phase: color_status(w.snapshot.phase.as_str()),
                ready: format!(
                    "{}/{}",
                    w.snapshot.components.iter().filter(|c| c.ready).count(),
                    w.snapshot.components.len()
                ),
                observed: format_timestamp(&w.snapshot.timestamp),
            })
        })
        .collect();
    if !workloads.is_empty() {
        println!();
        print_rows(workloads, "");
    }

    if view.omitted_hosts > 0 || view.omitted_workloads > 0 {
        println!();
        print_warning(&format!(
            "{} host(s) and {} workload(s) had no snapshot yet",
            view.omitted_hosts, view.omitted_workloads
        ));
    }
}

fn print_timeline(views: &[FleetView], title: &str, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(views)?,
        OutputFormat::Table => {
            print_heading(title);
            print_rows(
                views.iter().map(TimelineRow::from_view).collect(),
                "No snapshots in this range",
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use replay_lib::{HostSnapshot, HostView, WorkloadSnapshot, WorkloadView};

    #[test]
    fn test_timeline_row_counts() {
        let at = Utc.timestamp_opt(30, 0).unwrap();
        let view = FleetView {
            timestamp: at,
            hosts: vec![HostView {
                host_id: "h1".into(),
                attributes: Default::default(),
                snapshot: HostSnapshot::new(at, HostCondition::NotReady),
                workloads: vec![
                    WorkloadView {
                        workload_id: "w1".into(),
                        attributes: Default::default(),
                        snapshot: WorkloadSnapshot::new(at, WorkloadPhase::Running),
                    },
                    WorkloadView {
                        workload_id: "w2".into(),
                        attributes: Default::default(),
                        snapshot: WorkloadSnapshot::new(at, WorkloadPhase::Pending),
                    },
                ],
            }],
            omitted_hosts: 1,
            omitted_workloads: 3,
        };

        let row = TimelineRow::from_view(&view);
        assert_eq!(row.hosts, 1);
        assert_eq!(row.not_ready, 1);
        assert_eq!(row.workloads, 2);
        assert_eq!(row.running, 1);
        assert_eq!(row.omitted, "1/3");
    }
}
