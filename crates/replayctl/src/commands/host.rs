//! Host detail command

use anyhow::Result;
use colored::Colorize;
use replay_lib::HostRecord;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_status, format_optional_timestamp, format_timestamp, or_dash, print_heading,
    print_json, print_rows, OutputFormat,
};

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Condition")]
    condition: String,
    #[tabled(rename = "CPU (alloc)")]
    cpu: String,
    #[tabled(rename = "Memory (alloc)")]
    memory: String,
    #[tabled(rename = "Pods")]
    pods: i64,
    #[tabled(rename = "Taints")]
    taints: usize,
}

#[derive(Tabled)]
struct WorkloadRow {
    #[tabled(rename = "Workload")]
    workload_id: String,
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "QoS")]
    qos: String,
    #[tabled(rename = "Snapshots")]
    snapshots: usize,
    #[tabled(rename = "Latest Phase")]
    latest_phase: String,
    #[tabled(rename = "Deleted")]
    deleted_at: String,
}

/// Show a host's attributes, snapshot history and workloads
pub async fn show_host(client: &ApiClient, host_id: &str, format: OutputFormat) -> Result<()> {
    let host = client.host(host_id).await?;

    match format {
        OutputFormat::Json => print_json(&host)?,
        OutputFormat::Table => print_host(&host),
    }

    Ok(())
}

fn print_host(host: &HostRecord) {
    let attrs = &host.attributes;
    print_heading(&format!("Host {}", host.host_id.cyan()));
    println!("Name:                   {}", or_dash(&attrs.name));
    println!("Provider ID:            {}", or_dash(&attrs.provider_id));
    println!("Architecture:           {}", or_dash(&attrs.architecture));
    println!("OS Image:               {}", or_dash(&attrs.os_image));
    println!("Kernel:                 {}", or_dash(&attrs.kernel_version));
    println!("Kubelet:                {}", or_dash(&attrs.kubelet_version));
    println!("Runtime:                {}", or_dash(&attrs.container_runtime_version));
    if !attrs.roles.is_empty() {
        println!("Roles:                  {}", attrs.roles.join(", "));
    }
    println!();

    println!("{}", "Snapshots".bold());
    let snapshots = host
        .history
        .iter()
        .map(|s| SnapshotRow {
            timestamp: format_timestamp(&s.timestamp),
            condition: color_status(s.condition.as_str()),
            cpu: or_dash(&s.allocatable.cpu),
            memory: or_dash(&s.allocatable.memory),
            pods: s.allocatable.pods,
            taints: s.taints.len(),
        })
        .collect();
    print_rows(snapshots, "No snapshots recorded");
    println!();

    println!("{}", "Workloads".bold());
    let workloads = host
        .workloads
        .iter()
        .map(|w| WorkloadRow {
            workload_id: w.workload_id.clone(),
            namespace: or_dash(&w.attributes.namespace),
            name: or_dash(&w.attributes.name),
            qos: w.attributes.qos_class.to_string(),
            snapshots: w.history.len(),
            latest_phase: w
                .history
                .latest()
                .map(|s| color_status(s.phase.as_str()))
                .unwrap_or_else(|| "-".to_string()),
            deleted_at: format_optional_timestamp(&w.attributes.deleted_at),
        })
        .collect();
    print_rows(workloads, "No workloads recorded");
}
