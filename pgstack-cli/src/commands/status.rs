//! `pgstack status` command - reconciled view of every stack

use super::{exit, Context};
use anyhow::Result;
use colored::Colorize;
use pgstack_core::monitor::format_bytes;
use pgstack_core::{ObservedState, ResourceSnapshot, RuntimeObservation, StackDefinition};
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
pub(crate) struct StackRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "STACK")]
    id: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "SERVICES")]
    services: String,
    #[tabled(rename = "PORTS")]
    ports: String,
    #[tabled(rename = "DESCRIPTION")]
    description: String,
}

/// Print every stack and the resource snapshot. Read-only; always exits 0.
pub async fn status(ctx: &Context, json: bool) -> Result<u8> {
    let runtime_error = ctx.runtime.ping().await.err();
    let observations = ctx.controller.status().await;
    let snapshot = ctx.monitor.snapshot().await;
    let stacks = ctx.controller.registry().all();

    if json {
        let stack_values: Vec<serde_json::Value> = stacks
            .iter()
            .zip(&observations)
            .map(|(stack, obs)| {
                serde_json::json!({
                    "id": stack.id,
                    "description": stack.description,
                    "declared_ports": stack.declared_ports,
                    "observation": obs,
                })
            })
            .collect();
        let value = serde_json::json!({
            "runtime_available": runtime_error.is_none(),
            "stacks": stack_values,
            "resources": snapshot,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(exit::OK);
    }

    if let Some(e) = &runtime_error {
        println!("{} {}", "⚠".yellow().bold(), e);
        println!();
    }

    print_stacks(stacks, &observations);
    println!();
    print_resources(&snapshot);
    Ok(exit::OK)
}

/// Stack table plus a warning per partially running stack.
pub(crate) fn print_stacks(stacks: &[StackDefinition], observations: &[RuntimeObservation]) {
    let rows: Vec<StackRow> =
        stacks.iter().zip(observations).enumerate().map(|(i, (stack, obs))| stack_row(i + 1, stack, obs)).collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{}", table);

    for obs in observations.iter().filter(|o| o.state == ObservedState::PartiallyRunning) {
        println!(
            "{} {} is partially running; missing: {}",
            "⚠".yellow().bold(),
            obs.stack_id.bold(),
            if obs.missing_services.is_empty() { "-".to_string() } else { obs.missing_services.join(", ") }
        );
    }

    let live: Vec<&str> = observations.iter().filter(|o| o.state.is_live()).map(|o| o.stack_id.as_str()).collect();
    if live.len() > 1 {
        println!("{} Several stacks are live at once: {}", "⚠".yellow().bold(), live.join(", "));
    }
}

fn stack_row(index: usize, stack: &StackDefinition, obs: &RuntimeObservation) -> StackRow {
    let expected = stack.required_services().count();
    let services = if obs.state == ObservedState::Unknown {
        "-".to_string()
    } else {
        format!("{}/{}", obs.live_services.len(), expected)
    };

    StackRow {
        index,
        id: stack.id.clone(),
        state: colorize_state(obs.state),
        services,
        ports: format_ports(stack.declared_ports.iter().copied()),
        description: stack.description.clone(),
    }
}

fn print_resources(snapshot: &ResourceSnapshot) {
    let count = |v: Option<u64>| v.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string());

    println!("{}", "Resources".bold());
    println!(
        "  {:<11} {} running / {} total",
        "Containers:",
        count(snapshot.containers_running),
        count(snapshot.containers_total)
    );
    println!("  {:<11} {}", "Images:", count(snapshot.images));
    println!("  {:<11} {}", "Volumes:", count(snapshot.volumes));
    println!(
        "  {:<11} {} / {}",
        "Memory:",
        format_bytes(snapshot.memory_used_bytes),
        format_bytes(snapshot.memory_total_bytes)
    );
    println!(
        "  {:<11} {} / {}",
        "Disk:",
        format_bytes(snapshot.disk_used_bytes),
        format_bytes(snapshot.disk_total_bytes)
    );
}

/// Colorize state; partially running stands out on its own.
pub(crate) fn colorize_state(state: ObservedState) -> String {
    match state {
        ObservedState::Running => "running".green().to_string(),
        ObservedState::PartiallyRunning => "PARTIAL".yellow().bold().to_string(),
        ObservedState::NotRunning => "stopped".dimmed().to_string(),
        ObservedState::Starting | ObservedState::Stopping => state.to_string().cyan().to_string(),
        ObservedState::Unknown => "unknown".red().to_string(),
    }
}

/// Collapse consecutive ports: `5432-5435, 9090`.
pub(crate) fn format_ports(ports: impl IntoIterator<Item = u16>) -> String {
    let mut ranges: Vec<(u16, u16)> = Vec::new();
    for port in ports {
        match ranges.last_mut() {
            Some((_, end)) if end.checked_add(1) == Some(port) => *end = port,
            _ => ranges.push((port, port)),
        }
    }
    ranges
        .iter()
        .map(|(start, end)| if start == end { start.to_string() } else { format!("{}-{}", start, end) })
        .collect::<Vec<_>>()
        .join(", ")
}
