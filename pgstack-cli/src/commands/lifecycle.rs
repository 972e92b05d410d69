//! `pgstack start|stop|restart|clean`

use super::{exit, Context};
use anyhow::{Context as _, Result};
use colored::Colorize;
use pgstack_core::{
    CleanOptions, CleanOutcome, CleanStatus, ConflictReport, GateOutcome, ProbeVerdict, StackError, StartOptions,
    StartOutcome, StartStatus, StopOptions, StopOutcome, StopStatus,
};
use std::time::Duration;
use tabled::{settings::Style, Table, Tabled};

/// Start a stack and wait for it to become ready.
pub async fn start(ctx: &Context, stack_id: &str, tools: bool, force: bool) -> Result<u8> {
    let opts = start_options(tools, force);
    let result = ctx.controller.start(stack_id, &opts).await;
    ctx.operator.finish();

    let outcome = result.with_context(|| format!("Failed to start stack '{}'", stack_id))?;
    Ok(report_start(&outcome, ctx.config.health_timeout()))
}

/// Stop a stack.
pub async fn stop(ctx: &Context, stack_id: &str, force: bool) -> Result<u8> {
    let result = ctx.controller.stop(stack_id, &StopOptions { force }).await;
    ctx.operator.finish();

    let outcome = result.with_context(|| format!("Failed to stop stack '{}'", stack_id))?;
    Ok(report_stop(&outcome))
}

/// Stop then start a stack.
pub async fn restart(ctx: &Context, stack_id: &str, tools: bool, force: bool) -> Result<u8> {
    let opts = start_options(tools, false);
    let result = ctx.controller.restart(stack_id, &StopOptions { force }, &opts).await;
    ctx.operator.finish();

    let outcome = result.with_context(|| format!("Failed to restart stack '{}'", stack_id))?;
    report_stop(&outcome.stop);
    Ok(report_start(&outcome.start, ctx.config.health_timeout()))
}

/// Delete a stack's volumes.
pub async fn clean(ctx: &Context, stack_id: &str, assume_yes: bool) -> Result<u8> {
    let result = ctx.controller.clean(stack_id, &CleanOptions { assume_yes }).await;
    ctx.operator.finish();

    let outcome = result.with_context(|| format!("Failed to clean stack '{}'", stack_id))?;
    Ok(report_clean(&outcome))
}

fn start_options(tools: bool, force: bool) -> StartOptions {
    StartOptions {
        profiles: if tools { vec!["tools".to_string()] } else { Vec::new() },
        force,
        ..Default::default()
    }
}

// ============================================================================
// Output
// ============================================================================

fn report_start(outcome: &StartOutcome, timeout: Duration) -> u8 {
    for stopped in &outcome.stopped_stacks {
        println!("{} Stopped conflicting stack: {}", "✓".green().bold(), stopped.bold());
    }

    if let Some(health) = &outcome.health {
        print_health(health);
    }

    let id = outcome.stack_id.bold();
    match outcome.status {
        StartStatus::Ready => {
            println!("{} Stack ready: {}", "✓".green().bold(), id);
            exit::OK
        }
        StartStatus::Degraded => {
            let failed = outcome.health.as_ref().map(GateOutcome::failed_optional).unwrap_or_default();
            println!("{} Stack running degraded: {} (optional: {})", "⚠".yellow().bold(), id, failed.join(", "));
            exit::OK
        }
        StartStatus::TimedOut => {
            if outcome.interrupted() {
                println!("{} Interrupted while waiting for {}; containers left as they are", "⚠".yellow().bold(), id);
            } else if let Some(err) = outcome.to_error(timeout) {
                println!("{} {}", "✗".red().bold(), err);
            }
            println!(
                "{}",
                format!("Stack left running; inspect with `pgstack logs {}`", outcome.stack_id).dimmed()
            );
            exit::TIMED_OUT
        }
        StartStatus::ConflictBlocked => {
            println!("{} Cannot start {}: ports already in use", "✗".red().bold(), id);
            for cp in &outcome.conflicts.conflicting_ports {
                println!("  {} {} held by {}", "•".dimmed(), cp.port.to_string().bold(), cp.held_by);
            }
            println!("{}", conflict_hint(&outcome.conflicts).dimmed());
            exit::CONFLICT
        }
    }
}

/// What the operator can do about a blocked start.
fn conflict_hint(report: &ConflictReport) -> String {
    let stacks = report.conflicting_stacks();
    match (stacks.is_empty(), report.has_external()) {
        (false, false) => format!("Stop {} first, or pass --force", stacks.join(", ")),
        (false, true) => format!("Stop {} and free the external listeners, or pass --force", stacks.join(", ")),
        (true, _) => "Free the external listeners, or pass --force".to_string(),
    }
}

fn report_clean(outcome: &CleanOutcome) -> u8 {
    let id = outcome.stack_id.bold();
    match outcome.status {
        CleanStatus::Purged => {
            if outcome.stopped_first {
                println!("{} Stack stopped: {}", "✓".green().bold(), id);
            }
            println!("{} Volumes removed: {}", "✓".green().bold(), id);
            exit::OK
        }
        CleanStatus::Refused => {
            let err = StackError::CleanRefused { stack_id: outcome.stack_id.clone() };
            println!("{} {}", "✗".red().bold(), err);
            println!("{}", "Re-run with --yes to confirm non-interactively".dimmed());
            exit::REFUSED
        }
    }
}

fn report_stop(outcome: &StopOutcome) -> u8 {
    let id = outcome.stack_id.bold();
    match outcome.status {
        StopStatus::Stopped => {
            println!("{} Stack stopped: {}", "✓".green().bold(), id);
            exit::OK
        }
        StopStatus::AlreadyStopped => {
            println!("{} Stack not running: {}", "ℹ".blue().bold(), id);
            exit::OK
        }
        StopStatus::Incomplete => {
            println!(
                "{} Stack still partly running: {} ({})",
                "⚠".yellow().bold(),
                id,
                outcome.observation.live_services.join(", ")
            );
            exit::PROVISIONING
        }
    }
}

#[derive(Tabled)]
struct ProbeRow {
    #[tabled(rename = "SERVICE")]
    service: String,
    #[tabled(rename = "PROBE")]
    probe: String,
    #[tabled(rename = "RESULT")]
    result: String,
    #[tabled(rename = "ATTEMPTS")]
    attempts: u32,
    #[tabled(rename = "LAST ERROR")]
    last_error: String,
}

fn print_health(health: &GateOutcome) {
    if health.results.is_empty() {
        return;
    }

    let rows: Vec<ProbeRow> = health
        .results
        .iter()
        .map(|r| ProbeRow {
            service: if r.required { r.service.clone() } else { format!("{} (optional)", r.service) },
            probe: format!("{} {}", r.kind, truncate(&r.target, 40)),
            result: colorize_verdict(r.verdict),
            attempts: r.attempts,
            last_error: match (r.verdict, &r.last_error) {
                (ProbeVerdict::Pass, _) | (_, None) => String::new(),
                (_, Some(e)) => truncate(e, 60),
            },
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{}", table);
}

fn colorize_verdict(verdict: ProbeVerdict) -> String {
    match verdict {
        ProbeVerdict::Pass => "pass".green().to_string(),
        ProbeVerdict::Fail => "fail".red().to_string(),
        ProbeVerdict::Pending => "pending".yellow().to_string(),
    }
}

/// Shorten to `max` characters, marking the cut.
fn truncate(s: &str, max: usize) -> String {
    let line = s.lines().next().unwrap_or_default();
    if line.chars().count() <= max {
        line.to_string()
    } else {
        let cut: String = line.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
