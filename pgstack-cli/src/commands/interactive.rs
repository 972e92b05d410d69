//! `pgstack interactive` - menu over the lifecycle commands.
//!
//! Each pass redraws from a fresh observation of the runtime. Nothing about
//! which stack is running is kept between passes.

use super::{exit, lifecycle, logs, status, Context};
use anyhow::Result;
use colored::Colorize;
use std::io::{self, BufRead, Write};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Start { tools: bool },
    Stop,
    Restart,
    Logs,
    Clean,
    Refresh,
    Quit,
}

fn parse_action(input: &str) -> Option<Action> {
    match input.trim().to_lowercase().as_str() {
        "1" | "start" => Some(Action::Start { tools: false }),
        "2" | "tools" => Some(Action::Start { tools: true }),
        "3" | "stop" => Some(Action::Stop),
        "4" | "restart" => Some(Action::Restart),
        "5" | "logs" => Some(Action::Logs),
        "6" | "clean" => Some(Action::Clean),
        "" | "r" | "refresh" | "status" => Some(Action::Refresh),
        "q" | "quit" | "exit" => Some(Action::Quit),
        _ => None,
    }
}

/// Resolve a stack by 1-based menu number or id.
fn resolve_stack<'a>(input: &str, ids: &[&'a str]) -> Option<&'a str> {
    let input = input.trim();
    if let Ok(n) = input.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| ids.get(i)).copied();
    }
    ids.iter().find(|id| **id == input).copied()
}

/// Read one line; `None` on end of input.
fn read_line(prompt: &str) -> Result<Option<String>> {
    print!("{} ", prompt.bold());
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

fn print_menu() {
    println!();
    println!("  {} start          {} start with tools", "1".bold(), "2".bold());
    println!("  {} stop           {} restart", "3".bold(), "4".bold());
    println!("  {} logs (tail)    {} clean volumes", "5".bold(), "6".bold());
    println!("  {} refresh        {} quit", "r".bold(), "q".bold());
    println!();
}

/// Run the menu until the operator quits, input ends or Ctrl-C fires.
pub async fn run(ctx: &Context, cancel: &CancellationToken) -> Result<u8> {
    let ids: Vec<&str> = ctx.controller.registry().all().iter().map(|s| s.id.as_str()).collect();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let observations = ctx.controller.status().await;
        println!();
        status::print_stacks(ctx.controller.registry().all(), &observations);
        print_menu();

        let Some(line) = read_line("Action:")? else {
            break;
        };
        let action = match parse_action(&line) {
            Some(Action::Quit) => break,
            Some(Action::Refresh) => continue,
            Some(action) => action,
            None => {
                println!("{} Unknown action: {}", "✗".red().bold(), line.trim());
                continue;
            }
        };

        let Some(input) = read_line("Stack (number or id):")? else {
            break;
        };
        let Some(stack_id) = resolve_stack(&input, &ids) else {
            println!("{} Unknown stack: {}", "✗".red().bold(), input.trim());
            continue;
        };

        let result = match action {
            Action::Start { tools } => lifecycle::start(ctx, stack_id, tools, false).await,
            Action::Stop => lifecycle::stop(ctx, stack_id, false).await,
            Action::Restart => lifecycle::restart(ctx, stack_id, false, false).await,
            Action::Logs => logs::logs(ctx, stack_id, false, Some(100)).await,
            Action::Clean => lifecycle::clean(ctx, stack_id, false).await,
            Action::Refresh | Action::Quit => Ok(exit::OK),
        };

        // Failures are shown and the menu carries on
        if let Err(e) = result {
            println!("{} {:#}", "✗".red().bold(), e);
        }
    }

    Ok(exit::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action() {
        assert_eq!(parse_action("1\n"), Some(Action::Start { tools: false }));
        assert_eq!(parse_action("tools"), Some(Action::Start { tools: true }));
        assert_eq!(parse_action(" Q "), Some(Action::Quit));
        assert_eq!(parse_action(""), Some(Action::Refresh));
        assert_eq!(parse_action("9"), None);
    }

    #[test]
    fn test_resolve_stack() {
        let ids = ["dev", "citus", "patroni"];
        assert_eq!(resolve_stack("2", &ids), Some("citus"));
        assert_eq!(resolve_stack("patroni\n", &ids), Some("patroni"));
        assert_eq!(resolve_stack("0", &ids), None);
        assert_eq!(resolve_stack("4", &ids), None);
        assert_eq!(resolve_stack("timescale", &ids), None);
    }
}
