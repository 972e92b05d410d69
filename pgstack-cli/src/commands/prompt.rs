//! Terminal operator: prompts on stdin, progress on a spinner.

use colored::Colorize;
use indicatif::ProgressBar;
use pgstack_core::lifecycle::{ConflictResolution, Operator};
use pgstack_core::{ConflictReport, LifecyclePhase, ObservedState, RuntimeObservation};
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Mutex;

/// Answers lifecycle questions from the terminal.
///
/// When stdin is not a terminal every question is declined, so scripted
/// runs never purge volumes or stop stacks by accident. `assume_yes`
/// accepts confirmations but never stops other stacks.
pub struct TerminalOperator {
    assume_yes: bool,
    interactive: bool,
    progress: Mutex<Option<ProgressBar>>,
}

impl TerminalOperator {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes, interactive: io::stdin().is_terminal(), progress: Mutex::new(None) }
    }

    /// Clear the spinner, if one is showing.
    pub fn finish(&self) {
        if let Some(progress) = self.lock().take() {
            progress.finish_and_clear();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ProgressBar>> {
        self.progress.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Ask a yes/no question with the spinner out of the way.
    fn ask(&self, question: &str) -> bool {
        let progress = self.lock().clone();
        let ask = || {
            print!("{} {} [y/N]: ", "⚠".yellow().bold(), question);
            if io::stdout().flush().is_err() {
                return false;
            }
            read_answer(&mut io::stdin().lock())
        };
        match progress {
            Some(progress) => progress.suspend(ask),
            None => ask(),
        }
    }
}

/// Parse one line of input; anything but y/yes is no.
pub fn read_answer(input: &mut impl BufRead) -> bool {
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) | Err(_) => false,
        Ok(_) => matches!(line.trim().to_lowercase().as_str(), "y" | "yes"),
    }
}

impl Operator for TerminalOperator {
    fn confirm(&self, prompt: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        if !self.interactive {
            return false;
        }
        self.ask(prompt)
    }

    fn resolve_conflict(&self, report: &ConflictReport) -> ConflictResolution {
        let stacks = report.conflicting_stacks();
        if !self.interactive || stacks.is_empty() {
            return ConflictResolution::Abort;
        }

        let mut question = format!(
            "'{}' needs ports held by {}. Stop {} first?",
            report.requested_stack_id,
            report.summary(),
            stacks.join(", ")
        );
        if report.has_external() {
            question.push_str(" (ports held outside pgstack will still block)");
        }
        if self.ask(&question) {
            ConflictResolution::StopConflicting
        } else {
            ConflictResolution::Abort
        }
    }

    fn phase_changed(&self, stack_id: &str, phase: LifecyclePhase, observation: Option<&RuntimeObservation>) {
        let message = match observation.map(|o| o.state) {
            Some(state @ (ObservedState::Starting | ObservedState::Stopping)) => {
                format!("{}: {} ({})", stack_id, phase, state)
            }
            _ => format!("{}: {}", stack_id, phase),
        };

        let mut progress = self.lock();
        match progress.as_ref() {
            Some(bar) => bar.set_message(message),
            None => *progress = Some(super::spinner(message)),
        }
    }
}
