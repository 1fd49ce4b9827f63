//! Console output for the `dma` commands.

use console::{style, Style};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

use crate::config::ConnectionParams;
use crate::facts::Collection;
use crate::prober::{ProbeOperation, ProbeRequest, ProbeResult, ProbeStatus};
use crate::report::{Report, Verdict};
use crate::session::{Diagnostic, SessionState};

/// Console UI handler.
#[derive(Debug, Default)]
pub struct TerminalUi;

impl TerminalUi {
    /// Creates a new UI handler.
    pub fn new() -> Self {
        Self
    }

    /// Prints the command banner.
    pub fn print_header(&self, title: &str) {
        let cyan = Style::new().cyan().bold();
        let line = "═".repeat(63);

        println!();
        println!("{}", cyan.apply_to(format!("╔{line}╗")));
        println!("{}", cyan.apply_to(format!("║  {title:<61}║")));
        println!("{}", cyan.apply_to(format!("╚{line}╝")));
        println!();
    }

    /// Shows the parameters about to be used. The password is masked.
    pub fn print_connection_preview(&self, params: &ConnectionParams) {
        let bold = Style::new().bold();

        println!("{}", bold.apply_to("Source database:"));
        println!("┌─────────────────────────────────────────────────────────────┐");
        println!("│ Type:        {}", params.engine.display_name());
        println!("│ Host:        {}:{}", params.host, params.port);
        println!("│ Database:    {}", params.database);
        println!("│ Username:    {}", params.username);
        println!("│ Password:    {}", "*".repeat(params.password.len().min(8)));
        println!("│ Identifier:  {}", params.identifier());
        println!("└─────────────────────────────────────────────────────────────┘");
        println!();
    }

    /// Shows the connectivity test about to run.
    pub fn print_probe_preview(&self, request: &ProbeRequest) {
        let bold = Style::new().bold();

        println!("{}", bold.apply_to("Connectivity test:"));
        println!("┌─────────────────────────────────────────────────────────────┐");
        println!("│ Operation:   {}", request.operation);
        println!("│ Test id:     {}", request.test_id);
        println!("│ Project:     {}", request.project);
        if request.operation == ProbeOperation::Create {
            println!(
                "│ Path:        {} → {}:{}",
                request.target_ip.as_deref().unwrap_or("?"),
                request.source_ip.as_deref().unwrap_or("?"),
                request.source_port.map_or("?".to_string(), |p| p.to_string())
            );
        }
        println!("└─────────────────────────────────────────────────────────────┘");
        println!();
    }

    /// Printed when the user declines to go ahead.
    pub fn print_skipped(&self) {
        println!("{} Skipping execution until input is confirmed", style("ℹ").blue());
    }

    /// Starts a spinner that follows session progress.
    pub fn spinner(&self) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    }

    /// Prints the report table, summary and verdict.
    pub fn print_report(&self, report: &Report) {
        let bold = Style::new().bold();
        let dim = Style::new().dim();

        println!(
            "{} {} ({})",
            bold.apply_to("Readiness report for"),
            report.database_identifier,
            report.engine.display_name()
        );
        println!(
            "{}",
            dim.apply_to(format!(
                "collected {} · report {}",
                report.collected_at.to_rfc3339(),
                report.report_id
            ))
        );
        println!();
        println!("{}", report.to_table());
        println!();

        let summary = &report.summary;
        println!(
            "   {} {} passed, {} failed, {} inapplicable, {} errors",
            bold.apply_to("Rules:     "),
            summary.outcomes.passed,
            summary.outcomes.failed,
            summary.outcomes.inapplicable,
            summary.outcomes.errors
        );
        println!(
            "   {} {} blockers, {} warnings, {} info",
            bold.apply_to("Failures:  "),
            summary.failed_blockers,
            summary.failed_warnings,
            summary.failed_info
        );
        if summary.operational_gaps() > 0 {
            println!(
                "   {} {} rules could not be evaluated",
                style("Gaps:      ").yellow(),
                summary.operational_gaps()
            );
        }
        println!();
        println!("   {} {}", bold.apply_to("Verdict:   "), verdict_style(report.verdict));
        println!();
    }

    /// Confirms a persisted collection document.
    pub fn print_collection_saved(&self, collection: &Collection, path: &Path) {
        let green = Style::new().green().bold();
        println!(
            "{} Collected {} facts from {}",
            green.apply_to("✅"),
            collection.facts.len(),
            collection.collection_identifier
        );
        println!("   {}", style(path.display()).dim());
    }

    /// Confirms a persisted report document.
    pub fn print_report_saved(&self, path: &Path) {
        println!("{} Report written to {}", style("💾").bold(), path.display());
    }

    /// Prints the outcome of a connectivity operation.
    pub fn print_probe_result(&self, result: &ProbeResult) {
        let status = match result.status {
            ProbeStatus::Reachable | ProbeStatus::Deleted => style(result.status).green().bold(),
            ProbeStatus::Pending => style(result.status).yellow().bold(),
            _ => style(result.status).red().bold(),
        };
        println!();
        println!(
            "{} {} ({}): {}",
            style("🔌").bold(),
            result.test_id,
            result.operation,
            status
        );
        for detail in &result.details {
            println!("   • {detail}");
        }
        if let Some(name) = &result.operation_name {
            println!(
                "   {}",
                style(format!("still running as {name}; rerun later to read the result")).dim()
            );
        }
    }

    /// Prints a session failure.
    pub fn print_diagnostic(&self, diagnostic: &Diagnostic, saved_to: Option<&Path>) {
        println!();
        println!("{} {}", style("❌").red().bold(), diagnostic);
        if let Some(path) = saved_to {
            println!("   {}", style(format!("diagnostic written to {}", path.display())).dim());
        }
    }
}

/// Progress message for a session state.
pub fn state_message(state: SessionState) -> &'static str {
    match state {
        SessionState::Created => "Preparing session",
        SessionState::Connecting => "Connecting to source database",
        SessionState::Collecting => "Collecting metadata",
        SessionState::Evaluating => "Evaluating readiness rules",
        SessionState::Aggregating => "Building report",
        SessionState::Done => "Done",
        SessionState::Failed => "Failed",
    }
}

fn verdict_style(verdict: Verdict) -> console::StyledObject<Verdict> {
    match verdict {
        Verdict::Ready => style(verdict).green().bold(),
        Verdict::ReadyWithWarnings => style(verdict).yellow().bold(),
        Verdict::NotReady => style(verdict).red().bold(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_state_has_a_message() {
        let states = [
            SessionState::Created,
            SessionState::Connecting,
            SessionState::Collecting,
            SessionState::Evaluating,
            SessionState::Aggregating,
            SessionState::Done,
            SessionState::Failed,
        ];
        for state in states {
            assert!(!state_message(state).is_empty());
        }
        assert_eq!(state_message(SessionState::Collecting), "Collecting metadata");
    }

    #[test]
    fn test_verdict_style_keeps_label() {
        console::set_colors_enabled(false);
        assert_eq!(verdict_style(Verdict::NotReady).to_string(), "NOT READY");
    }
}
