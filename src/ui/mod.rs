//! Terminal output for the command-line tool.
//!
//! Colored status lines, a progress bar fed by retrieval progress, and compact
//! renderings of preview rows and run summaries.

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::io::IsTerminal;
use std::time::Duration;

use crate::harvest::{HarvestReport, StopReason};
use crate::models::FlatRow;
use crate::utils::{ProgressObserver, RetrievalProgress};

/// Check if stderr is a terminal.
pub fn is_terminal() -> bool {
    std::io::stderr().is_terminal()
}

/// Status icons for different operations.
pub fn status_icon(status: Status) -> &'static str {
    match status {
        Status::Success => "✓",
        Status::Error => "✗",
        Status::Warning => "⚠",
        Status::Info => "ℹ",
        Status::Search => "🔍",
    }
}

/// Status types for colored output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Error,
    Warning,
    Info,
    Search,
}

/// Print a styled status line to stderr.
pub fn print_status(status: Status, msg: &str) {
    let icon = status_icon(status);
    match status {
        Status::Success => eprintln!("{} {}", icon.green().bold(), msg),
        Status::Error => eprintln!("{} {}", icon.red().bold(), msg),
        Status::Warning => eprintln!("{} {}", icon.yellow().bold(), msg),
        Status::Info => eprintln!("{} {}", icon.cyan().bold(), msg),
        Status::Search => eprintln!("{} {}", icon.yellow(), msg),
    }
}

/// Print a section header.
pub fn print_section(title: &str) {
    println!();
    println!("{}", format!("━━━ {} ━━━", title).bold().cyan());
}

/// Format a number with commas.
pub fn format_number(n: u64) -> String {
    n.to_string()
        .chars()
        .rev()
        .collect::<Vec<_>>()
        .chunks(3)
        .map(|c| c.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(",")
        .chars()
        .rev()
        .collect()
}

/// Truncate text to at most `max_chars` characters, marking the cut.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if max_chars <= 3 {
        return "...".to_string();
    }
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars - 3).collect();
    format!("{}...", truncated)
}

/// Print one preview row as a short block.
pub fn print_row(index: usize, row: &FlatRow) {
    let title = row.title.as_deref().unwrap_or("(untitled)");
    let number = match (&row.jurisdiction, &row.publication_number) {
        (Some(j), Some(n)) => format!("{}{}", j, n),
        (_, Some(n)) => n.clone(),
        _ => row.lens_id.clone().unwrap_or_default(),
    };

    println!(
        "{} {}",
        format!("{:>3}.", index + 1).dimmed(),
        truncate_with_ellipsis(title, 90).blue().bold()
    );
    println!(
        "     {}  {}  {}",
        number.yellow(),
        row.publication_date.as_deref().unwrap_or("????-??-??"),
        truncate_with_ellipsis(&row.applicants, 60).green()
    );
    println!(
        "     status: {}  cited by: {}  ipc: {}",
        row.patent_status.as_deref().unwrap_or("-"),
        row.cited_by_patent_count,
        if row.main_ipc_field.is_empty() {
            "-"
        } else {
            row.main_ipc_field.as_str()
        }
    );
}

/// Print the summary of a finished export.
pub fn print_report(report: &HarvestReport) {
    let reason = match report.stop_reason {
        StopReason::Exhausted => "all results retrieved".green().to_string(),
        StopReason::Capped => "record ceiling reached".yellow().to_string(),
    };

    print_status(
        Status::Success,
        &format!(
            "Wrote {} of {} records in {:.1}s ({})",
            format_number(report.records_written).green().bold(),
            format_number(report.total_hits),
            report.elapsed.as_secs_f64(),
            reason
        ),
    );
    println!("{}", report.path.display());
}

/// Progress bar driven by per-page retrieval progress.
#[derive(Debug)]
pub struct ExportProgress {
    pb: ProgressBar,
}

impl ExportProgress {
    /// Create a bar; hidden when stderr is not a terminal or `quiet` is set.
    pub fn new(quiet: bool) -> Self {
        let pb = if quiet || !is_terminal() {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {bar:40.cyan/blue} {pos}/{len} records ({percent}%) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        .progress_chars("█▓▒░ ");
        pb.set_style(style);
        pb.set_message("opening cursor");
        pb.enable_steady_tick(Duration::from_millis(120));

        Self { pb }
    }

    /// Clear the bar.
    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

impl ProgressObserver for ExportProgress {
    fn on_progress(&mut self, progress: &RetrievalProgress) {
        self.pb.set_length(progress.records_target);
        self.pb.set_position(progress.records_processed);
        let msg = match progress.eta() {
            Some(eta) => format!("eta {}s", eta.as_secs()),
            None => String::new(),
        };
        self.pb.set_message(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_icon() {
        assert_eq!(status_icon(Status::Success), "✓");
        assert_eq!(status_icon(Status::Error), "✗");
        assert_eq!(status_icon(Status::Search), "🔍");
    }

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("Hello", 10), "Hello");
        assert_eq!(truncate_with_ellipsis("Hello World", 8), "Hello...");
        assert_eq!(truncate_with_ellipsis("", 10), "");
        assert_eq!(truncate_with_ellipsis("Hello", 3), "...");
        assert_eq!(truncate_with_ellipsis("Lösungsmittel", 8), "Lösun...");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(50_000), "50,000");
        assert_eq!(format_number(1_000_000), "1,000,000");
        assert_eq!(format_number(123), "123");
    }

    #[test]
    fn test_hidden_progress_accepts_updates() {
        let mut progress = ExportProgress::new(true);
        progress.on_progress(&RetrievalProgress {
            records_processed: 100,
            records_target: 250,
            elapsed: Duration::from_secs(1),
        });
        assert_eq!(progress.pb.position(), 100);
        assert_eq!(progress.pb.length(), Some(250));
        progress.finish();
    }
}
