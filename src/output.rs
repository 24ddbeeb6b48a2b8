//! Console output for runs.
//!
//! Reports themselves are files; this only renders what the run did.

use std::time::Duration;

use crate::cli::VerbosityLevel;
use crate::config::OutputFormatConfig;
use crate::error::Result;
use crate::runner::{FileStatus, ProcessedFile, RunResults, TestCounts};

/// Output formatter for run results
pub struct Output {
    verbosity: VerbosityLevel,
    format: OutputFormatConfig,
    show_colors: bool,
}

impl Output {
    pub fn new(verbosity: VerbosityLevel, format: OutputFormatConfig) -> Self {
        Self {
            verbosity,
            format,
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    /// Disable ANSI colors regardless of the terminal
    pub fn without_colors(mut self) -> Self {
        self.show_colors = false;
        self
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn format_results(&self, results: &RunResults) -> Result<String> {
        match self.format {
            OutputFormatConfig::Json => Ok(serde_json::to_string_pretty(results)? + "\n"),
            OutputFormatConfig::Summary => Ok(format_summary_line(results)),
            OutputFormatConfig::Human => Ok(self.format_human(results)),
        }
    }

    fn format_human(&self, results: &RunResults) -> String {
        let mut output = String::new();

        for file_result in &results.file_results {
            if self.verbosity == VerbosityLevel::Quiet && file_result.is_success() {
                continue;
            }
            output.push_str(&self.format_file_result(file_result));
            output.push('\n');
        }

        if self.verbosity == VerbosityLevel::Quiet {
            if results.has_failures() {
                output.push_str(&format_summary_line(results));
            }
            return output;
        }

        output.push_str(&self.format_summary(results));
        output
    }

    pub fn format_file_result(&self, result: &ProcessedFile) -> String {
        let path_display = result.source.display();
        let duration_str = format_duration(result.duration);

        let mut line = match result.status {
            FileStatus::Passed => format!(
                "{}  {} ({}) - {}",
                self.colorize("✓ PASSED", "32"),
                path_display,
                duration_str,
                format_counts(&result.counts)
            ),
            FileStatus::Failed => format!(
                "{}  {} ({}) - {}",
                self.colorize("✗ FAILED", "31"),
                path_display,
                duration_str,
                format_counts(&result.counts)
            ),
            FileStatus::Error | FileStatus::Running => format!(
                "{}  {} ({}) - {}",
                self.colorize("⚠ ERROR", "33"),
                path_display,
                duration_str,
                result.error.as_deref().unwrap_or("unknown error")
            ),
        };

        for report_error in &result.report_errors {
            line.push_str(&format!("\n    {}", self.colorize(report_error, "33")));
        }

        if self.verbosity >= VerbosityLevel::Verbose {
            line.push_str(&format!("\n    report: {}", result.report_path.display()));
            if let Some(coverage) = &result.coverage_path {
                line.push_str(&format!("\n    coverage: {}", coverage.display()));
            }
            if result.status == FileStatus::Failed
                && let Some(error) = &result.error
            {
                line.push_str(&format!("\n    {}", error));
            }
        }
        line
    }

    fn format_summary(&self, results: &RunResults) -> String {
        let totals = &results.totals;
        let mut output = String::new();
        output.push_str("Summary:\n");
        output.push_str(&format!("  Specification files: {}\n", results.total_files));
        output.push_str(&format!(
            "  {} {}\n",
            self.colorize("Passed:", "32"),
            results.passed_files
        ));
        if results.failed_files > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Failed:", "31"),
                results.failed_files
            ));
        }
        if results.error_files > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Errors:", "33"),
                results.error_files
            ));
        }
        output.push_str(&format!("  Tests: {}\n", format_counts(totals)));
        output.push_str(&format!(
            "  Duration: {}\n",
            format_duration(results.total_duration)
        ));
        output
    }
}

fn format_counts(counts: &TestCounts) -> String {
    let mut text = format!(
        "{} total, {} passed, {} pending, {} failed",
        counts.total, counts.passed, counts.pending, counts.failed
    );
    if counts.missed > 0 {
        text.push_str(&format!(", {} missed", counts.missed));
    }
    text
}

fn format_summary_line(results: &RunResults) -> String {
    format!(
        "{} files ({} passed, {} failed, {} errors); tests: {}\n",
        results.total_files,
        results.passed_files,
        results.failed_files,
        results.error_files,
        format_counts(&results.totals)
    )
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 1.0 {
        format!("{}ms", duration.as_millis())
    } else if total_secs < 60.0 {
        format!("{:.2}s", total_secs)
    } else {
        let mins = (total_secs / 60.0) as u64;
        let secs = total_secs % 60.0;
        format!("{}m{:.1}s", mins, secs)
    }
}
