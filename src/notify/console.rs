//! Colored console output for scan results and confirmations.

use crate::exfil::Confirmation;
use crate::types::{FlaggedPackage, ScanResult};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

/// Console output handler with colors and formatting.
#[derive(Debug, Clone)]
pub struct ConsoleOutput {
    verbose: bool,
    json_mode: bool,
    quiet: bool,
}

impl ConsoleOutput {
    /// Create a new console output handler.
    pub fn new(verbose: bool, json_mode: bool, quiet: bool) -> Self {
        Self { verbose, json_mode, quiet }
    }

    /// Print scan start message.
    pub fn print_scan_start(&self, manifest: &str) {
        if self.json_mode || self.quiet {
            return;
        }

        println!(
            "{} Scanning: {}",
            "[*]".bright_blue(),
            manifest.bright_white()
        );
    }

    /// Print progress (only in verbose mode).
    pub fn print_progress(&self, message: &str) {
        if self.json_mode || !self.verbose {
            return;
        }

        println!("{} {}", "[.]".dimmed(), message.dimmed());
    }

    /// Print info message.
    pub fn print_info(&self, message: &str) {
        if self.json_mode || self.quiet {
            return;
        }

        println!("{} {}", "[*]".bright_blue(), message);
    }

    /// Print a confusable package.
    pub fn print_flagged(&self, flagged: &FlaggedPackage) {
        if self.json_mode {
            return;
        }

        println!(
            "{} {} [{}] {}",
            "===".bright_cyan(),
            flagged.package.bright_white().bold(),
            flagged.name.yellow(),
            format_version(&flagged.version)
        );
    }

    /// Print the result of one manifest.
    pub fn print_result(&self, result: &ScanResult) {
        if self.json_mode {
            if let Ok(json) = serde_json::to_string_pretty(result) {
                println!("{}", json);
            }
            return;
        }

        // In quiet mode, only print manifests with findings
        if self.quiet && result.flagged.is_empty() {
            return;
        }

        println!();
        println!(
            "{} {} ({:.2}s)",
            "[*]".bright_blue(),
            result.file.bright_white(),
            result.duration_secs
        );

        if result.flagged.is_empty() {
            println!("  {}", "No dependency confusion candidates found.".green());
            return;
        }

        println!(
            "  {}",
            format!("CONFUSABLE PACKAGES FOUND: {}", result.flagged.len())
                .red()
                .bold()
        );
        for flagged in &result.flagged {
            self.print_flagged(flagged);
        }
    }

    /// Print the totals across every scanned manifest.
    pub fn print_summary(&self, results: &[ScanResult]) {
        if self.json_mode || (self.quiet && results.iter().all(|r| r.flagged.is_empty())) {
            return;
        }

        let flagged: usize = results.iter().map(|r| r.flagged.len()).sum();
        println!();
        println!("{}", "=== Scan Summary ===".bright_cyan());
        println!("  Manifests: {}", results.len());
        if flagged > 0 {
            println!("  {}", format!("Confusable packages: {}", flagged).red().bold());
        } else {
            println!("  {}", "No dependency confusion candidates found.".green());
        }
        println!();
    }

    /// Print a decoded install confirmation.
    pub fn print_confirmation(&self, confirmation: &Confirmation) {
        if self.json_mode {
            if let Ok(json) = serde_json::to_string(confirmation) {
                println!("{}", json);
            }
            return;
        }

        println!();
        println!(
            "{} {} installed on {}",
            "[!]".red().bold(),
            confirmation.package.bright_white().bold(),
            confirmation.hostname.bright_white()
        );
        println!("    |-- User:      {}", confirmation.username);
        println!("    |-- Directory: {}", confirmation.working_directory.dimmed());
        println!("    |-- Source IP: {}", confirmation.source_ip);
        println!(
            "    +-- Received:  {}",
            confirmation.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    /// Print every stored confirmation.
    pub fn print_confirmations(&self, confirmations: &[Confirmation]) {
        if self.json_mode {
            if let Ok(json) = serde_json::to_string_pretty(confirmations) {
                println!("{}", json);
            }
            return;
        }

        if confirmations.is_empty() {
            println!("{} No confirmations recorded.", "[*]".bright_blue());
            return;
        }
        for confirmation in confirmations {
            self.print_confirmation(confirmation);
        }
        println!();
    }

    /// Create a progress bar.
    pub fn create_progress_bar(&self, total: u64, message: &str) -> Option<ProgressBar> {
        if self.json_mode || self.quiet {
            return None;
        }

        let pb = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(message.to_string());
        Some(pb)
    }
}

/// Format a declared version, dimming missing ones.
fn format_version(version: &str) -> colored::ColoredString {
    if version.is_empty() {
        "(no version)".dimmed()
    } else {
        version.normal()
    }
}

impl Default for ConsoleOutput {
    fn default() -> Self {
        Self::new(false, false, false)
    }
}
