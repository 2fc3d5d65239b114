//! Progress tracking and display for artisync

use crate::types::{SyncAction, SyncStats};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Progress tracker for one pass.
///
/// Totals are unknown up front because both sides are streamed, so this is a
/// spinner with running counts rather than a bar.
pub struct ProgressTracker {
    /// Files finished (transferred, deleted or skipped)
    bar: ProgressBar,
    /// Bytes moved so far
    bytes: AtomicU64,
    /// Whether progress is enabled
    enabled: bool,
}

impl ProgressTracker {
    /// Create a new progress tracker
    pub fn new(enabled: bool) -> Self {
        let bar = if enabled {
            let pb = ProgressBar::new_spinner();
            let style = ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {pos} files {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            pb.set_style(style);
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        } else {
            ProgressBar::hidden()
        };

        Self {
            bar,
            bytes: AtomicU64::new(0),
            enabled,
        }
    }

    /// Hidden tracker
    pub fn hidden() -> Self {
        Self::new(false)
    }

    /// Count one finished action
    pub fn finish_action(&self, action: SyncAction, bytes: u64) {
        self.bar.inc(1);
        if action.transfers_data() {
            let total = self.bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
            self.bar.set_message(format!("({} transferred)", format_size(total)));
        }
    }

    /// Finish the progress display
    pub fn finish(&self) {
        if self.enabled {
            self.bar.finish_and_clear();
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::hidden()
    }
}

/// Format a file size for display
pub fn format_size(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// Format a duration for display
pub fn format_duration(secs: f64) -> String {
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        let remaining = secs - mins * 60.0;
        format!("{}m {:.0}s", mins as u64, remaining)
    } else {
        let hours = (secs / 3600.0).floor();
        let mins = ((secs - hours * 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u64, mins as u64)
    }
}

/// Format transfer rate for display
pub fn format_rate(bytes_per_sec: f64) -> String {
    format!("{}/s", human_bytes::human_bytes(bytes_per_sec))
}

/// Print a summary after a pass; `dry_run` words it as a forecast
pub fn print_summary(label: &str, stats: &SyncStats, dry_run: bool) {
    if dry_run {
        println!("\n=== {} (dry run) ===", label);
        println!("Files to upload:   {}", stats.files_uploaded);
        println!("Files to download: {}", stats.files_downloaded);
        println!("Files to delete:   {}", stats.files_deleted);
        println!("Files to skip:     {}", stats.files_skipped);
        println!();
        println!("Would transfer:    {}", format_size(stats.bytes_transferred()));
        return;
    }

    println!("\n=== {} Complete ===", label);
    println!("Duration:          {}", format_duration(stats.duration_secs));
    println!("Files uploaded:    {}", stats.files_uploaded);
    println!("Files downloaded:  {}", stats.files_downloaded);
    println!("Files deleted:     {}", stats.files_deleted);
    println!("Files skipped:     {}", stats.files_skipped);
    println!("Errors:            {}", stats.errors);
    println!();
    println!("Bytes transferred: {}", format_size(stats.bytes_transferred()));
    println!("Transfer rate:     {}", format_rate(stats.transfer_rate()));
}
