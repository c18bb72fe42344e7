//! Progress reporting for installs.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Creates progress bars, or hidden ones when output is disabled.
pub struct ProgressManager {
    enabled: bool,
}

impl ProgressManager {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// A bar that shows a spinner until a download reports its size.
    pub fn create_install_bar(&self, name: &str) -> ProgressBar {
        if !self.enabled {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(0);
        pb.set_style(spinner_style());
        pb.set_prefix(name.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Switch `pb` to a byte counter once the total is known.
    pub fn show_download(&self, pb: &ProgressBar, downloaded: u64, total: u64) {
        if !self.enabled {
            return;
        }
        if total > 0 && pb.length() != Some(total) {
            pb.set_length(total);
            pb.set_style(download_style());
        }
        pb.set_position(downloaded);
    }

    /// Back to a spinner for the stages after the download.
    pub fn show_stage(&self, pb: &ProgressBar, message: &str) {
        if !self.enabled {
            return;
        }
        pb.set_style(spinner_style());
        pb.set_message(message.to_string());
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} {prefix:.bold} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn download_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Helper to format bytes for display
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
