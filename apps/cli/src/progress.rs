//! Progress bar for a single CLI download

use crate::output::{format_eta, format_speed};
use console::style;
use fetchline_types::{JobEvent, Phase};
use indicatif::{ProgressBar, ProgressStyle};

/// Renders job events onto one progress bar
pub struct DownloadProgress {
    pb: ProgressBar,
}

impl DownloadProgress {
    pub fn new(label: &str, visible: bool) -> Self {
        let pb = if visible {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };

        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  "),
        );
        pb.set_prefix(label.to_string());
        pb.set_message("Probing...");

        Self { pb }
    }

    /// Update the bar from an event
    pub fn handle_event(&self, event: &JobEvent) {
        match event {
            JobEvent::Started {
                start_byte, total, ..
            } => {
                self.pb.set_length(*total);
                self.pb.set_position(*start_byte);
                self.pb.reset_eta();
                self.pb.set_message("");
            }

            JobEvent::Progress { snapshot } => {
                if let Some(total) = snapshot.total {
                    self.pb.set_length(total);
                }
                self.pb.set_position(snapshot.downloaded);
                self.pb.set_message(format!(
                    "({}, {})",
                    format_speed(snapshot.smoothed_speed),
                    format_eta(snapshot.eta)
                ));
            }

            JobEvent::PhaseChanged { phase, .. } => match phase {
                Phase::Probing => self.pb.set_message("Probing..."),
                Phase::Paused => {
                    self.pb
                        .abandon_with_message(format!("{} Paused", style("⏸").yellow()));
                }
                Phase::Idle => {
                    self.pb
                        .abandon_with_message(format!("{} Stopped", style("○").dim()));
                }
                _ => {}
            },

            JobEvent::Retrying {
                attempt,
                limit,
                reason,
                ..
            } => {
                self.pb.println(format!(
                    "{} Retry {}/{}: {}",
                    style("↻").yellow(),
                    attempt,
                    limit,
                    reason
                ));
                self.pb.set_message(format!("Retrying ({}/{})", attempt, limit));
            }

            JobEvent::Error { message, .. } => {
                self.pb.abandon_with_message(format!(
                    "{} Failed: {}",
                    style("✗").red().bold(),
                    message
                ));
            }

            JobEvent::Finished { .. } => {
                self.pb.finish_with_message(format!(
                    "{} Download complete",
                    style("✓").green().bold()
                ));
            }

            JobEvent::BytesWritten { .. } => {}
        }
    }

    /// Note that Ctrl-C was received
    pub fn pausing(&self) {
        self.pb.set_message(format!("{} Pausing...", style("⏸").yellow()));
    }

    /// Leave the bar on screen in its last state
    pub fn finish(&self) {
        if !self.pb.is_finished() {
            self.pb.abandon();
        }
    }
}
