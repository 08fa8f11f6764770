//! Progress bar driven by fetch events

use crate::output::describe_report;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use rget_types::{FetchEvent, Phase};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

/// Renders one bar per fetch, replacing it when the next URL starts
pub struct FetchProgress {
    bar: Option<ProgressBar>,
    phase: Option<Phase>,
}

impl FetchProgress {
    pub fn new() -> Self {
        Self {
            bar: None,
            phase: None,
        }
    }

    /// Consume events until the channel closes
    pub async fn run(mut self, mut rx: broadcast::Receiver<FetchEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => self.handle_event(&event),
                // Counters are absolute, so dropped events are harmless
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
        self.clear();
    }

    pub fn handle_event(&mut self, event: &FetchEvent) {
        match event {
            FetchEvent::Phase { url, phase } => self.enter_phase(url, *phase),

            FetchEvent::Progress { phase, done, total } => {
                if self.phase != Some(*phase) {
                    return;
                }
                if let Some(pb) = &self.bar {
                    match total {
                        Some(total) => pb.set_length(*total),
                        None => pb.set_length(pb.length().unwrap_or(0).max(*done)),
                    }
                    pb.set_position(*done);
                }
            }

            FetchEvent::Retrying {
                attempt,
                max_attempts,
                wait_ms,
                reason,
            } => {
                if let Some(pb) = &self.bar {
                    pb.set_message(format!(
                        "{} {} (attempt {}/{}), retrying in {:.1}s",
                        style("↻").yellow(),
                        reason,
                        attempt,
                        max_attempts,
                        *wait_ms as f64 / 1000.0
                    ));
                }
            }

            FetchEvent::Finished { report } => {
                if let Some(pb) = self.bar.take() {
                    pb.finish_and_clear();
                }
                self.phase = None;
                println!("{}", describe_report(report));
            }
        }
    }

    fn enter_phase(&mut self, url: &str, phase: Phase) {
        if let Some(pb) = self.bar.take() {
            pb.finish_and_clear();
        }
        self.phase = Some(phase);

        let pb = match phase {
            Phase::Probing | Phase::Connecting => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.green} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                pb.enable_steady_tick(Duration::from_millis(100));
                let label = if phase == Phase::Probing { "Probing" } else { "Connecting" };
                pb.set_message(format!("{} {}", label, style(url).cyan()));
                pb
            }
            Phase::Downloading | Phase::Hashing => {
                let pb = ProgressBar::new(0);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("█▓▒░  "),
                );
                let label = if phase == Phase::Hashing { "SHA-256" } else { "Downloading" };
                pb.set_message(label.to_string());
                pb
            }
        };
        self.bar = Some(pb);
    }

    fn clear(&mut self) {
        if let Some(pb) = self.bar.take() {
            pb.finish_and_clear();
        }
    }
}

impl Default for FetchProgress {
    fn default() -> Self {
        Self::new()
    }
}
