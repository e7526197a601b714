/*!
 * Terminal progress bar for the parcel CLI
 *
 * Consumes [`ProgressEvent`]s from a job and renders them with indicatif.
 */

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::transfer::ProgressEvent;

const BAR_TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})";

/// Renders one job's progress events on stderr
pub struct CliProgressRenderer {
    receiver: UnboundedReceiver<ProgressEvent>,
    bar: Option<ProgressBar>,
    verbose: bool,
}

impl CliProgressRenderer {
    pub fn new(receiver: UnboundedReceiver<ProgressEvent>, verbose: bool) -> Self {
        Self {
            receiver,
            bar: None,
            verbose,
        }
    }

    /// Render until the reporting side is dropped
    pub async fn run(mut self) {
        while let Some(event) = self.receiver.recv().await {
            self.handle_event(event);
        }
        if let Some(bar) = self.bar.take() {
            bar.abandon();
        }
    }

    /// Spawn the renderer onto the runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    fn handle_event(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::TransferStarted {
                key,
                total_bytes,
                direction,
                strategy,
                parts,
                ..
            } => {
                let bar = ProgressBar::new(total_bytes);
                let style = match ProgressStyle::default_bar().template(BAR_TEMPLATE) {
                    Ok(style) => style.progress_chars("#>-"),
                    Err(_) => ProgressStyle::default_bar(),
                };
                bar.set_style(style);
                if self.verbose {
                    bar.println(format!(
                        "{} {} ({} bytes, {} x {} part(s))",
                        direction, key, total_bytes, strategy, parts
                    ));
                }
                self.bar = Some(bar);
            }
            ProgressEvent::PartCompleted { index, bytes, .. } => {
                if self.verbose {
                    if let Some(bar) = &self.bar {
                        bar.println(format!("  part {} done ({} bytes)", index + 1, bytes));
                    }
                }
            }
            ProgressEvent::Progress {
                bytes_transferred, ..
            } => {
                if let Some(bar) = &self.bar {
                    bar.set_position(bytes_transferred);
                }
            }
            ProgressEvent::TransferCompleted { total_bytes, .. } => {
                if let Some(bar) = self.bar.take() {
                    bar.set_position(total_bytes);
                    bar.finish();
                }
            }
            ProgressEvent::TransferFailed { error, .. } => {
                if let Some(bar) = self.bar.take() {
                    bar.abandon_with_message(error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{ProgressReporter, Strategy, TransferDirection};
    use std::time::Duration;

    #[tokio::test]
    async fn test_renderer_drains_until_reporter_dropped() {
        let (reporter, receiver) = ProgressReporter::new();
        let handle = CliProgressRenderer::new(receiver, false).spawn();

        reporter.transfer_started("op", "k", 10, TransferDirection::Upload, Strategy::Multipart, 2);
        reporter.part_completed("op", 0, 5, 5, 10);
        reporter.part_completed("op", 1, 5, 10, 10);
        reporter.transfer_completed("op", 10, Duration::from_millis(3));
        drop(reporter);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_events_without_start_are_ignored() {
        let (_reporter, receiver) = ProgressReporter::new();
        let mut renderer = CliProgressRenderer::new(receiver, true);
        renderer.handle_event(ProgressEvent::Progress {
            operation_id: "op".to_string(),
            bytes_transferred: 1,
            total_bytes: 2,
            percentage: 50.0,
        });
        assert!(renderer.bar.is_none());
    }
}
