//! Background beekeeper task.
//!
//! The beekeeper periodically asks the Queen for a submission plan and acts
//! on it through the valley's meadow drivers. All decisions stay in the
//! Queen; this loop only drives the cadence and owns the retry policy
//! (errors are logged and the next round tries again).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::meadow::Valley;
use crate::queen::{Queen, QueenError};

/// Configuration for the beekeeper loop.
#[derive(Debug, Clone)]
pub struct BeekeeperConfig {
    /// How often to run a schedule-and-submit round.
    pub loop_interval: Duration,
}

impl Default for BeekeeperConfig {
    fn default() -> Self {
        Self {
            loop_interval: Duration::from_secs(60),
        }
    }
}

impl BeekeeperConfig {
    /// Derive the loop settings from the hive configuration.
    pub fn from_hive(config: &crate::config::HiveConfig) -> Self {
        Self {
            loop_interval: config.beekeeper_interval,
        }
    }
}

/// Background schedule-and-submit task.
pub struct BeekeeperTask {
    queen: Queen,
    valley: Arc<Valley>,
    config: BeekeeperConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl BeekeeperTask {
    pub fn new(
        queen: Queen,
        valley: Arc<Valley>,
        config: BeekeeperConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queen,
            valley,
            config,
            shutdown_rx,
        }
    }

    /// Run the beekeeper loop.
    pub async fn run(mut self) {
        info!(
            loop_interval_ms = self.config.loop_interval.as_millis(),
            "beekeeper task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("beekeeper task shutting down");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.loop_interval) => {
                    if let Err(err) = self.round().await {
                        error!(error = ?err, "beekeeper round failed");
                    }
                }
            }
        }
    }

    /// One schedule-and-submit round.
    async fn round(&self) -> Result<(), QueenError> {
        let plan = self
            .queen
            .schedule_workers_resync_if_necessary(&self.valley, None)
            .await?;

        for (meadow_type, by_rc) in &plan.counts {
            for (rc_name, count) in by_rc {
                match self
                    .valley
                    .submit_workers(meadow_type, rc_name, *count as u32)
                    .await
                {
                    Ok(pids) => {
                        metrics::counter!("apiary_workers_submitted_total")
                            .increment(pids.len() as u64);
                        info!(
                            meadow_type = %meadow_type,
                            resource_class = %rc_name,
                            submitted = pids.len(),
                            "submitted workers"
                        );
                    }
                    Err(err) => {
                        warn!(
                            meadow_type = %meadow_type,
                            resource_class = %rc_name,
                            count,
                            error = %err,
                            "worker submission failed"
                        );
                    }
                }
            }
        }

        self.queen.record_monitor_sample().await?;
        Ok(())
    }
}

/// Convenience function to spawn a beekeeper task.
pub fn spawn_beekeeper(
    queen: Queen,
    valley: Arc<Valley>,
    config: BeekeeperConfig,
) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = BeekeeperTask::new(queen, valley, config, shutdown_rx);
    let handle = tokio::spawn(task.run());
    (handle, shutdown_tx)
}
