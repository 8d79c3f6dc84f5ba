use std::{any::type_name_of_val, fmt, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::channel::{Delivery, DeliverySender, PushError};
use super::config::SchedulerConfig;
use super::store::JobStore;
use crate::error::Result;

/// Why a polling cycle claimed nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backpressure {
    /// Too many jobs are already `processing`.
    InFlightCeiling { in_flight: u64, ceiling: u64 },
    /// The delivery channel has no free slot.
    ChannelFull { depth: usize },
    /// The backlog already covers every worker.
    BacklogCoversPool { depth: usize, pool_size: usize },
}

/// What one polling cycle did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub in_flight: u64,
    pub channel_depth: usize,
    pub skipped: Option<Backpressure>,
    pub claimed: usize,
    pub pushed: usize,
    pub released: usize,
}

/// Promotes eligible jobs from the persisted backlog into the delivery
/// channel, never admitting more than the pool can plausibly start soon.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    sender: DeliverySender,
    config: SchedulerConfig,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("store", &type_name_of_val(self.store.as_ref()))
            .field("sender", &self.sender)
            .field("pool_size", &self.config.pool_size)
            .field("poll_interval_ms", &self.config.poll_interval_ms)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(store: Arc<dyn JobStore>, sender: DeliverySender, config: SchedulerConfig) -> Self {
        Self {
            store,
            sender,
            config,
        }
    }

    /// Runs one polling cycle: backpressure checks, atomic claim, push.
    pub async fn poll_once(&self) -> Result<CycleReport> {
        let in_flight = self.store.count_processing().await?;
        let channel_depth = self.sender.depth();
        let mut report = CycleReport {
            in_flight,
            channel_depth,
            ..CycleReport::default()
        };

        let ceiling = self.config.inflight_ceiling();
        if in_flight >= ceiling {
            report.skipped = Some(Backpressure::InFlightCeiling { in_flight, ceiling });
            return Ok(report);
        }
        if self.sender.is_full() {
            report.skipped = Some(Backpressure::ChannelFull {
                depth: channel_depth,
            });
            return Ok(report);
        }

        let limit = self.config.pool_size.saturating_sub(channel_depth);
        if limit == 0 {
            report.skipped = Some(Backpressure::BacklogCoversPool {
                depth: channel_depth,
                pool_size: self.config.pool_size,
            });
            return Ok(report);
        }

        let claimed = self.store.claim_eligible(limit).await?;
        report.claimed = claimed.len();

        let mut push_failure: Option<PushError> = None;
        for job in claimed {
            if push_failure.is_none() {
                match self.sender.try_push(Delivery::Job(job.id)) {
                    Ok(()) => {
                        report.pushed += 1;
                        debug!(job_id = %job.id, priority = job.priority, "job pushed to delivery channel");
                        continue;
                    }
                    Err(err) => {
                        warn!(
                            job_id = %job.id,
                            error = %err,
                            "delivery push failed; returning remaining claimed jobs to the queue"
                        );
                        push_failure = Some(err);
                    }
                }
            }

            let reason = push_failure
                .map(|err| err.to_string())
                .unwrap_or_else(|| "delivery push failed".to_string());
            match self.store.release_claim(job.id, &reason).await {
                Ok(_) => report.released += 1,
                Err(err) => error!(
                    job_id = %job.id,
                    error = %err,
                    "failed to release claimed job; it stays processing"
                ),
            }
        }

        Ok(report)
    }

    /// Polls until `shutdown` fires. Jobs already pushed are left for the
    /// workers; nothing is preempted.
    pub async fn run(self, shutdown: CancellationToken) {
        let interval = self.config.poll_interval();
        info!(
            pool_size = self.config.pool_size,
            poll_interval_ms = self.config.poll_interval_ms,
            "dispatcher started"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let pause = match self.poll_once().await {
                Ok(report) => {
                    if let Some(reason) = report.skipped {
                        debug!(?reason, in_flight = report.in_flight, "dispatcher cycle throttled");
                    } else if report.claimed > 0 {
                        info!(
                            claimed = report.claimed,
                            pushed = report.pushed,
                            released = report.released,
                            in_flight = report.in_flight,
                            channel_depth = report.channel_depth,
                            "dispatcher promoted jobs"
                        );
                    }
                    interval
                }
                Err(err) => {
                    error!(error = %err, "dispatcher cycle failed");
                    interval * 2
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("dispatcher shutting down");
    }
}
