use std::{any::type_name_of_val, fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::Result;
use crate::scheduler::{
    adapter::{ApplicantSource, ExecutionAdapter},
    channel::{Delivery, DeliveryReceiver, DeliverySender, PushError, delivery_channel},
    config::SchedulerConfig,
    dispatcher::Dispatcher,
    store::JobStore,
    worker::Worker,
};

/// Collaborators shared by every task the scheduler spawns.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub store: Arc<dyn JobStore>,
    pub adapter: Arc<dyn ExecutionAdapter>,
    pub applicants: Arc<dyn ApplicantSource>,
}

impl fmt::Debug for SchedulerDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerDeps")
            .field("store", &type_name_of_val(self.store.as_ref()))
            .field("adapter", &type_name_of_val(self.adapter.as_ref()))
            .field("applicants", &type_name_of_val(self.applicants.as_ref()))
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Stopped,
    /// A handle exists but the dispatcher task has exited.
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub name: String,
    pub alive: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub state: RunState,
    pub started_at: Option<DateTime<Utc>>,
    pub dispatcher_alive: bool,
    pub worker_count: usize,
    pub workers: Vec<WorkerStatus>,
    /// Delivered ids no worker has picked up yet.
    pub channel_depth: usize,
}

impl SchedulerStatus {
    pub fn stopped() -> Self {
        Self {
            state: RunState::Stopped,
            started_at: None,
            dispatcher_alive: false,
            worker_count: 0,
            workers: Vec::new(),
            channel_depth: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }
}

/// Summary of one shutdown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StopReport {
    /// Tasks aborted after their join timeout.
    pub forced: usize,
    /// Delivered-but-unstarted jobs returned to `queued`.
    pub released: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum StopOutcome {
    Stopped(StopReport),
    NotRunning,
}

/// Owned handle over one running dispatcher and its worker pool.
pub struct SchedulerHandle {
    config: SchedulerConfig,
    store: Arc<dyn JobStore>,
    shutdown: CancellationToken,
    sender: DeliverySender,
    receiver: DeliveryReceiver,
    dispatcher: JoinHandle<()>,
    workers: Vec<(String, JoinHandle<()>)>,
    started_at: DateTime<Utc>,
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("pool_size", &self.workers.len())
            .field("dispatcher_finished", &self.dispatcher.is_finished())
            .field("channel", &self.sender)
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl SchedulerHandle {
    /// Creates the channel and shutdown signal, then spawns the dispatcher
    /// and exactly `pool_size` workers.
    pub fn spawn(deps: &SchedulerDeps, config: SchedulerConfig) -> Result<Self> {
        config.validate()?;

        let shutdown = CancellationToken::new();
        let (sender, receiver) = delivery_channel(config.channel_capacity);

        let dispatcher = Dispatcher::new(Arc::clone(&deps.store), sender.clone(), config.clone());
        let dispatcher = tokio::spawn(dispatcher.run(shutdown.clone()));

        let worker_group = format!("worker-{}", std::process::id());
        let workers = (0..config.pool_size)
            .map(|i| {
                let name = format!("{worker_group}-{i}");
                let worker = Worker::new(
                    name.clone(),
                    Arc::clone(&deps.store),
                    Arc::clone(&deps.adapter),
                    Arc::clone(&deps.applicants),
                    receiver.clone(),
                    config.receive_timeout(),
                );
                (name, tokio::spawn(worker.run(shutdown.clone())))
            })
            .collect();

        Ok(Self {
            store: Arc::clone(&deps.store),
            config,
            shutdown,
            sender,
            receiver,
            dispatcher,
            workers,
            started_at: Utc::now(),
        })
    }

    pub fn status(&self) -> SchedulerStatus {
        let dispatcher_alive = !self.dispatcher.is_finished();
        let workers: Vec<WorkerStatus> = self
            .workers
            .iter()
            .map(|(name, handle)| WorkerStatus {
                name: name.clone(),
                alive: !handle.is_finished(),
            })
            .collect();

        SchedulerStatus {
            state: if dispatcher_alive {
                RunState::Running
            } else {
                RunState::Degraded
            },
            started_at: Some(self.started_at),
            dispatcher_alive,
            worker_count: workers.len(),
            workers,
            channel_depth: self.sender.depth(),
        }
    }

    /// Signals shutdown, posts one sentinel per worker, joins every task with
    /// a bounded timeout and aborts stragglers. Jobs still buffered in the
    /// channel go back to `queued`.
    pub async fn shutdown(self) -> StopReport {
        info!("Initiating graceful shutdown of scheduler");
        let mut report = StopReport::default();

        self.shutdown.cancel();

        for _ in 0..self.workers.len() {
            match self.sender.try_push(Delivery::Shutdown) {
                Ok(()) => {}
                Err(PushError::Full) => {
                    debug!("delivery channel full; workers will observe shutdown on timeout");
                    break;
                }
                Err(PushError::Closed) => break,
            }
        }

        if !join_bounded("dispatcher", self.dispatcher, self.config.dispatcher_join_timeout()).await
        {
            report.forced += 1;
        }
        for (name, handle) in self.workers {
            if !join_bounded(&name, handle, self.config.worker_join_timeout()).await {
                report.forced += 1;
            }
        }

        for id in self.receiver.drain().await {
            match self
                .store
                .release_claim(id, "scheduler stopped before a worker picked it up")
                .await
            {
                Ok(_) => report.released += 1,
                Err(err) => error!(
                    job_id = %id,
                    error = %err,
                    "failed to release undelivered job; it stays processing"
                ),
            }
        }

        info!(
            forced = report.forced,
            released = report.released,
            "Scheduler shutdown complete"
        );
        report
    }
}

/// Returns `false` when the task had to be aborted.
async fn join_bounded(name: &str, mut handle: JoinHandle<()>, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn!(task = name, error = ?err, "task failed before shutdown");
            true
        }
        Err(_) => {
            warn!(task = name, ?timeout, "task did not exit in time; aborting");
            handle.abort();
            let _ = handle.await;
            false
        }
    }
}

/// Single entry point for starting and stopping the scheduler as a unit.
///
/// Holds at most one [`SchedulerHandle`]; no process-wide state is involved.
pub struct SchedulerController {
    deps: SchedulerDeps,
    config: SchedulerConfig,
    handle: Mutex<Option<SchedulerHandle>>,
}

impl fmt::Debug for SchedulerController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let running = self
            .handle
            .try_lock()
            .map(|guard| guard.is_some())
            .unwrap_or(true);
        f.debug_struct("SchedulerController")
            .field("deps", &self.deps)
            .field("config", &self.config)
            .field("running", &running)
            .finish()
    }
}

impl SchedulerController {
    pub fn new(deps: SchedulerDeps, config: SchedulerConfig) -> Self {
        Self {
            deps,
            config,
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Idempotent: a second call while running changes nothing.
    #[instrument(name = "scheduler.start", skip(self), err)]
    pub async fn start(&self) -> Result<StartOutcome> {
        let mut guard = self.handle.lock().await;
        if guard.is_some() {
            info!("scheduler already running; start ignored");
            return Ok(StartOutcome::AlreadyRunning);
        }

        let handle = SchedulerHandle::spawn(&self.deps, self.config.clone())?;
        info!(
            pool_size = self.config.pool_size,
            channel_capacity = self.config.channel_capacity,
            "scheduler started"
        );
        *guard = Some(handle);
        Ok(StartOutcome::Started)
    }

    /// Idempotent: stopping a stopped scheduler is a no-op. Returns only
    /// after every task has been joined or aborted.
    #[instrument(name = "scheduler.stop", skip(self))]
    pub async fn stop(&self) -> StopOutcome {
        let mut guard = self.handle.lock().await;
        match guard.take() {
            Some(handle) => StopOutcome::Stopped(handle.shutdown().await),
            None => {
                info!("scheduler not running; stop ignored");
                StopOutcome::NotRunning
            }
        }
    }

    pub async fn status(&self) -> SchedulerStatus {
        let guard = self.handle.lock().await;
        guard
            .as_ref()
            .map(SchedulerHandle::status)
            .unwrap_or_else(SchedulerStatus::stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{
        adapter::{
            AdapterError, AdapterOutcome, ApplicantContext, ExecutionRequest,
            StaticApplicantSource,
        },
        job::{JobStatus, NewJob},
        memory::InMemoryJobStore,
    };
    use async_trait::async_trait;

    struct InstantAdapter;

    #[async_trait]
    impl ExecutionAdapter for InstantAdapter {
        async fn execute(
            &self,
            _request: &ExecutionRequest,
        ) -> std::result::Result<AdapterOutcome, AdapterError> {
            Ok(AdapterOutcome::succeeded())
        }
    }

    struct StuckAdapter;

    #[async_trait]
    impl ExecutionAdapter for StuckAdapter {
        async fn execute(
            &self,
            _request: &ExecutionRequest,
        ) -> std::result::Result<AdapterOutcome, AdapterError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(AdapterOutcome::succeeded())
        }
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            pool_size: 2,
            channel_capacity: 4,
            poll_interval_ms: 10,
            receive_timeout_ms: 10,
            dispatcher_join_grace_ms: 500,
            worker_join_timeout_ms: 200,
            ..SchedulerConfig::default()
        }
    }

    fn controller(store: Arc<InMemoryJobStore>, adapter: Arc<dyn ExecutionAdapter>) -> SchedulerController {
        SchedulerController::new(
            SchedulerDeps {
                store,
                adapter,
                applicants: Arc::new(StaticApplicantSource::new(ApplicantContext::default())),
            },
            fast_config(),
        )
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let store = Arc::new(InMemoryJobStore::new());
        let controller = controller(store, Arc::new(InstantAdapter));

        assert_eq!(controller.stop().await, StopOutcome::NotRunning);
        assert_eq!(controller.start().await.expect("start"), StartOutcome::Started);
        assert_eq!(
            controller.start().await.expect("start"),
            StartOutcome::AlreadyRunning
        );

        let status = controller.status().await;
        assert!(status.is_running());
        assert_eq!(status.worker_count, 2);

        assert!(matches!(controller.stop().await, StopOutcome::Stopped(_)));
        assert_eq!(controller.stop().await, StopOutcome::NotRunning);
        assert_eq!(controller.status().await, SchedulerStatus::stopped());
    }

    #[tokio::test]
    async fn invalid_config_refuses_to_start() {
        let store = Arc::new(InMemoryJobStore::new());
        let controller = SchedulerController::new(
            SchedulerDeps {
                store,
                adapter: Arc::new(InstantAdapter),
                applicants: Arc::new(StaticApplicantSource::empty()),
            },
            SchedulerConfig {
                pool_size: 0,
                ..SchedulerConfig::default()
            },
        );
        assert!(controller.start().await.is_err());
        assert!(!controller.status().await.is_running());
    }

    #[tokio::test]
    async fn stuck_workers_are_aborted_after_timeout() {
        let store = Arc::new(InMemoryJobStore::new());
        store
            .submit(NewJob::parse("https://example.com/slow").expect("url"))
            .await
            .expect("submit");
        let controller = controller(store.clone(), Arc::new(StuckAdapter));
        controller.start().await.expect("start");

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if store.count_processing().await.expect("count") == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job claimed");
        // Let a worker pick it up.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let StopOutcome::Stopped(report) = controller.stop().await else {
            panic!("expected a running scheduler");
        };
        assert_eq!(report.forced, 1);
        let jobs = store.list_jobs(Some(JobStatus::Processing), 10).await.expect("list");
        assert_eq!(jobs.len(), 1, "aborted job is left processing");
    }
}
