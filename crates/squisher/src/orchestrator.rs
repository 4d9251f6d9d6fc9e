//! Run orchestration for Image Squisher
//!
//! Feeds sources in scan order through a bounded queue to a fixed pool of
//! workers, watches the run for stalls and reduces the outcomes into a
//! [`RunSummary`].

use crate::aggregate::{JobOutcome, RunAggregator, RunSummary};
use crate::concurrency::{derive_plan, ConcurrencyPlan};
use crate::config::{Config, ConfigError};
use crate::job_executor::{JobExecutor, JobExecutorConfig};
use crate::notify::{AlertSink, DesktopNotifier, FanoutSink, LogSink};
use crate::predict::{FormatLearner, FormatPredictor};
use crate::progress::{new_shared_progress, SharedProgress};
use crate::race::EncoderSlot;
use crate::startup::probe_encoders;
use crate::watchdog::HangWatchdog;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Error type for orchestrator setup
#[derive(Debug, Error)]
pub enum RunError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No target format can be produced on this machine
    #[error("Startup check failed: {0}")]
    Startup(String),
}

/// Graceful stop request shared with the workers.
///
/// Once triggered no new job is dequeued; jobs already in a worker drain.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Resolves once [`StopHandle::stop`] has been called.
    pub async fn stopped(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent stop is not missed.
        notified.as_mut().enable();
        if self.is_stopped() {
            return;
        }
        notified.await;
    }
}

/// Orchestrator state for one run
pub struct Orchestrator {
    /// Validated configuration
    pub config: Config,
    /// Derived concurrency plan
    pub concurrency_plan: ConcurrencyPlan,
    slots: Vec<EncoderSlot>,
    predictor: Option<Arc<dyn FormatPredictor>>,
    alert_sink: Arc<dyn AlertSink>,
    stop: StopHandle,
}

impl Orchestrator {
    /// Initialize from a configuration
    ///
    /// 1. Validate the configuration
    /// 2. Probe the encoders
    /// 3. Derive the concurrency plan
    /// 4. Load the format learner when enabled
    pub fn new(mut config: Config) -> Result<Self, RunError> {
        config.validate()?;
        let report = probe_encoders(&config);
        if !report.any_available() {
            return Err(RunError::Startup(
                "no encoder is available for any target format".to_string(),
            ));
        }

        let mut orchestrator = Self::with_encoders(config, report.slots);
        if orchestrator.config.learning.enabled {
            let learner = FormatLearner::load(&orchestrator.config.learning.stats_file);
            debug!("format learner statistics:\n{}", learner.summary());
            orchestrator.predictor = Some(Arc::new(learner));
        }
        Ok(orchestrator)
    }

    /// Initialize with explicit encoder slots and no startup probing
    ///
    /// Useful for testing when the real encoders are not installed.
    pub fn with_encoders(config: Config, slots: Vec<EncoderSlot>) -> Self {
        let concurrency_plan = derive_plan(&config);
        let alert_sink: Arc<dyn AlertSink> = if config.notifications.enabled {
            Arc::new(FanoutSink::new().with(LogSink).with(DesktopNotifier))
        } else {
            Arc::new(LogSink)
        };

        Self {
            config,
            concurrency_plan,
            slots,
            predictor: None,
            alert_sink,
            stop: StopHandle::new(),
        }
    }

    pub fn with_predictor(mut self, predictor: Arc<dyn FormatPredictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    /// Replace the sink that receives stall alerts.
    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = sink;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn predictor(&self) -> Option<Arc<dyn FormatPredictor>> {
        self.predictor.clone()
    }

    fn build_executor(&self) -> JobExecutor {
        let executor = JobExecutor::new(
            self.concurrency_plan.clone(),
            self.slots.clone(),
            JobExecutorConfig::from_config(&self.config),
        );
        match &self.predictor {
            Some(predictor) => executor.with_predictor(predictor.clone()),
            None => executor,
        }
    }

    /// Process `sources` in order and return the run summary.
    ///
    /// Every dispatched source yields exactly one outcome. The run always
    /// completes, even when every job fails.
    pub async fn run(&self, sources: Vec<PathBuf>) -> RunSummary {
        let start = Instant::now();
        let total = sources.len();
        let workers = self.concurrency_plan.workers.max(1) as usize;
        info!(
            total,
            workers,
            max_in_flight = self.concurrency_plan.max_in_flight_conversions,
            "starting run"
        );

        let executor = Arc::new(self.build_executor());
        let progress = new_shared_progress(total);
        let aggregator = Arc::new(RunAggregator::new());
        let watchdog = HangWatchdog::new(
            progress.clone(),
            self.config.hang_timeout(),
            self.alert_sink.clone(),
        )
        .spawn();

        let (job_tx, job_rx) = mpsc::channel::<PathBuf>(workers * 2);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let stop = self.stop.clone();
        let feeder = tokio::spawn(async move {
            for source in sources {
                tokio::select! {
                    sent = job_tx.send(source) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                    _ = stop.stopped() => break,
                }
            }
        });

        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|_| {
                tokio::spawn(worker_loop(
                    job_rx.clone(),
                    executor.clone(),
                    progress.clone(),
                    aggregator.clone(),
                    self.stop.clone(),
                ))
            })
            .collect();
        // Workers hold the only receivers now; once they all exit the
        // channel closes and a blocked feeder wakes up.
        drop(job_rx);

        if let Err(e) = feeder.await {
            error!("job feeder stopped unexpectedly: {}", e);
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!("worker stopped unexpectedly: {}", e);
            }
        }

        progress.write().await.finish();
        let stall_alerts = watchdog.stop().await;

        if let Some(predictor) = &self.predictor {
            if let Err(e) = predictor.flush() {
                warn!("could not save learner statistics: {}", e);
            }
        }

        let summary = aggregator.summarize(total, start.elapsed(), stall_alerts).await;
        if self.stop.is_stopped() && summary.not_started > 0 {
            warn!(not_started = summary.not_started, "run stopped before all jobs were dispatched");
        }
        info!(
            processed = summary.processed,
            errors = summary.errors,
            bytes_saved = summary.bytes_saved(),
            "run finished"
        );
        summary
    }
}

/// One worker: dequeue, execute, report. Exits when the queue closes or a
/// stop is requested.
async fn worker_loop(
    job_rx: Arc<Mutex<mpsc::Receiver<PathBuf>>>,
    executor: Arc<JobExecutor>,
    progress: SharedProgress,
    aggregator: Arc<RunAggregator>,
    stop: StopHandle,
) {
    loop {
        if stop.is_stopped() {
            break;
        }
        let next = {
            let mut rx = job_rx.lock().await;
            rx.recv().await
        };
        let Some(source) = next else {
            break;
        };
        if stop.is_stopped() {
            break;
        }

        progress.write().await.job_started();
        let outcome = execute_isolated(executor.clone(), source.clone()).await;
        match &outcome.error {
            None => info!("{}", outcome),
            Some(_) => error!("{}", outcome),
        }
        progress.write().await.job_finished(source);
        aggregator.record(outcome).await;
    }
}

/// Run one job in its own task so a panic becomes a failed outcome.
async fn execute_isolated(executor: Arc<JobExecutor>, source: PathBuf) -> JobOutcome {
    let start = Instant::now();
    let task_source = source.clone();
    match tokio::spawn(async move { executor.execute(&task_source).await }).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let original_size = std::fs::metadata(&source).map(|m| m.len()).unwrap_or(0);
            JobOutcome::failed(
                source,
                original_size,
                start.elapsed(),
                format!("job aborted: {}", e),
            )
        }
    }
}
