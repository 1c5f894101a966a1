//! Reconciliation scheduler: independently ticking jobs over the panel layer.

pub mod health;
pub mod notify;
pub mod on_hold;
pub mod purge;
pub mod report;
pub mod sync;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::error::AppResult;
use crate::queue::QueueProcessor;
use crate::AppState;

pub use health::HealthMonitor;

/// Owns the job loops until [`Scheduler::start`]
pub struct Scheduler {
    state: Arc<AppState>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Handle for the spawned job loops
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl SchedulerHandle {
    /// Stop every job and wait for in-flight ticks to finish
    pub async fn shutdown(self) {
        tracing::info!("Stopping scheduler...");
        let _ = self.shutdown_tx.send(true);

        for (name, handle) in self.handles {
            match tokio::time::timeout(Duration::from_secs(30), handle).await {
                Ok(Ok(())) => tracing::debug!(job = name, "Job stopped"),
                Ok(Err(e)) => tracing::warn!(job = name, error = %e, "Job loop panicked"),
                Err(_) => tracing::warn!(job = name, "Job shutdown timeout"),
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

impl Scheduler {
    pub fn new(state: Arc<AppState>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            state,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Spawn every job loop and return a handle for shutdown
    pub fn start(self) -> SchedulerHandle {
        let cfg = self.state.config.scheduler.clone();
        let health = Arc::new(HealthMonitor::new());
        let queue = Arc::new(QueueProcessor::new());

        let handles = vec![
            self.spawn_job("sync", cfg.sync_interval, |state| async move {
                sync::run_once(&state).await.map(|_| ())
            }),
            self.spawn_job("notify", cfg.notify_interval, |state| async move {
                notify::run_once(&state).await.map(|_| ())
            }),
            self.spawn_job("purge", cfg.purge_interval, |state| async move {
                purge::run_once(&state).await.map(|_| ())
            }),
            self.spawn_job("on_hold", cfg.on_hold_interval, |state| async move {
                on_hold::run_once(&state).await.map(|_| ())
            }),
            self.spawn_job("health", cfg.health_interval, move |state| {
                let health = health.clone();
                async move { health.run_once(&state).await.map(|_| ()) }
            }),
            self.spawn_job("report", cfg.report_interval, |state| async move {
                report::run_once(&state).await.map(|_| ())
            }),
            self.spawn_job("queue", self.state.config.queue.interval, move |state| {
                let queue = queue.clone();
                async move { queue.run_once(&state).await.map(|_| ()) }
            }),
        ];

        tracing::info!(jobs = handles.len(), "Scheduler started");
        SchedulerHandle {
            shutdown_tx: self.shutdown_tx,
            handles,
        }
    }

    /// One loop per job. Each tick runs in its own task so a panic is
    /// contained, and the loop awaits it so a job never overlaps itself.
    fn spawn_job<F, Fut>(&self, name: &'static str, every_secs: u64, job: F) -> (&'static str, JoinHandle<()>)
    where
        F: Fn(Arc<AppState>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let mut shutdown_rx = self.shutdown_rx.clone();
        let period = Duration::from_secs(every_secs.max(1));

        let handle = tokio::spawn(async move {
            let mut interval = interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let tick = tokio::spawn(job(Arc::clone(&state)));
                        match tick.await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => tracing::warn!(job = name, error = %e, "Job tick failed"),
                            Err(e) if e.is_panic() => tracing::error!(job = name, "Job tick panicked"),
                            Err(e) => tracing::warn!(job = name, error = %e, "Job tick cancelled"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::debug!(job = name, "Job shutting down");
                        break;
                    }
                }
            }
        });
        (name, handle)
    }
}
