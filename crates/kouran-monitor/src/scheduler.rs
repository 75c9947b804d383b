//! Polling loop: one run after a short delay, then one per interval.
//! Runs never overlap; a run that fails or panics is logged and the loop goes on.

use std::future::Future;
use std::time::Duration;

use kouran_core::Result;
use kouran_core::config::MonitorConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::pipeline::RunReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub initial_delay: Duration,
    pub interval: Duration,
}

impl From<&MonitorConfig> for SchedulerSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            interval: Duration::from_secs(config.polling_interval_mins.max(1) * 60),
        }
    }
}

/// Resolves once the flag turns true. A dropped sender never resolves.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn run_guarded<F, Fut>(job: &F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<RunReport>> + Send + 'static,
{
    match tokio::spawn(job()).await {
        Ok(Ok(report)) => tracing::info!("✅ Outage check complete: {}", report.summary()),
        Ok(Err(e)) => tracing::error!("❌ Outage check failed ({}): {e}", e.kind()),
        Err(e) if e.is_panic() => tracing::error!("💥 Outage check panicked, continuing"),
        Err(e) => tracing::error!("❌ Outage check aborted: {e}"),
    }
}

/// Drive `job` until shutdown is requested.
pub async fn run_scheduler<F, Fut>(job: F, settings: SchedulerSettings, mut shutdown: watch::Receiver<bool>)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<RunReport>> + Send + 'static,
{
    tracing::info!(
        "⏰ Scheduler started (first check in {}s, then every {}s)",
        settings.initial_delay.as_secs(),
        settings.interval.as_secs()
    );

    tokio::select! {
        _ = tokio::time::sleep(settings.initial_delay) => {}
        _ = shutdown_requested(&mut shutdown) => {
            tracing::info!("🛑 Scheduler stopped before the first check");
            return;
        }
    }
    run_guarded(&job).await;

    let mut interval = tokio::time::interval_at(Instant::now() + settings.interval, settings.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown_requested(&mut shutdown) => break,
        }
        run_guarded(&job).await;
    }
    tracing::info!("🛑 Scheduler stopped");
}

/// Spawn the scheduler loop as a background tokio task.
pub fn spawn_scheduler<F, Fut>(job: F, settings: SchedulerSettings, shutdown: watch::Receiver<bool>) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<RunReport>> + Send + 'static,
{
    tokio::spawn(run_scheduler(job, settings, shutdown))
}
