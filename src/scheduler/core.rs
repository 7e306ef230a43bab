use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::argocd::ControlPlane;
use crate::controller::{with_timeout, ReconcileAction, Reconciler};
use crate::error::Result;

#[cfg(feature = "metrics")]
use crate::controller::metrics;

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Sleep after a successful cycle
    pub poll_interval: Duration,
    /// Sleep after a cycle whose application listing failed
    pub error_backoff: Duration,
    /// Applications reconciled concurrently; 1 processes them in order
    pub workers: usize,
    /// Deadline for the list call
    pub list_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            error_backoff: Duration::from_secs(30),
            workers: 5,
            list_timeout: Duration::from_secs(10),
        }
    }
}

/// Summary of one polling cycle
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub listed: usize,
    pub processed: usize,
    pub skipped: usize,
    /// Application tasks that panicked
    pub failed: usize,
    pub actions: Vec<(String, ReconcileAction)>,
}

pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    control_plane: Arc<dyn ControlPlane>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        reconciler: Arc<Reconciler>,
        control_plane: Arc<dyn ControlPlane>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            reconciler,
            control_plane,
            config,
        }
    }

    /// Poll forever, stopping on SIGINT or SIGTERM
    pub async fn run(&self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Poll until `shutdown` completes. An in-flight cycle is abandoned on shutdown.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            "Starting reconcile loop (poll every {:?}, backoff {:?}, {} worker(s))",
            self.config.poll_interval, self.config.error_backoff, self.config.workers
        );
        tokio::pin!(shutdown);

        loop {
            let delay = tokio::select! {
                _ = &mut shutdown => break,
                outcome = self.run_once() => match outcome {
                    Ok(report) => {
                        info!(
                            "Cycle complete: {} listed, {} processed, {} skipped, {} failed",
                            report.listed, report.processed, report.skipped, report.failed
                        );
                        self.config.poll_interval
                    }
                    Err(e) => {
                        error!("Error in reconcile cycle: {}", e);
                        #[cfg(feature = "metrics")]
                        metrics::record_cycle_error();
                        self.config.error_backoff
                    }
                },
            };

            debug!("Next cycle in {:?}", delay);
            tokio::select! {
                _ = &mut shutdown => break,
                _ = sleep(delay) => {}
            }
        }

        info!("Shutdown requested, reconcile loop stopped");
        Ok(())
    }

    /// Run a single cycle: list applications and reconcile each of them.
    ///
    /// Fails only when the application list cannot be fetched.
    pub async fn run_once(&self) -> Result<CycleReport> {
        let started = Instant::now();
        let timeout = self.config.list_timeout;
        let apps = with_timeout(
            "list_applications",
            timeout,
            self.control_plane.list_applications(timeout),
        )
        .await?;

        let mut report = CycleReport {
            listed: apps.len(),
            ..Default::default()
        };
        if apps.is_empty() {
            warn!("No applications returned by Argo CD");
        }

        let permits = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks = JoinSet::new();

        for app in apps {
            if self.reconciler.is_excluded(&app.name) {
                debug!("Skipping excluded application {}", app.name);
                report.skipped += 1;
                continue;
            }

            let reconciler = Arc::clone(&self.reconciler);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                // The semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                let name = app.name.clone();
                let action = reconciler.reconcile_application(app).await;
                (name, action)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Some(action))) => {
                    report.processed += 1;
                    report.actions.push((name, action));
                }
                Ok((_, None)) => report.skipped += 1,
                Err(e) => {
                    error!("Application task failed: {}", e);
                    report.failed += 1;
                }
            }
        }
        report.actions.sort_by(|a, b| a.0.cmp(&b.0));

        #[cfg(feature = "metrics")]
        metrics::observe_cycle(
            started.elapsed().as_secs_f64(),
            self.reconciler.state().paused_count().await,
        );
        debug!("Cycle took {:?}", started.elapsed());

        Ok(report)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argocd::{ApplicationSnapshot, HealthStatus, SyncStatus};
    use crate::controller::ReconcilerConfig;
    use crate::error::Error;
    use crate::testing::{Call, RecordingControlPlane, RecordingNotifier, RecordingRollback};

    fn scheduler_with(
        plane: Arc<RecordingControlPlane>,
        reconciler_config: ReconcilerConfig,
        workers: usize,
    ) -> Scheduler {
        let reconciler = Arc::new(Reconciler::new(
            reconciler_config,
            plane.clone(),
            Arc::new(RecordingNotifier::default()),
            Arc::new(RecordingRollback::default()),
        ));
        Scheduler::new(
            reconciler,
            plane,
            SchedulerConfig {
                poll_interval: Duration::from_millis(10),
                error_backoff: Duration::from_millis(5),
                workers,
                list_timeout: Duration::from_secs(1),
            },
        )
    }

    fn quick_config() -> ReconcilerConfig {
        ReconcilerConfig {
            retry_backoff: Duration::ZERO,
            ..Default::default()
        }
    }

    fn apps() -> Vec<ApplicationSnapshot> {
        vec![
            ApplicationSnapshot::new("api", HealthStatus::Healthy, SyncStatus::Synced, "v1"),
            ApplicationSnapshot::new("web", HealthStatus::Healthy, SyncStatus::OutOfSync, "v1"),
            ApplicationSnapshot::new("grafana", HealthStatus::Degraded, SyncStatus::Synced, "v1"),
        ]
    }

    #[tokio::test]
    async fn test_run_once_processes_all_and_skips_excluded() {
        let plane = Arc::new(RecordingControlPlane::with_apps(apps()));
        let mut config = quick_config();
        config.excluded_apps.insert("grafana".to_string());
        let scheduler = scheduler_with(plane.clone(), config, 5);

        let report = scheduler.run_once().await.unwrap();

        assert_eq!(report.listed, 3);
        assert_eq!(report.processed, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(
            report.actions,
            vec![
                ("api".to_string(), ReconcileAction::Healthy),
                ("web".to_string(), ReconcileAction::Synced { attempts: 1 }),
            ]
        );
        assert!(plane.calls().iter().all(|c| !matches!(
            c,
            Call::Refresh(n) | Call::Sync(n) | Call::Pause(n) | Call::Resume(n) if n == "grafana"
        )));
    }

    #[tokio::test]
    async fn test_run_once_sequential_matches_parallel() {
        let plane = Arc::new(RecordingControlPlane::with_apps(apps()));
        let scheduler = scheduler_with(plane.clone(), quick_config(), 1);

        let report = scheduler.run_once().await.unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(plane.count(&Call::Sync("web".to_string())), 1);
        assert_eq!(plane.count(&Call::Sync("grafana".to_string())), 1);
    }

    #[tokio::test]
    async fn test_run_once_list_failure_is_cycle_error() {
        let plane = Arc::new(RecordingControlPlane::with_apps(apps()));
        plane.fail("list");
        let scheduler = scheduler_with(plane.clone(), quick_config(), 5);

        let err = scheduler.run_once().await.unwrap_err();

        assert!(matches!(err, Error::ControlPlane { .. }));
        assert_eq!(plane.calls(), vec![Call::List]);
    }

    #[tokio::test]
    async fn test_run_once_empty_list_is_ok() {
        let plane = Arc::new(RecordingControlPlane::default());
        let scheduler = scheduler_with(plane, quick_config(), 5);

        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report, CycleReport::default());
    }

    #[tokio::test]
    async fn test_run_until_keeps_polling_after_list_failures() {
        let plane = Arc::new(RecordingControlPlane::with_apps(apps()));
        plane.fail("list");
        let scheduler = scheduler_with(plane.clone(), quick_config(), 5);

        // Stop once the third failed listing has been attempted
        let watched = plane.clone();
        let third_list = async move {
            while watched.count(&Call::List) < 3 {
                sleep(Duration::from_millis(1)).await;
            }
        };
        scheduler.run_until(third_list).await.unwrap();

        // Each cycle failed at the listing and never reached the apps
        assert!(plane.count(&Call::List) >= 3);
        assert_eq!(plane.calls().len(), plane.count(&Call::List));
    }

    #[tokio::test]
    async fn test_state_persists_across_cycles() {
        let plane = Arc::new(RecordingControlPlane::with_apps(vec![
            ApplicationSnapshot::new("web", HealthStatus::Healthy, SyncStatus::OutOfSync, "v1"),
        ]));
        let scheduler = scheduler_with(plane.clone(), quick_config(), 2);

        for expected in 1..=3u32 {
            let report = scheduler.run_once().await.unwrap();
            assert_eq!(
                report.actions,
                vec![(
                    "web".to_string(),
                    ReconcileAction::Synced { attempts: expected }
                )]
            );
        }

        let state = scheduler.reconciler.state().get("web").await.unwrap();
        assert_eq!(state.consecutive_recovery_attempts, 3);
        assert_eq!(plane.count(&Call::Sync("web".to_string())), 3);
        assert_eq!(plane.count(&Call::List), 3);
    }
}
