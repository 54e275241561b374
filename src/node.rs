use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::DispatcherConfig;
use crate::dashboard::{run_dashboard, DashboardState};
use crate::directory::Directory;
use crate::grpc::{GrpcServer, GrpcWorkerDispatcher, WorkerDispatcher, WorkerEventService};
use crate::lights::{HallLights, LightController, PowerStripController};
use crate::notify::{BroadcastNotifier, ErrorReporter, LiveStateEvent, TracingReporter};
use crate::scheduler::{DispatchReport, DispatchScheduler};

/// Wires the directory, the dispatch loop and the worker-facing server together.
pub struct Node {
    pub config: DispatcherConfig,
    pub directory: Directory,
    notifier: Arc<BroadcastNotifier>,
    lights: HallLights,
    scheduler: Arc<DispatchScheduler>,
}

impl Node {
    /// Node talking to real workers and power strips.
    pub fn new(config: DispatcherConfig, directory: Directory) -> Self {
        let dispatcher = Arc::new(GrpcWorkerDispatcher::new(
            config.worker_port,
            config.dial_timeout,
        ));
        let lights = Arc::new(PowerStripController::new(config.power_control.clone()));
        Self::with_collaborators(config, directory, dispatcher, lights, Arc::new(TracingReporter))
    }

    pub fn with_collaborators(
        config: DispatcherConfig,
        directory: Directory,
        dispatcher: Arc<dyn WorkerDispatcher>,
        lights: Arc<dyn LightController>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let scheduler = Arc::new(DispatchScheduler::new(
            directory.clone(),
            dispatcher,
            reporter,
        ));
        Self {
            config,
            directory,
            notifier: Arc::new(BroadcastNotifier::default()),
            lights: HallLights::new(lights),
            scheduler,
        }
    }

    /// Live-state changes for viewer-facing consumers.
    pub fn subscribe_live_state(&self) -> broadcast::Receiver<LiveStateEvent> {
        self.notifier.subscribe()
    }

    /// Run a single dispatch cycle now.
    pub async fn dispatch_once(&self) -> DispatchReport {
        self.scheduler.run_once(Utc::now()).await
    }

    pub fn event_service(&self) -> WorkerEventService {
        WorkerEventService::new(
            &self.config,
            self.directory.clone(),
            self.lights.clone(),
            self.notifier.clone(),
        )
    }

    /// Run every subsystem until `shutdown` is cancelled.
    ///
    /// 1. Spawns the periodic dispatch loop
    /// 2. Optionally spawns the dashboard
    /// 3. Serves the worker gRPC service (blocking)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is unusable, or if the gRPC server
    /// fails to start or dies. The other subsystems log their own errors.
    pub async fn run(
        self,
        shutdown: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.config.validate()?;

        let scheduler = self.scheduler.clone();
        let interval = self.config.dispatch_interval;
        let dispatch_shutdown = shutdown.clone();
        let dispatch_handle = tokio::spawn(async move {
            scheduler.run(interval, dispatch_shutdown).await;
        });

        if let Some(dashboard_addr) = self.config.dashboard_addr {
            let state = DashboardState {
                directory: self.directory.clone(),
            };
            let dashboard_shutdown = shutdown.clone();
            tokio::spawn(async move {
                run_dashboard(dashboard_addr, state, dashboard_shutdown).await;
            });
        }

        let server = GrpcServer::new(self.config.listen_addr, self.event_service());
        let result = server.run(shutdown.clone()).await;

        // The server can exit on its own; make sure the loop stops with it.
        shutdown.cancel();
        if let Err(e) = dispatch_handle.await {
            tracing::warn!(error = %e, "Dispatch loop ended abnormally");
        }
        result?;
        Ok(())
    }
}
