use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{DispatchError, Result};

/// Longest window or tolerance the dispatcher accepts.
pub const MAX_WINDOW: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// A configured window as a calendar offset, capped at [`MAX_WINDOW`].
pub fn window_span(d: Duration) -> chrono::Duration {
    let capped = d.min(MAX_WINDOW);
    chrono::Duration::milliseconds(capped.as_millis() as i64)
}

/// Credentials for the networked power strips driving the hall live lights.
#[derive(Debug, Clone, Default)]
pub struct PowerControlConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl PowerControlConfig {
    /// Basic auth is only sent when a username is configured.
    pub fn basic_auth(&self) -> Option<(&str, Option<&str>)> {
        self.username
            .as_deref()
            .map(|user| (user, self.password.as_deref()))
    }
}

/// Timing rules the in-memory directory uses to decide what is due and who is alive.
#[derive(Debug, Clone)]
pub struct DueWindowConfig {
    /// How long before its start a lecture stream becomes due.
    pub stream_lead: Duration,
    /// How long a stream stays due once its lead time is reached.
    pub stream_window: Duration,
    /// How long before its start a premiere becomes due.
    pub premiere_lead: Duration,
    /// Workers not seen within this threshold are considered dead.
    pub alive_threshold: Duration,
}

impl Default for DueWindowConfig {
    fn default() -> Self {
        Self {
            stream_lead: Duration::from_secs(10 * 60),
            stream_window: Duration::from_secs(2 * 60),
            premiere_lead: Duration::from_secs(60),
            alive_threshold: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub listen_addr: SocketAddr,
    /// Port every worker serves the `ToWorker` service on.
    pub worker_port: u16,
    pub dispatch_interval: Duration,
    pub dial_timeout: Duration,
    /// Slack around a stream's schedule in which self-streaming is accepted.
    pub self_stream_tolerance: Duration,
    /// Shared secret workers present when joining. Joining is disabled when unset.
    pub join_token: Option<String>,
    pub dashboard_addr: Option<SocketAddr>,
    pub power_control: PowerControlConfig,
    pub due: DueWindowConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 50052)),
            worker_port: 50051,
            dispatch_interval: Duration::from_secs(60),
            dial_timeout: Duration::from_secs(5),
            self_stream_tolerance: Duration::from_secs(30 * 60),
            join_token: None,
            dashboard_addr: None,
            power_control: PowerControlConfig::default(),
            due: DueWindowConfig::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_join_token(mut self, token: impl Into<String>) -> Self {
        self.join_token = Some(token.into());
        self
    }

    pub fn with_dashboard(mut self, addr: SocketAddr) -> Self {
        self.dashboard_addr = Some(addr);
        self
    }

    /// Reject settings the dispatcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.dispatch_interval.is_zero() {
            return Err(DispatchError::InvalidArgument(
                "dispatch interval must be positive".to_string(),
            ));
        }
        if self.dial_timeout.is_zero() {
            return Err(DispatchError::InvalidArgument(
                "dial timeout must be positive".to_string(),
            ));
        }

        let windows = [
            ("self-stream tolerance", self.self_stream_tolerance),
            ("stream lead", self.due.stream_lead),
            ("stream window", self.due.stream_window),
            ("premiere lead", self.due.premiere_lead),
            ("alive threshold", self.due.alive_threshold),
        ];
        for (name, value) in windows {
            if value > MAX_WINDOW {
                return Err(DispatchError::InvalidArgument(format!(
                    "{} of {}s exceeds the {}s limit",
                    name,
                    value.as_secs(),
                    MAX_WINDOW.as_secs()
                )));
            }
        }
        Ok(())
    }
}
