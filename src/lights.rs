//! Recording-indicator lights in lecture halls.
//!
//! Light calls go to slow hardware, so they are serialized under their own
//! guard instead of the stream-state guard. Switching on happens in the
//! background so a stream-start acknowledgement never waits on hardware;
//! switching off is awaited by the caller. Both paths take the same guard, so
//! on/off commands for one indicator never interleave.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::PowerControlConfig;
use crate::directory::LectureHall;
use crate::error::{DispatchError, Result};

#[tonic::async_trait]
pub trait LightController: Send + Sync {
    async fn turn_on(&self, hall: &LectureHall) -> Result<()>;

    async fn turn_off(&self, hall: &LectureHall) -> Result<()>;
}

/// Drives the networked power strip a hall's live light is plugged into.
#[derive(Debug, Clone)]
pub struct PowerStripController {
    client: reqwest::Client,
    config: PowerControlConfig,
}

impl PowerStripController {
    pub fn new(config: PowerControlConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn switch(&self, hall: &LectureHall, on: bool) -> Result<()> {
        if hall.power_ctrl_ip.is_empty() {
            tracing::debug!(hall_id = hall.id, "No power strip configured, skipping light");
            return Ok(());
        }

        let url = format!("http://{}/ctrl.htm", hall.power_ctrl_ip);
        let field = format!("F{}", hall.live_light_index);
        let value = if on { "1" } else { "0" };

        let mut request = self.client.post(&url).form(&[(field.as_str(), value)]);
        if let Some((user, password)) = self.config.basic_auth() {
            request = request.basic_auth(user, password);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DispatchError::Actuator(format!("{}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(DispatchError::Actuator(format!(
                "{} answered {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }
}

#[tonic::async_trait]
impl LightController for PowerStripController {
    async fn turn_on(&self, hall: &LectureHall) -> Result<()> {
        self.switch(hall, true).await
    }

    async fn turn_off(&self, hall: &LectureHall) -> Result<()> {
        self.switch(hall, false).await
    }
}

/// Serialized, best-effort access to the hall lights.
#[derive(Clone)]
pub struct HallLights {
    controller: Arc<dyn LightController>,
    guard: Arc<Mutex<()>>,
}

impl HallLights {
    pub fn new(controller: Arc<dyn LightController>) -> Self {
        Self {
            controller,
            guard: Arc::new(Mutex::new(())),
        }
    }

    /// Switch the light on without waiting for the hardware.
    pub fn switch_on_in_background(&self, hall: LectureHall) -> JoinHandle<()> {
        let controller = self.controller.clone();
        let guard = self.guard.clone();
        tokio::spawn(async move {
            let _held = guard.lock().await;
            if let Err(e) = controller.turn_on(&hall).await {
                tracing::error!(hall_id = hall.id, error = %e, "Can't turn on live light");
            }
        })
    }

    /// Switch the light off, waiting for the hardware. Failures are only logged.
    pub async fn switch_off(&self, hall: &LectureHall) {
        let _held = self.guard.lock().await;
        if let Err(e) = self.controller.turn_off(hall).await {
            tracing::error!(hall_id = hall.id, error = %e, "Can't turn off live light");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Records entry and exit of every call, with a delay in between.
    #[derive(Default)]
    struct SlowLights {
        log: std::sync::Mutex<Vec<String>>,
    }

    impl SlowLights {
        async fn record(&self, what: &str) {
            self.log.lock().unwrap().push(format!("{what}:begin"));
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.log.lock().unwrap().push(format!("{what}:end"));
        }
    }

    #[tonic::async_trait]
    impl LightController for SlowLights {
        async fn turn_on(&self, _hall: &LectureHall) -> Result<()> {
            self.record("on").await;
            Ok(())
        }

        async fn turn_off(&self, _hall: &LectureHall) -> Result<()> {
            self.record("off").await;
            Err(DispatchError::Actuator("strip offline".to_string()))
        }
    }

    fn hall() -> LectureHall {
        LectureHall {
            id: 1,
            name: "HS1".to_string(),
            combined_ip: String::new(),
            presentation_ip: String::new(),
            camera_ip: String::new(),
            power_ctrl_ip: "10.0.0.9".to_string(),
            live_light_index: 2,
        }
    }

    #[tokio::test]
    async fn on_and_off_never_interleave() {
        let controller = Arc::new(SlowLights::default());
        let lights = HallLights::new(controller.clone());

        let on = lights.switch_on_in_background(hall());
        lights.switch_off(&hall()).await;
        on.await.unwrap();

        let log = controller.log.lock().unwrap().clone();
        assert_eq!(log.len(), 4);
        for pair in log.chunks(2) {
            let (first, second) = (&pair[0], &pair[1]);
            assert_eq!(
                first.trim_end_matches(":begin"),
                second.trim_end_matches(":end")
            );
        }
    }

    #[tokio::test]
    async fn missing_power_strip_is_a_noop() {
        let controller = PowerStripController::new(PowerControlConfig::default());
        let mut hall = hall();
        hall.power_ctrl_ip = String::new();
        assert!(controller.turn_on(&hall).await.is_ok());
        assert!(controller.turn_off(&hall).await.is_ok());
    }
}
