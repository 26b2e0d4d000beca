use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{NotifyError, ReaderEvent};

pub trait GpioDriver: Send {
    fn set_level(&mut self, pin: u8, high: bool) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinPulse {
    pub pin: u8,
    pub active_high: bool,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpioConfig {
    pub success: Option<PinPulse>,
    pub fail: Option<PinPulse>,
    /// Lock actuator driven on success, returns to idle after `duration`.
    pub momentary: Option<PinPulse>,
}

impl GpioConfig {
    fn pins(&self) -> impl Iterator<Item = PinPulse> + '_ {
        [self.success, self.fail, self.momentary].into_iter().flatten()
    }

    /// Pulses for `event`, shortest first.
    pub fn plan(&self, event: &ReaderEvent) -> Vec<PinPulse> {
        let mut pulses: Vec<PinPulse> = match event {
            ReaderEvent::HomeKeyAuth(_) => [self.success, self.momentary].into_iter().flatten().collect(),
            ReaderEvent::HomeKeyFailed => self.fail.into_iter().collect(),
            ReaderEvent::TagTap(_) => Vec::new(),
        };
        pulses.sort_by_key(|p| p.duration);
        pulses
    }
}

pub struct GpioActions<D> {
    driver: D,
    config: GpioConfig,
}

impl<D: GpioDriver> GpioActions<D> {
    pub fn new(driver: D, config: GpioConfig) -> Self {
        Self { driver, config }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Drive every configured pin to its idle level.
    pub fn idle(&mut self) -> Result<(), NotifyError> {
        let pins: Vec<PinPulse> = self.config.pins().collect();
        for p in pins {
            self.driver.set_level(p.pin, !p.active_high)?;
        }
        Ok(())
    }

    /// Raise all pins for `event` together, then restore each one when its
    /// duration has elapsed.
    pub async fn handle(&mut self, event: &ReaderEvent) -> Result<(), NotifyError> {
        let pulses = self.config.plan(event);
        if pulses.is_empty() {
            return Ok(());
        }
        let start = Instant::now();
        for p in &pulses {
            self.driver.set_level(p.pin, p.active_high)?;
        }
        for p in &pulses {
            tokio::time::sleep_until(start + p.duration).await;
            self.driver.set_level(p.pin, !p.active_high)?;
        }
        Ok(())
    }
}

pub async fn run_gpio_task<D: GpioDriver>(mut actions: GpioActions<D>, mut rx: mpsc::Receiver<ReaderEvent>) {
    if let Err(e) = actions.idle() {
        tracing::warn!(error = %e, "GPIO init failed");
    }
    while let Some(event) = rx.recv().await {
        if let Err(e) = actions.handle(&event).await {
            tracing::warn!(error = %e, "GPIO action failed");
        }
    }
    tracing::debug!("GPIO task finished");
}

#[derive(Debug, Default)]
pub struct LogGpioDriver;

impl GpioDriver for LogGpioDriver {
    fn set_level(&mut self, pin: u8, high: bool) -> Result<(), NotifyError> {
        tracing::info!(pin, high, "GPIO level");
        Ok(())
    }
}
