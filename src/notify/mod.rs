//! Outbound adapters. The reader loop publishes [`ReaderEvent`]s to a
//! [`Notifier`]; MQTT and GPIO tasks each consume their own queue.

pub mod gpio;
pub mod mqtt;

use tokio::sync::mpsc;

use crate::auth::KeyFlow;
use crate::reader::TagInfo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    pub issuer_id: [u8; 8],
    pub endpoint_id: [u8; 6],
    /// Reader group identifier.
    pub reader_id: [u8; 8],
    pub flow: KeyFlow,
}

/// Carries identifiers and the flow only; failure detail stays in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    HomeKeyAuth(AuthEvent),
    HomeKeyFailed,
    TagTap(TagInfo),
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("MQTT: {0}")]
    Mqtt(String),
    #[error("GPIO: {0}")]
    Gpio(String),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Default)]
pub struct Notifier {
    sinks: Vec<mpsc::Sender<ReaderEvent>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, depth: usize) -> mpsc::Receiver<ReaderEvent> {
        let (tx, rx) = mpsc::channel(depth);
        self.sinks.push(tx);
        rx
    }

    /// Never blocks the reader: a full queue drops the event for that sink.
    pub fn publish(&self, event: ReaderEvent) {
        for sink in &self.sinks {
            match sink.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("Event sink full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!("Event sink closed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out() {
        let mut notifier = Notifier::new();
        let mut a = notifier.subscribe(4);
        let mut b = notifier.subscribe(4);
        notifier.publish(ReaderEvent::HomeKeyFailed);
        assert_eq!(a.recv().await, Some(ReaderEvent::HomeKeyFailed));
        assert_eq!(b.recv().await, Some(ReaderEvent::HomeKeyFailed));
    }

    #[tokio::test]
    async fn test_full_sink_does_not_block_others() {
        let mut notifier = Notifier::new();
        let _full = notifier.subscribe(1);
        let mut open = notifier.subscribe(4);
        notifier.publish(ReaderEvent::HomeKeyFailed);
        notifier.publish(ReaderEvent::HomeKeyFailed);
        assert_eq!(open.recv().await, Some(ReaderEvent::HomeKeyFailed));
        assert_eq!(open.recv().await, Some(ReaderEvent::HomeKeyFailed));
    }
}
