use serde::Serialize;
use tokio::sync::mpsc;

use super::{NotifyError, ReaderEvent};
use crate::crypto::hex;

pub const LWT_ONLINE: &str = "online";
pub const LWT_OFFLINE: &str = "offline";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
}

/// Minimal publishing surface of the broker connection.
pub trait MqttClient: Send {
    /// Message the broker publishes if the connection drops uncleanly.
    fn set_last_will(&mut self, will: &MqttMessage) -> Result<(), NotifyError>;
    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttTopics {
    pub auth: String,
    pub state: String,
    pub lwt: String,
    pub publish_tag_taps: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// HAP lock current state values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LockState {
    Unlocked = 0,
    Locked = 1,
}

#[derive(Serialize)]
struct HomeKeyPayload<'a> {
    issuer: String,
    endpoint: String,
    reader: String,
    flow: &'a str,
    homekey: bool,
}

#[derive(Serialize)]
struct TagPayload {
    uid: String,
    atqa: String,
    sak: String,
    homekey: bool,
}

/// Last-will message to register when connecting.
pub fn last_will(topics: &MqttTopics) -> MqttMessage {
    MqttMessage {
        topic: topics.lwt.clone(),
        payload: LWT_OFFLINE.as_bytes().to_vec(),
        qos: QoS::AtLeastOnce,
        retain: true,
    }
}

pub struct MqttPublisher<C> {
    client: C,
    topics: MqttTopics,
    state: LockState,
}

impl<C: MqttClient> MqttPublisher<C> {
    pub fn new(client: C, topics: MqttTopics) -> Self {
        Self {
            client,
            topics,
            state: LockState::Locked,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    fn send(&mut self, message: MqttMessage) -> Result<(), NotifyError> {
        self.client
            .publish(&message.topic, &message.payload, message.qos, message.retain)
    }

    /// Register the last will, then announce availability and the
    /// current lock state.
    pub fn connected(&mut self) -> Result<(), NotifyError> {
        self.client.set_last_will(&last_will(&self.topics))?;
        self.send(MqttMessage {
            topic: self.topics.lwt.clone(),
            payload: LWT_ONLINE.as_bytes().to_vec(),
            qos: QoS::AtLeastOnce,
            retain: true,
        })?;
        self.send(self.state_message())
    }

    /// Clean shutdown: the broker drops the will, so publish it ourselves.
    pub fn disconnected(&mut self) -> Result<(), NotifyError> {
        self.send(last_will(&self.topics))
    }

    fn state_message(&self) -> MqttMessage {
        MqttMessage {
            topic: self.topics.state.clone(),
            payload: (self.state as u8).to_string().into_bytes(),
            qos: QoS::AtLeastOnce,
            retain: true,
        }
    }

    /// Messages for `event`. A HomeKey success toggles the lock state.
    pub fn messages_for(&mut self, event: &ReaderEvent) -> Result<Vec<MqttMessage>, NotifyError> {
        match event {
            ReaderEvent::HomeKeyAuth(auth) => {
                let payload = serde_json::to_vec(&HomeKeyPayload {
                    issuer: hex(&auth.issuer_id),
                    endpoint: hex(&auth.endpoint_id),
                    reader: hex(&auth.reader_id),
                    flow: auth.flow.as_str(),
                    homekey: true,
                })?;
                self.state = match self.state {
                    LockState::Locked => LockState::Unlocked,
                    LockState::Unlocked => LockState::Locked,
                };
                Ok(vec![
                    MqttMessage {
                        topic: self.topics.auth.clone(),
                        payload,
                        qos: QoS::AtMostOnce,
                        retain: false,
                    },
                    self.state_message(),
                ])
            }
            ReaderEvent::TagTap(tag) if self.topics.publish_tag_taps => {
                let payload = serde_json::to_vec(&TagPayload {
                    uid: hex(&tag.uid),
                    atqa: hex(&tag.atqa),
                    sak: hex(&[tag.sak]),
                    homekey: false,
                })?;
                Ok(vec![MqttMessage {
                    topic: self.topics.auth.clone(),
                    payload,
                    qos: QoS::AtMostOnce,
                    retain: false,
                }])
            }
            ReaderEvent::TagTap(_) | ReaderEvent::HomeKeyFailed => Ok(Vec::new()),
        }
    }

    pub fn handle(&mut self, event: &ReaderEvent) -> Result<(), NotifyError> {
        for message in self.messages_for(event)? {
            self.send(message)?;
        }
        Ok(())
    }
}

pub async fn run_mqtt_task<C: MqttClient>(
    mut publisher: MqttPublisher<C>,
    mut rx: mpsc::Receiver<ReaderEvent>,
) {
    if let Err(e) = publisher.connected() {
        tracing::warn!(error = %e, "MQTT announce failed");
    }
    while let Some(event) = rx.recv().await {
        if let Err(e) = publisher.handle(&event) {
            tracing::warn!(error = %e, "MQTT publish failed");
        }
    }
    if let Err(e) = publisher.disconnected() {
        tracing::warn!(error = %e, "MQTT offline announce failed");
    }
    tracing::debug!("MQTT task finished");
}

/// Client that writes every publication to the log.
#[derive(Debug, Default)]
pub struct LogMqttClient;

impl MqttClient for LogMqttClient {
    fn set_last_will(&mut self, will: &MqttMessage) -> Result<(), NotifyError> {
        tracing::info!(
            topic = will.topic,
            payload = %String::from_utf8_lossy(&will.payload),
            retain = will.retain,
            "MQTT last will registered"
        );
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), NotifyError> {
        tracing::info!(
            topic,
            payload = %String::from_utf8_lossy(payload),
            qos = ?qos,
            retain,
            "MQTT publish"
        );
        Ok(())
    }
}
