//! Backend event bus
//!
//! Events arrive unordered and at-least-once on named topics. Payloads are
//! decoded into [`BackendEvent`] at the edge; anything malformed is logged and
//! dropped before it reaches a store.

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::ClientError;
use crate::sync::SyncStatus;
use crate::types::{de, Chain};
use crate::Result;

pub const TOPIC_BTC_SYNC: &str = "btc_sync";
pub const TOPIC_BTC_SYNC_PROGRESS: &str = "btc_sync_progress";
pub const TOPIC_BTC_SYNC_WARNING: &str = "btc_sync_warning";
pub const TOPIC_BTC_SYNC_NEW_UTXO: &str = "btc_sync_new_utxo";
pub const TOPIC_SESSION_EXPIRED: &str = "session_expired";

/// Height status as sent on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum HeightStatus {
    #[serde(rename = "in progress", alias = "syncing")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl From<HeightStatus> for SyncStatus {
    fn from(status: HeightStatus) -> Self {
        match status {
            HeightStatus::InProgress => SyncStatus::Syncing,
            HeightStatus::Completed => SyncStatus::Completed,
            HeightStatus::Failed => SyncStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    HeightUpdate {
        chain: Chain,
        height: u64,
        status: SyncStatus,
    },
    ProgressUpdate {
        chain: Chain,
        progress: f32,
    },
    Warning {
        chain: Chain,
        msg: String,
    },
    /// `total` replaces the chain balance, `value` is the new output alone
    NewUtxo {
        chain: Chain,
        total: u128,
        value: u128,
    },
    SessionExpired,
}

#[derive(Deserialize)]
struct HeightPayload {
    #[serde(deserialize_with = "de::string_or_number")]
    height: String,
    status: HeightStatus,
}

#[derive(Deserialize)]
struct ProgressPayload {
    progress: f32,
}

#[derive(Deserialize)]
struct WarningPayload {
    msg: String,
}

#[derive(Deserialize)]
struct NewUtxoPayload {
    #[serde(deserialize_with = "de::string_or_number")]
    total: String,
    #[serde(deserialize_with = "de::string_or_number")]
    value: String,
}

impl BackendEvent {
    /// Decode a raw `(topic, payload)` pair
    pub fn from_wire(topic: &str, payload: Value) -> Result<Self> {
        let malformed = |reason: String| ClientError::malformed_event(topic, reason);

        match topic {
            TOPIC_BTC_SYNC => {
                let p: HeightPayload =
                    serde_json::from_value(payload).map_err(|e| malformed(e.to_string()))?;
                let height = p.height.parse::<u64>().map_err(|_| {
                    malformed(format!("height '{}' is not a block number", p.height))
                })?;
                Ok(Self::HeightUpdate {
                    chain: Chain::Bitcoin,
                    height,
                    status: p.status.into(),
                })
            }
            TOPIC_BTC_SYNC_PROGRESS => {
                let p: ProgressPayload =
                    serde_json::from_value(payload).map_err(|e| malformed(e.to_string()))?;
                if !p.progress.is_finite() || !(0.0..=100.0).contains(&p.progress) {
                    return Err(malformed(format!("progress {} out of range", p.progress)));
                }
                Ok(Self::ProgressUpdate {
                    chain: Chain::Bitcoin,
                    progress: p.progress,
                })
            }
            TOPIC_BTC_SYNC_WARNING => {
                let p: WarningPayload =
                    serde_json::from_value(payload).map_err(|e| malformed(e.to_string()))?;
                Ok(Self::Warning {
                    chain: Chain::Bitcoin,
                    msg: p.msg,
                })
            }
            TOPIC_BTC_SYNC_NEW_UTXO => {
                let p: NewUtxoPayload =
                    serde_json::from_value(payload).map_err(|e| malformed(e.to_string()))?;
                let parse = |field: &str, raw: &str| {
                    raw.parse::<u128>()
                        .map_err(|_| malformed(format!("{} '{}' is not an integer", field, raw)))
                };
                Ok(Self::NewUtxo {
                    chain: Chain::Bitcoin,
                    total: parse("total", &p.total)?,
                    value: parse("value", &p.value)?,
                })
            }
            TOPIC_SESSION_EXPIRED => Ok(Self::SessionExpired),
            other => Err(ClientError::malformed_event(other, "unknown topic")),
        }
    }

    pub fn chain(&self) -> Option<Chain> {
        match self {
            Self::HeightUpdate { chain, .. }
            | Self::ProgressUpdate { chain, .. }
            | Self::Warning { chain, .. }
            | Self::NewUtxo { chain, .. } => Some(*chain),
            Self::SessionExpired => None,
        }
    }
}

/// Fan-out channel from the backend to every subscribed store
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BackendEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns the number of listeners that will see the event
    pub fn publish(&self, event: BackendEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Decode and publish a raw backend event; malformed payloads are dropped
    pub fn publish_wire(&self, topic: &str, payload: Value) -> Result<usize> {
        match BackendEvent::from_wire(topic, payload) {
            Ok(event) => Ok(self.publish(event)),
            Err(e) => {
                log::warn!("Dropping backend event: {}", e);
                Err(e)
            }
        }
    }

    pub fn raw_subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Run `handler` for every event until the returned handle is dropped.
    ///
    /// Handler errors are logged; the listener stays subscribed.
    pub fn subscribe<F>(&self, name: &str, mut handler: F) -> Subscription
    where
        F: FnMut(&BackendEvent) -> Result<()> + Send + 'static,
    {
        let mut receiver = self.sender.subscribe();
        let listener = name.to_string();

        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if let Err(e) = handler(&event) {
                            log::warn!("[{}] handler failed on {:?}: {}", listener, event, e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("[{}] lagged, {} events skipped", listener, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        log::debug!("[{}] event bus closed", listener);
                        break;
                    }
                }
            }
        });

        log::debug!("Subscribed '{}' to backend events", name);
        Subscription {
            name: name.to_string(),
            handle: Some(handle),
        }
    }
}

/// Listener handle; dropping it unsubscribes
pub struct Subscription {
    name: String,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn unsubscribe(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            log::debug!("Unsubscribed '{}'", self.name);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn test_decode_height_update() {
        let event = BackendEvent::from_wire(
            TOPIC_BTC_SYNC,
            json!({ "height": 840000, "status": "in progress" }),
        )
        .unwrap();
        assert_eq!(
            event,
            BackendEvent::HeightUpdate {
                chain: Chain::Bitcoin,
                height: 840_000,
                status: SyncStatus::Syncing
            }
        );

        let event = BackendEvent::from_wire(
            TOPIC_BTC_SYNC,
            json!({ "height": "840001", "status": "completed" }),
        )
        .unwrap();
        assert!(matches!(
            event,
            BackendEvent::HeightUpdate { height: 840_001, status: SyncStatus::Completed, .. }
        ));
    }

    #[test]
    fn test_decode_rejects_bad_progress() {
        let decode = |payload| BackendEvent::from_wire(TOPIC_BTC_SYNC_PROGRESS, payload);
        assert!(decode(json!({ "progress": 101.0 })).is_err());
        assert!(decode(json!({ "progress": -1 })).is_err());
        assert!(decode(json!({})).is_err());
        assert!(decode(json!({ "progress": 42.5 })).is_ok());
    }

    #[test]
    fn test_decode_new_utxo_and_unknown_topic() {
        let event = BackendEvent::from_wire(
            TOPIC_BTC_SYNC_NEW_UTXO,
            json!({ "total": "150000", "value": 50000 }),
        )
        .unwrap();
        assert_eq!(
            event,
            BackendEvent::NewUtxo { chain: Chain::Bitcoin, total: 150_000, value: 50_000 }
        );

        let err = BackendEvent::from_wire("eth_magic", json!({})).unwrap_err();
        assert!(matches!(err, ClientError::MalformedEvent { .. }));
        assert_eq!(
            BackendEvent::from_wire(TOPIC_SESSION_EXPIRED, Value::Null).unwrap(),
            BackendEvent::SessionExpired
        );
    }

    #[tokio::test]
    async fn test_failing_handler_stays_subscribed() {
        let bus = EventBus::new(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_handler = seen.clone();

        let sub = bus.subscribe("test", move |event| {
            seen_in_handler.lock().unwrap().push(event.clone());
            Err(ClientError::validation("handler refuses everything"))
        });

        bus.publish(BackendEvent::SessionExpired);
        bus.publish(BackendEvent::Warning { chain: Chain::Bitcoin, msg: "slow peer".into() });

        for _ in 0..50 {
            if seen.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert!(sub.is_active());
    }

    #[tokio::test]
    async fn test_malformed_wire_event_is_dropped() {
        let bus = EventBus::new(16);
        let mut rx = bus.raw_subscribe();
        assert!(bus.publish_wire(TOPIC_BTC_SYNC, json!({ "height": "tall" })).is_err());
        assert_eq!(bus.publish_wire(TOPIC_BTC_SYNC_WARNING, json!({ "msg": "x" })).unwrap(), 1);
        assert!(matches!(rx.recv().await.unwrap(), BackendEvent::Warning { .. }));
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_receiver() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe("short-lived", |_| Ok(()));
        assert_eq!(bus.listener_count(), 1);
        sub.unsubscribe();
        for _ in 0..50 {
            if bus.listener_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(bus.listener_count(), 0);
    }
}
