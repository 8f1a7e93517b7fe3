//! The Subscriber Hub (`SPEC_FULL.md` §4.7): the Stage B fan-out layer.
//! Stage A's line stream is driven directly by the Loop Driver and never
//! touches this module; Stage B's SSE subscribers attach here by `stepId`
//! and receive every event published for that step from the moment they
//! subscribe onward.
//!
//! Built on [`tokio::sync::broadcast`], whose bounded ring buffer already
//! implements backlog-drop-oldest: a receiver that falls behind gets
//! `RecvError::Lagged(n)` on its next read. This module turns that into an
//! explicit, Stage-B-only [`HubMessage::Lag`] marker and logs it at `warn`
//! (`SPEC_FULL.md` §9 open question resolution).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::HubConfig;
use crate::types::Event;

const CHANNEL_CAPACITY: usize = 256;

/// One item delivered to a Stage B subscriber.
#[derive(Debug, Clone)]
pub enum HubMessage {
    /// A published orchestration event.
    Event(Event),
    /// Idle-connection keepalive.
    Heartbeat,
    /// The subscriber fell behind and `dropped` events were discarded from
    /// the backlog. Never sent on Stage A.
    Lag {
        /// Number of events silently dropped.
        dropped: u64,
    },
}

struct ChannelEntry {
    sender: broadcast::Sender<HubMessage>,
    last_touched: Instant,
}

/// Per-stepId broadcast fan-out with idle eviction.
pub struct SubscriberHub {
    channels: Mutex<HashMap<String, ChannelEntry>>,
    config: HubConfig,
}

impl SubscriberHub {
    /// Build a hub using the given timing configuration.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            config,
        }
    }

    async fn entry(&self, step_id: &str) -> broadcast::Sender<HubMessage> {
        let mut channels = self.channels.lock().await;
        if let Some(entry) = channels.get_mut(step_id) {
            entry.last_touched = Instant::now();
            return entry.sender.clone();
        }
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        channels.insert(
            step_id.to_string(),
            ChannelEntry {
                sender: sender.clone(),
                last_touched: Instant::now(),
            },
        );
        sender
    }

    /// Publish an event to every current subscriber of `step_id`. Never
    /// blocks; if nobody is subscribed the event is simply dropped.
    pub async fn publish(&self, step_id: &str, event: Event) {
        let sender = self.entry(step_id).await;
        let _ = sender.send(HubMessage::Event(event));
    }

    /// Subscribe to `step_id`'s events from this moment onward. The
    /// returned stream translates lagged receivers into
    /// [`HubMessage::Lag`] and ends when the channel is closed.
    pub async fn subscribe(&self, step_id: &str) -> BoxStream<'static, HubMessage> {
        let sender = self.entry(step_id).await;
        let mut receiver = sender.subscribe();
        let step_id = step_id.to_string();

        stream! {
            loop {
                match receiver.recv().await {
                    Ok(message) => yield message,
                    Err(broadcast::error::RecvError::Lagged(dropped)) => {
                        warn!(step_id = %step_id, dropped, "subscriber lagged, backlog dropped");
                        yield HubMessage::Lag { dropped };
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
        .boxed()
    }

    /// Mark a step's channel complete, dropping it immediately rather than
    /// waiting for the janitor.
    pub async fn complete(&self, step_id: &str) {
        let mut channels = self.channels.lock().await;
        channels.remove(step_id);
    }

    /// Send a heartbeat to every currently-registered channel.
    pub async fn heartbeat_all(&self) {
        let channels = self.channels.lock().await;
        for entry in channels.values() {
            let _ = entry.sender.send(HubMessage::Heartbeat);
        }
    }

    /// Evict channels idle longer than the configured step TTL.
    pub async fn evict_expired(&self) -> Vec<String> {
        let mut channels = self.channels.lock().await;
        let ttl = self.config.step_ttl();
        let now = Instant::now();
        let expired: Vec<String> = channels
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_touched) > ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            channels.remove(key);
        }
        expired
    }
}

/// Spawn the hub's background heartbeat + janitor loop. Dropping the
/// returned handle does not stop the task; call `.abort()` on shutdown.
pub fn spawn_background_tasks(hub: Arc<SubscriberHub>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(hub.config.heartbeat_every());
        let mut janitor = tokio::time::interval(hub.config.janitor_every());
        loop {
            tokio::select! {
                _ = heartbeat.tick() => hub.heartbeat_all().await,
                _ = janitor.tick() => {
                    let evicted = hub.evict_expired().await;
                    if !evicted.is_empty() {
                        tracing::debug!(count = evicted.len(), "hub janitor evicted idle step channels");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{FinishedData, StartedData};
    use std::time::Duration;

    fn started() -> Event {
        Event::Started {
            ts: "2026-01-01T00:00:00Z".to_string(),
            data: StartedData { step_id: "s1".to_string(), loop_count: 0 },
        }
    }

    #[tokio::test]
    async fn publish_then_subscribe_ordering() {
        let hub = SubscriberHub::new(HubConfig::default());
        let mut stream = hub.subscribe("s1").await;
        hub.publish("s1", started()).await;
        let first = tokio::time::timeout(Duration::from_secs(1), stream.next()).await.unwrap();
        assert!(matches!(first, Some(HubMessage::Event(Event::Started { .. }))));
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_error() {
        let hub = SubscriberHub::new(HubConfig::default());
        hub.publish("s1", started()).await;
    }

    #[tokio::test]
    async fn lagging_subscriber_receives_a_lag_marker() {
        let hub = SubscriberHub::new(HubConfig::default());
        let mut stream = hub.subscribe("s1").await;
        for _ in 0..(CHANNEL_CAPACITY + 10) {
            hub.publish(
                "s1",
                Event::Finished {
                    ts: "t".to_string(),
                    data: FinishedData { step_id: "s1".to_string(), loop_count: 0 },
                },
            )
            .await;
        }
        let next = tokio::time::timeout(Duration::from_secs(1), stream.next()).await.unwrap();
        assert!(matches!(next, Some(HubMessage::Lag { .. })));
    }

    #[tokio::test]
    async fn complete_drops_the_channel() {
        let hub = SubscriberHub::new(HubConfig::default());
        let _stream = hub.subscribe("s1").await;
        hub.complete("s1").await;
        let channels = hub.channels.lock().await;
        assert!(!channels.contains_key("s1"));
    }

    #[tokio::test]
    async fn evict_expired_removes_nothing_within_ttl() {
        let hub = SubscriberHub::new(HubConfig::default());
        let _stream = hub.subscribe("s1").await;
        let evicted = hub.evict_expired().await;
        assert!(evicted.is_empty());
    }
}
