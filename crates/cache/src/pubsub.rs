//! The shared pub/sub channel (spec.md §4.7): every published message is an
//! [`Envelope`], fanned out to every subscriber. Room/user filtering is the
//! listener's job, not the channel's — this is a dumb broadcast.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::CacheError;
use crate::Publisher;

/// Message envelope published on the shared channel (spec.md §4.7, §6).
/// `action`/`user`/`room`/`job` are mandatory; `status` only accompanies
/// `action: query` messages. Everything else the callback layer attaches
/// (result map, projected totals, done batches, ...) rides in `payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub action: String,
    pub user: String,
    pub room: String,
    pub job: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(action: impl Into<String>, user: impl Into<String>, room: impl Into<String>, job: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            user: user.into(),
            room: room.into(),
            job: job.into(),
            status: None,
            payload: serde_json::json!({}),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Broadcast-backed implementation of the shared channel, generalising the
/// teacher's per-job `broadcast::Sender<JobProgress>` fan-out to the full
/// envelope shape and a single process-wide channel.
pub struct LocalChannel {
    tx: broadcast::Sender<Envelope>,
}

impl LocalChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

impl Default for LocalChannel {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Publisher for LocalChannel {
    async fn publish(&self, envelope: Envelope) -> Result<(), CacheError> {
        // No subscribers is fine (mirrors the teacher's `let _ = tx.send(..)`);
        // only report a channel as closed if the sender itself is dead,
        // which `send` can't distinguish from zero-receivers, so we treat
        // every send as best-effort.
        let _ = self.tx.send(envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_envelopes_reach_every_subscriber() {
        let channel = LocalChannel::new(16);
        let mut a = channel.subscribe();
        let mut b = channel.subscribe();

        channel
            .publish(Envelope::new("query", "u1", "room1", "job1").with_status("partial"))
            .await
            .unwrap();

        let got_a = a.recv().await.unwrap();
        let got_b = b.recv().await.unwrap();
        assert_eq!(got_a.job, "job1");
        assert_eq!(got_b.status.as_deref(), Some("partial"));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_error() {
        let channel = LocalChannel::new(4);
        let result = channel.publish(Envelope::new("meta", "u1", "room1", "job1")).await;
        assert!(result.is_ok());
    }

    #[test]
    fn envelope_serializes_payload_flattened() {
        let envelope = Envelope::new("query", "u1", "room1", "job1")
            .with_status("finished")
            .with_payload(serde_json::json!({"result_map": {"0": []}}));
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["action"], "query");
        assert_eq!(json["status"], "finished");
        assert_eq!(json["result_map"]["0"], serde_json::json!([]));
    }
}
