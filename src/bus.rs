//! In-process keyed topics
//!
//! Each logical topic is a bounded mpsc channel carrying `Envelope`s. The
//! envelope key is the routing key of the topic (the `calculationId` for the
//! coverage topics, a message id for telemetry).

use futures::FutureExt;
use std::future::Future;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    pub key: String,
    pub payload: T,
}

#[derive(Debug, thiserror::Error)]
#[error("topic '{topic}' is closed")]
pub struct TopicClosed {
    pub topic: String,
}

/// Publishing half of a topic
#[derive(Debug)]
pub struct Topic<T> {
    name: String,
    tx: mpsc::Sender<Envelope<T>>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<T> Topic<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish a keyed message, waiting for capacity
    pub async fn publish(&self, key: impl Into<String>, payload: T) -> Result<(), TopicClosed> {
        self.tx
            .send(Envelope {
                key: key.into(),
                payload,
            })
            .await
            .map_err(|_| TopicClosed {
                topic: self.name.clone(),
            })
    }
}

/// Consuming half of a topic
#[derive(Debug)]
pub struct Subscription<T> {
    name: String,
    rx: mpsc::Receiver<Envelope<T>>,
}

impl<T> Subscription<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next message, or `None` once every publisher is gone
    pub async fn recv(&mut self) -> Option<Envelope<T>> {
        self.rx.recv().await
    }
}

/// Create a bounded topic
pub fn topic<T>(name: impl Into<String>, capacity: usize) -> (Topic<T>, Subscription<T>) {
    let name = name.into();
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        Topic {
            name: name.clone(),
            tx,
        },
        Subscription { name, rx },
    )
}

/// Spawn a long-running worker, logging if it exits or panics
pub fn spawn_supervised<F>(worker: &'static str, fut: F) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let result = std::panic::AssertUnwindSafe(fut).catch_unwind().await;
        match result {
            Ok(()) => tracing::info!(worker = worker, "Worker stopped"),
            Err(e) => tracing::error!(worker = worker, panic = ?e, "Worker panicked"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive_keyed_message() {
        let (topic, mut sub) = topic::<String>("coverage.request", 4);
        topic.publish("calc-1", "payload".to_string()).await.unwrap();

        let envelope = sub.recv().await.unwrap();
        assert_eq!(envelope.key, "calc-1");
        assert_eq!(envelope.payload, "payload");
        assert_eq!(sub.name(), "coverage.request");
    }

    #[tokio::test]
    async fn test_publish_fails_when_subscription_dropped() {
        let (topic, sub) = topic::<u32>("coverage.response", 1);
        drop(sub);

        let err = topic.publish("k", 1).await.unwrap_err();
        assert_eq!(err.topic, "coverage.response");
    }

    #[tokio::test]
    async fn test_recv_ends_when_publishers_dropped() {
        let (topic, mut sub) = topic::<u32>("telemetry.outbound", 1);
        drop(topic);
        assert!(sub.recv().await.is_none());
    }
}
