//! In-memory implementation of the EventStream trait for testing and development

use crate::{AckHandle, BusResult, EventStream, PendingEvent};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// EventStream implementation backed by an in-process log
///
/// This implementation is suitable for:
/// - Unit tests (no external dependencies)
/// - Local development without Docker
/// - Integration tests that need fast, isolated streams
///
/// Each consumer group tracks a read cursor into the shared log plus the set
/// of delivered-but-unacked entries. Unacked entries are redelivered on the
/// group's next fetch, which gives the same at-least-once behavior as the
/// JetStream implementation.
#[derive(Clone)]
pub struct InMemoryStream {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

struct Inner {
    log: Vec<Arc<Vec<u8>>>,
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct GroupState {
    /// Index of the next log entry this group has not yet seen
    cursor: usize,
    /// Delivered but not yet acknowledged (log indices)
    pending: HashSet<usize>,
}

impl InMemoryStream {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                log: Vec::new(),
                groups: HashMap::new(),
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Number of entries appended so far (test helper)
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_batch(&self, group: &str, batch: usize) -> Vec<PendingEvent> {
        let mut inner = self.inner.lock().unwrap();
        let log_len = inner.log.len();
        let state = inner.groups.entry(group.to_string()).or_default();

        let mut indices: Vec<usize> = state.pending.iter().copied().collect();
        indices.sort_unstable();
        while indices.len() < batch && state.cursor < log_len {
            let idx = state.cursor;
            state.cursor += 1;
            state.pending.insert(idx);
            indices.push(idx);
        }
        indices.truncate(batch);

        let group = group.to_string();
        indices
            .into_iter()
            .map(|idx| {
                let payload = inner.log[idx].as_ref().clone();
                PendingEvent::new(
                    (idx as u64 + 1).to_string(),
                    payload,
                    Box::new(InMemoryAck {
                        inner: self.inner.clone(),
                        group: group.clone(),
                        index: idx,
                    }),
                )
            })
            .collect()
    }
}

impl Default for InMemoryStream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStream for InMemoryStream {
    async fn append(&self, payload: Vec<u8>) -> BusResult<String> {
        let id = {
            let mut inner = self.inner.lock().unwrap();
            inner.log.push(Arc::new(payload));
            inner.log.len() as u64
        };
        self.notify.notify_waiters();
        Ok(id.to_string())
    }

    async fn fetch(
        &self,
        group: &str,
        batch: usize,
        block: Duration,
    ) -> BusResult<Vec<PendingEvent>> {
        let events = self.take_batch(group, batch);
        if !events.is_empty() || block.is_zero() {
            return Ok(events);
        }

        // Nothing available: wait for an append, up to the block timeout
        let notified = self.notify.notified();
        let _ = tokio::time::timeout(block, notified).await;
        Ok(self.take_batch(group, batch))
    }
}

struct InMemoryAck {
    inner: Arc<Mutex<Inner>>,
    group: String,
    index: usize,
}

#[async_trait]
impl AckHandle for InMemoryAck {
    async fn ack(self: Box<Self>) -> BusResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(state) = inner.groups.get_mut(&self.group) {
            state.pending.remove(&self.index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_returns_appended_messages_in_order() {
        let stream = InMemoryStream::new();
        for i in 0..3 {
            stream.append(format!("m{i}").into_bytes()).await.unwrap();
        }

        let events = stream
            .fetch("g1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].payload, b"m0");
        assert_eq!(events[2].payload, b"m2");
        assert_eq!(events[0].stream_id, "1");
    }

    #[tokio::test]
    async fn unacked_messages_are_redelivered() {
        let stream = InMemoryStream::new();
        stream.append(b"only".to_vec()).await.unwrap();

        let first = stream.fetch("g1", 10, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);
        drop(first); // not acked

        let second = stream.fetch("g1", 10, Duration::ZERO).await.unwrap();
        assert_eq!(second.len(), 1, "unacked message must be redelivered");

        for ev in second {
            ev.ack().await.unwrap();
        }
        let third = stream.fetch("g1", 10, Duration::ZERO).await.unwrap();
        assert!(third.is_empty(), "acked message must not be redelivered");
    }

    #[tokio::test]
    async fn groups_consume_independently() {
        let stream = InMemoryStream::new();
        stream.append(b"x".to_vec()).await.unwrap();

        let a = stream.fetch("group-a", 10, Duration::ZERO).await.unwrap();
        let b = stream.fetch("group-b", 10, Duration::ZERO).await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[tokio::test]
    async fn fetch_blocks_until_append() {
        let stream = InMemoryStream::new();
        let consumer = stream.clone();

        let handle = tokio::spawn(async move {
            consumer
                .fetch("g1", 10, Duration::from_secs(2))
                .await
                .unwrap()
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        stream.append(b"late".to_vec()).await.unwrap();

        let events = handle.await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload, b"late");
    }

    #[tokio::test]
    async fn batch_size_is_respected() {
        let stream = InMemoryStream::new();
        for i in 0..5 {
            stream.append(vec![i]).await.unwrap();
        }

        let events = stream.fetch("g1", 2, Duration::ZERO).await.unwrap();
        assert_eq!(events.len(), 2);
    }
}
