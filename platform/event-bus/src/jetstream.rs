//! NATS JetStream implementation of the EventStream trait

use crate::{AckHandle, BusError, BusResult, EventStream, PendingEvent};
use async_nats::jetstream;
use async_nats::jetstream::consumer::{pull, PullConsumer};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// EventStream implementation on NATS JetStream
///
/// Messages are appended to a single stream subject; each consumer group maps
/// to a durable pull consumer, so unacked messages are redelivered by the
/// broker.
pub struct JetStreamEventStream {
    context: jetstream::Context,
    stream_name: String,
    subject: String,
    consumers: Mutex<HashMap<String, PullConsumer>>,
}

impl JetStreamEventStream {
    /// Connect to (or create) the named stream
    ///
    /// # Arguments
    /// * `client` - An already-connected `async_nats::Client`
    /// * `stream_name` - JetStream stream name (e.g. "PAYMENTS_EVENTS")
    /// * `subject` - The subject events are appended under
    pub async fn new(
        client: async_nats::Client,
        stream_name: &str,
        subject: &str,
    ) -> BusResult<Self> {
        let context = jetstream::new(client);
        context
            .get_or_create_stream(jetstream::stream::Config {
                name: stream_name.to_string(),
                subjects: vec![subject.to_string()],
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;

        Ok(Self {
            context,
            stream_name: stream_name.to_string(),
            subject: subject.to_string(),
            consumers: Mutex::new(HashMap::new()),
        })
    }

    async fn consumer_for(&self, group: &str) -> BusResult<PullConsumer> {
        let mut consumers = self.consumers.lock().await;
        if let Some(consumer) = consumers.get(group) {
            return Ok(consumer.clone());
        }

        let stream = self
            .context
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;

        let consumer = stream
            .get_or_create_consumer(
                group,
                pull::Config {
                    durable_name: Some(group.to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;

        tracing::debug!(
            group = %group,
            stream = %self.stream_name,
            "durable pull consumer ready"
        );
        consumers.insert(group.to_string(), consumer.clone());
        Ok(consumer)
    }
}

#[async_trait]
impl EventStream for JetStreamEventStream {
    async fn append(&self, payload: Vec<u8>) -> BusResult<String> {
        let ack = self
            .context
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| BusError::AppendError(e.to_string()))?
            .await
            .map_err(|e| BusError::AppendError(e.to_string()))?;

        Ok(ack.sequence.to_string())
    }

    async fn fetch(
        &self,
        group: &str,
        batch: usize,
        block: Duration,
    ) -> BusResult<Vec<PendingEvent>> {
        let consumer = self.consumer_for(group).await?;

        let mut messages = consumer
            .fetch()
            .max_messages(batch)
            .expires(block)
            .messages()
            .await
            .map_err(|e| BusError::FetchError(e.to_string()))?;

        let mut events = Vec::new();
        while let Some(message) = messages.next().await {
            let message = message.map_err(|e| BusError::FetchError(e.to_string()))?;
            let stream_id = message
                .info()
                .map(|info| info.stream_sequence.to_string())
                .unwrap_or_default();
            let payload = message.payload.to_vec();
            events.push(PendingEvent::new(
                stream_id,
                payload,
                Box::new(JetStreamAck { message }),
            ));
        }

        Ok(events)
    }
}

struct JetStreamAck {
    message: jetstream::Message,
}

#[async_trait]
impl AckHandle for JetStreamAck {
    async fn ack(self: Box<Self>) -> BusResult<()> {
        self.message
            .ack()
            .await
            .map_err(|e| BusError::AckError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Requires a running NATS server with JetStream enabled.
    // For manual testing: docker run -p 4222:4222 nats:2.10-alpine -js

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn append_fetch_ack_round_trip() {
        let client = async_nats::connect("nats://localhost:4222")
            .await
            .expect("NATS server must be running on localhost:4222");

        let stream = JetStreamEventStream::new(client, "TEST_EVENTS", "test.events")
            .await
            .unwrap();

        let id = stream.append(b"hello".to_vec()).await.unwrap();
        assert!(!id.is_empty());

        let events = stream
            .fetch("test-group", 10, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(!events.is_empty());
        for event in events {
            event.ack().await.unwrap();
        }
    }
}
