//! One open topic: its push connector, polling task and staleness entry.

use markfeed_core::{ConnectionState, Topic};
use markfeed_feed::StalenessMonitor;
use markfeed_poll::PollingFallback;
use markfeed_telemetry::Metrics;
use markfeed_ws::FeedConnectorHandle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct TopicSession {
    topic: Topic,
    connector: FeedConnectorHandle,
    connector_task: Option<JoinHandle<()>>,
    token: CancellationToken,
    closed: bool,
}

impl TopicSession {
    pub fn new(
        topic: Topic,
        connector: FeedConnectorHandle,
        connector_task: JoinHandle<()>,
        token: CancellationToken,
    ) -> Self {
        Self {
            topic,
            connector,
            connector_task: Some(connector_task),
            token,
            closed: false,
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn connector(&self) -> &FeedConnectorHandle {
        &self.connector
    }

    pub fn state(&self) -> ConnectionState {
        self.connector.state()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Tear the topic down:
    /// 1. close the push connection
    /// 2. cancel the poll timer
    /// 3. abort any in-flight fetch
    /// 4. stop staleness tracking
    ///
    /// Safe to call more than once; only the first call does anything.
    pub fn close(&mut self, poller: &PollingFallback, monitor: &mut StalenessMonitor) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;

        self.connector.shutdown();
        self.token.cancel();
        // stop() cancels the timer and drops the in-flight request.
        poller.stop(&self.topic);
        monitor.untrack(&self.topic);

        Metrics::connection_closed(&self.topic.to_string());
        info!(topic = %self.topic, "Topic closed");
        true
    }

    /// Wait for the connector task to finish after `close`.
    pub async fn join(&mut self) {
        if let Some(task) = self.connector_task.take() {
            let _ = task.await;
        }
    }
}
