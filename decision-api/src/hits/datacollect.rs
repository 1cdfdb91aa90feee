use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::metrics_consts::{
    HITS_BATCH_SIZE, HITS_DROPPED_COUNTER, HITS_FLUSH_TIME, HITS_SENT_COUNTER,
    HITS_TRACKED_COUNTER,
};

use super::models::{BatchEnvelope, TrackingHit};
use super::{HitsError, HitsProcessor, TrackingHits};

pub const DEFAULT_TRACKING_URL: &str = "https://ariane.abtasty.com";

/// Shorter windows, zero included, are raised to this.
pub const MIN_BATCHING_WINDOW: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct DataCollectOptions {
    pub tracking_url: String,
    pub batch_size: usize,
    pub batching_window: Duration,
    /// Bound on a single batch POST.
    pub timeout: Duration,
}

impl Default for DataCollectOptions {
    fn default() -> Self {
        Self {
            tracking_url: DEFAULT_TRACKING_URL.to_string(),
            batch_size: 50,
            batching_window: Duration::from_secs(30),
            timeout: Duration::from_secs(2),
        }
    }
}

struct BatchState {
    hits: Vec<TrackingHit>,
    last_flush: Instant,
    closed: bool,
}

impl BatchState {
    fn take(&mut self) -> Vec<TrackingHit> {
        self.last_flush = Instant::now();
        std::mem::take(&mut self.hits)
    }
}

#[derive(Clone)]
struct Sender {
    client: reqwest::Client,
    tracking_url: String,
}

impl Sender {
    /// Sends one batch. A failed batch is gone: there is no retry.
    async fn flush(&self, hits: Vec<TrackingHit>) -> Result<(), HitsError> {
        if hits.is_empty() {
            debug!("no hits to send");
            return Ok(());
        }

        let count = hits.len();
        histogram!(HITS_BATCH_SIZE).record(count as f64);

        let result = self.send(hits).await;
        match &result {
            Ok(()) => {
                counter!(HITS_SENT_COUNTER).increment(count as u64);
                info!(hits = count, "hits sent to datacollect");
            }
            Err(_) => counter!(HITS_DROPPED_COUNTER).increment(count as u64),
        }
        result
    }

    async fn send(&self, hits: Vec<TrackingHit>) -> Result<(), HitsError> {
        // Queue time covers everything up to the moment the batch leaves.
        let now_ms = Utc::now().timestamp_millis();
        let envelope = BatchEnvelope::new(hits.into_iter().map(|h| h.into_wire(now_ms)).collect());

        let start = Instant::now();
        let response = self
            .client
            .post(&self.tracking_url)
            .json(&envelope)
            .send()
            .await?;
        histogram!(HITS_FLUSH_TIME).record(start.elapsed().as_millis() as f64);

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(HitsError::HttpStatus(status));
        }
        Ok(())
    }
}

/// Buffers hits and POSTs them to the collector as one batch envelope, either once
/// `batch_size` hits are waiting or every `batching_window`, whichever comes first.
///
/// The buffer lock is never held during a send. Size-triggered batches go out on a detached
/// task so `track_hits` returns immediately.
pub struct DataCollectProcessor {
    sender: Sender,
    state: Arc<Mutex<BatchState>>,
    batch_size: usize,
    batching_window: Duration,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl DataCollectProcessor {
    /// Starts the batching timer, so this must run inside a Tokio runtime.
    pub fn new(options: DataCollectOptions) -> Result<Self, HitsError> {
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(concat!("decision-api/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let batching_window = options.batching_window.max(MIN_BATCHING_WINDOW);

        let processor = Self {
            sender: Sender {
                client,
                tracking_url: options.tracking_url,
            },
            state: Arc::new(Mutex::new(BatchState {
                hits: Vec::new(),
                last_flush: Instant::now(),
                closed: false,
            })),
            batch_size: options.batch_size.max(1),
            batching_window,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        };
        processor.spawn_timer(batching_window);
        info!(
            batch_size = processor.batch_size,
            ?batching_window,
            "initialized datacollect hits processor"
        );

        Ok(processor)
    }

    pub fn batching_window(&self) -> Duration {
        self.batching_window
    }

    /// Number of hits waiting for the next flush.
    pub fn pending(&self) -> usize {
        lock_state(&self.state).hits.len()
    }

    fn spawn_timer(&self, window: Duration) {
        let state = Arc::clone(&self.state);
        let sender = self.sender.clone();
        let cancel = self.cancel.clone();

        self.tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(window) => {}
                }

                // A size-triggered flush restarts the window.
                let since_flush = lock_state(&state).last_flush.elapsed();
                if since_flush < window {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(window - since_flush) => {}
                    }
                }

                let hits = lock_state(&state).take();
                if let Err(e) = sender.flush(hits).await {
                    error!(error = %e, "error when sending batch hit");
                }
            }
            debug!("hits batching timer stopped");
        });
    }
}

fn lock_state(state: &Mutex<BatchState>) -> MutexGuard<'_, BatchState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl HitsProcessor for DataCollectProcessor {
    async fn track_hits(&self, hits: TrackingHits) -> Result<(), HitsError> {
        if hits.is_empty() {
            return Ok(());
        }
        let count = hits.len();

        let full_batch = {
            let mut state = lock_state(&self.state);
            if state.closed {
                return Err(HitsError::Closed);
            }
            state.hits.extend(hits.into_hits());
            (state.hits.len() >= self.batch_size).then(|| state.take())
        };
        counter!(HITS_TRACKED_COUNTER).increment(count as u64);

        if let Some(batch) = full_batch {
            let sender = self.sender.clone();
            self.tasks.spawn(async move {
                if let Err(e) = sender.flush(batch).await {
                    error!(error = %e, "error when sending batch hit");
                }
            });
        }
        Ok(())
    }

    async fn shutdown(&self, deadline: Duration) -> Result<(), HitsError> {
        let remaining = {
            let mut state = lock_state(&self.state);
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.take()
        };
        info!(hits = remaining.len(), "shutting down hits processor");

        self.cancel.cancel();
        self.tasks.close();

        let sender = self.sender.clone();
        let tasks = self.tasks.clone();
        let drain = async move {
            let result = sender.flush(remaining).await;
            tasks.wait().await;
            result
        };

        match tokio::time::timeout(deadline, drain).await {
            Ok(result) => result,
            Err(_) => {
                warn!(?deadline, "hits processor shutdown timed out");
                Err(HitsError::ShutdownTimeout(deadline))
            }
        }
    }
}

impl Drop for DataCollectProcessor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{sample_activation, sample_context};
    use httpmock::prelude::*;

    fn processor_for(
        server: &MockServer,
        batch_size: usize,
        window: Duration,
    ) -> DataCollectProcessor {
        DataCollectProcessor::new(DataCollectOptions {
            tracking_url: server.url("/"),
            batch_size,
            batching_window: window,
            timeout: Duration::from_secs(1),
        })
        .unwrap()
    }

    fn one_of_each() -> TrackingHits {
        TrackingHits {
            campaign_activations: vec![sample_activation("visitor_id")],
            visitor_contexts: vec![sample_context("visitor_id")],
        }
    }

    async fn wait_for_hits(mock: &httpmock::Mock<'_>, expected: usize) {
        for _ in 0..100 {
            if mock.hits() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_full_batch_is_sent_immediately() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/")
                .body_contains(r#""t":"BATCH""#)
                .body_contains(r#""t":"CAMPAIGN""#)
                .body_contains(r#""caid":"campaign_id""#)
                .body_contains(r#""t":"SEGMENT""#);
            then.status(200).body("{}");
        });

        let processor = processor_for(&server, 2, Duration::from_secs(60));
        processor.track_hits(one_of_each()).await.unwrap();
        assert_eq!(processor.pending(), 0);

        wait_for_hits(&mock, 1).await;
        assert_eq!(mock.hits(), 1);
        processor.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_partial_batch_waits_for_window() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/");
            then.status(200);
        });

        let processor = processor_for(&server, 10, Duration::from_millis(300));
        processor.track_hits(one_of_each()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mock.hits(), 0);
        assert_eq!(processor.pending(), 2);

        wait_for_hits(&mock, 1).await;
        assert_eq!(mock.hits(), 1);
        assert_eq!(processor.pending(), 0);
        processor.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_size_flush_delays_timer() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/");
            then.status(200);
        });

        let processor = processor_for(&server, 2, Duration::from_millis(400));
        tokio::time::sleep(Duration::from_millis(250)).await;
        processor.track_hits(one_of_each()).await.unwrap();
        wait_for_hits(&mock, 1).await;

        processor
            .track_hits(TrackingHits {
                campaign_activations: vec![sample_activation("other_visitor")],
                ..Default::default()
            })
            .await
            .unwrap();

        // The first tick would have fired at 400ms; it waits a full window after the size flush.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(mock.hits(), 1);

        wait_for_hits(&mock, 2).await;
        assert_eq!(mock.hits(), 2);
        processor.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_flushes_remainder_once() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/");
            then.status(200);
        });

        let processor = processor_for(&server, 10, Duration::from_secs(60));
        processor.track_hits(one_of_each()).await.unwrap();

        processor.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(mock.hits(), 1);

        processor.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(mock.hits(), 1);

        let err = processor.track_hits(one_of_each()).await.unwrap_err();
        assert!(matches!(err, HitsError::Closed));
    }

    #[tokio::test]
    async fn test_shutdown_with_empty_buffer_sends_nothing() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/");
            then.status(200);
        });

        let processor = processor_for(&server, 10, Duration::from_secs(60));
        processor.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(mock.hits(), 0);
    }

    #[tokio::test]
    async fn test_delivery_errors_do_not_reach_track_hits() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/");
            then.status(500);
        });

        let processor = processor_for(&server, 2, Duration::from_secs(60));
        processor.track_hits(one_of_each()).await.unwrap();
        wait_for_hits(&mock, 1).await;
        assert_eq!(mock.hits(), 1);

        // dropped, not retried
        processor
            .track_hits(TrackingHits {
                campaign_activations: vec![sample_activation("visitor_id")],
                ..Default::default()
            })
            .await
            .unwrap();
        let err = processor.shutdown(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, HitsError::HttpStatus(_)));
        assert_eq!(mock.hits(), 2);
    }

    #[tokio::test]
    async fn test_zero_window_does_not_spin() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/");
            then.status(200).body("{}");
        });

        let processor = processor_for(&server, 10, Duration::ZERO);
        assert_eq!(processor.batching_window(), MIN_BATCHING_WINDOW);

        processor.track_hits(one_of_each()).await.unwrap();
        wait_for_hits(&mock, 1).await;
        assert_eq!(processor.pending(), 0);

        // The timer keeps running on the raised window and still delivers later hits.
        processor.track_hits(one_of_each()).await.unwrap();
        wait_for_hits(&mock, 2).await;
        assert_eq!(mock.hits(), 2);

        processor.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(mock.hits(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_deadline() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/");
            then.status(200).delay(Duration::from_millis(500));
        });

        let processor = processor_for(&server, 10, Duration::from_secs(60));
        processor.track_hits(one_of_each()).await.unwrap();

        let err = processor
            .shutdown(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, HitsError::ShutdownTimeout(_)));
    }
}
