//! Analytics hits: buffered off the request path and delivered to the collector in batches.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod datacollect;
pub mod mock;
pub mod models;

pub use datacollect::{DataCollectOptions, DataCollectProcessor};
pub use mock::MockHitsProcessor;
pub use models::{CampaignActivation, TrackingHit, VisitorContext};

#[derive(Error, Debug)]
pub enum HitsError {
    #[error("failed to send hits: {0}")]
    Http(#[from] reqwest::Error),
    #[error("got status {0} when sending hits")]
    HttpStatus(reqwest::StatusCode),
    #[error("hits processor is shut down")]
    Closed,
    #[error("shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackingHits {
    pub campaign_activations: Vec<CampaignActivation>,
    pub visitor_contexts: Vec<VisitorContext>,
}

impl TrackingHits {
    pub fn len(&self) -> usize {
        self.campaign_activations.len() + self.visitor_contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Activations first, then contexts, each in the order given.
    pub fn into_hits(self) -> impl Iterator<Item = TrackingHit> {
        self.campaign_activations
            .into_iter()
            .map(TrackingHit::CampaignActivation)
            .chain(
                self.visitor_contexts
                    .into_iter()
                    .map(TrackingHit::VisitorContext),
            )
    }
}

#[async_trait]
pub trait HitsProcessor: Send + Sync {
    /// Hands hits over for delivery. Never waits on the network; delivery failures are logged,
    /// not returned.
    async fn track_hits(&self, hits: TrackingHits) -> Result<(), HitsError>;

    /// Delivers whatever is still buffered, giving up after `deadline`.
    async fn shutdown(&self, deadline: Duration) -> Result<(), HitsError>;
}
