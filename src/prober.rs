use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Result, ScrapeError};
use crate::gateway::FetchGateway;

pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_PROBE_CONCURRENCY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// HEAD request, status below 400 means the image exists.
    HeadValidate,
    /// Full GET bounded by the load timeout; needs a non-empty body.
    LoadTest,
}

impl ProbeMode {
    pub fn from_validate_flag(validate_images: bool) -> Self {
        if validate_images {
            ProbeMode::HeadValidate
        } else {
            ProbeMode::LoadTest
        }
    }
}

/// A candidate that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeHit {
    pub url: String,
    pub content_length: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Confirmations handed to the callback, in candidate order.
    pub confirmed: usize,
    /// The candidate whose failure ended the batch.
    pub first_failure: Option<String>,
}

impl BatchOutcome {
    /// Candidates whose result was consumed: every confirmation plus the failure.
    pub fn checked(&self) -> usize {
        self.confirmed + usize::from(self.first_failure.is_some())
    }
}

pub struct ImageProber {
    gateway: Arc<FetchGateway>,
    mode: ProbeMode,
    load_timeout: Duration,
    concurrency: usize,
}

impl ImageProber {
    pub fn new(gateway: Arc<FetchGateway>, mode: ProbeMode) -> Self {
        Self {
            gateway,
            mode,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            concurrency: DEFAULT_PROBE_CONCURRENCY,
        }
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// `Ok(None)` when the image does not exist. Only cancellation is an error.
    pub async fn validate(&self, url: &str, cancel: &CancellationToken) -> Result<Option<ProbeHit>> {
        match self.mode {
            ProbeMode::HeadValidate => {
                let response = self.gateway.head(url, cancel).await?;
                Ok(response.is_ok().then(|| ProbeHit {
                    url: url.to_string(),
                    content_length: response.content_length,
                }))
            }
            ProbeMode::LoadTest => {
                let response = match tokio::time::timeout(self.load_timeout, self.gateway.get(url, cancel)).await {
                    Ok(response) => response?,
                    Err(_) => {
                        debug!("[PROBER] load test timed out for {}", url);
                        return Ok(None);
                    }
                };
                let loaded = response.is_ok() && !response.body.is_empty();
                Ok(loaded.then(|| ProbeHit {
                    url: url.to_string(),
                    content_length: response
                        .content_length
                        .or(Some(response.body.len() as u64)),
                }))
            }
        }
    }

    /// Validates `candidates` with bounded parallelism and consumes results
    /// strictly in order. The first failure ends the batch: nothing after it
    /// is reported, and still-running validations are dropped.
    pub async fn probe_batch<F>(
        &self,
        candidates: &[String],
        cancel: &CancellationToken,
        mut on_confirmed: F,
    ) -> Result<BatchOutcome>
    where
        F: FnMut(ProbeHit),
    {
        if cancel.is_cancelled() {
            return Err(ScrapeError::Cancelled);
        }

        let mut results = stream::iter(candidates.iter().cloned())
            .map(|url| async move {
                let result = self.validate(&url, cancel).await;
                (url, result)
            })
            .buffered(self.concurrency);

        let mut outcome = BatchOutcome::default();
        while let Some((url, result)) = results.next().await {
            match result? {
                Some(hit) => {
                    if cancel.is_cancelled() {
                        return Err(ScrapeError::Cancelled);
                    }
                    outcome.confirmed += 1;
                    on_confirmed(hit);
                }
                None => {
                    debug!("[PROBER] {} missing, ending batch after {} hit(s)", url, outcome.confirmed);
                    outcome.first_failure = Some(url);
                    break;
                }
            }
        }

        Ok(outcome)
    }
}

/// Counts consecutive batches without a confirmation.
#[derive(Debug, Clone)]
pub struct MissTracker {
    threshold: u32,
    misses: u32,
}

impl MissTracker {
    pub const MIN_THRESHOLD: u32 = 1;
    pub const MAX_THRESHOLD: u32 = 3;

    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.clamp(Self::MIN_THRESHOLD, Self::MAX_THRESHOLD),
            misses: 0,
        }
    }

    /// Records one batch and returns `true` once scanning should stop.
    pub fn record(&mut self, confirmed: usize) -> bool {
        if confirmed > 0 {
            self.misses = 0;
        } else {
            self.misses += 1;
            info!("[PROBER] miss {}/{}", self.misses, self.threshold);
        }
        self.exhausted()
    }

    pub fn exhausted(&self) -> bool {
        self.misses >= self.threshold
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}
