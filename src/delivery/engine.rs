//! Delivery engine

use super::tracker::CompletionTracker;
use super::types::{DeliveryOutcome, StreamDeliveryStats};
use crate::batch::{record_size, Batch};
use crate::config::{DeliveryLimits, LoadConfig};
use crate::destination::{destination_client_config, BulkUpdateResponse, Endpoint};
use crate::error::{Error, Result};
use crate::http::{HttpClient, RateLimiterConfig};
use crate::types::{key_string, JsonObject, JsonValue};
use futures::FutureExt;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Result of one bulk-update request
#[derive(Debug)]
struct RequestOutcome {
    index: usize,
    records: u64,
    latency: Duration,
    response: BulkUpdateResponse,
    rejected: Vec<JsonObject>,
}

/// In-flight requests and running totals for one stream
#[derive(Debug)]
struct StreamDelivery {
    url: String,
    primary_key: String,
    tasks: JoinSet<Result<RequestOutcome>>,
    rejected: Vec<JsonObject>,
    stats: StreamDeliveryStats,
}

/// Shared request settings, cloned into every spawned request
#[derive(Debug, Clone)]
struct Poster {
    client: Arc<HttpClient>,
    request_delay: Duration,
}

impl Poster {
    async fn post(
        &self,
        stream: &str,
        url: &str,
        primary_key: &str,
        index: usize,
        records: Vec<JsonObject>,
    ) -> Result<RequestOutcome> {
        let body = JsonValue::Array(records.iter().cloned().map(JsonValue::Object).collect());
        let started = Instant::now();
        let response: BulkUpdateResponse = self
            .client
            .post_json(url, body)
            .await
            .map_err(|e| Error::delivery(stream, format!("batch {index}: {e}")))?;
        let latency = started.elapsed();
        debug!(
            stream = %stream,
            batch = index,
            updated = response.updated,
            failed = response.failed,
            latency_ms = latency.as_millis() as u64,
            "Batch delivered"
        );

        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }

        let rejected = rejected_records(&records, primary_key, &response);
        Ok(RequestOutcome {
            index,
            records: records.len() as u64,
            latency,
            response,
            rejected,
        })
    }
}

/// Records whose primary key matches a reported error id
fn rejected_records(
    records: &[JsonObject],
    primary_key: &str,
    response: &BulkUpdateResponse,
) -> Vec<JsonObject> {
    if !response.has_failures() {
        return Vec::new();
    }
    let ids: BTreeSet<String> = response.failed_ids().collect();
    records
        .iter()
        .filter(|record| {
            record
                .get(primary_key)
                .is_some_and(|key| ids.contains(&key_string(key)))
        })
        .cloned()
        .collect()
}

/// Sends batches to the destination.
///
/// At most `max_concurrent` requests are in flight across all streams;
/// `dispatch` waits for a free slot. A stream is closed out by awaiting its
/// requests, retrying rejected records once, and marking it complete.
#[derive(Debug)]
pub struct DeliveryEngine {
    config: LoadConfig,
    poster: Poster,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    max_records: usize,
    max_bytes: usize,
    streams: HashMap<String, StreamDelivery>,
    tracker: Arc<CompletionTracker>,
}

impl DeliveryEngine {
    /// Create an engine with a destination client built from `config` and `limits`
    pub fn new(config: LoadConfig, limits: &DeliveryLimits) -> Result<Self> {
        let mut http = destination_client_config(&config.integration_key, config.request_timeout());
        http.max_attempts = limits.max_attempts;
        http.rate_limit = Some(RateLimiterConfig::new(
            limits.rate_calls,
            limits.rate_period,
            limits.max_concurrent as u32,
        ));
        let client = HttpClient::with_config(http)?;
        Ok(Self::with_client(config, limits, Arc::new(client)))
    }

    /// Create an engine around an existing client
    pub fn with_client(config: LoadConfig, limits: &DeliveryLimits, client: Arc<HttpClient>) -> Self {
        let tracker = Arc::new(CompletionTracker::new(config.streams.keys().cloned()));
        Self {
            config,
            poster: Poster {
                client,
                request_delay: limits.request_delay,
            },
            permits: Arc::new(Semaphore::new(limits.max_concurrent.max(1))),
            max_concurrent: limits.max_concurrent.max(1),
            max_records: limits.max_records.max(1),
            max_bytes: limits.max_bytes.max(1),
            streams: HashMap::new(),
            tracker,
        }
    }

    /// Completion registry for this run
    pub fn tracker(&self) -> Arc<CompletionTracker> {
        Arc::clone(&self.tracker)
    }

    /// Requests currently holding a slot, across all streams
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    /// Requests currently in flight or finished but not yet collected
    pub fn pending(&self, stream: &str) -> usize {
        self.streams.get(stream).map_or(0, |d| d.tasks.len())
    }

    /// Send one batch.
    ///
    /// Waits for a free request slot, then sends in the background. A
    /// request that already failed for this stream is reported here.
    pub async fn dispatch(&mut self, batch: Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let stream = batch.stream.clone();
        self.reap(&stream)?;

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| Error::delivery(&stream, e.to_string()))?;

        debug!(
            stream = %stream,
            batch = batch.index,
            in_flight = self.in_flight(),
            "Dispatching batch"
        );
        let poster = self.poster.clone();
        let delivery = self.delivery_for(&stream)?;
        delivery.stats.batches += 1;
        delivery.stats.records += batch.len() as u64;

        let url = delivery.url.clone();
        let primary_key = delivery.primary_key.clone();
        delivery.tasks.spawn(async move {
            let _permit = permit;
            poster
                .post(&batch.stream, &url, &primary_key, batch.index, batch.records)
                .await
        });
        Ok(())
    }

    /// Wait for a stream's requests, retry its rejected records once and mark it complete
    pub async fn close_stream(&mut self, stream: &str) -> Result<StreamDeliveryStats> {
        let Some(mut delivery) = self.streams.remove(stream) else {
            // no batches were ever sent for this stream
            self.tracker.mark_complete(stream);
            info!(stream = %stream, "Stream closed with no records to deliver");
            return Ok(StreamDeliveryStats::new(stream));
        };

        while let Some(joined) = delivery.tasks.join_next().await {
            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    delivery.tasks.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    delivery.tasks.abort_all();
                    return Err(Error::delivery(stream, format!("request task failed: {e}")));
                }
            };
            apply(&mut delivery, outcome);
        }

        if !delivery.rejected.is_empty() {
            self.retry_rejected(stream, &mut delivery).await?;
        }

        let stats = delivery.stats;
        info!(
            stream = %stream,
            request_times = ?stats.request_times,
            total_request_time = ?stats.total_request_time(),
            "Request times"
        );
        info!("{}: updated {} OF {}", stream, stats.updated, stats.total);
        self.tracker.mark_complete(stream);
        Ok(stats)
    }

    /// Abort every in-flight request
    pub fn abort_all(&mut self) {
        for delivery in self.streams.values_mut() {
            delivery.tasks.abort_all();
        }
    }

    /// Dispatch every batch, then close out each stream they belong to
    pub async fn deliver<I>(&mut self, batches: I) -> Result<DeliveryOutcome>
    where
        I: IntoIterator<Item = Batch>,
    {
        let mut order: Vec<String> = Vec::new();
        for batch in batches {
            if !order.contains(&batch.stream) {
                order.push(batch.stream.clone());
            }
            self.dispatch(batch).await?;
        }

        let mut outcome = DeliveryOutcome::default();
        for stream in order {
            outcome.streams.push(self.close_stream(&stream).await?);
        }
        outcome.complete = self.tracker.is_complete();
        Ok(outcome)
    }

    fn delivery_for(&mut self, stream: &str) -> Result<&mut StreamDelivery> {
        if !self.streams.contains_key(stream) {
            let target = self.config.stream(stream)?;
            let url = Endpoint::for_stream(stream)?.url(&self.config.base_url);
            debug!(stream = %stream, url = %url, "Opening delivery");
            self.streams.insert(
                stream.to_string(),
                StreamDelivery {
                    url,
                    primary_key: target.primary_key.clone(),
                    tasks: JoinSet::new(),
                    rejected: Vec::new(),
                    stats: StreamDeliveryStats::new(stream),
                },
            );
        }
        self.streams
            .get_mut(stream)
            .ok_or_else(|| Error::delivery(stream, "delivery context missing"))
    }

    /// Collect requests that have already finished without waiting
    fn reap(&mut self, stream: &str) -> Result<()> {
        let Some(delivery) = self.streams.get_mut(stream) else {
            return Ok(());
        };
        while let Some(Some(joined)) = delivery.tasks.join_next().now_or_never() {
            match joined {
                Ok(Ok(outcome)) => apply(delivery, outcome),
                Ok(Err(e)) => {
                    delivery.tasks.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    delivery.tasks.abort_all();
                    return Err(Error::delivery(stream, format!("request task failed: {e}")));
                }
            }
        }
        Ok(())
    }

    /// One pass over the rejected records, in batches bounded like the originals
    async fn retry_rejected(&self, stream: &str, delivery: &mut StreamDelivery) -> Result<()> {
        let records = std::mem::take(&mut delivery.rejected);
        let count = records.len() as u64;
        let chunks = chunk_records(records, self.max_records, self.max_bytes);
        warn!(
            stream = %stream,
            records = count,
            batches = chunks.len(),
            "Retrying rejected records"
        );

        let mut tasks: JoinSet<Result<RequestOutcome>> = JoinSet::new();
        for (offset, chunk) in chunks.into_iter().enumerate() {
            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|e| Error::delivery(stream, e.to_string()))?;
            let poster = self.poster.clone();
            let name = stream.to_string();
            let url = delivery.url.clone();
            let primary_key = delivery.primary_key.clone();
            let index = delivery.stats.batches + offset + 1;
            tasks.spawn(async move {
                let _permit = permit;
                poster.post(&name, &url, &primary_key, index, chunk).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    tasks.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(Error::delivery(stream, format!("retry task failed: {e}")));
                }
            };
            delivery.stats.updated += outcome.response.updated;
            delivery.stats.request_times.push(outcome.latency);
            delivery.stats.terminal_failures += outcome.rejected.len() as u64;
            for failure in &outcome.response.errors {
                error!(
                    stream = %stream,
                    id = %failure.id_string(),
                    message = %failure.message,
                    "Record rejected after retry"
                );
            }
        }
        delivery.stats.retried += count;
        Ok(())
    }
}

/// Split records into request bodies under `max_records` and `max_bytes`.
///
/// A record that would take a non-empty chunk to `max_bytes` starts a new one.
fn chunk_records(
    records: Vec<JsonObject>,
    max_records: usize,
    max_bytes: usize,
) -> Vec<Vec<JsonObject>> {
    let mut chunks = Vec::new();
    let mut pending: Vec<JsonObject> = Vec::new();
    let mut pending_bytes = 0;
    for record in records {
        let size = record_size(&record);
        if !pending.is_empty() && pending_bytes + size >= max_bytes {
            chunks.push(std::mem::take(&mut pending));
            pending_bytes = 0;
        }
        pending.push(record);
        pending_bytes += size;
        if pending_bytes >= max_bytes || pending.len() >= max_records {
            chunks.push(std::mem::take(&mut pending));
            pending_bytes = 0;
        }
    }
    if !pending.is_empty() {
        chunks.push(pending);
    }
    chunks
}

fn apply(delivery: &mut StreamDelivery, outcome: RequestOutcome) {
    let stats = &mut delivery.stats;
    stats.updated += outcome.response.updated;
    stats.total += outcome.response.total;
    stats.failed += outcome.response.failed;
    stats.request_times.push(outcome.latency);
    if !outcome.rejected.is_empty() {
        warn!(
            stream = %stats.stream,
            batch = outcome.index,
            sent = outcome.records,
            rejected = outcome.rejected.len(),
            "Records rejected, queued for retry"
        );
    }
    delivery.rejected.extend(outcome.rejected);
}

/// Deliver a set of batches with a fresh engine
pub async fn deliver(
    config: LoadConfig,
    limits: &DeliveryLimits,
    batches: Vec<Batch>,
) -> Result<DeliveryOutcome> {
    let mut engine = DeliveryEngine::new(config, limits)?;
    engine.deliver(batches).await
}
