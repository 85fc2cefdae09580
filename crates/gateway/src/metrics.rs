// Connection, throughput, latency and error statistics.
//
// The collector is an explicitly constructed service owned by the
// composition root and shared via `Arc` — never a language-level global.
// Interior state sits behind one `std::sync::Mutex` because the tokio
// runtime is multi-threaded; guards are held only for short, non-awaiting
// sections. Store I/O (connection metadata, summary export) happens outside
// the lock.
//
// Percentiles are a direct sorted-index lookup at floor(count * pct) with
// no interpolation: good enough for dashboards, not for SLA enforcement.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Mutex,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::store::TtlStore;

/// Throughput ring capacity: one entry per sent message.
pub const MESSAGE_TIMESTAMP_CAPACITY: usize = 10_000;
/// Latency sample ring capacity.
pub const LATENCY_SAMPLE_CAPACITY: usize = 1_000;
/// Connection duration ring capacity.
pub const DURATION_SAMPLE_CAPACITY: usize = 1_000;
/// Recent error ring capacity.
pub const RECENT_ERROR_CAPACITY: usize = 100;
/// Trailing window used for the error rate.
pub const ERROR_RATE_WINDOW: Duration = Duration::from_secs(60);
/// TTL for externally cached connection metadata.
pub const CONNECTION_METADATA_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// TTL for the exported metrics summary.
pub const SUMMARY_EXPORT_TTL: Duration = Duration::from_secs(60 * 60);
/// Store key under which the summary is exported.
pub const SUMMARY_EXPORT_KEY: &str = "gateway:metrics:summary";

#[derive(Debug, Clone)]
struct ConnectionMeta {
    user_id: Uuid,
    channel: Option<String>,
    opened_instant: Instant,
    opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct ErrorRecord {
    error_type: String,
    message: String,
    at: Instant,
    at_wall: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MetricsState {
    active_connections: HashSet<Uuid>,
    connections_by_user: HashMap<Uuid, HashSet<Uuid>>,
    connections_by_channel: HashMap<String, HashSet<Uuid>>,
    connections_opened_total: u64,
    connections_closed_total: u64,
    connection_meta: HashMap<Uuid, ConnectionMeta>,
    duration_samples: VecDeque<f64>,
    message_timestamps: VecDeque<Instant>,
    messages_by_type: HashMap<String, u64>,
    latency_samples: VecDeque<f64>,
    errors_total: u64,
    errors_by_type: HashMap<String, u64>,
    recent_errors: VecDeque<ErrorRecord>,
}

pub struct MetricsCollector {
    started_instant: Instant,
    started_at: DateTime<Utc>,
    meta_store: TtlStore,
    state: Mutex<MetricsState>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct LatencyStats {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct DurationStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ErrorStats {
    pub total: u64,
    pub by_type: HashMap<String, u64>,
    /// Errors observed within the trailing [`ERROR_RATE_WINDOW`].
    pub last_minute: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ConnectionStats {
    pub active: usize,
    pub active_users: usize,
    pub active_channels: usize,
    pub opened_total: u64,
    pub closed_total: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSummary {
    pub server_time: String,
    pub uptime_seconds: u64,
    pub connections: ConnectionStats,
    pub message_rate_per_second: f64,
    pub messages_by_type: HashMap<String, u64>,
    pub latency: LatencyStats,
    pub errors: ErrorStats,
    pub durations: DurationStats,
}

impl MetricsCollector {
    pub fn new(meta_store: TtlStore) -> Self {
        Self {
            started_instant: Instant::now(),
            started_at: Utc::now(),
            meta_store,
            state: Mutex::new(MetricsState::default()),
        }
    }

    /// Register a freshly accepted connection and cache its metadata
    /// externally so the duration can be reconciled even after a restart.
    pub async fn connection_opened(
        &self,
        connection_id: Uuid,
        user_id: Uuid,
        channel: Option<&str>,
    ) {
        let opened_at = Utc::now();
        {
            let mut state = self.state.lock().expect("metrics state lock poisoned");
            state.active_connections.insert(connection_id);
            state.connections_by_user.entry(user_id).or_default().insert(connection_id);
            if let Some(channel) = channel {
                state
                    .connections_by_channel
                    .entry(channel.to_string())
                    .or_default()
                    .insert(connection_id);
            }
            state.connections_opened_total += 1;
            state.connection_meta.insert(
                connection_id,
                ConnectionMeta {
                    user_id,
                    channel: channel.map(ToOwned::to_owned),
                    opened_instant: Instant::now(),
                    opened_at,
                },
            );
        }

        self.meta_store
            .insert(
                connection_meta_key(connection_id),
                json!({
                    "user_id": user_id,
                    "channel": channel,
                    "opened_at": opened_at.to_rfc3339(),
                }),
                CONNECTION_METADATA_TTL,
            )
            .await;
    }

    /// Record a disconnect: compute the connection duration from cached
    /// metadata, drop the connection from all active sets, and evict the
    /// external metadata entry.
    pub async fn connection_closed(&self, connection_id: Uuid) {
        let duration = {
            let mut state = self.state.lock().expect("metrics state lock poisoned");
            let meta = state.connection_meta.remove(&connection_id);

            state.active_connections.remove(&connection_id);
            if let Some(meta) = &meta {
                if let Some(set) = state.connections_by_user.get_mut(&meta.user_id) {
                    set.remove(&connection_id);
                    if set.is_empty() {
                        state.connections_by_user.remove(&meta.user_id);
                    }
                }
                if let Some(channel) = &meta.channel {
                    if let Some(set) = state.connections_by_channel.get_mut(channel) {
                        set.remove(&connection_id);
                        if set.is_empty() {
                            state.connections_by_channel.remove(channel);
                        }
                    }
                }
            }
            state.connections_closed_total += 1;

            meta.map(|meta| meta.opened_instant.elapsed().as_secs_f64())
        };

        let evicted = self.meta_store.remove(&connection_meta_key(connection_id)).await;

        let duration = duration.or_else(|| {
            // Local metadata can be missing after a process restart; fall
            // back to the externally cached open timestamp.
            evicted
                .as_ref()
                .and_then(|value| value.get("opened_at"))
                .and_then(|value| value.as_str())
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|opened_at| {
                    (Utc::now() - opened_at.with_timezone(&Utc)).num_milliseconds() as f64 / 1000.0
                })
        });

        match duration {
            Some(duration) => {
                let mut state = self.state.lock().expect("metrics state lock poisoned");
                push_bounded(&mut state.duration_samples, DURATION_SAMPLE_CAPACITY, duration);
            }
            None => {
                warn!(connection_id = %connection_id, "closed connection had no cached metadata");
            }
        }
    }

    /// Record an outbound dispatch for throughput, and optionally a latency
    /// sample in milliseconds.
    pub fn message_sent(&self, message_type: &str, latency_ms: Option<f64>) {
        let mut state = self.state.lock().expect("metrics state lock poisoned");
        push_bounded(&mut state.message_timestamps, MESSAGE_TIMESTAMP_CAPACITY, Instant::now());
        *state.messages_by_type.entry(message_type.to_string()).or_insert(0) += 1;
        if let Some(latency_ms) = latency_ms {
            push_bounded(&mut state.latency_samples, LATENCY_SAMPLE_CAPACITY, latency_ms);
        }
    }

    /// Instantaneous rate estimate: buffered timestamps newer than
    /// `now - window`, divided by the window. Not a true integral.
    pub fn message_rate(&self, window: Duration) -> f64 {
        self.message_rate_at(window, Instant::now())
    }

    fn message_rate_at(&self, window: Duration, now: Instant) -> f64 {
        let window_secs = window.as_secs_f64();
        if window_secs <= 0.0 {
            return 0.0;
        }
        let state = self.state.lock().expect("metrics state lock poisoned");
        let recent = state
            .message_timestamps
            .iter()
            .filter(|at| now.saturating_duration_since(**at) < window)
            .count();
        recent as f64 / window_secs
    }

    pub fn latency_stats(&self) -> LatencyStats {
        let state = self.state.lock().expect("metrics state lock poisoned");
        if state.latency_samples.is_empty() {
            return LatencyStats::default();
        }

        let mut sorted: Vec<f64> = state.latency_samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("latency samples are finite"));

        let count = sorted.len();
        let sum: f64 = sorted.iter().sum();
        LatencyStats {
            p50: percentile(&sorted, 0.50),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
            avg: sum / count as f64,
            min: sorted[0],
            max: sorted[count - 1],
            count,
        }
    }

    /// Record an error: monotonic total and per-type counters, plus the
    /// bounded recent ring that backs the rate view.
    pub fn error_occurred(&self, error_type: &str, message: &str) {
        let mut state = self.state.lock().expect("metrics state lock poisoned");
        state.errors_total += 1;
        *state.errors_by_type.entry(error_type.to_string()).or_insert(0) += 1;
        push_bounded(
            &mut state.recent_errors,
            RECENT_ERROR_CAPACITY,
            ErrorRecord {
                error_type: error_type.to_string(),
                message: message.to_string(),
                at: Instant::now(),
                at_wall: Utc::now(),
            },
        );
    }

    pub fn error_stats(&self) -> ErrorStats {
        let state = self.state.lock().expect("metrics state lock poisoned");
        ErrorStats {
            total: state.errors_total,
            by_type: state.errors_by_type.clone(),
            last_minute: error_rate(&state.recent_errors, Instant::now()),
        }
    }

    pub fn connection_duration_stats(&self) -> DurationStats {
        let state = self.state.lock().expect("metrics state lock poisoned");
        if state.duration_samples.is_empty() {
            return DurationStats::default();
        }

        let mut sorted: Vec<f64> = state.duration_samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("duration samples are finite"));

        let count = sorted.len();
        let sum: f64 = sorted.iter().sum();
        DurationStats {
            avg: sum / count as f64,
            min: sorted[0],
            max: sorted[count - 1],
            median: percentile(&sorted, 0.50),
            count,
        }
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        let state = self.state.lock().expect("metrics state lock poisoned");
        ConnectionStats {
            active: state.active_connections.len(),
            active_users: state.connections_by_user.len(),
            active_channels: state.connections_by_channel.len(),
            opened_total: state.connections_opened_total,
            closed_total: state.connections_closed_total,
        }
    }

    /// Compose everything into one point-in-time snapshot.
    pub fn summary(&self) -> MetricsSummary {
        let messages_by_type = {
            let state = self.state.lock().expect("metrics state lock poisoned");
            state.messages_by_type.clone()
        };

        MetricsSummary {
            server_time: Utc::now().to_rfc3339(),
            uptime_seconds: self.started_instant.elapsed().as_secs(),
            connections: self.connection_stats(),
            message_rate_per_second: self.message_rate(Duration::from_secs(60)),
            messages_by_type,
            latency: self.latency_stats(),
            errors: self.error_stats(),
            durations: self.connection_duration_stats(),
        }
    }

    /// Snapshot the summary into the external store for cross-process
    /// dashboards.
    pub async fn export_summary(&self) {
        let summary = self.summary();
        match serde_json::to_value(&summary) {
            Ok(value) => {
                self.meta_store.insert(SUMMARY_EXPORT_KEY, value, SUMMARY_EXPORT_TTL).await;
            }
            Err(error) => warn!(error = %error, "failed to serialize metrics summary"),
        }
    }

    /// Drop expired entries from the external metadata store. Run
    /// periodically by the maintenance task.
    pub async fn evict_expired_metadata(&self) -> usize {
        self.meta_store.evict_expired().await
    }

    /// Clear all in-memory state. For tests.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("metrics state lock poisoned");
        *state = MetricsState::default();
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

fn connection_meta_key(connection_id: Uuid) -> String {
    format!("gateway:conn:{connection_id}")
}

fn push_bounded<T>(ring: &mut VecDeque<T>, capacity: usize, value: T) {
    if ring.len() == capacity {
        ring.pop_front();
    }
    ring.push_back(value);
}

/// Sorted-index percentile: `sorted[floor(count * pct)]`, clamped.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    let index = ((sorted.len() as f64 * pct) as usize).min(sorted.len() - 1);
    sorted[index]
}

fn error_rate(recent_errors: &VecDeque<ErrorRecord>, now: Instant) -> usize {
    recent_errors
        .iter()
        .filter(|record| now.saturating_duration_since(record.at) < ERROR_RATE_WINDOW)
        .count()
}
