//! Local-only conversion telemetry.
//!
//! Nothing here is ever transmitted. Each engine owns one [`Telemetry`] with a
//! session id, an ephemeral session store for in-flight events, and an
//! aggregate store for per-pair counters. Every operation swallows its own
//! failures: telemetry can never change the outcome of a conversion.
//!
//! ## Store layout
//!
//! | Key | Store | Content |
//! |-----|-------|---------|
//! | `conversion-<session>-<id>` | session | start event of an in-flight call |
//! | `progress-<session>-<id>`   | session | latest sampled progress event |
//! | `converter-stats`           | aggregate | [`PairStats`] per `<from>-to-<to>` |
//! | `library-load-stats`        | aggregate | [`LoadStats`] per `<converter>-<dependency>` |

use crate::format::ImageFormat;
use crate::store::{KeyValueStore, MemoryStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;
use uuid::Uuid;

const CONVERTER_STATS_KEY: &str = "converter-stats";
const LIBRARY_STATS_KEY: &str = "library-load-stats";
const SESSION_PREFIXES: [&str; 2] = ["conversion-", "progress-"];
/// Progress values recorded in the session store.
const SAMPLED_PROGRESS: [f64; 2] = [0.5, 1.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Start,
    Progress,
    Complete,
}

/// One telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionEvent {
    pub kind: EventKind,
    pub session_id: String,
    pub from: ImageFormat,
    pub to: ImageFormat,
    pub input_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub timestamp_ms: u64,
}

/// Aggregated counters for one format pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub total_duration_ms: u64,
    pub total_input_size: u64,
    pub total_output_size: u64,
}

/// Aggregated counters for one heavy dependency of one converter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadStats {
    pub loads: u64,
    pub successful: u64,
    pub failed: u64,
    pub total_load_time_ms: u64,
    pub avg_load_time_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryStats {
    pub converters: BTreeMap<String, PairStats>,
    pub libraries: BTreeMap<String, LoadStats>,
}

/// Handle for one in-flight conversion, returned by [`Telemetry::track_start`].
#[derive(Debug)]
pub struct Invocation {
    id: String,
    from: ImageFormat,
    to: ImageFormat,
    input_size: usize,
    started: Instant,
}

impl Invocation {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

pub struct Telemetry {
    session_id: String,
    session: Arc<dyn KeyValueStore>,
    aggregate: Arc<dyn KeyValueStore>,
    counter: AtomicU64,
    /// Serialises read-modify-write cycles on the aggregate store.
    aggregate_lock: Mutex<()>,
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn new_session_id() -> String {
    format!("{}-{}", now_ms(), Uuid::new_v4().simple())
}

impl Telemetry {
    pub fn new(session: Arc<dyn KeyValueStore>, aggregate: Arc<dyn KeyValueStore>) -> Self {
        Self {
            session_id: new_session_id(),
            session,
            aggregate,
            counter: AtomicU64::new(0),
            aggregate_lock: Mutex::new(()),
        }
    }

    /// Both stores in memory; nothing outlives the process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    // ── Event tracking ───────────────────────────────────────────────────

    pub fn track_start(
        &self,
        from: ImageFormat,
        to: ImageFormat,
        input_size: usize,
        options: serde_json::Value,
    ) -> Invocation {
        let ts = now_ms();
        let id = format!("{ts}-{}", self.counter.fetch_add(1, Ordering::Relaxed));
        let event = ConversionEvent {
            kind: EventKind::Start,
            session_id: self.session_id.clone(),
            from,
            to,
            input_size,
            output_size: None,
            options: Some(options),
            progress: None,
            success: None,
            error: None,
            duration_ms: None,
            timestamp_ms: ts,
        };
        debug!("telemetry start {from}->{to} ({input_size} bytes)");
        self.swallow("start", self.put_event(&self.session_key("conversion", &id), &event));
        Invocation {
            id,
            from,
            to,
            input_size,
            started: Instant::now(),
        }
    }

    /// Record a progress sample. Only the checkpoints in `SAMPLED_PROGRESS`
    /// are stored.
    pub fn track_progress(&self, inv: &Invocation, progress: f64) {
        if !SAMPLED_PROGRESS.iter().any(|s| (s - progress).abs() < f64::EPSILON) {
            return;
        }
        let event = ConversionEvent {
            kind: EventKind::Progress,
            session_id: self.session_id.clone(),
            from: inv.from,
            to: inv.to,
            input_size: inv.input_size,
            output_size: None,
            options: None,
            progress: Some(progress),
            success: None,
            error: None,
            duration_ms: Some(inv.elapsed_ms()),
            timestamp_ms: now_ms(),
        };
        self.swallow("progress", self.put_event(&self.session_key("progress", &inv.id), &event));
    }

    /// Close an invocation and fold it into the per-pair aggregates.
    pub fn track_complete(
        &self,
        inv: Invocation,
        success: bool,
        output_size: Option<usize>,
        error: Option<&str>,
    ) -> ConversionEvent {
        let duration_ms = inv.elapsed_ms();
        let event = ConversionEvent {
            kind: EventKind::Complete,
            session_id: self.session_id.clone(),
            from: inv.from,
            to: inv.to,
            input_size: inv.input_size,
            output_size,
            options: None,
            progress: None,
            success: Some(success),
            error: error.map(str::to_string),
            duration_ms: Some(duration_ms),
            timestamp_ms: now_ms(),
        };
        debug!(
            "telemetry complete {}->{} success={} {}ms",
            inv.from, inv.to, success, duration_ms
        );

        let cleanup = self
            .session
            .remove(&self.session_key("conversion", &inv.id))
            .and_then(|_| self.session.remove(&self.session_key("progress", &inv.id)));
        self.swallow("complete", cleanup);

        let pair = format!("{}-to-{}", inv.from, inv.to);
        let update = self.update_aggregate::<PairStats>(CONVERTER_STATS_KEY, &pair, |s| {
            s.total += 1;
            if success {
                s.successful += 1;
            } else {
                s.failed += 1;
            }
            s.total_duration_ms += duration_ms;
            s.total_input_size += inv.input_size as u64;
            s.total_output_size += output_size.unwrap_or(0) as u64;
        });
        self.swallow("aggregate", update);
        event
    }

    /// Record how long a converter spent loading one heavy dependency.
    pub fn track_dependency_load(
        &self,
        converter: &str,
        dependency: &str,
        success: bool,
        duration_ms: u64,
    ) {
        debug!("telemetry load {converter}/{dependency} success={success} {duration_ms}ms");
        let key = format!("{converter}-{dependency}");
        let update = self.update_aggregate::<LoadStats>(LIBRARY_STATS_KEY, &key, |s| {
            s.loads += 1;
            if success {
                s.successful += 1;
            } else {
                s.failed += 1;
            }
            s.total_load_time_ms += duration_ms;
            s.avg_load_time_ms = s.total_load_time_ms / s.loads;
        });
        self.swallow("dependency", update);
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn stats(&self) -> Result<TelemetryStats, StoreError> {
        Ok(TelemetryStats {
            converters: self.read_aggregate(CONVERTER_STATS_KEY)?,
            libraries: self.read_aggregate(LIBRARY_STATS_KEY)?,
        })
    }

    /// Number of conversions started in this session that have not completed.
    pub fn in_flight(&self) -> Result<usize, StoreError> {
        let prefix = format!("conversion-{}-", self.session_id);
        Ok(self
            .session
            .keys()?
            .iter()
            .filter(|k| k.starts_with(&prefix))
            .count())
    }

    /// Remove every session event and both aggregate tables.
    pub fn clear(&self) -> Result<(), StoreError> {
        for key in self.session.keys()? {
            if SESSION_PREFIXES.iter().any(|p| key.starts_with(p)) {
                self.session.remove(&key)?;
            }
        }
        let _guard = self.aggregate_lock.lock().map_err(|_| StoreError::Poisoned)?;
        self.aggregate.remove(CONVERTER_STATS_KEY)?;
        self.aggregate.remove(LIBRARY_STATS_KEY)?;
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn session_key(&self, prefix: &str, id: &str) -> String {
        format!("{prefix}-{}-{id}", self.session_id)
    }

    fn put_event(&self, key: &str, event: &ConversionEvent) -> Result<(), StoreError> {
        self.session.set(key, serde_json::to_string(event)?)
    }

    fn read_aggregate<T: for<'de> Deserialize<'de>>(
        &self,
        key: &str,
    ) -> Result<BTreeMap<String, T>, StoreError> {
        match self.aggregate.get(key)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(BTreeMap::new()),
        }
    }

    fn update_aggregate<T>(
        &self,
        key: &str,
        entry: &str,
        f: impl FnOnce(&mut T),
    ) -> Result<(), StoreError>
    where
        T: Default + Serialize + for<'de> Deserialize<'de>,
    {
        let _guard = self.aggregate_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut table: BTreeMap<String, T> = self.read_aggregate(key)?;
        f(table.entry(entry.to_string()).or_default());
        self.aggregate.set(key, serde_json::to_string(&table)?)
    }

    fn swallow(&self, what: &str, result: Result<(), StoreError>) {
        if let Err(e) = result {
            debug!("telemetry {what} failed (ignored): {e}");
        }
    }
}
