//! Transfer progress tracking and the status HTTP endpoints.
//!
//! A [`StatusTracker`] counts zone transfer transitions: every zone starts
//! in the active set and leaves it exactly once, either completed or
//! failed. Counters are atomics, the active set is a concurrent map, and
//! the last ten failure reasons are kept in a small ring for debugging.
//! A background sweep expires entries that have been active implausibly
//! long so missed transitions cannot leak.
//!
//! When `--status-listen` is given the tracker is additionally served over
//! HTTP as JSON under `/status`, `/progress` and `/health`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info};

/// How many failure reasons the ring keeps.
const RECENT_FAILURES: usize = 10;

/// Active entries older than this are considered leaked.
const STALE_THRESHOLD: Duration = Duration::from_secs(10 * 60);

/// How often the stale sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

//------------ StatusTracker -------------------------------------------------

/// Concurrency-safe bookkeeping of zone transfer progress.
#[derive(Debug)]
pub struct StatusTracker {
    /// Wall-clock start, for the JSON snapshot.
    start_time: DateTime<Utc>,

    /// Monotonic start, for runtime and rate computation.
    started: Instant,

    total_zones: AtomicU32,
    completed: AtomicU32,
    failed: AtomicU32,
    active_count: AtomicU32,

    /// Currently transferring zones and when they started.
    active: DashMap<String, Instant>,

    /// The most recent failure reasons, oldest first.
    recent_failed: Mutex<Vec<String>>,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusTracker {
    /// Creates a tracker with all counters at zero.
    pub fn new() -> Self {
        StatusTracker {
            start_time: Utc::now(),
            started: Instant::now(),
            total_zones: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            failed: AtomicU32::new(0),
            active_count: AtomicU32::new(0),
            active: DashMap::new(),
            recent_failed: Mutex::new(Vec::new()),
        }
    }

    /// Adds newly discovered zones to the total.
    pub fn increment_total_zones(&self, count: u32) {
        self.total_zones.fetch_add(count, Ordering::Relaxed);
    }

    /// Marks a zone as actively transferring.
    pub fn start_transfer(&self, zone: &str) {
        self.active.insert(zone.to_string(), Instant::now());
        self.active_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks a zone transfer as completed.
    ///
    /// Only the first transition out of the active set counts; a repeated
    /// complete or fail for the same zone is ignored.
    pub fn complete_transfer(&self, zone: &str) {
        if self.active.remove(zone).is_some() {
            self.active_count.fetch_sub(1, Ordering::Relaxed);
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Marks a zone transfer as failed, remembering the reason.
    pub fn fail_transfer(&self, zone: &str, reason: &str) {
        if self.active.remove(zone).is_some() {
            self.active_count.fetch_sub(1, Ordering::Relaxed);
            self.failed.fetch_add(1, Ordering::Relaxed);
            let entry = if reason.is_empty() {
                zone.to_string()
            } else {
                format!("{}: {}", zone, reason)
            };
            self.push_failure(entry);
        }
    }

    /// Produces a consistent-enough snapshot of the current state.
    ///
    /// Counters change independently, so a snapshot taken during
    /// transitions may briefly show `active + completed + failed`
    /// exceeding the total; `remaining` is clamped at zero.
    pub fn snapshot(&self) -> StatusSnapshot {
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let active = self.active_count.load(Ordering::Relaxed);
        let total_zones = self.total_zones.load(Ordering::Relaxed);
        let runtime = self.started.elapsed();

        let attempted = completed + failed;
        let success_rate = if attempted > 0 {
            round2(f64::from(completed) / f64::from(attempted) * 100.0)
        } else {
            0.0
        };
        let minutes = runtime.as_secs_f64() / 60.0;
        let transfer_rate = if minutes > 0.0 {
            round2(f64::from(completed) / minutes)
        } else {
            0.0
        };

        StatusSnapshot {
            start_time: self.start_time,
            runtime: human_duration(runtime),
            total_zones,
            completed,
            failed,
            active,
            remaining: total_zones.saturating_sub(attempted),
            success_rate,
            transfer_rate,
            recent_failed: self
                .recent_failed
                .lock()
                .expect("failure ring lock poisoned")
                .clone(),
        }
    }

    /// Expires active entries that never transitioned out.
    ///
    /// Every entry older than [`STALE_THRESHOLD`] is removed and counted
    /// as failed.
    pub fn sweep_stale(&self) {
        let stale: Vec<String> = self
            .active
            .iter()
            .filter(|entry| entry.value().elapsed() > STALE_THRESHOLD)
            .map(|entry| entry.key().clone())
            .collect();
        for zone in stale {
            if self
                .active
                .remove_if(&zone, |_, started| {
                    started.elapsed() > STALE_THRESHOLD
                })
                .is_some()
            {
                self.active_count.fetch_sub(1, Ordering::Relaxed);
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.push_failure(format!(
                    "{}: stale transfer (cleanup)",
                    zone
                ));
            }
        }
    }

    /// Appends to the failure ring, dropping the oldest past capacity.
    fn push_failure(&self, entry: String) {
        let mut ring = self
            .recent_failed
            .lock()
            .expect("failure ring lock poisoned");
        ring.push(entry);
        if ring.len() > RECENT_FAILURES {
            ring.remove(0);
        }
    }
}

//------------ StatusSnapshot ------------------------------------------------

/// The JSON body served under `/status`.
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    /// When the harvest started.
    pub start_time: DateTime<Utc>,

    /// Elapsed runtime, humanized.
    pub runtime: String,

    pub total_zones: u32,
    pub completed: u32,
    pub failed: u32,
    pub active: u32,
    pub remaining: u32,
    pub success_rate: f64,
    #[serde(rename = "transfer_rate_per_minute")]
    pub transfer_rate: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recent_failed: Vec<String>,
}

//------------ HTTP server ---------------------------------------------------

/// Starts the status tracker together with its HTTP server and the stale
/// sweep task.
///
/// `listen` is either a bare port or a full `host:port` address.
pub fn spawn_server(listen: &str) -> Arc<StatusTracker> {
    let tracker = Arc::new(StatusTracker::new());
    let addr = if listen.contains(':') {
        listen.to_string()
    } else {
        format!("0.0.0.0:{}", listen)
    };

    let served = tracker.clone();
    tokio::spawn(async move {
        if let Err(err) = serve(served, addr).await {
            error!("status server error: {err}");
        }
    });

    let swept = tracker.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            swept.sweep_stale();
        }
    });

    tracker
}

/// Runs the HTTP server until it fails.
async fn serve(
    tracker: Arc<StatusTracker>,
    addr: String,
) -> std::io::Result<()> {
    let app = Router::new()
        .route("/status", get(status_handler))
        .route("/progress", get(progress_handler))
        .route("/health", get(health_handler))
        .with_state(tracker);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local = listener.local_addr()?;
    info!("status server listening on {local}");
    info!("  http://{local}/status   - full status information");
    info!("  http://{local}/progress - progress summary");
    info!("  http://{local}/health   - health check");
    axum::serve(listener, app).await
}

async fn status_handler(
    State(tracker): State<Arc<StatusTracker>>,
) -> Json<StatusSnapshot> {
    Json(tracker.snapshot())
}

async fn progress_handler(
    State(tracker): State<Arc<StatusTracker>>,
) -> Json<Value> {
    let status = tracker.snapshot();
    let attempted = status.completed + status.failed;
    let percentage = if status.total_zones > 0 {
        round2(f64::from(attempted) / f64::from(status.total_zones) * 100.0)
    } else {
        0.0
    };
    Json(json!({
        "completed": status.completed,
        "failed": status.failed,
        "attempted": attempted,
        "total": status.total_zones,
        "remaining": status.remaining,
        "active": status.active,
        "percentage": percentage,
    }))
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "ALLXFR is running",
    }))
}

//------------ Helpers -------------------------------------------------------

/// Rounds to two decimal places.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Formats a duration the way Go's `Duration.String` does for whole
/// seconds: `45s`, `1m32s`, `2h0m5s`.
fn human_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (hours, rem) = (secs / 3600, secs % 3600);
    let (minutes, seconds) = (rem / 60, rem % 60);
    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_keep_counters_consistent() {
        let tracker = StatusTracker::new();
        tracker.increment_total_zones(3);
        tracker.start_transfer("com.");
        tracker.start_transfer("net.");
        tracker.start_transfer("org.");
        assert_eq!(tracker.active_count.load(Ordering::Relaxed), 3);

        tracker.complete_transfer("com.");
        tracker.fail_transfer("net.", "no successful zone transfers");

        let status = tracker.snapshot();
        assert_eq!(status.completed, 1);
        assert_eq!(status.failed, 1);
        assert_eq!(status.active, 1);
        assert_eq!(status.remaining, 1);
        assert_eq!(status.active as usize, tracker.active.len());
        assert!(status.completed + status.failed <= 3);
    }

    #[test]
    fn double_transitions_are_idempotent() {
        let tracker = StatusTracker::new();
        tracker.increment_total_zones(1);
        tracker.start_transfer("com.");
        tracker.complete_transfer("com.");
        tracker.complete_transfer("com.");
        tracker.fail_transfer("com.", "too late");

        let status = tracker.snapshot();
        assert_eq!(status.completed, 1);
        assert_eq!(status.failed, 0);
        assert_eq!(status.active, 0);
    }

    #[test]
    fn remaining_clamps_at_zero() {
        let tracker = StatusTracker::new();
        tracker.increment_total_zones(1);
        for zone in ["a.", "b.", "c."] {
            tracker.start_transfer(zone);
            tracker.complete_transfer(zone);
        }
        assert_eq!(tracker.snapshot().remaining, 0);
    }

    #[test]
    fn failure_ring_keeps_the_last_ten() {
        let tracker = StatusTracker::new();
        for i in 0..15 {
            let zone = format!("zone{}.", i);
            tracker.start_transfer(&zone);
            tracker.fail_transfer(&zone, "refused");
        }
        let recent = tracker.snapshot().recent_failed;
        assert_eq!(recent.len(), RECENT_FAILURES);
        assert_eq!(recent[0], "zone5.: refused");
        assert_eq!(recent[9], "zone14.: refused");
    }

    #[test]
    fn sweep_expires_stale_entries() {
        let tracker = StatusTracker::new();
        tracker.start_transfer("fresh.");
        let long_ago = Instant::now()
            .checked_sub(STALE_THRESHOLD + Duration::from_secs(60))
            .unwrap();
        tracker.active.insert("stuck.".to_string(), long_ago);
        tracker.active_count.fetch_add(1, Ordering::Relaxed);

        tracker.sweep_stale();

        let status = tracker.snapshot();
        assert_eq!(status.failed, 1);
        assert_eq!(status.active, 1);
        assert_eq!(
            status.recent_failed,
            vec!["stuck.: stale transfer (cleanup)".to_string()]
        );
    }

    #[test]
    fn success_rate_rounds_to_two_decimals() {
        let tracker = StatusTracker::new();
        tracker.increment_total_zones(3);
        for zone in ["a.", "b."] {
            tracker.start_transfer(zone);
            tracker.complete_transfer(zone);
        }
        tracker.start_transfer("c.");
        tracker.fail_transfer("c.", "nope");
        assert_eq!(tracker.snapshot().success_rate, 66.67);
    }

    #[test]
    fn human_duration_formats() {
        assert_eq!(human_duration(Duration::from_secs(45)), "45s");
        assert_eq!(human_duration(Duration::from_secs(92)), "1m32s");
        assert_eq!(human_duration(Duration::from_secs(7205)), "2h0m5s");
    }
}
