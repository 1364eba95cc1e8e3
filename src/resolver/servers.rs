//! Per-nameserver statistics and candidate ordering.
//!
//! The resolver keeps one record per server endpoint it has ever queried:
//! a smoothed round-trip time, how often the server answered, and how often
//! in a row it failed to. The record doubles as a circuit breaker: an
//! endpoint that keeps failing is pushed to the end of every candidate list
//! until its cooldown passes. Records are created lazily and never evicted;
//! the set is bounded by the endpoints actually encountered.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// The hostnames of the 13 DNS root servers.
pub const ROOT_SERVER_NAMES: [&str; 13] = [
    "a.root-servers.net",
    "b.root-servers.net",
    "c.root-servers.net",
    "d.root-servers.net",
    "e.root-servers.net",
    "f.root-servers.net",
    "g.root-servers.net",
    "h.root-servers.net",
    "i.root-servers.net",
    "j.root-servers.net",
    "k.root-servers.net",
    "l.root-servers.net",
    "m.root-servers.net",
];

/// Consecutive failures after which an endpoint's circuit opens.
const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// How long an open circuit keeps an endpoint de-prioritized.
const CIRCUIT_COOLDOWN: Duration = Duration::from_secs(60);

//------------ ServerStats ---------------------------------------------------

/// Statistics for every server endpoint the resolver has queried.
///
/// The outer map is behind a read-write lock that is only write-locked when
/// a new endpoint shows up; updates to a known endpoint take that endpoint's
/// own lock.
#[derive(Debug, Default)]
pub(super) struct ServerStats {
    entries: RwLock<HashMap<SocketAddr, Arc<Mutex<ServerEntry>>>>,
}

/// The mutable statistics of a single endpoint.
#[derive(Debug, Default, Clone)]
struct ServerEntry {
    /// Exponential moving average over observed round-trip times.
    avg_rtt: Duration,
    /// Number of successful exchanges folded into `avg_rtt`.
    samples: u64,
    /// Time of the last successful exchange.
    last_seen: Option<Instant>,
    /// Consecutive failures since the last success.
    failures: u32,
    /// Time of the most recent failure.
    last_failed: Option<Instant>,
}

impl ServerEntry {
    /// An open circuit: too many consecutive failures, all of them recent.
    fn is_open(&self, now: Instant) -> bool {
        self.failures >= CIRCUIT_FAILURE_THRESHOLD
            && self
                .last_failed
                .map(|at| now.duration_since(at) < CIRCUIT_COOLDOWN)
                .unwrap_or(false)
    }
}

impl ServerStats {
    /// Records a successful exchange with `addr` that took `rtt`.
    ///
    /// The average is smoothed with alpha 1/8; a success closes the circuit
    /// by resetting the failure run.
    pub fn record_success(&self, addr: SocketAddr, rtt: Duration) {
        let entry = self.entry(addr);
        let mut entry = entry.lock().expect("server entry lock poisoned");
        entry.avg_rtt = if entry.samples == 0 {
            rtt
        } else {
            (entry.avg_rtt * 7 + rtt) / 8
        };
        entry.samples += 1;
        entry.last_seen = Some(Instant::now());
        entry.failures = 0;
    }

    /// Records a failed exchange with `addr`.
    pub fn record_failure(&self, addr: SocketAddr) {
        let entry = self.entry(addr);
        let mut entry = entry.lock().expect("server entry lock poisoned");
        entry.failures += 1;
        entry.last_failed = Some(Instant::now());
    }

    /// Orders candidate servers from most to least promising.
    ///
    /// Open circuits sort last. The rest rank by ascending failure run,
    /// then servers with RTT history before unknown ones, then by ascending
    /// average RTT. The sort is stable, so equally-ranked servers keep the
    /// order the referral listed them in.
    pub fn order(&self, candidates: &mut [SocketAddr]) {
        let now = Instant::now();
        let entries = self.entries.read().expect("server stats lock poisoned");
        let snapshot: HashMap<SocketAddr, ServerEntry> = candidates
            .iter()
            .filter_map(|addr| {
                entries.get(addr).map(|entry| {
                    (*addr, entry.lock().expect("server entry lock poisoned").clone())
                })
            })
            .collect();
        drop(entries);

        candidates.sort_by_key(|addr| match snapshot.get(addr) {
            Some(entry) => (
                entry.is_open(now),
                entry.failures,
                entry.samples == 0,
                if entry.samples == 0 {
                    Duration::MAX
                } else {
                    entry.avg_rtt
                },
            ),
            None => (false, 0, true, Duration::MAX),
        });
    }

    /// Returns the entry for `addr`, creating it on first sight.
    fn entry(&self, addr: SocketAddr) -> Arc<Mutex<ServerEntry>> {
        if let Some(entry) = self
            .entries
            .read()
            .expect("server stats lock poisoned")
            .get(&addr)
        {
            return entry.clone();
        }
        self.entries
            .write()
            .expect("server stats lock poisoned")
            .entry(addr)
            .or_default()
            .clone()
    }
}

//============ Tests =========================================================
