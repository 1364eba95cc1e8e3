//! The fixed-size worker pool driving the transfer engine.
//!
//! A configurable number of workers drain the zone model's name stream.
//! Each worker records the start of a transfer, hands the zone to the
//! engine and keeps going whatever that zone's fate was; only cancellation
//! ends a worker early. The pool completes when the stream is exhausted
//! and every worker has returned, surfacing the first unrecoverable error
//! if one occurred.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::xfr::{Engine, XfrError};
use crate::zone::Zone;

/// Runs `workers` workers over the zone model's pending names.
pub async fn run(
    engine: Arc<Engine>,
    zone: Arc<Zone>,
    workers: usize,
    token: CancellationToken,
) -> Result<(), XfrError> {
    let names = Arc::new(Mutex::new(zone.name_stream()));

    let mut set = JoinSet::new();
    for id in 0..workers.max(1) {
        let engine = engine.clone();
        let zone = zone.clone();
        let names = names.clone();
        let token = token.clone();
        set.spawn(async move { worker(id, engine, zone, names, token).await });
    }

    let mut first_error = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
            Err(err) if err.is_panic() => {
                std::panic::resume_unwind(err.into_panic());
            }
            Err(_) => {}
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// One worker: pull names until the stream closes or cancellation hits.
async fn worker(
    id: usize,
    engine: Arc<Engine>,
    zone: Arc<Zone>,
    names: Arc<Mutex<mpsc::Receiver<String>>>,
    token: CancellationToken,
) -> Result<(), XfrError> {
    loop {
        let name = {
            let mut names = names.lock().await;
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("worker {id} stopping: cancelled");
                    return Ok(());
                }
                name = names.recv() => name,
            }
        };
        let Some(name) = name else {
            return Ok(());
        };

        if let Some(status) = engine.status() {
            status.start_transfer(&name);
        }
        match engine.transfer_zone(&zone, &name, &token).await {
            Ok(()) => {}
            Err(XfrError::Cancelled) => {
                debug!("worker {id} stopping: cancelled");
                return Ok(());
            }
            Err(err) => {
                debug!("[{name}] {err}");
                if let Some(status) = engine.status() {
                    status.fail_transfer(&name, &err.to_string());
                }
            }
        }
    }
}

//============ Tests =========================================================
