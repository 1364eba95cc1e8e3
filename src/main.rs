//! The allxfr command-line tool.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use allxfr::config::Options;
use allxfr::resolver::{Resolver, ROOT_SERVER_NAMES};
use allxfr::status::StatusTracker;
use allxfr::xfr::Engine;
use allxfr::zone::{parse_zone_file, Zone};
use allxfr::{pool, psl, root, status};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::parse();
    init_logging(options.verbose);

    let token = CancellationToken::new();
    spawn_signal_handler(token.clone());

    let tracker: Option<Arc<StatusTracker>> = options
        .status_listen
        .as_deref()
        .map(status::spawn_server);

    let start = Instant::now();
    let zone = build_zone(&options, &token).await?;

    if let Some(tracker) = &tracker {
        tracker.increment_total_zones(zone.count_ns() as u32);
    }

    if !options.dry_run {
        std::fs::create_dir_all(&options.out).with_context(|| {
            format!("cannot create output directory {}", options.out.display())
        })?;
    }

    if options.verbose {
        zone.log_tree();
    }

    let zone = Arc::new(zone);
    let resolver = Arc::new(Resolver::new());
    let engine = Arc::new(Engine::new(
        options.engine_config(),
        resolver,
        tracker.clone(),
    ));

    pool::run(
        engine.clone(),
        zone.clone(),
        options.parallel as usize,
        token,
    )
    .await?;

    info!(
        "{} / {} transferred in {:.3?}",
        engine.total_transfers(),
        zone.count_ns(),
        start.elapsed()
    );
    debug!("exiting normally");
    Ok(())
}

/// Builds the initial zone model from whatever sources the options name.
///
/// A zone file wins over the root transfer; positional names and the PSL
/// are appended on top of either.
async fn build_zone(
    options: &Options,
    token: &CancellationToken,
) -> anyhow::Result<Zone> {
    let mut zone = if let Some(path) = &options.zonefile {
        debug!("parsing zonefile {}", path.display());
        parse_zone_file(path).with_context(|| {
            format!("cannot parse zonefile {}", path.display())
        })?
    } else if options.zones.is_empty() {
        // Not all root servers allow AXFR; try until one does.
        let mut zone = Zone::new();
        for server in ROOT_SERVER_NAMES {
            debug!("trying root nameserver {server}");
            match root::root_axfr(server, 53, token).await {
                Ok(root_zone) => {
                    zone = root_zone;
                    break;
                }
                Err(err) => debug!("ROOT {server} {err}"),
            }
        }
        zone
    } else {
        Zone::new()
    };

    for name in &options.zones {
        zone.add_name(name);
    }

    if zone.count_ns() == 0 {
        bail!("got empty zone");
    }

    if options.psl {
        let domains = psl::get_domains()
            .await
            .context("cannot load the public suffix list")?;
        debug!("added {} domains from PSL", domains.len());
        for domain in &domains {
            zone.add_name(domain);
        }
    }

    Ok(zone)
}

/// Cancels the root token on Ctrl-C.
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, shutting down");
            token.cancel();
        }
    });
}

/// Sets up tracing output.
///
/// `--verbose` raises this crate's own events to debug level; `RUST_LOG`
/// overrides everything.
fn init_logging(verbose: bool) {
    let default = if verbose { "info,allxfr=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
