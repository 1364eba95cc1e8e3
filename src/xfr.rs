//! The zone transfer engine.
//!
//! One [`Engine`] value drives every transfer attempt of the process. Per
//! zone it enumerates candidate server addresses — glue from the zone model
//! first, then whatever the recursive resolver can find — deduplicates them
//! by canonical address form, and runs a bounded retry loop per candidate.
//! A server that answers REFUSED or NOTAUTH is done for: that is an
//! explicit policy answer, so its retry loop breaks immediately and the
//! next candidate gets its turn. Records stream straight into a
//! [`ZoneWriter`], whose finalizer runs on every exit path so a transfer
//! either ends as a complete renamed zone file or leaves nothing behind.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use domain::base::iana::Rcode;
use domain::base::wire::ParseError;
use domain::base::{Message, MessageBuilder, Name, ParsedName, Rtype, Serial, Ttl};
use domain::net::client::request::{
    RequestMessage, RequestMessageMulti, SendRequestMulti,
};
use domain::net::client::stream;
use domain::net::xfr::protocol::XfrResponseInterpreter;
use domain::rdata::{Soa, ZoneRecordData};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::resolver::{ResolveError, Resolver};
use crate::status::StatusTracker;
use crate::util::{canonical_ip, fqdn, round_millis};
use crate::zone::Zone;
use crate::zonefile::{WriteError, ZoneWriter};

/// Timeout for connecting to a transfer server and for each envelope read.
pub(crate) const TRANSFER_TIMEOUT: Duration = Duration::from_secs(15);

/// Pause between retries against the same candidate.
const RETRY_DELAY: Duration = Duration::from_secs(1);

//------------ Config --------------------------------------------------------

/// Transfer engine settings, shared read-only by all workers.
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory the zone files are saved in.
    pub save_dir: PathBuf,

    /// Save every successful transfer instead of only the first per zone.
    pub save_all: bool,

    /// Request IXFR with serial 0 instead of AXFR.
    pub ixfr: bool,

    /// Stop after the first envelope with records, writing nothing.
    pub dry_run: bool,

    /// Attempts per candidate address, at least 1.
    pub retry: usize,

    /// Overwrite zone files that already exist on disk.
    pub overwrite: bool,

    /// Server port for transfers. 53 outside of tests.
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            save_dir: PathBuf::from("zones"),
            save_all: false,
            ixfr: false,
            dry_run: false,
            retry: 3,
            overwrite: false,
            port: 53,
        }
    }
}

//------------ XfrError ------------------------------------------------------

/// Errors from a single transfer attempt.
#[derive(Debug, Error)]
pub enum XfrError {
    /// The server answered with an explicit refusal rcode.
    ///
    /// Terminal for that server: retrying cannot help.
    #[error("transfer refused with rcode {0}")]
    Refused(Rcode),

    /// The server answered with some other non-success rcode.
    #[error("transfer failed with rcode {0}")]
    BadRcode(Rcode),

    /// The TCP connection could not be established.
    #[error("connect to {0} failed: {1}")]
    Connect(String, std::io::Error),

    /// The TCP connection attempt timed out.
    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    /// The transfer stream broke down.
    #[error("transfer stream error: {0}")]
    Stream(#[from] domain::net::client::request::Error),

    /// An envelope could not be parsed.
    #[error("malformed transfer response: {0}")]
    Malformed(#[from] ParseError),

    /// The request message could not be composed.
    #[error("failed to compose transfer request")]
    Compose,

    /// The zone name is not a valid domain name.
    #[error("invalid zone name {0:?}")]
    BadName(String),

    /// Writing the zone file failed.
    #[error(transparent)]
    Write(#[from] WriteError),

    /// The operation was cancelled.
    #[error("transfer cancelled")]
    Cancelled,
}

impl XfrError {
    /// Whether this error means the server will never allow the transfer.
    pub fn is_refused(&self) -> bool {
        matches!(self, XfrError::Refused(_))
    }
}

//------------ Outcome -------------------------------------------------------

/// What a transfer attempt produced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The transfer succeeded with this many records.
    Transferred(i64),

    /// The attempt went through but produced no records.
    Empty,

    /// The zone file already exists on disk and overwriting is off.
    AlreadySaved,
}

//------------ Engine --------------------------------------------------------

/// The per-process zone transfer engine.
#[derive(Debug)]
pub struct Engine {
    config: Config,
    resolver: Arc<Resolver>,
    status: Option<Arc<StatusTracker>>,

    /// Count of successful transfers across all workers.
    total_transfers: AtomicU64,
}

impl Engine {
    /// Creates an engine.
    pub fn new(
        config: Config,
        resolver: Arc<Resolver>,
        status: Option<Arc<StatusTracker>>,
    ) -> Self {
        Engine {
            config,
            resolver,
            status,
            total_transfers: AtomicU64::new(0),
        }
    }

    /// Number of successful transfers so far.
    pub fn total_transfers(&self) -> u64 {
        self.total_transfers.load(Ordering::Relaxed)
    }

    /// The status tracker, when one is configured.
    pub fn status(&self) -> Option<&Arc<StatusTracker>> {
        self.status.as_ref()
    }

    /// Attempts to transfer `name` from every candidate server.
    ///
    /// Glue addresses from the zone model are tried first, in insertion
    /// order; afterwards the resolver is asked for the zone's NS records
    /// and every address of every such nameserver. Candidates are
    /// deduplicated by canonical 16-byte address form. In first-hit mode
    /// the first candidate that yields records ends the zone; in save-all
    /// mode every candidate is tried.
    pub async fn transfer_zone(
        &self,
        zone: &Zone,
        name: &str,
        token: &CancellationToken,
    ) -> Result<(), XfrError> {
        let name = fqdn(name);
        let mut seen = HashSet::new();
        let mut transferred = false;

        // Glue candidates.
        for ns in zone.nameservers(&name) {
            for &ip in zone.glue(ns) {
                if !seen.insert(canonical_ip(ip)) {
                    continue;
                }
                match self.transfer_candidate(&name, ns, ip, token).await? {
                    Outcome::Transferred(_) => {
                        if !self.config.save_all {
                            return Ok(());
                        }
                        transferred = true;
                    }
                    Outcome::AlreadySaved if !self.config.save_all => {
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }

        // Resolver-supplied candidates.
        let nameservers = self.query_nameservers(&name, token).await?;
        for ns in &nameservers {
            let ips = self.query_addresses(&name, ns, token).await?;
            for ip in ips {
                if !seen.insert(canonical_ip(ip)) {
                    continue;
                }
                debug!("[{name}] trying AXFR: {ns} {ip}");
                match self.transfer_candidate(&name, ns, ip, token).await? {
                    Outcome::Transferred(_) => {
                        if !self.config.save_all {
                            return Ok(());
                        }
                        transferred = true;
                    }
                    Outcome::AlreadySaved if !self.config.save_all => {
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }

        if !transferred {
            if let Some(status) = &self.status {
                status.fail_transfer(&name, "no successful zone transfers");
            }
        }
        Ok(())
    }

    /// Runs the retry loop for one candidate address.
    ///
    /// Stops early on success, on an explicit refusal, or when the file
    /// turns out to exist already. Transient errors sleep a second between
    /// attempts, racing cancellation.
    async fn transfer_candidate(
        &self,
        name: &str,
        ns: &str,
        ip: IpAddr,
        token: &CancellationToken,
    ) -> Result<Outcome, XfrError> {
        for attempt in 0..self.config.retry {
            match self.transfer(name, ns, ip, token).await {
                Ok(Outcome::Transferred(records)) => {
                    return Ok(Outcome::Transferred(records));
                }
                Ok(Outcome::AlreadySaved) => return Ok(Outcome::AlreadySaved),
                Ok(Outcome::Empty) => {
                    debug!("[{name}] {ns} ({ip}) transfer returned no records");
                }
                Err(XfrError::Cancelled) => return Err(XfrError::Cancelled),
                Err(err) if err.is_refused() => {
                    debug!("[{name}] {ns} ({ip}) {err}");
                    return Ok(Outcome::Empty);
                }
                Err(
                    err @ (XfrError::Connect(..)
                    | XfrError::ConnectTimeout(_)),
                ) => {
                    // An unreachable server is skipped, not retried.
                    debug!("[{name}] {ns} ({ip}) {err}");
                    return Ok(Outcome::Empty);
                }
                Err(err) => debug!("[{name}] {ns} ({ip}) {err}"),
            }
            if attempt + 1 < self.config.retry {
                sleep_or_cancel(RETRY_DELAY, token).await?;
            }
        }
        Ok(Outcome::Empty)
    }

    /// One transfer attempt, with success bookkeeping.
    async fn transfer(
        &self,
        name: &str,
        ns: &str,
        ip: IpAddr,
        token: &CancellationToken,
    ) -> Result<Outcome, XfrError> {
        let started = Instant::now();
        let outcome = self.transfer_to_file(name, ns, ip, token).await?;
        if let Outcome::Transferred(records) = outcome {
            info!(
                "[{name}] {ns} ({ip}) xfr size: {records} records in {:?}",
                round_millis(started.elapsed())
            );
            self.total_transfers.fetch_add(1, Ordering::Relaxed);
            if let Some(status) = &self.status {
                status.complete_transfer(name);
            }
        }
        Ok(outcome)
    }

    /// Streams one transfer into a zone file.
    ///
    /// The writer's finalizer — the envelope-count comment plus
    /// [`ZoneWriter::finish`] — runs on every exit path, so a partial
    /// stream with records still ends up as a complete file while an
    /// attempt without records leaves the disk untouched.
    async fn transfer_to_file(
        &self,
        name: &str,
        ns: &str,
        ip: IpAddr,
        token: &CancellationToken,
    ) -> Result<Outcome, XfrError> {
        let qname = Name::<Bytes>::from_str(name)
            .map_err(|_| XfrError::BadName(name.to_string()))?;
        let request = build_transfer_request(&qname, self.config.ixfr)?;

        let filename = self.target_filename(name, ns, ip);
        if !self.config.overwrite && filename.exists() {
            debug!("[{name}] file {} exists, skipping", filename.display());
            return Ok(Outcome::AlreadySaved);
        }

        let addr = SocketAddr::new(ip, self.config.port);
        let connect = async {
            tokio::time::timeout(TRANSFER_TIMEOUT, TcpStream::connect(addr))
                .await
                .map_err(|_| XfrError::ConnectTimeout(addr.to_string()))?
                .map_err(|err| XfrError::Connect(addr.to_string(), err))
        };
        let tcp = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(XfrError::Cancelled),
            tcp = connect => tcp?,
        };

        let mut config = stream::Config::default();
        config.set_response_timeout(TRANSFER_TIMEOUT);
        let (conn, transport) = stream::Connection::<
            RequestMessage<Vec<u8>>,
            RequestMessageMulti<Vec<u8>>,
        >::with_config(tcp, config);
        tokio::spawn(transport.run());
        let request = RequestMessageMulti::new(request)
            .map_err(|_| XfrError::Compose)?;
        let mut response = SendRequestMulti::send_request(&conn, request);

        debug!("[{name}] saving zone to file {}", filename.display());
        let mut writer = ZoneWriter::new(name, &filename);
        let mut envelopes: i64 = 0;

        let streamed = async {
            writer.write_comment_key("nameserver", ns)?;
            writer.write_comment_key("nameserverIP", ip)?;
            writer.write_comment_key(
                "xfr",
                if self.config.ixfr { "IXFR" } else { "AXFR" },
            )?;

            let mut interpreter = XfrResponseInterpreter::new();
            while !interpreter.is_finished() {
                let msg = tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(XfrError::Cancelled),
                    msg = response.get_response() => msg?,
                };
                let Some(msg) = msg else {
                    // Server closed the stream.
                    break;
                };

                let rcode = msg.header().rcode();
                if rcode == Rcode::REFUSED || rcode == Rcode::NOTAUTH {
                    return Err(XfrError::Refused(rcode));
                }
                if rcode != Rcode::NOERROR {
                    return Err(XfrError::BadRcode(rcode));
                }

                let mut envelope_records: i64 = 0;
                for record in msg.answer()?.limit_to::<ZoneRecordData<
                    Bytes,
                    ParsedName<Bytes>,
                >>() {
                    let record = record?;
                    envelope_records += 1;
                    if !self.config.dry_run {
                        writer.add_record(&record)?;
                    }
                }
                if self.config.dry_run && envelope_records > 0 {
                    return Ok(Outcome::Transferred(envelope_records));
                }
                envelopes += 1;

                // Track end-of-transfer; the records were already written
                // from the raw answer section above.
                if let Ok(updates) = interpreter.interpret_response(msg) {
                    for update in updates {
                        if update.is_err() {
                            break;
                        }
                    }
                }
            }

            Ok(if writer.records() > 0 {
                Outcome::Transferred(writer.records())
            } else {
                Outcome::Empty
            })
        }
        .await;

        let finalized = writer
            .write_comment_key("envelopes", envelopes)
            .and_then(|_| writer.finish());
        match streamed {
            Ok(outcome) => {
                finalized?;
                Ok(outcome)
            }
            Err(err) => {
                // Keep the stream error; finalization is best effort here.
                let _ = finalized;
                Err(err)
            }
        }
    }

    /// Asks the resolver for the zone's nameserver names, with retries.
    async fn query_nameservers(
        &self,
        name: &str,
        token: &CancellationToken,
    ) -> Result<Vec<String>, XfrError> {
        for attempt in 0..self.config.retry {
            match self.resolver.resolve(name, Rtype::NS, token).await {
                Ok(result) => {
                    return Ok(result
                        .answer
                        .iter()
                        .filter_map(|record| match record.data() {
                            ZoneRecordData::Ns(ns) => {
                                Some(fqdn(&ns.nsdname().to_string()))
                            }
                            _ => None,
                        })
                        .collect());
                }
                Err(ResolveError::Cancelled) => return Err(XfrError::Cancelled),
                Err(err) => debug!("[{name}] {err}"),
            }
            if attempt + 1 < self.config.retry {
                sleep_or_cancel(RETRY_DELAY, token).await?;
            }
        }
        Ok(Vec::new())
    }

    /// Asks the resolver for every address of a nameserver, with retries.
    async fn query_addresses(
        &self,
        name: &str,
        ns: &str,
        token: &CancellationToken,
    ) -> Result<Vec<IpAddr>, XfrError> {
        for attempt in 0..self.config.retry {
            match self.resolver.lookup_ip_all(ns, token).await {
                Ok(ips) => return Ok(ips),
                Err(ResolveError::Cancelled) => return Err(XfrError::Cancelled),
                Err(err) => debug!("[{name}] {err}"),
            }
            if attempt + 1 < self.config.retry {
                sleep_or_cancel(RETRY_DELAY, token).await?;
            }
        }
        Ok(Vec::new())
    }

    /// Where a transfer of `name` from `ns`/`ip` would be saved.
    fn target_filename(&self, name: &str, ns: &str, ip: IpAddr) -> PathBuf {
        let base = name.trim_end_matches('.');
        if self.config.save_all {
            self.config
                .save_dir
                .join(format!("{}_{}_{}_zone.gz", base, ns, ip))
        } else {
            self.config.save_dir.join(format!("{}.zone.gz", base))
        }
    }
}

//------------ Helpers -------------------------------------------------------

/// Composes an AXFR request, or an IXFR request with serial 0.
pub(crate) fn build_transfer_request(
    qname: &Name<Bytes>,
    ixfr: bool,
) -> Result<Message<Vec<u8>>, XfrError> {
    let msg = MessageBuilder::new_vec();
    let mut msg = msg.question();
    if ixfr {
        msg.push((qname, Rtype::IXFR))
            .map_err(|_| XfrError::Compose)?;
        let mut msg = msg.authority();
        let ttl = Ttl::from_secs(0);
        let soa = Soa::new(
            Name::<Bytes>::root_bytes(),
            Name::<Bytes>::root_bytes(),
            Serial(0),
            ttl,
            ttl,
            ttl,
            ttl,
        );
        msg.push((qname, 0, soa)).map_err(|_| XfrError::Compose)?;
        Ok(msg.into_message())
    } else {
        msg.push((qname, Rtype::AXFR))
            .map_err(|_| XfrError::Compose)?;
        Ok(msg.into_message())
    }
}

/// Sleeps for `delay` unless cancelled first.
async fn sleep_or_cancel(
    delay: Duration,
    token: &CancellationToken,
) -> Result<(), XfrError> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = token.cancelled() => Err(XfrError::Cancelled),
    }
}

//============ Tests =========================================================
