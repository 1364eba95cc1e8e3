//! A recursive DNS resolver.
//!
//! The resolver walks the delegation tree itself: it starts at the root
//! servers, follows referrals downward using glue where present, repairs
//! missing glue through the host resolver, chases CNAMEs, and stops at the
//! first authoritative answer or NXDOMAIN. Lookup results are cached in an
//! LRU cache with separate positive and negative entries, and every server
//! endpoint is tracked for round-trip time and consecutive failures so the
//! best candidates are asked first and broken ones are parked behind a
//! circuit breaker.
//!
//! Two resolution modes exist. [`Resolver::resolve`] returns the first
//! usable answer. [`Resolver::resolve_all`] asks every nameserver at every
//! delegation level in parallel and returns the union of their answers,
//! which is what the transfer engine wants when hunting for every IP a
//! nameserver name may have.

mod cache;
mod servers;

pub use servers::ROOT_SERVER_NAMES;

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use domain::base::iana::Rcode;
use domain::base::message::RecordSection;
use domain::base::name::FlattenInto;
use domain::base::wire::ParseError;
use domain::base::{Message, MessageBuilder, Name, ParsedName, Record, Rtype};
use domain::net::client::dgram;
use domain::net::client::protocol::UdpConnect;
use domain::net::client::request::{
    RequestMessage, RequestMessageMulti, SendRequest,
};
use domain::net::client::stream;
use domain::rdata::ZoneRecordData;
use domain::resolv::StubResolver;
use futures_util::future::join_all;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use self::cache::{DnsCache, DEFAULT_CACHE_SIZE};
use self::servers::ServerStats;
use crate::util::fqdn;

/// Referral chains longer than this abort resolution.
const MAX_RECURSION_DEPTH: usize = 30;

/// How long to wait for any single DNS exchange.
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Upper bound on the lifetime of negative cache entries.
const MAX_NEGATIVE_TTL: Duration = Duration::from_secs(300);

/// Cache lifetime when a response carries no TTL information at all.
const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Lower bound on computed cache lifetimes.
const MIN_TTL: u32 = 60;

/// Starting ceiling for the minimum-TTL scan.
const TTL_CEILING: u32 = 3600;

//------------ Types ---------------------------------------------------------

/// A resource record owned by the resolver, detached from its message.
pub type StoredRecord = Record<Name<Bytes>, ZoneRecordData<Bytes, Name<Bytes>>>;

/// The outcome of a lookup: the three response sections plus metadata.
///
/// Values are immutable once the resolver hands them out and are shared
/// behind an `Arc` between the cache and all callers.
#[derive(Clone, Debug)]
pub struct Lookup {
    /// Records answering the question.
    pub answer: Vec<StoredRecord>,
    /// NS records delegating the queried name.
    pub authority: Vec<StoredRecord>,
    /// Glue and other additional records.
    pub additional: Vec<StoredRecord>,
    /// The response code of the (merged) response.
    pub rcode: Rcode,
    /// Whether any contributing server answered authoritatively.
    pub authoritative: bool,
}

//------------ ResolveError --------------------------------------------------

/// Errors returned by the resolver.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The referral chain exceeded [`MAX_RECURSION_DEPTH`].
    #[error("maximum recursion depth exceeded")]
    MaxDepth,

    /// There was no server left to ask.
    #[error("no nameservers available")]
    NoNameservers,

    /// Every server was asked and none produced an answer.
    #[error("no answer found for {0}")]
    NoAnswer(String),

    /// No server produced any response at all (merge mode).
    #[error("no nameservers responded for {0}")]
    NoResponses(String),

    /// An address lookup produced no addresses.
    #[error("no IP addresses found for {0}")]
    NoAddresses(String),

    /// The queried name is not a valid domain name.
    #[error("invalid domain name {0:?}")]
    BadName(String),

    /// The query message could not be composed.
    #[error("failed to compose query")]
    Compose,

    /// The operation was cancelled.
    #[error("resolution cancelled")]
    Cancelled,

    /// The exchange timed out.
    #[error("query timed out")]
    Timeout,

    /// A response could not be parsed.
    #[error("malformed response: {0}")]
    Malformed(#[from] ParseError),

    /// The transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] domain::net::client::request::Error),

    /// The host resolver failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

//------------ Resolver ------------------------------------------------------

/// A recursive DNS resolver with caching and server statistics.
///
/// The resolver is cheap to share: all mutable state lives behind internal
/// synchronization, so a single value serves every worker for the process
/// lifetime.
#[derive(Debug)]
pub struct Resolver {
    /// Cache of completed lookups, positive and negative.
    cache: DnsCache,

    /// Per-endpoint RTT and failure statistics.
    stats: ServerStats,

    /// The host resolver, used to bootstrap the root server set and to
    /// repair missing glue.
    stub: StubResolver,

    /// Root server addresses, resolved once per process.
    roots: OnceCell<Vec<SocketAddr>>,

    /// Timeout applied to every network exchange.
    timeout: Duration,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    /// Creates a resolver with the default cache size and query timeout.
    pub fn new() -> Self {
        Self::with_cache_size(DEFAULT_CACHE_SIZE, DEFAULT_QUERY_TIMEOUT)
    }

    /// Creates a resolver with the given query timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_cache_size(DEFAULT_CACHE_SIZE, timeout)
    }

    /// Creates a resolver that starts from the given root hints instead of
    /// resolving the root server names through the host resolver.
    pub fn with_root_hints(roots: Vec<SocketAddr>, timeout: Duration) -> Self {
        Resolver {
            roots: OnceCell::new_with(Some(roots)),
            ..Self::with_timeout(timeout)
        }
    }

    /// Creates a resolver with the given cache capacity and query timeout.
    pub fn with_cache_size(cache_size: usize, timeout: Duration) -> Self {
        Resolver {
            cache: DnsCache::new(cache_size),
            stats: ServerStats::default(),
            stub: StubResolver::new(),
            roots: OnceCell::new(),
            timeout,
        }
    }

    /// Resolves `domain` iteratively, returning the first usable answer.
    ///
    /// Resolution starts at the root servers and follows the delegation
    /// chain. An NXDOMAIN response ends the walk immediately since it is
    /// authoritative for non-existence. Successful results are cached by
    /// their TTL; NXDOMAIN results are cached as negative entries.
    pub async fn resolve(
        &self,
        domain: &str,
        qtype: Rtype,
        token: &CancellationToken,
    ) -> Result<Arc<Lookup>, ResolveError> {
        if token.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        let domain = fqdn(domain);
        let key = make_cache_key(&domain, qtype, false);
        if let Some(hit) = self.cache.get(&key) {
            trace!(%domain, ?qtype, "resolver cache hit");
            return Ok(hit);
        }

        let qname = parse_name(&domain)?;
        let roots = self.root_servers(token).await?;
        let result = self
            .resolve_at(&qname, qtype, roots, 0, token)
            .await
            .map(Arc::new)?;
        self.cache_result(&key, &result);
        Ok(result)
    }

    /// Resolves `domain` by querying all nameservers at each delegation
    /// level in parallel and merging their answers.
    ///
    /// The merged result is the set-union of all responses, deduplicated
    /// by textual record equality, and is cached under its own key space.
    pub async fn resolve_all(
        &self,
        domain: &str,
        qtype: Rtype,
        token: &CancellationToken,
    ) -> Result<Arc<Lookup>, ResolveError> {
        if token.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        let domain = fqdn(domain);
        let key = make_cache_key(&domain, qtype, true);
        if let Some(hit) = self.cache.get(&key) {
            trace!(%domain, ?qtype, "resolver cache hit (all)");
            return Ok(hit);
        }

        let qname = parse_name(&domain)?;
        let roots = self.root_servers(token).await?;
        let result = self
            .resolve_all_at(&qname, qtype, roots, 0, token)
            .await
            .map(Arc::new)?;
        self.cache_result(&key, &result);
        Ok(result)
    }

    /// Looks up the IPv4 and IPv6 addresses of `host`.
    pub async fn lookup_ip(
        &self,
        host: &str,
        token: &CancellationToken,
    ) -> Result<Vec<IpAddr>, ResolveError> {
        let mut ips = Vec::new();
        if let Ok(result) = self.resolve(host, Rtype::A, token).await {
            if result.rcode == Rcode::NOERROR {
                ips.extend(addresses(&result.answer));
            }
        }
        if let Ok(result) = self.resolve(host, Rtype::AAAA, token).await {
            if result.rcode == Rcode::NOERROR {
                ips.extend(addresses(&result.answer));
            }
        }
        if ips.is_empty() {
            return Err(ResolveError::NoAddresses(host.to_string()));
        }
        Ok(ips)
    }

    /// Looks up every address of `host` known to any of its authoritative
    /// servers.
    ///
    /// The A and AAAA queries run in parallel, each in merge-all mode.
    pub async fn lookup_ip_all(
        &self,
        host: &str,
        token: &CancellationToken,
    ) -> Result<Vec<IpAddr>, ResolveError> {
        let (v4, v6) = tokio::join!(
            self.resolve_all(host, Rtype::A, token),
            self.resolve_all(host, Rtype::AAAA, token),
        );
        let mut ips = Vec::new();
        if let Ok(result) = v4 {
            if result.rcode == Rcode::NOERROR {
                ips.extend(addresses(&result.answer));
            }
        }
        if let Ok(result) = v6 {
            if result.rcode == Rcode::NOERROR {
                ips.extend(addresses(&result.answer));
            }
        }
        if ips.is_empty() {
            return Err(ResolveError::NoAddresses(host.to_string()));
        }
        Ok(ips)
    }

    /// Returns the memoized root server addresses, resolving the 13 root
    /// server hostnames through the host resolver on first use.
    async fn root_servers(
        &self,
        token: &CancellationToken,
    ) -> Result<Vec<SocketAddr>, ResolveError> {
        let init = self.roots.get_or_try_init(|| async {
            let lookups =
                join_all(ROOT_SERVER_NAMES.iter().map(|name| async move {
                    let qname = parse_name(name)?;
                    let found = self.stub.lookup_host(&qname).await?;
                    Ok::<_, ResolveError>(
                        found
                            .iter()
                            .map(|ip| SocketAddr::new(ip, 53))
                            .collect::<Vec<_>>(),
                    )
                }))
                .await;
            let mut servers = Vec::new();
            for lookup in lookups {
                match lookup {
                    Ok(mut addrs) => servers.append(&mut addrs),
                    Err(err) => debug!("root server lookup failed: {err}"),
                }
            }
            if servers.is_empty() {
                return Err(ResolveError::NoNameservers);
            }
            debug!("resolved {} root server addresses", servers.len());
            Ok(servers)
        });
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(ResolveError::Cancelled),
            servers = init => Ok(servers?.clone()),
        }
    }

    /// One step of first-answer resolution at a set of candidate servers.
    async fn resolve_at(
        &self,
        qname: &Name<Bytes>,
        qtype: Rtype,
        mut servers: Vec<SocketAddr>,
        depth: usize,
        token: &CancellationToken,
    ) -> Result<Lookup, ResolveError> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(ResolveError::MaxDepth);
        }
        if servers.is_empty() {
            return Err(ResolveError::NoNameservers);
        }
        self.stats.order(&mut servers);

        for addr in servers {
            let result = match self.query_server(addr, qname, qtype, token).await {
                Ok(result) => result,
                Err(ResolveError::Cancelled) => {
                    return Err(ResolveError::Cancelled)
                }
                Err(err) => {
                    trace!(%qname, %addr, "query failed: {err}");
                    continue;
                }
            };

            if result.rcode != Rcode::NOERROR {
                if result.rcode == Rcode::NXDOMAIN {
                    return Ok(result);
                }
                // REFUSED, NOTAUTH and the like just mean "ask elsewhere"
                // at this layer.
                continue;
            }

            if !result.answer.is_empty() {
                let mut result = result;
                self.chase_cnames(&mut result.answer, qtype, depth, token)
                    .await;
                return Ok(result);
            }

            if !result.authority.is_empty() {
                let ns_names = extract_ns(&result.authority);
                if ns_names.is_empty() {
                    continue;
                }
                let next = self
                    .nameserver_addrs(&ns_names, &result.additional, token)
                    .await?;
                if next.is_empty() {
                    continue;
                }
                return Box::pin(
                    self.resolve_at(qname, qtype, next, depth + 1, token),
                )
                .await;
            }
        }

        Err(ResolveError::NoAnswer(qname.to_string()))
    }

    /// One step of merge-all resolution: every candidate server is asked
    /// in parallel and the responses are unioned before descending.
    async fn resolve_all_at(
        &self,
        qname: &Name<Bytes>,
        qtype: Rtype,
        mut servers: Vec<SocketAddr>,
        depth: usize,
        token: &CancellationToken,
    ) -> Result<Lookup, ResolveError> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(ResolveError::MaxDepth);
        }
        if servers.is_empty() {
            return Err(ResolveError::NoNameservers);
        }
        self.stats.order(&mut servers);

        let responses = join_all(
            servers
                .iter()
                .map(|&addr| self.query_server(addr, qname, qtype, token)),
        )
        .await;
        if token.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        let responses: Vec<Lookup> =
            responses.into_iter().filter_map(Result::ok).collect();
        if responses.is_empty() {
            return Err(ResolveError::NoResponses(qname.to_string()));
        }

        let mut merged = merge_lookups(responses);
        if merged.rcode != Rcode::NOERROR {
            return Ok(merged);
        }

        if !merged.answer.is_empty() {
            self.chase_cnames_all(&mut merged.answer, qtype, depth, token)
                .await;
            return Ok(merged);
        }

        if !merged.authority.is_empty() {
            let ns_names = extract_ns(&merged.authority);
            if ns_names.is_empty() {
                return Ok(merged);
            }
            let next = self
                .nameserver_addrs(&ns_names, &merged.additional, token)
                .await?;
            if next.is_empty() {
                return Ok(merged);
            }
            return Box::pin(
                self.resolve_all_at(qname, qtype, next, depth + 1, token),
            )
            .await;
        }

        Ok(merged)
    }

    /// Sends one query to one server and parses the response.
    ///
    /// Success and failure both feed the per-endpoint statistics.
    async fn query_server(
        &self,
        addr: SocketAddr,
        qname: &Name<Bytes>,
        qtype: Rtype,
        token: &CancellationToken,
    ) -> Result<Lookup, ResolveError> {
        trace!(%addr, %qname, ?qtype, "sending query");
        let msg = build_query(qname, qtype)?;
        let started = Instant::now();
        let reply = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(ResolveError::Cancelled),
            reply = self.exchange(addr, msg) => reply,
        };
        match reply {
            Ok(msg) => {
                self.stats.record_success(addr, started.elapsed());
                parse_reply(&msg)
            }
            Err(err) => {
                self.stats.record_failure(addr);
                Err(err)
            }
        }
    }

    /// Performs a UDP exchange, falling back to TCP on truncation.
    async fn exchange(
        &self,
        addr: SocketAddr,
        msg: Message<Vec<u8>>,
    ) -> Result<Message<Bytes>, ResolveError> {
        let mut config = dgram::Config::default();
        config.set_read_timeout(self.timeout);
        config.set_max_retries(1);
        let conn =
            dgram::Connection::with_config(UdpConnect::new(addr), config);
        let request = RequestMessage::new(msg.clone())
            .map_err(|_| ResolveError::Compose)?;
        let mut get = conn.send_request(request);
        let reply = get.get_response().await?;
        if reply.header().tc() {
            trace!(%addr, "response truncated, retrying over TCP");
            return self.exchange_stream(addr, msg).await;
        }
        Ok(reply)
    }

    /// Performs a one-shot exchange over a fresh TCP connection.
    async fn exchange_stream(
        &self,
        addr: SocketAddr,
        msg: Message<Vec<u8>>,
    ) -> Result<Message<Bytes>, ResolveError> {
        let tcp = tokio::time::timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ResolveError::Timeout)??;
        let mut config = stream::Config::default();
        config.set_response_timeout(self.timeout);
        let (conn, transport) = stream::Connection::<
            RequestMessage<Vec<u8>>,
            RequestMessageMulti<Vec<u8>>,
        >::with_config(tcp, config);
        tokio::spawn(transport.run());
        let request =
            RequestMessage::new(msg).map_err(|_| ResolveError::Compose)?;
        let mut get = conn.send_request(request);
        Ok(get.get_response().await?)
    }

    /// Appends the resolved targets of any CNAME records in `answer`.
    async fn chase_cnames(
        &self,
        answer: &mut Vec<StoredRecord>,
        qtype: Rtype,
        depth: usize,
        token: &CancellationToken,
    ) {
        if qtype == Rtype::CNAME {
            return;
        }
        let mut chased = Vec::with_capacity(answer.len());
        for record in answer.drain(..) {
            let target = match record.data() {
                ZoneRecordData::Cname(cname) => Some(cname.cname().clone()),
                _ => None,
            };
            chased.push(record);
            if let Some(target) = target {
                let Ok(roots) = self.root_servers(token).await else {
                    continue;
                };
                if let Ok(result) = Box::pin(
                    self.resolve_at(&target, qtype, roots, depth + 1, token),
                )
                .await
                {
                    chased.extend(result.answer);
                }
            }
        }
        *answer = chased;
    }

    /// Like [`Self::chase_cnames`] but resolving targets in merge-all mode.
    async fn chase_cnames_all(
        &self,
        answer: &mut Vec<StoredRecord>,
        qtype: Rtype,
        depth: usize,
        token: &CancellationToken,
    ) {
        if qtype == Rtype::CNAME {
            return;
        }
        let mut chased = Vec::with_capacity(answer.len());
        for record in answer.drain(..) {
            let target = match record.data() {
                ZoneRecordData::Cname(cname) => Some(cname.cname().clone()),
                _ => None,
            };
            chased.push(record);
            if let Some(target) = target {
                let Ok(roots) = self.root_servers(token).await else {
                    continue;
                };
                if let Ok(result) = Box::pin(self.resolve_all_at(
                    &target,
                    qtype,
                    roots,
                    depth + 1,
                    token,
                ))
                .await
                {
                    chased.extend(result.answer);
                }
            }
        }
        *answer = chased;
    }

    /// Turns the nameservers of a referral into socket addresses.
    ///
    /// Glue from the additional section is used where present; nameservers
    /// without glue are resolved through the host resolver, all of them in
    /// parallel. Candidate order follows the NS record order.
    async fn nameserver_addrs(
        &self,
        ns_names: &[Name<Bytes>],
        additional: &[StoredRecord],
        token: &CancellationToken,
    ) -> Result<Vec<SocketAddr>, ResolveError> {
        let mut glue: HashMap<&Name<Bytes>, Vec<IpAddr>> = HashMap::new();
        for record in additional {
            let ip = match record.data() {
                ZoneRecordData::A(a) => IpAddr::V4(a.addr()),
                ZoneRecordData::Aaaa(aaaa) => IpAddr::V6(aaaa.addr()),
                _ => continue,
            };
            glue.entry(record.owner()).or_default().push(ip);
        }

        let missing: Vec<&Name<Bytes>> = ns_names
            .iter()
            .filter(|ns| !glue.contains_key(*ns))
            .collect();
        let repaired: HashMap<&Name<Bytes>, Vec<IpAddr>> = if missing
            .is_empty()
        {
            HashMap::new()
        } else {
            debug!("repairing missing glue for {} nameservers", missing.len());
            let lookups = join_all(missing.iter().map(|&ns| async move {
                let found = self.stub.lookup_host(ns).await.ok()?;
                Some((ns, found.iter().collect::<Vec<_>>()))
            }));
            let lookups = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(ResolveError::Cancelled),
                lookups = lookups => lookups,
            };
            lookups.into_iter().flatten().collect()
        };

        let mut addrs = Vec::new();
        for ns in ns_names {
            let ips = glue.get(ns).or_else(|| repaired.get(ns));
            if let Some(ips) = ips {
                addrs.extend(ips.iter().map(|&ip| SocketAddr::new(ip, 53)));
            }
        }
        Ok(addrs)
    }

    /// Stores a finished lookup in the cache.
    fn cache_result(&self, key: &str, result: &Arc<Lookup>) {
        match result.rcode {
            Rcode::NOERROR => {
                self.cache.put(key, result.clone(), calculate_ttl(result));
            }
            Rcode::NXDOMAIN => {
                let ttl = calculate_ttl(result).min(MAX_NEGATIVE_TTL);
                self.cache.put_negative(key, result.clone(), ttl);
            }
            _ => {}
        }
    }
}

//------------ Helpers -------------------------------------------------------

/// Builds the cache key for a lookup.
///
/// Merge-all results live in their own key space so the two modes never
/// serve each other's entries.
fn make_cache_key(domain: &str, qtype: Rtype, all: bool) -> String {
    let suffix = if all { "_ALL" } else { "" };
    format!("{}{}:{}", domain, suffix, qtype.to_int())
}

/// Computes the cache lifetime of a lookup.
///
/// The minimum TTL across answer and authority records wins, starting from
/// a ceiling of one hour. NXDOMAIN results also consider the SOA MINIMUM
/// field. The result is floored at one minute; a response without any TTL
/// information defaults to five minutes.
fn calculate_ttl(result: &Lookup) -> Duration {
    let mut min_ttl = TTL_CEILING;
    for record in result.answer.iter().chain(&result.authority) {
        min_ttl = min_ttl.min(record.ttl().as_secs());
    }
    if result.rcode == Rcode::NXDOMAIN {
        for record in &result.authority {
            if let ZoneRecordData::Soa(soa) = record.data() {
                min_ttl = min_ttl.min(soa.minimum().as_secs());
            }
        }
    }
    if min_ttl == TTL_CEILING
        && result.answer.is_empty()
        && result.authority.is_empty()
    {
        return DEFAULT_TTL;
    }
    Duration::from_secs(min_ttl.max(MIN_TTL).into())
}

/// Parses a presentation-format name, reporting the offending input.
fn parse_name(name: &str) -> Result<Name<Bytes>, ResolveError> {
    Name::from_str(name).map_err(|_| ResolveError::BadName(name.to_string()))
}

/// Composes a non-recursive query for `qname`/`qtype`.
fn build_query(
    qname: &Name<Bytes>,
    qtype: Rtype,
) -> Result<Message<Vec<u8>>, ResolveError> {
    let mut msg = MessageBuilder::new_vec();
    msg.header_mut().set_rd(false);
    let mut msg = msg.question();
    msg.push((qname, qtype)).map_err(|_| ResolveError::Compose)?;
    Ok(msg.into_message())
}

/// Parses a response message into an owned [`Lookup`].
fn parse_reply(msg: &Message<Bytes>) -> Result<Lookup, ResolveError> {
    let header = msg.header();
    Ok(Lookup {
        answer: flatten_section(msg.answer()?),
        authority: flatten_section(msg.authority()?),
        additional: flatten_section(msg.additional()?),
        rcode: header.rcode(),
        authoritative: header.aa(),
    })
}

/// Copies every parseable record of a section out of its message.
fn flatten_section(section: RecordSection<'_, Bytes>) -> Vec<StoredRecord> {
    section
        .limit_to::<ZoneRecordData<Bytes, ParsedName<Bytes>>>()
        .filter_map(|record| record.ok())
        .filter_map(|record| record.try_flatten_into().ok())
        .collect()
}

/// Extracts the target names of all NS records in a section.
fn extract_ns(authority: &[StoredRecord]) -> Vec<Name<Bytes>> {
    authority
        .iter()
        .filter_map(|record| match record.data() {
            ZoneRecordData::Ns(ns) => Some(ns.nsdname().clone()),
            _ => None,
        })
        .collect()
}

/// Extracts all A and AAAA addresses from a record sequence.
fn addresses(records: &[StoredRecord]) -> Vec<IpAddr> {
    records
        .iter()
        .filter_map(|record| match record.data() {
            ZoneRecordData::A(a) => Some(IpAddr::V4(a.addr())),
            ZoneRecordData::Aaaa(aaaa) => Some(IpAddr::V6(aaaa.addr())),
            _ => None,
        })
        .collect()
}

/// Merges responses from multiple servers into one lookup.
///
/// The rcode promotes to NOERROR if any server succeeded, else to NXDOMAIN
/// if any server reported it, else SERVFAIL. Records are set-unioned by
/// their presentation format across all three sections.
fn merge_lookups(results: Vec<Lookup>) -> Lookup {
    let mut merged = Lookup {
        answer: Vec::new(),
        authority: Vec::new(),
        additional: Vec::new(),
        rcode: Rcode::SERVFAIL,
        authoritative: false,
    };
    let mut seen = std::collections::HashSet::new();

    for result in results {
        if result.rcode == Rcode::NOERROR {
            merged.rcode = Rcode::NOERROR;
        } else if merged.rcode == Rcode::SERVFAIL
            && result.rcode == Rcode::NXDOMAIN
        {
            merged.rcode = Rcode::NXDOMAIN;
        }
        merged.authoritative |= result.authoritative;

        for record in result.answer {
            if seen.insert(record.to_string()) {
                merged.answer.push(record);
            }
        }
        for record in result.authority {
            if seen.insert(record.to_string()) {
                merged.authority.push(record);
            }
        }
        for record in result.additional {
            if seen.insert(record.to_string()) {
                merged.additional.push(record);
            }
        }
    }

    merged
}

//============ Tests =========================================================
