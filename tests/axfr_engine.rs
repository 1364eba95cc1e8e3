//! Transfer engine scenarios against an in-process DNS server.
//!
//! The mock server speaks just enough DNS-over-TCP for the engine: it
//! reads one length-prefixed query per connection and answers according to
//! its configured behavior. All scenarios run against loopback listeners
//! on unprivileged ports via the engine's `port` setting; recursive lookups
//! are pointed at a dead loopback port so the resolver phase fails fast
//! without touching the network.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use domain::base::iana::{Class, Rcode};
use domain::base::{Message, MessageBuilder, Name, Record, Serial, Ttl};
use domain::rdata::{Ns, Soa, ZoneRecordData, A};
use flate2::read::GzDecoder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use allxfr::pool;
use allxfr::resolver::Resolver;
use allxfr::status::StatusTracker;
use allxfr::xfr::{Config, Engine, XfrError};
use allxfr::zone::Zone;

type TestRecord = Record<Name<Bytes>, ZoneRecordData<Bytes, Name<Bytes>>>;

//------------ Mock server ---------------------------------------------------

/// What the mock server does with a transfer request.
#[derive(Clone)]
enum Behavior {
    /// Answer REFUSED.
    Refuse,

    /// Stream the given envelopes, then close the connection.
    Serve(Vec<Vec<TestRecord>>),

    /// Stream the given envelopes, then leave the connection open.
    ServeThenHang(Vec<Vec<TestRecord>>),

    /// Accept the query and never answer.
    Hang,
}

struct MockServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
}

impl MockServer {
    /// Starts a server on `ip`. Port 0 picks a free port.
    async fn start(ip: IpAddr, port: u16, behavior: Behavior) -> Self {
        let listener = TcpListener::bind((ip, port)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(handle_connection(socket, behavior.clone()));
            }
        });
        MockServer { addr, connections }
    }

    fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn handle_connection(mut socket: TcpStream, behavior: Behavior) {
    let Ok(request) = read_message(&mut socket).await else {
        return;
    };
    match behavior {
        Behavior::Refuse => {
            let wire = build_response(&request, Rcode::REFUSED, &[]);
            let _ = write_message(&mut socket, &wire).await;
        }
        Behavior::Serve(envelopes) => {
            for envelope in &envelopes {
                let wire = build_response(&request, Rcode::NOERROR, envelope);
                if write_message(&mut socket, &wire).await.is_err() {
                    return;
                }
            }
        }
        Behavior::ServeThenHang(envelopes) => {
            for envelope in &envelopes {
                let wire = build_response(&request, Rcode::NOERROR, envelope);
                if write_message(&mut socket, &wire).await.is_err() {
                    return;
                }
            }
            std::future::pending::<()>().await;
        }
        Behavior::Hang => {
            std::future::pending::<()>().await;
        }
    }
}

async fn read_message(
    socket: &mut TcpStream,
) -> std::io::Result<Message<Bytes>> {
    let len = socket.read_u16().await?;
    let mut buf = vec![0u8; len as usize];
    socket.read_exact(&mut buf).await?;
    Message::from_octets(Bytes::from(buf)).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "bad query")
    })
}

async fn write_message(
    socket: &mut TcpStream,
    wire: &[u8],
) -> std::io::Result<()> {
    socket.write_u16(wire.len() as u16).await?;
    socket.write_all(wire).await?;
    socket.flush().await
}

fn build_response(
    request: &Message<Bytes>,
    rcode: Rcode,
    records: &[TestRecord],
) -> Vec<u8> {
    let mut builder = MessageBuilder::new_vec()
        .start_answer(request, rcode)
        .unwrap();
    for record in records {
        builder.push(record.clone()).unwrap();
    }
    builder.into_message().into_octets()
}

//------------ Test data -----------------------------------------------------

const ZONE: &str = "xfrtest.test.";

fn name(name: &str) -> Name<Bytes> {
    Name::from_str(name).unwrap()
}

fn soa_record() -> TestRecord {
    Record::new(
        name(ZONE),
        Class::IN,
        Ttl::from_secs(3600),
        ZoneRecordData::Soa(Soa::new(
            name("ns1.xfrtest.test."),
            name("hostmaster.xfrtest.test."),
            Serial(2024010101),
            Ttl::from_secs(7200),
            Ttl::from_secs(3600),
            Ttl::from_secs(86400),
            Ttl::from_secs(300),
        )),
    )
}

fn ns_record(target: &str) -> TestRecord {
    Record::new(
        name(ZONE),
        Class::IN,
        Ttl::from_secs(3600),
        ZoneRecordData::Ns(Ns::new(name(target))),
    )
}

fn a_record(owner: &str, last: u8) -> TestRecord {
    Record::new(
        name(owner),
        Class::IN,
        Ttl::from_secs(3600),
        ZoneRecordData::A(A::new([192, 0, 2, last].into())),
    )
}

/// A complete little AXFR stream: five records over two envelopes.
fn axfr_envelopes() -> Vec<Vec<TestRecord>> {
    vec![
        vec![
            soa_record(),
            ns_record("ns1.xfrtest.test."),
            a_record("www.xfrtest.test.", 10),
        ],
        vec![a_record("mail.xfrtest.test.", 20), soa_record()],
    ]
}

/// A zone model with glue pointing at the mock server.
fn glue_zone(servers: &[(&str, IpAddr)]) -> Zone {
    let mut zone = Zone::new();
    for (ns, ip) in servers {
        zone.add_ns(ZONE, ns);
        zone.add_ip(ns, *ip);
    }
    zone
}

/// An engine whose transfers go to `port` and whose recursive lookups die
/// quickly against a closed loopback port.
fn engine(dir: &Path, port: u16, config: Config) -> Engine {
    let resolver = Resolver::with_root_hints(
        vec![SocketAddr::from(([127, 0, 0, 1], 1))],
        Duration::from_millis(100),
    );
    let config = Config {
        save_dir: dir.to_path_buf(),
        port,
        ..config
    };
    Engine::new(config, Arc::new(resolver), None)
}

fn saved_files(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    files.sort();
    files
}

fn read_gz(path: &Path) -> String {
    use std::io::Read;
    let mut text = String::new();
    GzDecoder::new(std::fs::File::open(path).unwrap())
        .read_to_string(&mut text)
        .unwrap();
    text
}

//------------ Scenarios -----------------------------------------------------

#[tokio::test]
async fn refusal_breaks_the_retry_loop_and_leaves_no_file() {
    let server =
        MockServer::start("127.0.0.1".parse().unwrap(), 0, Behavior::Refuse)
            .await;
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(
        dir.path(),
        server.addr.port(),
        Config {
            retry: 3,
            ..Config::default()
        },
    );
    let zone = glue_zone(&[("ns1.xfrtest.test.", server.addr.ip())]);
    let token = CancellationToken::new();

    engine.transfer_zone(&zone, ZONE, &token).await.unwrap();

    // An explicit refusal is terminal for the address: one connection,
    // not `retry` of them.
    assert_eq!(server.connection_count(), 1);
    assert!(saved_files(dir.path()).is_empty());
    assert_eq!(engine.total_transfers(), 0);
}

#[tokio::test]
async fn first_hit_saves_one_complete_file() {
    let server = MockServer::start(
        "127.0.0.1".parse().unwrap(),
        0,
        Behavior::Serve(axfr_envelopes()),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(
        dir.path(),
        server.addr.port(),
        Config {
            retry: 1,
            ..Config::default()
        },
    );
    let zone = glue_zone(&[("ns1.xfrtest.test.", server.addr.ip())]);
    let token = CancellationToken::new();

    engine.transfer_zone(&zone, ZONE, &token).await.unwrap();

    assert_eq!(saved_files(dir.path()), ["xfrtest.test.zone.gz"]);
    assert_eq!(engine.total_transfers(), 1);

    let text = read_gz(&dir.path().join("xfrtest.test.zone.gz"));
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines[0].starts_with("; Generated by ALLXFR"));
    assert!(lines.contains(&"; zone: xfrtest.test."));
    assert!(lines.contains(&"; nameserver: ns1.xfrtest.test."));
    assert!(lines
        .contains(&format!("; nameserverIP: {}", server.addr.ip()).as_str()));
    assert!(lines.contains(&"; xfr: AXFR"));
    assert!(lines.contains(&"; records: 5"));
    assert!(lines.contains(&"; envelopes: 2"));
    assert_eq!(
        text.lines().filter(|line| !line.starts_with(';')).count(),
        5
    );
}

#[tokio::test]
async fn save_all_keeps_one_file_per_server() {
    let ip1: IpAddr = "127.0.0.1".parse().unwrap();
    let ip2: IpAddr = "127.0.0.2".parse().unwrap();
    let server1 =
        MockServer::start(ip1, 0, Behavior::Serve(axfr_envelopes())).await;
    let port = server1.addr.port();
    let server2 =
        MockServer::start(ip2, port, Behavior::Serve(axfr_envelopes())).await;

    let dir = tempfile::tempdir().unwrap();
    let engine = engine(
        dir.path(),
        port,
        Config {
            save_all: true,
            retry: 1,
            ..Config::default()
        },
    );
    let zone = glue_zone(&[
        ("ns1.xfrtest.test.", ip1),
        ("ns2.xfrtest.test.", ip2),
    ]);
    let token = CancellationToken::new();

    engine.transfer_zone(&zone, ZONE, &token).await.unwrap();

    assert_eq!(
        saved_files(dir.path()),
        [
            format!("xfrtest.test_ns1.xfrtest.test._{}_zone.gz", ip1),
            format!("xfrtest.test_ns2.xfrtest.test._{}_zone.gz", ip2),
        ]
    );
    assert_eq!(engine.total_transfers(), 2);
    assert_eq!(server2.connection_count(), 1);
}

#[tokio::test]
async fn first_hit_stops_after_the_first_success() {
    let ip1: IpAddr = "127.0.0.1".parse().unwrap();
    let ip2: IpAddr = "127.0.0.2".parse().unwrap();
    let server1 =
        MockServer::start(ip1, 0, Behavior::Serve(axfr_envelopes())).await;
    let port = server1.addr.port();
    let server2 =
        MockServer::start(ip2, port, Behavior::Serve(axfr_envelopes())).await;

    let dir = tempfile::tempdir().unwrap();
    let engine = engine(
        dir.path(),
        port,
        Config {
            retry: 1,
            ..Config::default()
        },
    );
    let zone = glue_zone(&[
        ("ns1.xfrtest.test.", ip1),
        ("ns2.xfrtest.test.", ip2),
    ]);
    let token = CancellationToken::new();

    engine.transfer_zone(&zone, ZONE, &token).await.unwrap();

    assert_eq!(saved_files(dir.path()), ["xfrtest.test.zone.gz"]);
    assert_eq!(server1.connection_count(), 1);
    assert_eq!(server2.connection_count(), 0);
}

#[tokio::test]
async fn dry_run_reports_success_but_writes_nothing() {
    let server = MockServer::start(
        "127.0.0.1".parse().unwrap(),
        0,
        Behavior::Serve(axfr_envelopes()),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(
        dir.path(),
        server.addr.port(),
        Config {
            dry_run: true,
            retry: 1,
            ..Config::default()
        },
    );
    let zone = glue_zone(&[("ns1.xfrtest.test.", server.addr.ip())]);
    let token = CancellationToken::new();

    engine.transfer_zone(&zone, ZONE, &token).await.unwrap();

    assert!(saved_files(dir.path()).is_empty());
    assert_eq!(engine.total_transfers(), 1);
}

#[tokio::test]
async fn cancellation_mid_stream_keeps_the_partial_file() {
    let envelopes = vec![vec![
        soa_record(),
        a_record("www.xfrtest.test.", 10),
        a_record("mail.xfrtest.test.", 20),
    ]];
    let server = MockServer::start(
        "127.0.0.1".parse().unwrap(),
        0,
        Behavior::ServeThenHang(envelopes),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(engine(
        dir.path(),
        server.addr.port(),
        Config {
            retry: 1,
            ..Config::default()
        },
    ));
    let zone = glue_zone(&[("ns1.xfrtest.test.", server.addr.ip())]);
    let token = CancellationToken::new();

    let task = {
        let engine = engine.clone();
        let token = token.clone();
        tokio::spawn(async move {
            engine.transfer_zone(&zone, ZONE, &token).await
        })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;
    token.cancel();
    let result = task.await.unwrap();
    assert!(matches!(result, Err(XfrError::Cancelled)));

    // Three records made it to disk, so the finalizer renamed the file.
    assert_eq!(saved_files(dir.path()), ["xfrtest.test.zone.gz"]);
    let text = read_gz(&dir.path().join("xfrtest.test.zone.gz"));
    assert!(text.contains("; records: 3"));
}

#[tokio::test]
async fn cancellation_without_records_leaves_nothing() {
    let server =
        MockServer::start("127.0.0.1".parse().unwrap(), 0, Behavior::Hang)
            .await;
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(engine(
        dir.path(),
        server.addr.port(),
        Config {
            retry: 1,
            ..Config::default()
        },
    ));
    let zone = glue_zone(&[("ns1.xfrtest.test.", server.addr.ip())]);
    let token = CancellationToken::new();

    let task = {
        let engine = engine.clone();
        let token = token.clone();
        tokio::spawn(async move {
            engine.transfer_zone(&zone, ZONE, &token).await
        })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;
    token.cancel();
    let result = task.await.unwrap();
    assert!(matches!(result, Err(XfrError::Cancelled)));
    assert!(saved_files(dir.path()).is_empty());
}

#[tokio::test]
async fn pool_drives_transfers_and_status_bookkeeping() {
    let server = MockServer::start(
        "127.0.0.1".parse().unwrap(),
        0,
        Behavior::Serve(axfr_envelopes()),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let tracker = Arc::new(StatusTracker::new());
    tracker.increment_total_zones(1);

    let resolver = Resolver::with_root_hints(
        vec![SocketAddr::from(([127, 0, 0, 1], 1))],
        Duration::from_millis(100),
    );
    let config = Config {
        save_dir: dir.path().to_path_buf(),
        port: server.addr.port(),
        retry: 1,
        ..Config::default()
    };
    let engine = Arc::new(Engine::new(
        config,
        Arc::new(resolver),
        Some(tracker.clone()),
    ));
    let zone =
        Arc::new(glue_zone(&[("ns1.xfrtest.test.", server.addr.ip())]));

    pool::run(engine.clone(), zone, 2, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(saved_files(dir.path()), ["xfrtest.test.zone.gz"]);
    assert_eq!(engine.total_transfers(), 1);
    let status = tracker.snapshot();
    assert_eq!(status.completed, 1);
    assert_eq!(status.failed, 0);
    assert_eq!(status.active, 0);
    assert_eq!(status.remaining, 0);
}

#[tokio::test]
async fn ixfr_mode_is_requested_and_recorded() {
    let server = MockServer::start(
        "127.0.0.1".parse().unwrap(),
        0,
        Behavior::Serve(axfr_envelopes()),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(
        dir.path(),
        server.addr.port(),
        Config {
            ixfr: true,
            retry: 1,
            ..Config::default()
        },
    );
    let zone = glue_zone(&[("ns1.xfrtest.test.", server.addr.ip())]);
    let token = CancellationToken::new();

    engine.transfer_zone(&zone, ZONE, &token).await.unwrap();

    let text = read_gz(&dir.path().join("xfrtest.test.zone.gz"));
    assert!(text.lines().any(|line| line == "; xfr: IXFR"));
}

#[tokio::test]
async fn existing_files_are_not_overwritten() {
    let server = MockServer::start(
        "127.0.0.1".parse().unwrap(),
        0,
        Behavior::Serve(axfr_envelopes()),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(
        dir.path(),
        server.addr.port(),
        Config {
            retry: 1,
            ..Config::default()
        },
    );
    let zone = glue_zone(&[("ns1.xfrtest.test.", server.addr.ip())]);
    let token = CancellationToken::new();

    engine.transfer_zone(&zone, ZONE, &token).await.unwrap();
    assert_eq!(server.connection_count(), 1);

    // The file exists now, so the second pass never dials the server.
    engine.transfer_zone(&zone, ZONE, &token).await.unwrap();
    assert_eq!(server.connection_count(), 1);
    assert_eq!(saved_files(dir.path()).len(), 1);
}

#[tokio::test]
async fn duplicate_glue_addresses_are_dialed_once() {
    let server =
        MockServer::start("127.0.0.1".parse().unwrap(), 0, Behavior::Refuse)
            .await;
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(
        dir.path(),
        server.addr.port(),
        Config {
            retry: 1,
            ..Config::default()
        },
    );
    // Two nameservers share the address; the second is the IPv4-mapped
    // spelling of the first.
    let mut zone = Zone::new();
    zone.add_ns(ZONE, "ns1.xfrtest.test.");
    zone.add_ip("ns1.xfrtest.test.", server.addr.ip());
    zone.add_ns(ZONE, "ns2.xfrtest.test.");
    zone.add_ip(
        "ns2.xfrtest.test.",
        format!("::ffff:{}", server.addr.ip()).parse().unwrap(),
    );
    let token = CancellationToken::new();

    engine.transfer_zone(&zone, ZONE, &token).await.unwrap();
    assert_eq!(server.connection_count(), 1);
}
