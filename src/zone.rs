//! The in-memory zone model.
//!
//! A [`Zone`] maps zone names to their nameserver hostnames and nameserver
//! hostnames to their glue addresses, exactly as harvested from a root
//! transfer, a parsed zone file, the PSL, or the command line. The model is
//! built single-threaded during bootstrap and then shared read-only with
//! the workers, which consume its names through a bounded channel.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use domain::base::Record;
use domain::rdata::ZoneRecordData;
use domain::zonefile::inplace::{Entry, Zonefile};
use flate2::read::GzDecoder;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::util::fqdn;

/// Errors while building a zone model from a zone file.
#[derive(Debug, Error)]
pub enum ZoneError {
    /// The file could not be opened or read.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The zone file text could not be parsed.
    #[error("zonefile parse error: {0}")]
    Parse(#[from] domain::zonefile::inplace::Error),
}

//------------ Zone ----------------------------------------------------------

/// A collection of zones, their nameservers and their glue addresses.
#[derive(Clone, Debug, Default)]
pub struct Zone {
    /// Zone name to nameserver hostnames, keys lowercase FQDNs.
    ns: HashMap<String, Vec<String>>,

    /// Nameserver hostname to its addresses, IPv4 and IPv6 mixed.
    ip: HashMap<String, Vec<IpAddr>>,

    /// Total records fed into the model.
    records: i64,
}

impl Zone {
    /// Creates an empty zone model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures `domain` is present, without naming a nameserver for it.
    pub fn add_name(&mut self, domain: &str) {
        self.ns.entry(fqdn(domain)).or_default();
    }

    /// Records `nameserver` as serving `domain`.
    ///
    /// Keys and values are normalized to lowercase FQDNs. Duplicates are
    /// kept; consumers deduplicate at the address level.
    pub fn add_ns(&mut self, domain: &str, nameserver: &str) {
        let entry = self.ns.entry(fqdn(domain)).or_default();
        if !nameserver.is_empty() {
            entry.push(fqdn(nameserver));
        }
    }

    /// Records `ip` as an address of `nameserver`.
    pub fn add_ip(&mut self, nameserver: &str, ip: IpAddr) {
        self.ip.entry(fqdn(nameserver)).or_default().push(ip);
    }

    /// Feeds one resource record into the model.
    ///
    /// NS records extend the zone map, A and AAAA records the glue map;
    /// everything else only counts toward the record total.
    pub fn add_record<N, Octs, NName>(
        &mut self,
        record: &Record<N, ZoneRecordData<Octs, NName>>,
    ) where
        N: fmt::Display,
        NName: fmt::Display,
    {
        self.records += 1;
        let owner = record.owner().to_string();
        match record.data() {
            ZoneRecordData::A(a) => {
                self.add_ip(&owner, IpAddr::V4(a.addr()));
            }
            ZoneRecordData::Aaaa(aaaa) => {
                self.add_ip(&owner, IpAddr::V6(aaaa.addr()));
            }
            ZoneRecordData::Ns(ns) => {
                self.add_ns(&owner, &ns.nsdname().to_string());
            }
            _ => {}
        }
    }

    /// Number of known zones.
    pub fn count_ns(&self) -> usize {
        self.ns.len()
    }

    /// Total records fed into the model.
    pub fn records(&self) -> i64 {
        self.records
    }

    /// The nameservers of `domain`, if any.
    pub fn nameservers(&self, domain: &str) -> &[String] {
        self.ns.get(domain).map(Vec::as_slice).unwrap_or_default()
    }

    /// The glue addresses of `nameserver`, if any.
    pub fn glue(&self, nameserver: &str) -> &[IpAddr] {
        self.ip.get(nameserver).map(Vec::as_slice).unwrap_or_default()
    }

    /// Streams every pending zone name through a bounded channel.
    ///
    /// The root zone and everything under `arpa.` are skipped. The channel
    /// closes once all names are out; consumers synchronize on that close.
    pub fn name_stream(self: &Arc<Self>) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(1);
        let zone = self.clone();
        tokio::spawn(async move {
            for name in zone.ns.keys() {
                if name == "." || name == "arpa." || name.ends_with(".arpa.") {
                    continue;
                }
                if tx.send(name.clone()).await.is_err() {
                    break;
                }
            }
        });
        rx
    }

    /// Dumps the whole zone → nameserver → address tree to the debug log.
    pub fn log_tree(&self) {
        debug!("zones:");
        for (zone, nameservers) in &self.ns {
            debug!("{zone}");
            for ns in nameservers {
                debug!("\t{ns}");
                for ip in self.glue(ns) {
                    debug!("\t\t{ip}");
                }
            }
        }
    }
}

//------------ Zone file input -----------------------------------------------

/// Builds a zone model from a zone file on disk.
///
/// Files ending in `.gz` are transparently decompressed. Every A, AAAA and
/// NS record feeds the model the same way root-transfer records do.
pub fn parse_zone_file(path: &Path) -> Result<Zone, ZoneError> {
    let file = File::open(path)?;
    let mut reader: Box<dyn Read> =
        if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };

    let mut zonefile = Zonefile::load(&mut reader)?;
    let mut zone = Zone::new();
    while let Some(entry) = zonefile.next_entry()? {
        if let Entry::Record(record) = entry {
            zone.add_record(&record);
        }
    }
    Ok(zone)
}

//============ Tests =========================================================
