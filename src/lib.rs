//! A bulk DNS zone-transfer harvester.
//!
//! ALLXFR starts from a seed of DNS zones — normally the root zone,
//! obtained by AXFR from whichever root server permits it, optionally
//! augmented by a parsed zone file, the Public Suffix List and names from
//! the command line — and attempts a zone transfer against every
//! authoritative server address of every zone. The first (or, in save-all
//! mode, every) successful transfer is persisted as a gzip-compressed zone
//! file with atomic rename semantics.
//!
//! The crate splits into a handful of cooperating parts:
//!
//! * [`zone`] holds the in-memory model of zones, nameservers and glue and
//!   streams pending zone names to the workers.
//! * [`resolver`] is a recursive resolver used for every address the zone
//!   model has no glue for, with an LRU cache, per-server RTT ranking and
//!   a circuit breaker.
//! * [`xfr`] is the transfer engine: candidate enumeration, retry policy,
//!   refusal classification and the envelope stream.
//! * [`zonefile`] writes compressed zone files that either appear complete
//!   on disk or not at all.
//! * [`pool`] fans the work out over a fixed number of workers.
//! * [`status`] tracks progress and serves it over HTTP on request.
//! * [`root`] and [`psl`] provide the two remote bootstrap sources.

pub mod config;
pub mod pool;
pub mod psl;
pub mod resolver;
pub mod root;
pub mod status;
mod util;
pub mod xfr;
pub mod zone;
pub mod zonefile;
