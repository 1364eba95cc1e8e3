//! Writing harvested zones to disk.
//!
//! A [`ZoneWriter`] produces a gzip-compressed zone file with metadata
//! comments. Creation is lazy: nothing touches the disk until the first
//! record arrives, and comments written before that moment are buffered in
//! memory. Output goes to a `.tmp` sibling that is atomically renamed into
//! place on [`finish`] — but only when the file actually contains records;
//! an empty temp file is removed instead. A writer serves exactly one
//! transfer and is not safe for concurrent use.
//!
//! [`finish`]: ZoneWriter::finish

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{SecondsFormat, Utc};
use domain::base::Record;
use domain::rdata::ZoneRecordData;
use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use thiserror::Error;

/// The comment identifying the producing tool.
const GENERATOR: &str = "Generated by ALLXFR (https://github.com/lanrat/allxfr)";

/// Errors while writing a zone file.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The writer was already finished.
    #[error("file is already closed")]
    Closed,

    /// An underlying I/O operation failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

//------------ ZoneWriter ----------------------------------------------------

/// A lazily-created, gzip-compressed zone file writer.
#[derive(Debug)]
pub struct ZoneWriter {
    /// Final path of the zone file.
    filename: PathBuf,

    /// Path written to until the file is complete.
    tmp_filename: PathBuf,

    /// The zone this file holds, as an FQDN.
    zone: String,

    /// The output stack, present once the file has been created.
    writer: Option<BufWriter<GzEncoder<File>>>,

    /// Records written so far.
    records: i64,

    /// Set once [`Self::finish`] ran; all writes fail afterwards.
    closed: bool,

    /// Comment lines buffered until the file exists.
    pending: Vec<String>,
}

impl ZoneWriter {
    /// Creates a writer for `zone` ending up at `filename`.
    ///
    /// No file is created yet; that happens on the first record.
    pub fn new(zone: &str, filename: &Path) -> Self {
        let mut tmp_filename = filename.as_os_str().to_os_string();
        tmp_filename.push(".tmp");
        ZoneWriter {
            filename: filename.to_path_buf(),
            tmp_filename: PathBuf::from(tmp_filename),
            zone: zone.to_string(),
            writer: None,
            records: 0,
            closed: false,
            pending: Vec::new(),
        }
    }

    /// Records written so far.
    pub fn records(&self) -> i64 {
        self.records
    }

    /// Writes a comment line.
    ///
    /// Comments written before the file exists are buffered and replayed
    /// right after the metadata header once the first record arrives.
    pub fn write_comment(&mut self, text: &str) -> Result<(), WriteError> {
        if self.closed {
            return Err(WriteError::Closed);
        }
        let line = format!("; {}\n", text);
        match &mut self.writer {
            Some(writer) => writer.write_all(line.as_bytes())?,
            None => self.pending.push(line),
        }
        Ok(())
    }

    /// Writes a `; key: value` comment line.
    pub fn write_comment_key(
        &mut self,
        key: &str,
        value: impl fmt::Display,
    ) -> Result<(), WriteError> {
        self.write_comment(&format!("{}: {}", key, value))
    }

    /// Appends one record in presentation format.
    ///
    /// The first record creates the temp file and flushes the metadata
    /// header and any buffered comments ahead of itself.
    pub fn add_record<N, Octs, NName>(
        &mut self,
        record: &Record<N, ZoneRecordData<Octs, NName>>,
    ) -> Result<(), WriteError>
    where
        N: fmt::Display,
        Octs: AsRef<[u8]>,
        NName: fmt::Display,
    {
        self.ensure_open()?;
        let line = format_record(record);
        let writer = self.writer.as_mut().expect("writer open");
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    /// Drops whatever was written and guarantees no file remains on disk.
    pub fn abort(&mut self) -> Result<(), WriteError> {
        self.records = 0;
        self.finish()
    }

    /// Finalizes the file.
    ///
    /// With records present this appends the record-count comment, closes
    /// the buffer, the gzip stream and the file in that order, and renames
    /// the temp file into place. Without records the temp file (if any) is
    /// removed. Calling it again is a no-op.
    pub fn finish(&mut self) -> Result<(), WriteError> {
        if self.closed {
            return Ok(());
        }
        let Some(mut writer) = self.writer.take() else {
            self.closed = true;
            return Ok(());
        };

        if self.records > 0 {
            writer.write_all(
                format!("; records: {}\n", self.records).as_bytes(),
            )?;
        }
        writer.flush()?;
        let gz = writer.into_inner().map_err(|err| err.into_error())?;
        gz.finish()?;

        if self.records > 0 {
            fs::rename(&self.tmp_filename, &self.filename)?;
        } else {
            fs::remove_file(&self.tmp_filename)?;
        }
        self.closed = true;
        Ok(())
    }

    /// Creates the temp file and writes the metadata header.
    fn ensure_open(&mut self) -> Result<(), WriteError> {
        if self.closed {
            return Err(WriteError::Closed);
        }
        if self.writer.is_some() {
            return Ok(());
        }

        let file = File::create(&self.tmp_filename)?;
        let base = format!("{}.zone", self.zone.trim_end_matches('.'));
        let mtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as u32;
        let gz = GzBuilder::new()
            .filename(base)
            .mtime(mtime)
            .write(file, Compression::default());
        let mut writer = BufWriter::new(gz);

        writeln!(writer, "; {}", GENERATOR)?;
        writeln!(
            writer,
            "; timestamp: {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        )?;
        writeln!(writer, "; zone: {}", self.zone)?;
        for line in self.pending.drain(..) {
            writer.write_all(line.as_bytes())?;
        }
        self.writer = Some(writer);
        Ok(())
    }
}

/// Formats a record in presentation format.
///
/// AAAA records carrying an IPv4-mapped payload always render the address
/// as `::ffff:a.b.c.d` so downstream parsers see one spelling for it.
fn format_record<N, Octs, NName>(
    record: &Record<N, ZoneRecordData<Octs, NName>>,
) -> String
where
    N: fmt::Display,
    Octs: AsRef<[u8]>,
    NName: fmt::Display,
{
    if let ZoneRecordData::Aaaa(aaaa) = record.data() {
        if let Some(v4) = aaaa.addr().to_ipv4_mapped() {
            return format!(
                "{}. {} {} AAAA ::ffff:{}",
                record.owner(),
                record.ttl().as_secs(),
                record.class(),
                v4
            );
        }
    }
    format!(
        "{}. {} {} {} {}",
        record.owner(),
        record.ttl().as_secs(),
        record.class(),
        record.rtype(),
        record.data()
    )
}

//============ Tests =========================================================
