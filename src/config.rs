//! The command-line surface.

use std::path::PathBuf;

use clap::Parser;

use crate::xfr;

/// Attempt a zone transfer against every authoritative server of every
/// known zone, saving whatever the servers hand out.
#[derive(Clone, Debug, Parser)]
#[command(name = "allxfr", version, about)]
pub struct Options {
    /// Number of parallel zone transfers to perform.
    #[arg(long, default_value_t = 10)]
    pub parallel: u32,

    /// Directory to save found zones in.
    #[arg(long, default_value = "zones")]
    pub out: PathBuf,

    /// Enable verbose output.
    #[arg(long)]
    pub verbose: bool,

    /// Use the provided zonefile instead of transferring the root zone.
    #[arg(long)]
    pub zonefile: Option<PathBuf>,

    /// Attempt AXFR from zones listed in the public suffix list.
    #[arg(long)]
    pub psl: bool,

    /// Attempt AXFR from every nameserver for a given zone and save all
    /// answers.
    #[arg(long)]
    pub save_all: bool,

    /// Attempt an IXFR instead of AXFR.
    #[arg(long)]
    pub ixfr: bool,

    /// Only test if xfr is allowed by retrieving one envelope.
    #[arg(long)]
    pub dry_run: bool,

    /// Number of times to retry failed operations.
    #[arg(long, default_value_t = 3, value_parser = retry_in_range)]
    pub retry: u32,

    /// If a zone already exists on disk, overwrite it with newer data.
    #[arg(long)]
    pub overwrite: bool,

    /// Enable the HTTP status server on the specified [IP:]port.
    #[arg(long, value_name = "[HOST:]PORT")]
    pub status_listen: Option<String>,

    /// Additional zone names to attempt.
    #[arg(value_name = "ZONE")]
    pub zones: Vec<String>,
}

impl Options {
    /// The transfer engine configuration these options describe.
    pub fn engine_config(&self) -> xfr::Config {
        xfr::Config {
            save_dir: self.out.clone(),
            save_all: self.save_all,
            ixfr: self.ixfr,
            dry_run: self.dry_run,
            retry: self.retry as usize,
            overwrite: self.overwrite,
            port: 53,
        }
    }
}

/// Rejects a zero retry count at parse time.
fn retry_in_range(value: &str) -> Result<u32, String> {
    let retry: u32 = value
        .parse()
        .map_err(|_| format!("{value:?} is not a number"))?;
    if retry < 1 {
        return Err("retry must be positive".into());
    }
    Ok(retry)
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let options = Options::parse_from(["allxfr"]);
        assert_eq!(options.parallel, 10);
        assert_eq!(options.out, PathBuf::from("zones"));
        assert_eq!(options.retry, 3);
        assert!(!options.save_all);
        assert!(options.zones.is_empty());
    }

    #[test]
    fn zero_retry_is_rejected() {
        assert!(Options::try_parse_from(["allxfr", "--retry", "0"]).is_err());
    }

    #[test]
    fn positional_zones_are_collected() {
        let options =
            Options::parse_from(["allxfr", "example.com", "example.net"]);
        assert_eq!(options.zones, ["example.com", "example.net"]);
    }

    #[test]
    fn engine_config_mirrors_flags() {
        let options = Options::parse_from([
            "allxfr",
            "--save-all",
            "--ixfr",
            "--overwrite",
            "--retry",
            "5",
            "--out",
            "/tmp/zones",
        ]);
        let config = options.engine_config();
        assert!(config.save_all);
        assert!(config.ixfr);
        assert!(config.overwrite);
        assert_eq!(config.retry, 5);
        assert_eq!(config.save_dir, PathBuf::from("/tmp/zones"));
        assert_eq!(config.port, 53);
    }
}
