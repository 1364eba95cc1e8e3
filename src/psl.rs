//! Fetching zone candidates from the Public Suffix List.
//!
//! Only the ICANN section of the list is used. Exception rules are
//! skipped, wildcard rules contribute their base domain, and IDN rules are
//! converted to their ASCII form. Every resulting domain is returned as an
//! FQDN ready to feed into the zone model.

use std::time::Duration;

use thiserror::Error;

use crate::util::fqdn;

/// Where the list lives.
const PSL_URL: &str = "https://publicsuffix.org/list/public_suffix_list.dat";

/// Overall download timeout.
const PSL_TIMEOUT: Duration = Duration::from_secs(30);

/// Markers delimiting the ICANN section of the list.
const ICANN_BEGIN: &str = "===BEGIN ICANN DOMAINS===";
const ICANN_END: &str = "===END ICANN DOMAINS===";

/// Errors while obtaining the domain list.
#[derive(Debug, Error)]
pub enum PslError {
    /// The download failed.
    #[error("PSL download failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A rule could not be converted to ASCII.
    #[error("IDN conversion of {0:?} failed")]
    Idna(String),
}

/// Downloads the Public Suffix List and returns its ICANN domains.
pub async fn get_domains() -> Result<Vec<String>, PslError> {
    let client = reqwest::Client::builder().timeout(PSL_TIMEOUT).build()?;
    let body = client
        .get(PSL_URL)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    parse_domains(&body)
}

/// Extracts the ICANN-section domains from the list text.
fn parse_domains(text: &str) -> Result<Vec<String>, PslError> {
    let mut domains = Vec::new();
    let mut in_icann = false;
    for line in text.lines() {
        let line = line.trim();
        if line.contains(ICANN_BEGIN) {
            in_icann = true;
            continue;
        }
        if line.contains(ICANN_END) {
            break;
        }
        if !in_icann || line.is_empty() || line.starts_with("//") {
            continue;
        }
        // Exception rules carve out of a wildcard; they are not zones.
        if line.starts_with('!') {
            continue;
        }
        let rule = line.strip_prefix("*.").unwrap_or(line);
        let ascii = idna::domain_to_ascii(rule)
            .map_err(|_| PslError::Idna(rule.to_string()))?;
        domains.push(fqdn(&ascii));
    }
    Ok(domains)
}

//============ Tests =========================================================
