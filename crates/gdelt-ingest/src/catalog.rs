//! Manifest retrieval and change-set filtering
//!
//! The GDELT master file list is plain text, one file per line:
//!
//! ```text
//! 150383 297a16b493de7cf6ca809a7cc31d0b93 http://data.gdeltproject.org/gdeltv2/20150218230000.export.CSV.zip
//! ```
//!
//! File names start with a fixed-width `YYYYMMDDHHMMSS` timestamp, so
//! comparing that prefix as a string orders files in time.

use crate::error::{IngestError, Result};
use reqwest::Client;
use tracing::{debug, info};

/// One parsed manifest line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Declared size in bytes, when the field is numeric
    pub size: Option<u64>,
    pub checksum: String,
    pub url: String,
}

impl ManifestEntry {
    /// Parse `<size> <checksum> <url>`; lines with fewer than three tokens yield `None`
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let size = tokens.next()?;
        let checksum = tokens.next()?;
        let url = tokens.next()?;

        Some(Self {
            size: size.parse().ok(),
            checksum: checksum.to_string(),
            url: url.to_string(),
        })
    }

    /// Final path segment of the URL
    pub fn file_name(&self) -> &str {
        file_name(&self.url)
    }

    /// File name up to its first `.`, i.e. the feed timestamp
    pub fn timestamp(&self) -> &str {
        timestamp_token(self.file_name())
    }

    /// Manifest checksum if it looks like an MD5 hex digest
    pub fn md5(&self) -> Option<&str> {
        let valid = self.checksum.len() == 32 && self.checksum.bytes().all(|b| b.is_ascii_hexdigit());
        valid.then_some(self.checksum.as_str())
    }
}

pub fn file_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

pub fn timestamp_token(file_name: &str) -> &str {
    file_name.split('.').next().unwrap_or(file_name)
}

/// Keep entries whose timestamp sorts strictly after `watermark`, in input order
pub fn filter_new<'a, I>(lines: I, watermark: &str) -> Vec<ManifestEntry>
where
    I: IntoIterator<Item = &'a str>,
{
    lines
        .into_iter()
        .filter_map(ManifestEntry::parse)
        .filter(|entry| entry.timestamp() > watermark)
        .collect()
}

/// Fetches the manifest over HTTP
#[derive(Debug, Clone)]
pub struct CatalogClient {
    client: Client,
    manifest_url: String,
}

impl CatalogClient {
    pub fn new(client: Client, manifest_url: impl Into<String>) -> Self {
        Self {
            client,
            manifest_url: manifest_url.into(),
        }
    }

    /// Download the manifest and split it into lines
    ///
    /// Any failure here is a [`IngestError::Network`]: without a catalog the
    /// run has nothing to do.
    pub async fn fetch_catalog(&self) -> Result<Vec<String>> {
        info!(url = %self.manifest_url, "Downloading master file list");

        let response = self
            .client
            .get(&self.manifest_url)
            .send()
            .await
            .map_err(|e| IngestError::network(&self.manifest_url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::network(&self.manifest_url, format!("HTTP {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| IngestError::network(&self.manifest_url, e))?;

        let lines: Vec<String> = body.lines().map(str::to_string).collect();
        debug!(lines = lines.len(), "Master file list downloaded");
        Ok(lines)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entry() {
        let entry = ManifestEntry::parse(
            "150383 297a16b493de7cf6ca809a7cc31d0b93 http://data.gdeltproject.org/gdeltv2/20150218230000.export.CSV.zip",
        )
        .unwrap();

        assert_eq!(entry.size, Some(150383));
        assert_eq!(entry.file_name(), "20150218230000.export.CSV.zip");
        assert_eq!(entry.timestamp(), "20150218230000");
        assert_eq!(entry.md5(), Some("297a16b493de7cf6ca809a7cc31d0b93"));
    }

    #[test]
    fn test_parse_short_lines() {
        assert!(ManifestEntry::parse("").is_none());
        assert!(ManifestEntry::parse("invalid line").is_none());
        assert!(ManifestEntry::parse("   100   abc  ").is_none());
    }

    #[test]
    fn test_non_md5_checksum_ignored() {
        let entry = ManifestEntry::parse("100 abc http://host/20240101000000.export.CSV.zip").unwrap();
        assert_eq!(entry.md5(), None);
    }

    #[test]
    fn test_file_name_strips_query() {
        assert_eq!(file_name("http://host/a/b/20240101.gkg.csv.zip?x=1"), "20240101.gkg.csv.zip");
        assert_eq!(file_name("relative.zip"), "relative.zip");
    }

    #[test]
    fn test_filter_keeps_newer_in_order() {
        let lines = [
            "1 a http://host/20240101001500.mentions.CSV.zip",
            "short line",
            "1 a http://host/20231231234500.export.CSV.zip",
            "1 a http://host/20240101000000.export.CSV.zip",
            "1 a http://host/20240101003000.gkg.csv.zip",
        ];

        let kept = filter_new(lines, "20240101000000");
        let names: Vec<_> = kept.iter().map(|e| e.file_name()).collect();
        assert_eq!(
            names,
            vec!["20240101001500.mentions.CSV.zip", "20240101003000.gkg.csv.zip"]
        );
    }

    #[test]
    fn test_filter_sentinel_keeps_everything_valid() {
        let lines = ["100 abc http://host/20240101000000.export.CSV.zip", "x y"];
        assert_eq!(filter_new(lines, "19700101000000").len(), 1);
    }
}
