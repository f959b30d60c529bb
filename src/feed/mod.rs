//! Downloads the AVL bulk archive and turns it into a [`PositionSet`].

pub mod siri;

use crate::geometry::PositionSet;
use async_trait::async_trait;
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::io::{Cursor, Read};
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

pub use siri::{ActivityShape, ParsedFeed, RecordError, parse_vehicle_activities};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const GZIP_MAGIC: &[u8] = b"\x1f\x8b";

/// Upper bound on the buffer reserved up front for a zip entry. The declared
/// size comes from the archive and is not trusted beyond this.
const MAX_PREALLOCATION: u64 = 64 << 20;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("feed returned HTTP {0}")]
    Status(u16),
    #[error("feed archive is unreadable: {0}")]
    Archive(String),
    #[error("feed document is not valid XML: {0}")]
    Xml(String),
    #[error("feed parsing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// How a [`crate::geometry::VehicleId`] is built from a vehicle activity.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VehicleIdPolicy {
    /// `VehicleRef` alone.
    VehicleRef,
    /// `{OriginRef}_{DestinationRef}_{VehicleRef}`.
    #[default]
    Composite,
}

impl FromStr for VehicleIdPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vehicle_ref" | "vehicleref" => Ok(VehicleIdPolicy::VehicleRef),
            "composite" => Ok(VehicleIdPolicy::Composite),
            other => Err(format!("expected vehicle_ref or composite, got {other}")),
        }
    }
}

/// Anything that can produce the current vehicle positions.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn poll(&self) -> Result<PositionSet, FeedError>;
}

#[derive(Clone)]
pub struct FeedPoller {
    client: reqwest::Client,
    url: Url,
    archive_entry: String,
    policy: VehicleIdPolicy,
    timeout: Duration,
}

impl FeedPoller {
    pub fn new(
        client: reqwest::Client,
        url: Url,
        archive_entry: impl Into<String>,
        policy: VehicleIdPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            url,
            archive_entry: archive_entry.into(),
            policy,
            timeout,
        }
    }

    async fn download(&self) -> Result<Vec<u8>, FeedError> {
        let response = self
            .client
            .get(self.url.clone())
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl FeedSource for FeedPoller {
    async fn poll(&self) -> Result<PositionSet, FeedError> {
        let start = Instant::now();

        let archive = self.download().await?;
        let downloaded_bytes = archive.len();

        let archive_entry = self.archive_entry.clone();
        let policy = self.policy;

        // decompressing and parsing the national feed takes long enough to block a worker
        let parsed = tokio::task::spawn_blocking(move || {
            let document = extract_document(&archive, &archive_entry)?;
            parse_vehicle_activities(&document, policy)
        })
        .await??;

        if !parsed.skipped.is_empty() {
            debug!(
                "skipped {} malformed vehicle activities, first: {}",
                parsed.skipped.len(),
                parsed.skipped[0]
            );
        }

        if parsed.activities == 0 {
            warn!("feed at {} contained no vehicle activities", self.url);
        }

        info!(
            "polled {} vehicles from {} activities ({} skipped, {} duplicate keys, {} bytes) in {:.2?}",
            parsed.positions.len(),
            parsed.activities,
            parsed.skipped.len(),
            parsed.duplicates,
            downloaded_bytes,
            start.elapsed()
        );

        Ok(parsed.positions)
    }
}

/// Returns the XML document held in `archive`.
///
/// Zip archives are searched for `entry_name`, falling back to the first `.xml`
/// entry. Gzip streams are inflated. Anything else is assumed to be plain XML.
pub fn extract_document(archive: &[u8], entry_name: &str) -> Result<Vec<u8>, FeedError> {
    if archive.starts_with(ZIP_MAGIC) {
        return extract_zip_entry(archive, entry_name);
    }

    if archive.starts_with(GZIP_MAGIC) {
        let mut document = Vec::new();
        GzDecoder::new(archive)
            .read_to_end(&mut document)
            .map_err(|e| FeedError::Archive(format!("gzip: {}", e)))?;
        return Ok(document);
    }

    if archive.is_empty() {
        return Err(FeedError::Archive(String::from("empty response body")));
    }

    Ok(archive.to_vec())
}

fn extract_zip_entry(archive: &[u8], entry_name: &str) -> Result<Vec<u8>, FeedError> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| FeedError::Archive(format!("zip: {}", e)))?;

    let index = match zip.index_for_name(entry_name) {
        Some(index) => index,
        None => {
            let fallback = zip
                .file_names()
                .find(|name| name.to_ascii_lowercase().ends_with(".xml"))
                .map(String::from)
                .ok_or_else(|| {
                    FeedError::Archive(format!("zip has no {} or other .xml entry", entry_name))
                })?;

            debug!("{} not found in archive, using {}", entry_name, fallback);

            zip.index_for_name(&fallback)
                .ok_or_else(|| FeedError::Archive(format!("zip entry {} vanished", fallback)))?
        }
    };

    let mut entry = zip
        .by_index(index)
        .map_err(|e| FeedError::Archive(format!("zip entry: {}", e)))?;

    let mut document = Vec::with_capacity(capacity_hint(entry.size()));
    entry
        .read_to_end(&mut document)
        .map_err(|e| FeedError::Archive(format!("zip entry: {}", e)))?;

    Ok(document)
}

fn capacity_hint(declared_size: u64) -> usize {
    declared_size.min(MAX_PREALLOCATION) as usize
}
