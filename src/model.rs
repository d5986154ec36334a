//! Typed view of the timeline API payloads.
//!
//! Only the fields the archiver reads are declared; everything else in a page
//! response is ignored on decode but survives in the raw cache document.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// One page of `GET /timeline/likes`. Items stay raw here so one record of
/// an unexpected shape can be rejected on its own.
#[derive(Debug, Clone, Deserialize)]
pub struct ListingPage {
    #[serde(default)]
    pub total_pages: Option<u64>,
    #[serde(default)]
    pub coubs: Vec<Value>,
}

/// A single liked coub.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemRecord {
    pub permalink: String,
    #[serde(default)]
    pub title: String,
    pub channel: Channel,
    #[serde(default)]
    pub tags: Vec<Tag>,
    pub file_versions: FileVersions,
    #[serde(default, deserialize_with = "external_download")]
    pub external_download: Option<ExternalDownload>,
}

impl ItemRecord {
    pub fn video_streams(&self) -> &BTreeMap<String, StreamVersion> {
        &self.file_versions.html5.video
    }

    /// `None` when the coub carries no music at all.
    pub fn audio_streams(&self) -> Option<&BTreeMap<String, StreamVersion>> {
        self.file_versions.html5.audio.as_ref()
    }

    pub fn external_video_url(&self) -> Option<&str> {
        self.external_download
            .as_ref()
            .map(|external| external.url.as_str())
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub permalink: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tag {
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileVersions {
    pub html5: Html5Versions,
}

/// Per-tier stream maps. Keys are tier names (`higher`, `high`, `med`); they
/// stay strings so an unexpected tier never breaks decoding.
#[derive(Debug, Clone, Deserialize)]
pub struct Html5Versions {
    #[serde(default)]
    pub video: BTreeMap<String, StreamVersion>,
    #[serde(default)]
    pub audio: Option<BTreeMap<String, StreamVersion>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamVersion {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalDownload {
    pub url: String,
}

/// The API sends either an object or a bare `false` here.
#[derive(Deserialize)]
#[serde(untagged)]
enum ExternalField {
    Link(ExternalDownload),
    #[allow(dead_code)]
    Flag(bool),
}

fn external_download<'de, D>(deserializer: D) -> Result<Option<ExternalDownload>, D::Error>
where
    D: Deserializer<'de>,
{
    let field = Option::<ExternalField>::deserialize(deserializer)?;
    Ok(match field {
        Some(ExternalField::Link(link)) => Some(link),
        Some(ExternalField::Flag(_)) | None => None,
    })
}
