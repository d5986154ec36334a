//! Stream tier selection with downward fallback.

use crate::model::{ItemRecord, StreamVersion};
use anyhow::{Result, bail};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Video tiers from best to worst.
pub const VIDEO_FALLBACK_ORDER: [&str; 3] = ["higher", "high", "med"];
/// Audio tiers from best to worst.
pub const AUDIO_FALLBACK_ORDER: [&str; 2] = ["high", "med"];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VideoQuality {
    Higher,
    #[default]
    High,
    Med,
}

impl VideoQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            VideoQuality::Higher => "higher",
            VideoQuality::High => "high",
            VideoQuality::Med => "med",
        }
    }
}

impl FromStr for VideoQuality {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "higher" => Ok(VideoQuality::Higher),
            "high" => Ok(VideoQuality::High),
            "med" => Ok(VideoQuality::Med),
            _ => bail!("unknown video quality: {value} (expected higher, high or med)"),
        }
    }
}

impl fmt::Display for VideoQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AudioQuality {
    #[default]
    High,
    Med,
}

impl AudioQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            AudioQuality::High => "high",
            AudioQuality::Med => "med",
        }
    }
}

impl FromStr for AudioQuality {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(AudioQuality::High),
            "med" => Ok(AudioQuality::Med),
            _ => bail!("unknown audio quality: {value} (expected high or med)"),
        }
    }
}

impl fmt::Display for AudioQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The tier that was actually picked and its URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream<'a> {
    pub tier: &'a str,
    pub url: &'a str,
}

/// Returns the requested tier when present, otherwise the first tier below it
/// in `order` that is available. Never scans toward better tiers.
pub fn resolve_tier<'a>(
    requested: &str,
    available: &'a BTreeMap<String, StreamVersion>,
    order: &[&str],
) -> Option<ResolvedStream<'a>> {
    if let Some((tier, version)) = available.get_key_value(requested) {
        return Some(ResolvedStream {
            tier: tier.as_str(),
            url: version.url.as_str(),
        });
    }

    let start = order.iter().position(|tier| *tier == requested)?;
    let (tier, version) = order[start + 1..]
        .iter()
        .find_map(|tier| available.get_key_value(*tier))?;
    warn!(
        requested,
        used = tier.as_str(),
        "requested quality unavailable, falling back"
    );
    Some(ResolvedStream {
        tier: tier.as_str(),
        url: version.url.as_str(),
    })
}

pub fn resolve_video(item: &ItemRecord, quality: VideoQuality) -> Option<ResolvedStream<'_>> {
    resolve_tier(quality.as_str(), item.video_streams(), &VIDEO_FALLBACK_ORDER)
}

/// `None` both when the item has no audio track and when no tier at or below
/// the requested one exists.
pub fn resolve_audio(item: &ItemRecord, quality: AudioQuality) -> Option<ResolvedStream<'_>> {
    let streams = item.audio_streams()?;
    resolve_tier(quality.as_str(), streams, &AUDIO_FALLBACK_ORDER)
}
