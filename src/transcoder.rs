//! ffmpeg invocations and the WAV duration probe.
//!
//! The pipeline only sees the [`Transcoder`] and [`DurationProbe`] traits, so
//! tests can swap in fakes. [`FfmpegTranscoder`] builds the exact argument
//! lists and treats any non-zero exit as a failure.

use crate::model::ItemRecord;
use anyhow::{Context, Result, bail};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Metadata fields embedded into the muxed artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxMetadata {
    pub title: String,
    pub comment: String,
}

impl MuxMetadata {
    pub fn for_item(item: &ItemRecord) -> Self {
        Self {
            title: item.title.clone(),
            comment: compose_comment(item),
        }
    }
}

/// Builds the multi-line `comment` tag: author, channel link, coub link, tags
/// and, for coubs cut from an external video, the source URL.
pub fn compose_comment(item: &ItemRecord) -> String {
    let tags = item
        .tags
        .iter()
        .map(|tag| tag.title.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let mut lines = vec![
        format!("Author: {}", item.channel.title),
        format!("Link: https://coub.com/{}", item.channel.permalink),
        format!("Original video: https://coub.com/view/{}", item.permalink),
        format!("Tags: {tags}"),
    ];
    if let Some(url) = item.external_video_url() {
        lines.push(format!("External video: {url}"));
    }
    lines.join("\n")
}

pub trait Transcoder {
    /// Decodes `input` to 16-bit stereo 44.1 kHz PCM WAV at `output`.
    fn decode_audio_to_wave(&self, input: &Path, output: &Path) -> Result<()>;
    /// Loops `input` (stream copy) until it lasts exactly `seconds`.
    fn loop_video(&self, input: &Path, seconds: f64, output: &Path) -> Result<()>;
    /// Muxes `video` with `audio`, copying video and encoding audio to AAC.
    fn mux(&self, video: &Path, audio: &Path, metadata: &MuxMetadata, output: &Path)
    -> Result<()>;
}

pub trait DurationProbe {
    fn duration_seconds(&self, wav: &Path) -> Result<f64>;
}

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Runs `ffmpeg -version` to fail loudly before any download starts.
    pub fn ensure_available(&self) -> Result<()> {
        let status = Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(_) => bail!(
                "{} is installed but returned a failure status",
                self.program.display()
            ),
            Err(err) => bail!(
                "{} is not installed or not in PATH: {}",
                self.program.display(),
                err
            ),
        }
    }

    fn run(&self, label: &str, args: Vec<OsString>) -> Result<()> {
        debug!(step = label, ?args, "running ffmpeg");
        let status = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("spawning {} for {label}", self.program.display()))?;
        if !status.success() {
            bail!("ffmpeg {label} failed (status {status})");
        }
        Ok(())
    }
}

impl Transcoder for FfmpegTranscoder {
    fn decode_audio_to_wave(&self, input: &Path, output: &Path) -> Result<()> {
        self.run("decode", decode_args(input, output))
    }

    fn loop_video(&self, input: &Path, seconds: f64, output: &Path) -> Result<()> {
        self.run("loop", loop_args(input, seconds, output))
    }

    fn mux(
        &self,
        video: &Path,
        audio: &Path,
        metadata: &MuxMetadata,
        output: &Path,
    ) -> Result<()> {
        self.run("mux", mux_args(video, audio, metadata, output))
    }
}

fn decode_args(input: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), input.into()];
    args.extend(
        [
            "-vn",
            "-acodec",
            "pcm_s16le",
            "-ac",
            "2",
            "-ar",
            "44100",
            "-f",
            "wav",
        ]
        .map(OsString::from),
    );
    args.push(output.into());
    args
}

fn loop_args(input: &Path, seconds: f64, output: &Path) -> Vec<OsString> {
    vec![
        "-y".into(),
        "-stream_loop".into(),
        "-1".into(),
        "-t".into(),
        seconds.to_string().into(),
        "-i".into(),
        input.into(),
        "-c".into(),
        "copy".into(),
        output.into(),
    ]
}

fn mux_args(video: &Path, audio: &Path, metadata: &MuxMetadata, output: &Path) -> Vec<OsString> {
    vec![
        "-y".into(),
        "-i".into(),
        video.into(),
        "-i".into(),
        audio.into(),
        "-metadata".into(),
        format!("title={}", metadata.title).into(),
        "-metadata".into(),
        format!("comment={}", metadata.comment).into(),
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        "aac".into(),
        output.into(),
    ]
}

/// Reads the WAV header and frame count with `hound`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavProbe;

impl DurationProbe for WavProbe {
    fn duration_seconds(&self, wav: &Path) -> Result<f64> {
        let reader = hound::WavReader::open(wav)
            .with_context(|| format!("opening wav {}", wav.display()))?;
        let spec = reader.spec();
        if spec.sample_rate == 0 {
            bail!("wav {} reports a zero sample rate", wav.display());
        }
        Ok(f64::from(reader.duration()) / f64::from(spec.sample_rate))
    }
}
