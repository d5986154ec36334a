//! Per-item archival: skip existing artifacts, download the streams, loop the
//! video to the audio length and mux both with metadata.
//!
//! Temp files live in the work directory and are owned by a [`TempFiles`]
//! guard scoped to one item. They are removed on every exit path and never
//! outlive the item.

use crate::download::{StreamDownloader, url_basename};
use crate::model::ItemRecord;
use crate::quality::{AudioQuality, VideoQuality, resolve_audio, resolve_video};
use crate::transcoder::{DurationProbe, MuxMetadata, Transcoder};
use anyhow::{Context, Result, anyhow};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, info_span, warn};

/// Where artifacts and scratch files go.
#[derive(Debug, Clone)]
pub struct Layout {
    pub output_dir: PathBuf,
    pub work_dir: PathBuf,
}

impl Layout {
    pub fn new(output_dir: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            work_dir: work_dir.into(),
        }
    }

    /// Creates the output and work directories.
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("creating {}", self.output_dir.display()))?;
        fs::create_dir_all(&self.work_dir)
            .with_context(|| format!("creating {}", self.work_dir.display()))?;
        Ok(())
    }

    pub fn output_path(&self, permalink: &str) -> PathBuf {
        self.output_dir.join(format!("{permalink}.mp4"))
    }

    pub fn wav_path(&self, permalink: &str) -> PathBuf {
        self.work_dir.join(format!("{permalink}.wav"))
    }

    pub fn looped_video_path(&self, permalink: &str) -> PathBuf {
        self.work_dir.join(format!("{permalink}_tmp.mp4"))
    }

    /// Downloaded streams keep the remote file name; URLs without one fall
    /// back to `<permalink>_<suffix>`.
    pub fn stream_path(&self, url: &str, permalink: &str, suffix: &str) -> PathBuf {
        match url_basename(url) {
            Some(name) => self.work_dir.join(name),
            None => self.work_dir.join(format!("{permalink}_{suffix}")),
        }
    }
}

/// The scratch files of one item. Dropping the guard deletes them.
#[derive(Debug)]
pub struct TempFiles {
    pub audio: PathBuf,
    pub video: PathBuf,
    pub wav: PathBuf,
    pub looped_video: PathBuf,
}

impl TempFiles {
    fn for_item(layout: &Layout, permalink: &str, video_url: &str, audio_url: &str) -> Self {
        Self {
            audio: layout.stream_path(audio_url, permalink, "audio"),
            video: layout.stream_path(video_url, permalink, "video"),
            wav: layout.wav_path(permalink),
            looped_video: layout.looped_video_path(permalink),
        }
    }

    pub fn paths(&self) -> [&Path; 4] {
        [
            self.audio.as_path(),
            self.video.as_path(),
            self.wav.as_path(),
            self.looped_video.as_path(),
        ]
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        for path in self.paths() {
            remove_if_exists(path);
        }
    }
}

fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed temp file"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), "could not remove temp file: {err}"),
    }
}

/// How an item ended when it did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The artifact was already on disk.
    Skipped,
    /// No audio track; the video stream was saved as-is.
    VideoOnly,
    /// Looped video muxed with audio and metadata.
    Muxed,
}

pub struct Pipeline<'a> {
    layout: &'a Layout,
    downloader: &'a dyn StreamDownloader,
    transcoder: &'a dyn Transcoder,
    probe: &'a dyn DurationProbe,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        layout: &'a Layout,
        downloader: &'a dyn StreamDownloader,
        transcoder: &'a dyn Transcoder,
        probe: &'a dyn DurationProbe,
    ) -> Self {
        Self {
            layout,
            downloader,
            transcoder,
            probe,
        }
    }

    pub fn process(
        &self,
        item: &ItemRecord,
        video_quality: VideoQuality,
        audio_quality: AudioQuality,
    ) -> Result<ItemOutcome> {
        let permalink = item.permalink.as_str();
        let output = self.layout.output_path(permalink);
        if output.exists() {
            info!(path = %output.display(), "already exists");
            return Ok(ItemOutcome::Skipped);
        }

        let video = resolve_video(item, video_quality).ok_or_else(|| {
            anyhow!("no video stream at or below quality {video_quality} for {permalink}")
        })?;

        let Some(audio) = resolve_audio(item, audio_quality) else {
            info!("no audio track, saving video stream as-is");
            write_output(&output, || self.downloader.download(video.url, &output))
                .with_context(|| format!("downloading video for {permalink}"))?;
            return Ok(ItemOutcome::VideoOnly);
        };

        let temps = TempFiles::for_item(self.layout, permalink, video.url, audio.url);

        self.downloader
            .download(audio.url, &temps.audio)
            .with_context(|| format!("downloading audio for {permalink}"))?;
        self.downloader
            .download(video.url, &temps.video)
            .with_context(|| format!("downloading video for {permalink}"))?;

        self.transcoder
            .decode_audio_to_wave(&temps.audio, &temps.wav)
            .with_context(|| format!("decoding audio for {permalink}"))?;
        let seconds = self
            .probe
            .duration_seconds(&temps.wav)
            .with_context(|| format!("probing audio length for {permalink}"))?;
        debug!(seconds, "audio duration");

        self.transcoder
            .loop_video(&temps.video, seconds, &temps.looped_video)
            .with_context(|| format!("looping video for {permalink}"))?;

        let metadata = MuxMetadata::for_item(item);
        write_output(&output, || {
            self.transcoder
                .mux(&temps.looped_video, &temps.audio, &metadata, &output)
        })
        .with_context(|| format!("muxing {permalink}"))?;

        Ok(ItemOutcome::Muxed)
    }
}

/// Runs a step that writes the final artifact. On failure the partial
/// artifact is removed.
fn write_output(output: &Path, write: impl FnOnce() -> Result<()>) -> Result<()> {
    let result = write();
    if result.is_err() {
        remove_if_exists(output);
    }
    result
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub muxed: usize,
    pub video_only: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.muxed + self.video_only + self.skipped + self.failed
    }

    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Skipped => self.skipped += 1,
            ItemOutcome::VideoOnly => self.video_only += 1,
            ItemOutcome::Muxed => self.muxed += 1,
        }
    }
}

/// Processes every item in order. A failing item is logged with its full
/// error chain and counted; it never stops the remaining items.
pub fn run_items(
    pipeline: &Pipeline<'_>,
    items: &[ItemRecord],
    video_quality: VideoQuality,
    audio_quality: AudioQuality,
) -> RunSummary {
    let mut summary = RunSummary::default();
    let total = items.len();

    for (index, item) in items.iter().enumerate() {
        let span = info_span!("item", permalink = %item.permalink);
        let _entered = span.enter();
        info!(
            "Downloading video {}/{}, permalink: {}",
            index + 1,
            total,
            item.permalink
        );

        match pipeline.process(item, video_quality, audio_quality) {
            Ok(outcome) => summary.record(outcome),
            Err(err) => {
                error!("Failed to process video {}: {err:?}", item.permalink);
                summary.failed += 1;
            }
        }
    }

    summary
}
