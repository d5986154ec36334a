#![forbid(unsafe_code)]

//! Archives every coub the account has liked.
//!
//! The listing is fetched once into `likes.json` and reused on every later
//! run; delete that file to pick up new likes. Items whose artifact already
//! exists under `videos/` are skipped, so an interrupted run can simply be
//! started again.

use anyhow::{Context, Result, bail};
use clap::Parser;
use coub_likes::config::{ConfigOverrides, resolve_run_config};
use coub_likes::download::HttpDownloader;
use coub_likes::listing::{CoubClient, load_listing, save_listing};
use coub_likes::logging;
use coub_likes::pipeline::{Layout, Pipeline, run_items};
use coub_likes::transcoder::{FfmpegTranscoder, WavProbe};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const CONFIRM_PROMPT: &str = "Proceed to download. y/n (y) ";

/// Download liked coubs, looping each video to its audio length.
#[derive(Debug, Parser)]
#[command(name = "download_likes", version)]
struct Cli {
    /// Read API_TOKEN / VIDEO_QUALITY / AUDIO_QUALITY from this file
    #[arg(long)]
    env_file: Option<PathBuf>,
    /// Listing cache location
    #[arg(long)]
    cache_file: Option<PathBuf>,
    /// Directory receiving `<permalink>.mp4` artifacts
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Directory for per-item scratch files
    #[arg(long)]
    work_dir: Option<PathBuf>,
    /// Directory for the per-run log file
    #[arg(long)]
    log_dir: Option<PathBuf>,
    /// Skip the confirmation prompt
    #[arg(short, long)]
    yes: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            env_path: self.env_file.clone(),
            cache_path: self.cache_file.clone(),
            output_dir: self.output_dir.clone(),
            work_dir: self.work_dir.clone(),
            log_dir: self.log_dir.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = resolve_run_config(cli.overrides())?;

    // Configuration problems surface before the log file or any request exists.
    let token = if config.cache_path.exists() {
        None
    } else {
        Some(config.require_token()?.to_string())
    };

    let log_path = logging::init(&config.log_dir)?;
    info!(
        log = %log_path.display(),
        video_quality = %config.video_quality,
        audio_quality = %config.audio_quality,
        "starting run"
    );

    let agent = ureq::agent();
    if let Some(token) = token {
        let client = CoubClient::new(agent.clone(), config.api_base.clone(), token);
        save_listing(Arc::new(client), &config.cache_path)
            .await
            .context("fetching likes listing")?;
    }
    let listing = load_listing(&config.cache_path)?;

    let transcoder = FfmpegTranscoder::default();
    transcoder.ensure_available()?;

    if !cli.yes && !confirm(&mut io::stdin().lock(), &mut io::stdout())? {
        bail!("download cancelled");
    }

    let layout = Layout::new(config.output_dir.clone(), config.work_dir.clone());
    layout.prepare()?;
    let downloader = HttpDownloader::new(agent);
    let probe = WavProbe;
    let pipeline = Pipeline::new(&layout, &downloader, &transcoder, &probe);

    let mut summary = run_items(
        &pipeline,
        &listing.items,
        config.video_quality,
        config.audio_quality,
    );
    summary.failed += listing.malformed;
    info!(
        total = summary.total(),
        muxed = summary.muxed,
        video_only = summary.video_only,
        skipped = summary.skipped,
        failed = summary.failed,
        "run complete"
    );

    Ok(())
}

/// Asks once; an empty answer or `y` proceeds. A closed stdin counts as a
/// refusal.
fn confirm(input: &mut impl BufRead, output: &mut impl Write) -> Result<bool> {
    write!(output, "{CONFIRM_PROMPT}").context("writing confirmation prompt")?;
    output.flush().context("flushing confirmation prompt")?;

    let mut answer = String::new();
    let read = input
        .read_line(&mut answer)
        .context("reading confirmation")?;
    if read == 0 {
        return Ok(false);
    }
    Ok(accepts(&answer))
}

fn accepts(answer: &str) -> bool {
    let answer = answer.trim();
    answer.is_empty() || answer.eq_ignore_ascii_case("y")
}
