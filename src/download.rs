//! Plain HTTP stream downloads.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Fetches a remote stream into a local file.
pub trait StreamDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Downloader backed by a shared `ureq` agent.
#[derive(Clone)]
pub struct HttpDownloader {
    agent: ureq::Agent,
}

impl HttpDownloader {
    pub fn new(agent: ureq::Agent) -> Self {
        Self { agent }
    }
}

impl StreamDownloader for HttpDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        debug!(url, dest = %dest.display(), "downloading stream");
        let response = self
            .agent
            .get(url)
            .call()
            .with_context(|| format!("requesting {url}"))?;
        let mut reader = response.into_reader();
        let file = File::create(dest).with_context(|| format!("creating {}", dest.display()))?;
        let mut writer = BufWriter::new(file);
        io::copy(&mut reader, &mut writer)
            .with_context(|| format!("writing {} from {url}", dest.display()))?;
        writer
            .flush()
            .with_context(|| format!("flushing {}", dest.display()))?;
        Ok(())
    }
}

/// Last path segment of a URL with any query or fragment removed.
pub fn url_basename(url: &str) -> Option<&str> {
    let without_suffix = url.split(['?', '#']).next().unwrap_or(url);
    without_suffix
        .rsplit('/')
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
}
