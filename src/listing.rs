//! Fetching the liked-coubs listing and caching it on disk.

use crate::model::{ItemRecord, ListingPage};
use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

pub const PAGE_SIZE: u32 = 25;

/// Source of raw listing pages. Pages are 1-based.
pub trait PageSource: Send + Sync {
    fn fetch_page(&self, page: u64) -> Result<Value>;
}

/// Timeline API client. Clones share the underlying `ureq` connection pool.
#[derive(Clone)]
pub struct CoubClient {
    agent: ureq::Agent,
    api_base: String,
    token: String,
}

impl CoubClient {
    pub fn new(agent: ureq::Agent, api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            agent,
            api_base: api_base.into(),
            token: token.into(),
        }
    }

    fn likes_url(&self) -> String {
        format!("{}/timeline/likes", self.api_base)
    }
}

impl PageSource for CoubClient {
    fn fetch_page(&self, page: u64) -> Result<Value> {
        debug!(page, "fetching likes page");
        let url = self.likes_url();
        let response = self
            .agent
            .get(&url)
            .query("page", &page.to_string())
            .query("per_page", &PAGE_SIZE.to_string())
            .query("api_token", &self.token)
            .call()
            .with_context(|| format!("fetching likes page {page} from {url}"))?;
        response
            .into_json::<Value>()
            .with_context(|| format!("decoding likes page {page}"))
    }
}

/// Fetches page 1 to learn the page count, then requests every remaining
/// page at once. Pages come back in order; any failed page fails the whole
/// call.
pub async fn fetch_all_pages(source: Arc<dyn PageSource>) -> Result<Vec<Value>> {
    let first_source = source.clone();
    let first = tokio::task::spawn_blocking(move || first_source.fetch_page(1))
        .await
        .context("likes page 1 task failed")??;
    let total_pages = first
        .get("total_pages")
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("likes page 1 has no integer total_pages"))?;
    info!(total_pages, "Total page count");
    info!("Fetching all pages...");

    let handles: Vec<_> = (2..=total_pages)
        .map(|page| {
            let source = source.clone();
            (
                page,
                tokio::task::spawn_blocking(move || source.fetch_page(page)),
            )
        })
        .collect();

    let mut pages = Vec::with_capacity(handles.len() + 1);
    pages.push(first);
    for (page, handle) in handles {
        let value = handle
            .await
            .with_context(|| format!("likes page {page} task failed"))??;
        pages.push(value);
    }

    info!(pages = pages.len(), "pages fetched");
    Ok(pages)
}

/// Writes the page array as one JSON document, going through a temporary
/// sibling so an interrupted write never leaves a truncated cache behind.
pub fn write_listing_cache(path: &Path, pages: &[Value]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let payload = serde_json::to_vec(pages).context("serializing likes pages")?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, payload).with_context(|| format!("writing {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("finalizing {}", path.display()))?;
    Ok(())
}

pub async fn save_listing(source: Arc<dyn PageSource>, path: &Path) -> Result<()> {
    let pages = fetch_all_pages(source).await?;
    write_listing_cache(path, &pages)?;
    info!(path = %path.display(), "likes info dumped to a file");
    Ok(())
}

/// Items decoded from the cache, plus how many records were rejected.
#[derive(Debug, Default)]
pub struct Listing {
    pub items: Vec<ItemRecord>,
    pub malformed: usize,
}

/// Reads the cache and flattens every page's items, keeping page order and
/// in-page order. Only an unreadable file or invalid JSON fails the load; a
/// record of the wrong shape is logged and counted in `malformed`.
pub fn load_listing(path: &Path) -> Result<Listing> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let pages: Vec<ListingPage> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    info!(path = %path.display(), pages = pages.len(), "likes info loaded from a file");

    let mut listing = Listing::default();
    for (index, page) in pages.into_iter().enumerate() {
        debug!(
            page = index + 1,
            total_pages = ?page.total_pages,
            items = page.coubs.len(),
            "flattening page"
        );
        for record in page.coubs {
            match decode_item(record) {
                Ok(item) => listing.items.push(item),
                Err(err) => {
                    error!(page = index + 1, "Failed to process video: {err:#}");
                    listing.malformed += 1;
                }
            }
        }
    }
    info!(
        count = listing.items.len(),
        malformed = listing.malformed,
        "Total liked coub count"
    );
    Ok(listing)
}

fn decode_item(record: Value) -> Result<ItemRecord> {
    let permalink = record
        .get("permalink")
        .and_then(Value::as_str)
        .unwrap_or("<no permalink>")
        .to_string();
    serde_json::from_value(record).with_context(|| format!("malformed record {permalink}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Condvar, Mutex};
    use std::time::Duration;
    use tempfile::tempdir;

    fn page(number: u64, total: u64, permalinks: &[&str]) -> Value {
        let coubs: Vec<Value> = permalinks
            .iter()
            .map(|permalink| {
                json!({
                    "permalink": permalink,
                    "title": format!("title {permalink}"),
                    "channel": { "title": "c", "permalink": "c" },
                    "tags": [],
                    "file_versions": { "html5": { "video": { "high": { "url": "http://x/v.mp4" } } } }
                })
            })
            .collect();
        json!({ "page": number, "per_page": 25, "total_pages": total, "coubs": coubs })
    }

    struct FakeSource {
        total: u64,
        fail_page: Option<u64>,
        requested: Mutex<Vec<u64>>,
    }

    impl FakeSource {
        fn new(total: u64) -> Self {
            Self {
                total,
                fail_page: None,
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    impl PageSource for FakeSource {
        fn fetch_page(&self, number: u64) -> Result<Value> {
            self.requested.lock().unwrap().push(number);
            if self.fail_page == Some(number) {
                return Err(anyhow!("page {number} exploded"));
            }
            let permalink = format!("p{number}");
            Ok(page(number, self.total, &[permalink.as_str()]))
        }
    }

    #[tokio::test]
    async fn fetches_remaining_pages_once_each_in_order() {
        let source = Arc::new(FakeSource::new(3));
        let pages = fetch_all_pages(source.clone()).await.unwrap();

        let mut requested = source.requested.lock().unwrap().clone();
        assert_eq!(requested.remove(0), 1);
        requested.sort();
        assert_eq!(requested, vec![2, 3]);

        let numbers: Vec<u64> = pages.iter().map(|p| p["page"].as_u64().unwrap()).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    /// Pages after the first block until every one of them has been
    /// requested, so they only succeed when all are in flight together.
    struct OverlapSource {
        total: u64,
        arrived: Mutex<u64>,
        all_arrived: Condvar,
    }

    impl PageSource for OverlapSource {
        fn fetch_page(&self, number: u64) -> Result<Value> {
            if number >= 2 {
                let mut arrived = self.arrived.lock().unwrap();
                *arrived += 1;
                self.all_arrived.notify_all();
                let (arrived, timeout) = self
                    .all_arrived
                    .wait_timeout_while(arrived, Duration::from_secs(5), |arrived| {
                        *arrived < self.total - 1
                    })
                    .unwrap();
                if timeout.timed_out() {
                    return Err(anyhow!(
                        "page {number} waited alone; only {} of {} pages in flight",
                        *arrived,
                        self.total - 1
                    ));
                }
            }
            Ok(page(number, self.total, &[format!("p{number}").as_str()]))
        }
    }

    #[tokio::test]
    async fn remaining_pages_are_in_flight_together() {
        let source = Arc::new(OverlapSource {
            total: 6,
            arrived: Mutex::new(0),
            all_arrived: Condvar::new(),
        });
        let pages = fetch_all_pages(source.clone()).await.unwrap();
        assert_eq!(*source.arrived.lock().unwrap(), 5);
        let numbers: Vec<u64> = pages.iter().map(|p| p["page"].as_u64().unwrap()).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn single_page_listing_makes_one_request() {
        let source = Arc::new(FakeSource::new(1));
        let pages = fetch_all_pages(source.clone()).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(*source.requested.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn failed_page_fails_fetch_and_writes_nothing() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("likes.json");
        let source = Arc::new(FakeSource {
            total: 3,
            fail_page: Some(2),
            requested: Mutex::new(Vec::new()),
        });
        let err = save_listing(source, &cache).await.unwrap_err();
        assert!(format!("{err:#}").contains("page 2 exploded"));
        assert!(!cache.exists());
    }

    #[tokio::test]
    async fn missing_total_pages_is_an_error() {
        struct NoTotal;
        impl PageSource for NoTotal {
            fn fetch_page(&self, _page: u64) -> Result<Value> {
                Ok(json!({ "coubs": [] }))
            }
        }
        let err = fetch_all_pages(Arc::new(NoTotal)).await.unwrap_err();
        assert!(err.to_string().contains("total_pages"));
    }

    #[tokio::test]
    async fn saved_cache_holds_pages_in_order_and_loads_flat() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("likes.json");
        save_listing(Arc::new(FakeSource::new(3)), &cache)
            .await
            .unwrap();

        let document: Vec<Value> = serde_json::from_str(&fs::read_to_string(&cache).unwrap()).unwrap();
        assert_eq!(document.len(), 3);
        assert_eq!(document[2]["page"], 3);
        assert!(!cache.with_extension("tmp").exists());

        let listing = load_listing(&cache).unwrap();
        let permalinks: Vec<&str> = listing
            .items
            .iter()
            .map(|item| item.permalink.as_str())
            .collect();
        assert_eq!(permalinks, vec!["p1", "p2", "p3"]);
        assert_eq!(listing.malformed, 0);
    }

    #[test]
    fn load_preserves_in_page_order() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("likes.json");
        write_listing_cache(
            &cache,
            &[page(1, 2, &["b", "a"]), page(2, 2, &["d", "c"])],
        )
        .unwrap();
        let listing = load_listing(&cache).unwrap();
        let permalinks: Vec<&str> = listing
            .items
            .iter()
            .map(|item| item.permalink.as_str())
            .collect();
        assert_eq!(permalinks, vec!["b", "a", "d", "c"]);
    }

    #[test]
    fn malformed_record_is_counted_and_the_rest_still_load() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("likes.json");
        let mut first = page(1, 2, &["good", "bad"]);
        first["coubs"][1]["channel"] = Value::Null;
        let mut second = page(2, 2, &["missing_versions", "last"]);
        second["coubs"][0]
            .as_object_mut()
            .unwrap()
            .remove("file_versions");
        write_listing_cache(&cache, &[first, second]).unwrap();

        let listing = load_listing(&cache).unwrap();
        let permalinks: Vec<&str> = listing
            .items
            .iter()
            .map(|item| item.permalink.as_str())
            .collect();
        assert_eq!(permalinks, vec!["good", "last"]);
        assert_eq!(listing.malformed, 2);
    }

    #[test]
    fn record_error_names_its_permalink() {
        let err = decode_item(json!({ "permalink": "broken", "channel": null })).unwrap_err();
        assert!(err.to_string().contains("broken"));
        let err = decode_item(json!({ "title": "no id" })).unwrap_err();
        assert!(err.to_string().contains("<no permalink>"));
    }

    #[test]
    fn load_missing_cache_fails() {
        let dir = tempdir().unwrap();
        assert!(load_listing(&dir.path().join("likes.json")).is_err());
    }

    #[test]
    fn load_unparsable_cache_fails() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("likes.json");
        fs::write(&cache, "{ not json").unwrap();
        let err = load_listing(&cache).unwrap_err();
        assert!(err.to_string().contains("parsing"));
    }
}
