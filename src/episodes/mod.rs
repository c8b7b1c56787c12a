use crate::catalog::CatalogClient;
use crate::models::{Episode, ShowId, WatchlistItem};
use futures::future::join_all;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, instrument};

/// What is known about one show's episode list.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    NotFetched,
    /// The last fetch failed; the episode count is unknown.
    FetchFailed,
    Loaded(Vec<Episode>),
}

impl CacheEntry {
    pub fn episodes(&self) -> &[Episode] {
        match self {
            CacheEntry::Loaded(episodes) => episodes,
            _ => &[],
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, CacheEntry::Loaded(_))
    }
}

static NOT_FETCHED: CacheEntry = CacheEntry::NotFetched;

/// Per-show episode lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeCache {
    entries: HashMap<ShowId, CacheEntry>,
}

impl EpisodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, show_id: ShowId) -> &CacheEntry {
        self.entries.get(&show_id).unwrap_or(&NOT_FETCHED)
    }

    pub fn episodes(&self, show_id: ShowId) -> &[Episode] {
        self.entry(show_id).episodes()
    }

    /// Episode count of a loaded list, 0 while unknown.
    pub fn total_known(&self, show_id: ShowId) -> usize {
        self.episodes(show_id).len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies fetch results in one step. A failure never replaces a list
    /// that is already loaded. Returns the shows whose list is now loaded.
    pub fn merge(&mut self, updates: Vec<(ShowId, CacheEntry)>) -> Vec<ShowId> {
        let mut loaded = Vec::new();
        for (show_id, entry) in updates {
            match entry {
                CacheEntry::NotFetched => continue,
                CacheEntry::FetchFailed if self.entry(show_id).is_loaded() => continue,
                CacheEntry::Loaded(_) => loaded.push(show_id),
                CacheEntry::FetchFailed => {}
            }
            self.entries.insert(show_id, entry);
        }
        loaded
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Shows whose episode list should be fetched. Running shows are fetched
/// until a list loads; ended shows get a single attempt.
pub fn shows_to_fetch(watchlist: &[WatchlistItem], cache: &EpisodeCache) -> Vec<ShowId> {
    watchlist
        .iter()
        .filter(|item| match cache.entry(item.show_id) {
            CacheEntry::NotFetched => true,
            CacheEntry::FetchFailed => !item.show.has_ended(),
            CacheEntry::Loaded(_) => false,
        })
        .map(|item| item.show_id)
        .collect()
}

/// Fetches episode lists in sequential batches of at most `batch_size`
/// concurrent requests, pausing between batches.
#[instrument(skip(catalog, show_ids), fields(count = show_ids.len()))]
pub async fn fetch_missing(
    catalog: &dyn CatalogClient,
    show_ids: &[ShowId],
    batch_size: usize,
    pause: Duration,
) -> Vec<(ShowId, CacheEntry)> {
    let batch_size = batch_size.max(1);
    let mut results = Vec::with_capacity(show_ids.len());

    for (index, batch) in show_ids.chunks(batch_size).enumerate() {
        if index > 0 && !pause.is_zero() {
            sleep(pause).await;
        }

        let fetches = batch.iter().map(|&show_id| async move {
            match catalog.get_show_episodes(show_id).await {
                Ok(episodes) => (show_id, CacheEntry::Loaded(episodes)),
                Err(e) => {
                    error!("Failed to fetch episodes for show {}: {}", show_id, e);
                    (show_id, CacheEntry::FetchFailed)
                }
            }
        });
        results.extend(join_all(fetches).await);
    }

    let failed = results
        .iter()
        .filter(|(_, entry)| *entry == CacheEntry::FetchFailed)
        .count();
    info!(
        "Fetched episodes for {} shows ({} failed)",
        results.len() - failed,
        failed
    );
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::models::{ScheduleEntry, SearchResult, Show};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingCatalog {
        failing: HashSet<ShowId>,
        in_flight: Mutex<usize>,
        max_in_flight: Mutex<usize>,
        requested: Mutex<Vec<ShowId>>,
    }

    #[async_trait]
    impl CatalogClient for CountingCatalog {
        async fn search_shows(&self, _query: &str) -> Result<Vec<SearchResult>> {
            Ok(Vec::new())
        }

        async fn get_show(&self, show_id: ShowId) -> Result<Show> {
            Err(Error::InvalidResponse(format!("no show {}", show_id)))
        }

        async fn get_show_episodes(&self, show_id: ShowId) -> Result<Vec<Episode>> {
            {
                let mut in_flight = self.in_flight.lock().unwrap();
                *in_flight += 1;
                let mut max = self.max_in_flight.lock().unwrap();
                *max = (*max).max(*in_flight);
                self.requested.lock().unwrap().push(show_id);
            }
            tokio::task::yield_now().await;
            *self.in_flight.lock().unwrap() -= 1;

            if self.failing.contains(&show_id) {
                return Err(Error::InvalidResponse("boom".to_string()));
            }
            Ok(vec![episode(show_id * 10)])
        }

        async fn get_schedule(&self) -> Result<Vec<SearchResult>> {
            Ok(Vec::new())
        }

        async fn get_upcoming_schedule(&self) -> Result<Vec<ScheduleEntry>> {
            Ok(Vec::new())
        }
    }

    fn episode(id: u32) -> Episode {
        serde_json::from_str(&format!(r#"{{"id": {}, "name": "Ep", "season": 1, "number": 1}}"#, id)).unwrap()
    }

    fn item(id: ShowId, status: &str) -> WatchlistItem {
        let show: Show = serde_json::from_str(&format!(
            r#"{{"id": {}, "name": "Show {}", "status": "{}"}}"#,
            id, id, status
        ))
        .unwrap();
        WatchlistItem::new(show, Utc::now())
    }

    #[test]
    fn test_shows_to_fetch() {
        let watchlist = vec![
            item(1, "Running"),
            item(2, "Running"),
            item(3, "Running"),
            item(4, "Ended"),
            item(5, "Ended"),
        ];
        let mut cache = EpisodeCache::new();
        cache.merge(vec![
            (1, CacheEntry::Loaded(vec![episode(10)])),
            (2, CacheEntry::FetchFailed),
            (5, CacheEntry::FetchFailed),
        ]);

        assert_eq!(shows_to_fetch(&watchlist, &cache), vec![2, 3, 4]);
    }

    #[test]
    fn test_merge_keeps_loaded_lists() {
        let mut cache = EpisodeCache::new();
        let loaded = cache.merge(vec![(1, CacheEntry::Loaded(vec![episode(10), episode(11)]))]);
        assert_eq!(loaded, vec![1]);

        cache.merge(vec![(1, CacheEntry::FetchFailed), (2, CacheEntry::FetchFailed)]);
        assert_eq!(cache.total_known(1), 2);
        assert_eq!(*cache.entry(2), CacheEntry::FetchFailed);
        assert_eq!(cache.total_known(2), 0);
        assert_eq!(*cache.entry(3), CacheEntry::NotFetched);

        cache.merge(vec![(1, CacheEntry::Loaded(vec![episode(12)]))]);
        assert_eq!(cache.total_known(1), 1);
    }

    #[tokio::test]
    async fn test_fetch_missing_bounds_concurrency() {
        let catalog = CountingCatalog::default();
        let ids: Vec<ShowId> = (1..=12).collect();

        let results = fetch_missing(&catalog, &ids, 5, Duration::from_millis(1)).await;

        assert_eq!(results.len(), 12);
        assert!(*catalog.max_in_flight.lock().unwrap() <= 5);
        assert_eq!(*catalog.requested.lock().unwrap(), ids);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_isolated() {
        let catalog = CountingCatalog {
            failing: HashSet::from([2]),
            ..CountingCatalog::default()
        };

        let results = fetch_missing(&catalog, &[1, 2, 3], 5, Duration::ZERO).await;

        assert_eq!(results[0], (1, CacheEntry::Loaded(vec![episode(10)])));
        assert_eq!(results[1], (2, CacheEntry::FetchFailed));
        assert!(results[2].1.is_loaded());
    }
}
