use crate::episodes::EpisodeCache;
use crate::models::{Episode, Show, ShowId, WatchStatus, WatchlistItem};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::debug;

/// Outcome of toggling an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Watched,
    Unwatched,
    /// The episode has not aired yet.
    NotAired,
    /// The show is not on the watchlist.
    NotTracked,
}

impl Toggle {
    pub fn changed(self) -> bool {
        matches!(self, Toggle::Watched | Toggle::Unwatched)
    }
}

/// Tracked shows, newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Watchlist {
    items: Vec<WatchlistItem>,
}

impl Watchlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a watchlist from stored items, keeping the first item seen for
    /// any show.
    pub fn from_items(items: Vec<WatchlistItem>) -> Self {
        let mut seen = BTreeSet::new();
        let items = items
            .into_iter()
            .filter(|item| seen.insert(item.show_id))
            .collect();
        Self { items }
    }

    pub fn items(&self) -> &[WatchlistItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, show_id: ShowId) -> Option<&WatchlistItem> {
        self.items.iter().find(|item| item.show_id == show_id)
    }

    pub fn is_tracked(&self, show_id: ShowId) -> bool {
        self.get(show_id).is_some()
    }

    pub fn items_with_status(&self, status: WatchStatus) -> impl Iterator<Item = &WatchlistItem> {
        self.items.iter().filter(move |item| item.status == status)
    }

    pub fn shows(&self) -> Vec<Show> {
        self.items.iter().map(|item| item.show.clone()).collect()
    }

    /// Returns false when the show was already tracked.
    pub fn add(&mut self, show: Show, now: DateTime<Utc>) -> bool {
        if self.is_tracked(show.id) {
            return false;
        }

        debug!("Tracking show {} ({})", show.name, show.id);
        self.items.insert(0, WatchlistItem::new(show, now));
        true
    }

    pub fn remove(&mut self, show_id: ShowId) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.show_id != show_id);
        before != self.items.len()
    }

    pub fn toggle_episode(
        &mut self,
        show_id: ShowId,
        episode: &Episode,
        cache: &EpisodeCache,
        now: DateTime<Utc>,
    ) -> Toggle {
        if !episode.has_aired_by(now) {
            debug!("Episode {} has not aired yet", episode.id);
            return Toggle::NotAired;
        }

        let Some(item) = self.items.iter_mut().find(|item| item.show_id == show_id) else {
            return Toggle::NotTracked;
        };

        let outcome = if item.watched_episodes.remove(&episode.id) {
            Toggle::Unwatched
        } else {
            item.watched_episodes.insert(episode.id);
            Toggle::Watched
        };
        rederive(item, cache.total_known(show_id));
        outcome
    }

    /// Re-derives status and progress for `show_id` against the cache.
    /// Returns true when anything changed.
    pub fn refresh_status(&mut self, show_id: ShowId, cache: &EpisodeCache) -> bool {
        let Some(item) = self.items.iter_mut().find(|item| item.show_id == show_id) else {
            return false;
        };

        let before = (item.status, item.progress);
        rederive(item, cache.total_known(show_id));
        before != (item.status, item.progress)
    }
}

fn rederive(item: &mut WatchlistItem, total_known: usize) {
    item.status = WatchStatus::derive(item.watched_count(), total_known);
    item.progress = progress_percent(item.watched_count(), total_known);
}

/// Share of known episodes watched, in `[0, 100]`.
pub fn progress_percent(watched: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (watched as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

/// Ascending unique season numbers.
pub fn seasons(episodes: &[Episode]) -> Vec<u32> {
    episodes
        .iter()
        .map(|ep| ep.season)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn season_episodes(episodes: &[Episode], season: u32) -> Vec<&Episode> {
    episodes.iter().filter(|ep| ep.season == season).collect()
}

pub fn watched_in_season(item: &WatchlistItem, episodes: &[Episode], season: u32) -> usize {
    episodes
        .iter()
        .filter(|ep| ep.season == season && item.watched_episodes.contains(&ep.id))
        .count()
}
