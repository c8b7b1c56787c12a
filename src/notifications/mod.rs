use crate::episodes::EpisodeCache;
use crate::models::{Notification, WatchStatus, WatchlistItem};
use chrono::{DateTime, NaiveDate, Utc};
use tracing::info;
use uuid::Uuid;

/// New-episode alerts, newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationLog {
    entries: Vec<Notification>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<Notification>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[Notification] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|n| !n.is_read).count()
    }

    /// Returns true when the entry existed and was unread.
    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.entries.iter_mut().find(|n| n.id == id) {
            Some(notification) if !notification.is_read => {
                notification.is_read = true;
                true
            }
            _ => false,
        }
    }

    /// Returns how many entries flipped to read.
    pub fn mark_all_read(&mut self) -> usize {
        let mut flipped = 0;
        for notification in self.entries.iter_mut().filter(|n| !n.is_read) {
            notification.is_read = true;
            flipped += 1;
        }
        flipped
    }

    /// Adds an alert for every episode of a show being watched that airs on
    /// `today` and has no alert yet. Returns the number added.
    pub fn generate(
        &mut self,
        watchlist: &[WatchlistItem],
        cache: &EpisodeCache,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> usize {
        let mut fresh = Vec::new();

        for item in watchlist.iter().filter(|item| item.status == WatchStatus::Watching) {
            for episode in cache.episodes(item.show_id) {
                if episode.airdate != Some(today) {
                    continue;
                }

                let known = self
                    .entries
                    .iter()
                    .chain(fresh.iter())
                    .any(|n: &Notification| n.is_for(item.show_id, episode));
                if known {
                    continue;
                }

                fresh.push(Notification {
                    id: format!("notif-{}-{}-{}", item.show_id, episode.id, Uuid::new_v4()),
                    show_id: item.show_id,
                    show_name: item.show.name.clone(),
                    episode_name: episode.name.clone(),
                    season: episode.season,
                    number: episode.number,
                    timestamp: now,
                    is_read: false,
                });
            }
        }

        let added = fresh.len();
        if added > 0 {
            info!("{} new episodes aired today", added);
            fresh.append(&mut self.entries);
            self.entries = fresh;
        }
        added
    }
}
