//! The signed-in user's tracker state.
//!
//! `Session` is the only writer of the watchlist, the episode cache and the
//! notification log. Work that has to wait on a collaborator is split in
//! three steps: a synchronous *plan* that returns a ticket tagged with the
//! current identity epoch, the async collaborator call, and a synchronous
//! *apply* that drops results whose epoch is no longer current. Callers that
//! share a session behind a lock hold it only for the plan and apply steps.

use crate::calendar::{CalendarDay, WeekView};
use crate::catalog::CatalogClient;
use crate::episodes::{fetch_missing, shows_to_fetch, CacheEntry, EpisodeCache};
use crate::error::{Error, Result};
use crate::models::{Episode, Identity, Notification, Show, ShowId, UserData, WatchStatus, WatchlistItem};
use crate::notifications::NotificationLog;
use crate::store::RemoteStore;
use crate::sync::WriteThrough;
use crate::watchlist::{self, Toggle, Watchlist};
use chrono::{DateTime, Local, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Pending hydration read for one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydrationTicket {
    epoch: u64,
    uid: String,
}

impl HydrationTicket {
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Reads the stored snapshot. `None` when the read failed.
    pub async fn fetch(&self, store: &dyn RemoteStore) -> Option<UserData> {
        match store.get_user_data(&self.uid).await {
            Ok(data) => Some(data),
            Err(e) => {
                warn!("Could not load stored data for {}: {}", self.uid, e);
                None
            }
        }
    }
}

/// Shows whose episode lists are missing, as of the moment of planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPlan {
    epoch: u64,
    show_ids: Vec<ShowId>,
}

impl RefreshPlan {
    pub fn show_ids(&self) -> &[ShowId] {
        &self.show_ids
    }

    pub async fn fetch(self, catalog: &dyn CatalogClient, batch_size: usize, pause: Duration) -> RefreshOutcome {
        let entries = fetch_missing(catalog, &self.show_ids, batch_size, pause).await;
        RefreshOutcome {
            epoch: self.epoch,
            entries,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshOutcome {
    epoch: u64,
    entries: Vec<(ShowId, CacheEntry)>,
}

pub struct Session {
    store: Arc<dyn RemoteStore>,
    identity: Option<Identity>,
    /// Bumped on every identity change; async results carry the epoch they
    /// were issued under.
    epoch: u64,
    hydrated: bool,
    /// A hydration read has been handed out and not yet applied.
    hydrating: bool,
    watchlist: Watchlist,
    cache: EpisodeCache,
    notifications: NotificationLog,
    writer: Option<WriteThrough>,
}

impl Session {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            identity: None,
            epoch: 0,
            hydrated: false,
            hydrating: false,
            watchlist: Watchlist::new(),
            cache: EpisodeCache::new(),
            notifications: NotificationLog::new(),
            writer: None,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_signed_in(&self) -> bool {
        self.identity.is_some()
    }

    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    pub fn store(&self) -> Arc<dyn RemoteStore> {
        Arc::clone(&self.store)
    }

    // ---- identity ----

    /// Applies an identity change from the identity provider. Signing in
    /// hydrates from the store before returning.
    pub async fn handle_identity(&mut self, identity: Option<Identity>) {
        match identity {
            Some(identity) => self.sign_in(identity).await,
            None => self.sign_out(),
        }
    }

    pub async fn sign_in(&mut self, identity: Identity) {
        let ticket = self.begin_sign_in(identity);
        let data = ticket.fetch(self.store.as_ref()).await;
        self.complete_hydration(&ticket, data);
    }

    /// Switches to `identity` and returns the ticket for its hydration read.
    /// Write-through stays off until that read is applied.
    pub fn begin_sign_in(&mut self, identity: Identity) -> HydrationTicket {
        info!("Signed in as {} ({})", identity.display_name, identity.uid);
        self.epoch += 1;
        self.hydrated = false;
        self.hydrating = true;
        self.writer = None;
        let uid = identity.uid.clone();
        self.identity = Some(identity);
        HydrationTicket { epoch: self.epoch, uid }
    }

    /// Ticket for retrying a failed hydration of the current identity.
    /// `None` once hydrated or while another read is outstanding.
    pub fn hydration_ticket(&mut self) -> Option<HydrationTicket> {
        if self.hydrated || self.hydrating {
            return None;
        }
        let ticket = self.identity.as_ref().map(|identity| HydrationTicket {
            epoch: self.epoch,
            uid: identity.uid.clone(),
        })?;
        self.hydrating = true;
        Some(ticket)
    }

    /// Replaces local state with the stored snapshot and turns on
    /// write-through. A failed read (`None`) leaves write-through off so the
    /// stored data is not overwritten. Returns false for stale tickets and
    /// once the session is already hydrated.
    pub fn complete_hydration(&mut self, ticket: &HydrationTicket, data: Option<UserData>) -> bool {
        if ticket.epoch != self.epoch || self.identity.is_none() {
            debug!("Dropping hydration for {} from an earlier sign-in", ticket.uid);
            return false;
        }
        if self.hydrated {
            debug!("Session for {} is already hydrated", ticket.uid);
            return false;
        }
        self.hydrating = false;

        let Some(data) = data else {
            self.watchlist = Watchlist::new();
            self.notifications = NotificationLog::new();
            warn!("Hydration failed; changes stay local until it succeeds");
            return false;
        };

        self.watchlist = Watchlist::from_items(data.watchlist);
        self.notifications = NotificationLog::from_entries(data.notifications);
        self.hydrated = true;
        self.writer = Some(WriteThrough::spawn(self.store(), ticket.uid.clone()));
        info!(
            "Hydrated {} shows and {} notifications",
            self.watchlist.len(),
            self.notifications.len()
        );
        true
    }

    /// Clears local state. Nothing is written for the clear, and results of
    /// calls issued before this point are dropped when they arrive.
    pub fn sign_out(&mut self) {
        if let Some(identity) = self.identity.take() {
            info!("Signed out {}", identity.uid);
        }
        self.epoch += 1;
        self.hydrated = false;
        self.hydrating = false;
        self.writer = None;
        self.watchlist = Watchlist::new();
        self.notifications = NotificationLog::new();
        self.cache.clear();
    }

    // ---- mutations ----

    /// Returns Ok(false) when the show was already tracked.
    pub fn add_show(&mut self, show: Show) -> Result<bool> {
        self.require_identity()?;
        if !self.watchlist.add(show, Utc::now()) {
            return Ok(false);
        }
        self.after_change();
        Ok(true)
    }

    pub fn remove_show(&mut self, show_id: ShowId) -> bool {
        if !self.watchlist.remove(show_id) {
            return false;
        }
        self.after_change();
        true
    }

    pub fn toggle_episode_watched(&mut self, show_id: ShowId, episode: &Episode) -> Result<Toggle> {
        self.toggle_episode_watched_at(show_id, episode, Utc::now())
    }

    pub fn toggle_episode_watched_at(
        &mut self,
        show_id: ShowId,
        episode: &Episode,
        now: DateTime<Utc>,
    ) -> Result<Toggle> {
        self.require_identity()?;
        let outcome = self.watchlist.toggle_episode(show_id, episode, &self.cache, now);
        if outcome.changed() {
            self.after_change();
        }
        Ok(outcome)
    }

    pub fn mark_read(&mut self, id: &str) -> bool {
        let changed = self.notifications.mark_read(id);
        if changed {
            self.persist();
        }
        changed
    }

    pub fn mark_all_read(&mut self) -> usize {
        let flipped = self.notifications.mark_all_read();
        if flipped > 0 {
            self.persist();
        }
        flipped
    }

    /// Runs the notification pass for `today`. Returns the number added.
    pub fn generate_notifications_at(&mut self, today: NaiveDate, now: DateTime<Utc>) -> usize {
        if !self.is_signed_in() {
            return 0;
        }
        let added = self
            .notifications
            .generate(self.watchlist.items(), &self.cache, today, now);
        if added > 0 {
            self.persist();
        }
        added
    }

    /// Records an episode list fetched outside the refresh cycle.
    pub fn store_episodes(&mut self, show_id: ShowId, episodes: Vec<Episode>) {
        self.apply_entries(vec![(show_id, CacheEntry::Loaded(episodes))]);
    }

    // ---- episode refresh ----

    pub fn plan_refresh(&self) -> Option<RefreshPlan> {
        if !self.is_signed_in() {
            return None;
        }
        let show_ids = shows_to_fetch(self.watchlist.items(), &self.cache);
        if show_ids.is_empty() {
            return None;
        }
        Some(RefreshPlan {
            epoch: self.epoch,
            show_ids,
        })
    }

    /// Merges a finished refresh. Returns false when the outcome belongs to
    /// an earlier identity.
    pub fn apply_refresh(&mut self, outcome: RefreshOutcome) -> bool {
        if outcome.epoch != self.epoch {
            debug!("Dropping episode refresh from an earlier sign-in");
            return false;
        }
        self.apply_entries(outcome.entries);
        true
    }

    /// Plans, fetches and applies one refresh pass.
    #[instrument(skip(self, catalog))]
    pub async fn refresh_episodes(&mut self, catalog: &dyn CatalogClient, batch_size: usize, pause: Duration) {
        if let Some(plan) = self.plan_refresh() {
            let outcome = plan.fetch(catalog, batch_size, pause).await;
            self.apply_refresh(outcome);
        }
    }

    // ---- derived reads ----

    pub fn watchlist(&self) -> &[WatchlistItem] {
        self.watchlist.items()
    }

    pub fn item(&self, show_id: ShowId) -> Option<&WatchlistItem> {
        self.watchlist.get(show_id)
    }

    pub fn is_tracked(&self, show_id: ShowId) -> bool {
        self.watchlist.is_tracked(show_id)
    }

    pub fn items_with_status(&self, status: WatchStatus) -> Vec<&WatchlistItem> {
        self.watchlist.items_with_status(status).collect()
    }

    pub fn tracked_shows(&self) -> Vec<Show> {
        self.watchlist.shows()
    }

    pub fn notifications(&self) -> &[Notification] {
        self.notifications.entries()
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.unread_count()
    }

    pub fn cache(&self) -> &EpisodeCache {
        &self.cache
    }

    pub fn episodes(&self, show_id: ShowId) -> &[Episode] {
        self.cache.episodes(show_id)
    }

    pub fn progress(&self, show_id: ShowId) -> f64 {
        let watched = self.watchlist.get(show_id).map_or(0, WatchlistItem::watched_count);
        watchlist::progress_percent(watched, self.cache.total_known(show_id))
    }

    pub fn seasons(&self, show_id: ShowId) -> Vec<u32> {
        watchlist::seasons(self.cache.episodes(show_id))
    }

    pub fn season_episodes(&self, show_id: ShowId, season: u32) -> Vec<&Episode> {
        watchlist::season_episodes(self.cache.episodes(show_id), season)
    }

    pub fn watched_in_season(&self, show_id: ShowId, season: u32) -> usize {
        self.watchlist.get(show_id).map_or(0, |item| {
            watchlist::watched_in_season(item, self.cache.episodes(show_id), season)
        })
    }

    pub fn calendar(&self, view: &WeekView) -> Vec<CalendarDay> {
        view.days(self.watchlist.items(), &self.cache, Local::now().date_naive())
    }

    /// Waits for the latest snapshot to reach the store.
    pub async fn wait_synced(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            writer.wait_synced().await;
        }
    }

    // ---- internals ----

    fn require_identity(&self) -> Result<()> {
        if self.identity.is_none() {
            debug!("Mutation rejected while signed out");
            return Err(Error::AuthenticationRequired);
        }
        Ok(())
    }

    fn apply_entries(&mut self, entries: Vec<(ShowId, CacheEntry)>) {
        let loaded = self.cache.merge(entries);
        let mut changed = false;
        for show_id in loaded {
            changed |= self.watchlist.refresh_status(show_id, &self.cache);
        }

        let added = self.notifications.generate(
            self.watchlist.items(),
            &self.cache,
            Local::now().date_naive(),
            Utc::now(),
        );
        if changed || added > 0 {
            self.persist();
        }
    }

    /// Notification pass plus write-through after a watchlist change.
    fn after_change(&mut self) {
        self.notifications.generate(
            self.watchlist.items(),
            &self.cache,
            Local::now().date_naive(),
            Utc::now(),
        );
        self.persist();
    }

    fn persist(&mut self) {
        if !self.hydrated {
            return;
        }
        if let Some(writer) = self.writer.as_mut() {
            let seq = writer.push(self.watchlist.items(), self.notifications.entries());
            debug!("Queued snapshot {}", seq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration as ChronoDuration;

    fn identity(uid: &str) -> Identity {
        Identity::new(uid, Some(uid.to_string()), None, None)
    }

    fn show(id: ShowId) -> Show {
        serde_json::from_str(&format!(r#"{{"id": {}, "name": "Show {}", "status": "Running"}}"#, id, id)).unwrap()
    }

    fn aired(id: u32, season: u32) -> Episode {
        let day = (Utc::now() - ChronoDuration::days(10)).date_naive();
        serde_json::from_str(&format!(
            r#"{{"id": {}, "name": "Ep {}", "season": {}, "number": {}, "airdate": "{}"}}"#,
            id,
            id,
            season,
            id,
            day.format("%Y-%m-%d")
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_auth_gate() {
        let mut session = Session::new(Arc::new(MemoryStore::new()));

        assert!(matches!(session.add_show(show(1)), Err(Error::AuthenticationRequired)));
        assert!(matches!(
            session.toggle_episode_watched(1, &aired(1, 1)),
            Err(Error::AuthenticationRequired)
        ));
        assert!(session.watchlist().is_empty());
    }

    #[tokio::test]
    async fn test_derived_reads_follow_cache() {
        let mut session = Session::new(Arc::new(MemoryStore::new()));
        session.sign_in(identity("u1")).await;
        session.add_show(show(1)).unwrap();

        session.toggle_episode_watched(1, &aired(1, 1)).unwrap();
        assert_eq!(session.progress(1), 0.0);
        assert_eq!(session.item(1).unwrap().status, WatchStatus::Watching);

        session.store_episodes(1, vec![aired(1, 1), aired(2, 2)]);
        assert_eq!(session.progress(1), 50.0);
        assert_eq!(session.seasons(1), vec![1, 2]);
        assert_eq!(session.watched_in_season(1, 1), 1);
        assert_eq!(session.watched_in_season(1, 2), 0);
        assert_eq!(session.season_episodes(1, 2).len(), 1);

        session.toggle_episode_watched(1, &aired(2, 2)).unwrap();
        assert_eq!(session.items_with_status(WatchStatus::Completed).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_hydration_keeps_writes_local() {
        let store = Arc::new(MemoryStore::new());
        let mut session = Session::new(store.clone());

        let ticket = session.begin_sign_in(identity("u1"));
        assert!(!session.complete_hydration(&ticket, None));
        session.add_show(show(1)).unwrap();
        session.wait_synced().await;

        assert!(!session.is_hydrated());
        assert_eq!(store.save_count(), 0);
        assert!(session.hydration_ticket().is_some());
        assert!(session.hydration_ticket().is_none());
    }

    #[tokio::test]
    async fn test_single_hydration_per_sign_in() {
        let store = Arc::new(MemoryStore::new());
        let mut session = Session::new(store.clone());

        let ticket = session.begin_sign_in(identity("u1"));
        assert!(session.hydration_ticket().is_none());

        let data = ticket.fetch(store.as_ref()).await;
        assert!(session.complete_hydration(&ticket, data.clone()));
        session.add_show(show(1)).unwrap();

        assert!(!session.complete_hydration(&ticket, data));
        assert_eq!(session.watchlist().len(), 1);
        assert!(session.hydration_ticket().is_none());
    }
}
