use crate::error::Result;
use crate::http::HttpClient;
use crate::models::{Episode, ScheduleEntry, SearchResult, Show, ShowId};
use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDate};
use futures::future::join_all;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

/// Non-serialized content kept out of discovery lists.
pub const EXCLUDED_TYPES: [&str; 7] = [
    "News",
    "Talk Show",
    "Sports",
    "Variety",
    "Panel Show",
    "Award Show",
    "Game Show",
];

/// Popular searches used to seed the default top-rated list.
const SEED_QUERIES: [&str; 8] = [
    "breaking", "thrones", "wire", "sopranos", "succession", "bear", "boys", "last",
];

const SCHEDULE_LIMIT: usize = 15;
const UPCOMING_DAYS: i64 = 3;
const MIN_RUNTIME_MINUTES: u32 = 20;

/// Read-only show catalog.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn search_shows(&self, query: &str) -> Result<Vec<SearchResult>>;

    async fn get_show(&self, show_id: ShowId) -> Result<Show>;

    async fn get_show_episodes(&self, show_id: ShowId) -> Result<Vec<Episode>>;

    /// Top rated serialized shows.
    async fn get_schedule(&self) -> Result<Vec<SearchResult>>;

    /// Broadcasts for today and the following days.
    async fn get_upcoming_schedule(&self) -> Result<Vec<ScheduleEntry>>;
}

pub struct TvMazeClient {
    http: HttpClient,
    base_url: String,
    country: String,
}

impl TvMazeClient {
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            country: "US".to_string(),
        }
    }

    #[instrument(skip(self))]
    async fn get_day_schedule(&self, date: NaiveDate) -> Result<Vec<ScheduleEntry>> {
        let url = format!("{}/schedule", self.base_url);
        let day = date.format("%Y-%m-%d").to_string();
        let mut entries: Vec<ScheduleEntry> = self
            .http
            .get_json_with_query(&url, &[("country", self.country.as_str()), ("date", day.as_str())])
            .await?;

        for entry in &mut entries {
            entry.schedule_date = Some(date);
        }
        Ok(entries)
    }
}

#[async_trait]
impl CatalogClient for TvMazeClient {
    #[instrument(skip(self))]
    async fn search_shows(&self, query: &str) -> Result<Vec<SearchResult>> {
        let url = format!(
            "{}/search/shows?q={}",
            self.base_url,
            urlencoding::encode(query)
        );
        let results: Vec<SearchResult> = self.http.get_json(&url).await?;
        debug!("Search '{}' returned {} shows", query, results.len());
        Ok(results)
    }

    #[instrument(skip(self))]
    async fn get_show(&self, show_id: ShowId) -> Result<Show> {
        let url = format!("{}/shows/{}", self.base_url, show_id);
        self.http.get_json(&url).await
    }

    #[instrument(skip(self))]
    async fn get_show_episodes(&self, show_id: ShowId) -> Result<Vec<Episode>> {
        let url = format!("{}/shows/{}/episodes", self.base_url, show_id);
        let episodes: Vec<Episode> = self.http.get_json(&url).await?;
        debug!("Show {} has {} episodes", show_id, episodes.len());
        Ok(episodes)
    }

    #[instrument(skip(self))]
    async fn get_schedule(&self) -> Result<Vec<SearchResult>> {
        let searches = SEED_QUERIES.iter().map(|query| async move {
            match self.search_shows(query).await {
                Ok(results) => results,
                Err(e) => {
                    warn!("Seed search '{}' failed: {}", query, e);
                    Vec::new()
                }
            }
        });
        let batches = join_all(searches).await;

        let top = top_rated(batches.into_iter().flatten());
        info!("Built top rated list with {} shows", top.len());
        Ok(top)
    }

    #[instrument(skip(self))]
    async fn get_upcoming_schedule(&self) -> Result<Vec<ScheduleEntry>> {
        let today = Local::now().date_naive();
        let mut entries = Vec::new();

        for offset in 0..UPCOMING_DAYS {
            let date = today + Duration::days(offset);
            match self.get_day_schedule(date).await {
                Ok(day) => entries.extend(day),
                Err(e) => warn!("Schedule for {} unavailable: {}", date, e),
            }
        }

        let upcoming = upcoming_highlights(entries);
        info!("Upcoming schedule has {} entries", upcoming.len());
        Ok(upcoming)
    }
}

pub fn is_excluded_type(show: &Show) -> bool {
    show.show_type
        .as_deref()
        .is_some_and(|t| EXCLUDED_TYPES.contains(&t))
}

/// Deduplicates search hits by show, keeps rated shows with artwork and
/// returns the best rated serialized ones.
pub fn top_rated(results: impl IntoIterator<Item = SearchResult>) -> Vec<SearchResult> {
    let mut by_show: HashMap<ShowId, SearchResult> = HashMap::new();
    for result in results {
        if result.show.image.is_some() && result.show.rating.average.is_some() {
            by_show.insert(result.show.id, result);
        }
    }

    let mut top: Vec<SearchResult> = by_show
        .into_values()
        .filter(|r| !is_excluded_type(&r.show))
        .collect();
    top.sort_by(|a, b| {
        b.show
            .average_rating()
            .partial_cmp(&a.show.average_rating())
            .unwrap_or(Ordering::Equal)
            .then(a.show.id.cmp(&b.show.id))
    });
    top.truncate(SCHEDULE_LIMIT);
    top
}

/// Filters broadcast entries down to full-length serialized shows with
/// artwork, ordered by day, air time and rating.
pub fn upcoming_highlights(entries: Vec<ScheduleEntry>) -> Vec<ScheduleEntry> {
    let mut kept: Vec<ScheduleEntry> = entries
        .into_iter()
        .filter(|entry| {
            entry.show.as_ref().is_some_and(|show| {
                show.image.is_some()
                    && entry.runtime.unwrap_or(0) >= MIN_RUNTIME_MINUTES
                    && !is_excluded_type(show)
            })
        })
        .collect();

    kept.sort_by(|a, b| {
        a.schedule_date
            .cmp(&b.schedule_date)
            .then_with(|| a.airtime.cmp(&b.airtime))
            .then_with(|| {
                let rating = |e: &ScheduleEntry| e.show.as_ref().map_or(0.0, Show::average_rating);
                rating(b).partial_cmp(&rating(a)).unwrap_or(Ordering::Equal)
            })
    });
    kept.truncate(SCHEDULE_LIMIT);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Image, Rating};

    fn create_show(id: ShowId, rating: Option<f64>, show_type: &str) -> Show {
        Show {
            id,
            url: None,
            name: format!("Show {}", id),
            show_type: Some(show_type.to_string()),
            language: Some("English".to_string()),
            genres: vec!["Drama".to_string()],
            status: Some("Running".to_string()),
            runtime: Some(60),
            average_runtime: Some(60),
            premiered: None,
            official_site: None,
            schedule: None,
            rating: Rating { average: rating },
            image: Some(Image {
                medium: Some(format!("https://img/{}.jpg", id)),
                original: None,
            }),
            summary: None,
            updated: None,
        }
    }

    fn create_entry(show: Show, date: (i32, u32, u32), airtime: &str, runtime: u32) -> ScheduleEntry {
        ScheduleEntry {
            id: show.id * 100,
            name: "Episode".to_string(),
            season: Some(1),
            number: Some(1),
            airtime: airtime.to_string(),
            runtime: Some(runtime),
            show: Some(show),
            schedule_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2),
        }
    }

    #[test]
    fn test_top_rated_dedupes_and_filters() {
        let mut unrated = create_show(3, None, "Scripted");
        unrated.image = None;
        let results = vec![
            SearchResult { score: 0.9, show: create_show(1, Some(8.0), "Scripted") },
            SearchResult { score: 0.5, show: create_show(1, Some(8.0), "Scripted") },
            SearchResult { score: 0.7, show: create_show(2, Some(9.5), "Scripted") },
            SearchResult { score: 0.7, show: unrated },
            SearchResult { score: 0.8, show: create_show(4, Some(9.9), "Talk Show") },
        ];

        let top = top_rated(results);
        let ids: Vec<ShowId> = top.iter().map(|r| r.show.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_top_rated_is_capped() {
        let results = (1..=40).map(|id| SearchResult {
            score: 1.0,
            show: create_show(id, Some(f64::from(id) / 10.0), "Scripted"),
        });

        let top = top_rated(results);
        assert_eq!(top.len(), 15);
        assert_eq!(top[0].show.id, 40);
    }

    #[test]
    fn test_upcoming_highlights_ordering() {
        let entries = vec![
            create_entry(create_show(1, Some(7.0), "Scripted"), (2024, 6, 11), "20:00", 60),
            create_entry(create_show(2, Some(9.0), "Scripted"), (2024, 6, 10), "21:00", 30),
            create_entry(create_show(3, Some(6.0), "Scripted"), (2024, 6, 10), "20:00", 45),
            create_entry(create_show(4, Some(8.0), "Scripted"), (2024, 6, 10), "20:00", 45),
            create_entry(create_show(5, Some(9.9), "Scripted"), (2024, 6, 10), "19:00", 15),
            create_entry(create_show(6, Some(9.9), "News"), (2024, 6, 10), "19:00", 60),
        ];

        let upcoming = upcoming_highlights(entries);
        let ids: Vec<ShowId> = upcoming
            .iter()
            .filter_map(|e| e.show.as_ref().map(|s| s.id))
            .collect();
        assert_eq!(ids, vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_upcoming_highlights_drops_entries_without_artwork() {
        let mut show = create_show(1, Some(7.0), "Scripted");
        show.image = None;
        let entries = vec![create_entry(show, (2024, 6, 10), "20:00", 60)];
        assert!(upcoming_highlights(entries).is_empty());
    }
}
