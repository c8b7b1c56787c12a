use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

pub type ShowId = u32;
pub type EpisodeId = u32;

/// Catalog status value for shows that will not air new episodes.
pub const ENDED_STATUS: &str = "Ended";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Show {
    pub id: ShowId,
    #[serde(default)]
    pub url: Option<String>,
    pub name: String,
    #[serde(rename = "type", default)]
    pub show_type: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub runtime: Option<u32>,
    #[serde(default)]
    pub average_runtime: Option<u32>,
    #[serde(default)]
    pub premiered: Option<String>,
    #[serde(default)]
    pub official_site: Option<String>,
    #[serde(default)]
    pub schedule: Option<AirSchedule>,
    #[serde(default)]
    pub rating: Rating,
    #[serde(default)]
    pub image: Option<Image>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub updated: Option<i64>,
}

impl Show {
    pub fn has_ended(&self) -> bool {
        self.status.as_deref() == Some(ENDED_STATUS)
    }

    pub fn average_rating(&self) -> f64 {
        self.rating.average.unwrap_or(0.0)
    }

    /// Summary with markup removed, as catalog summaries are HTML fragments.
    pub fn plain_summary(&self) -> String {
        strip_tags(self.summary.as_deref().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AirSchedule {
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub days: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Rating {
    pub average: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Image {
    pub medium: Option<String>,
    pub original: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub score: f64,
    pub show: Show,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Episode {
    pub id: EpisodeId,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub season: u32,
    #[serde(default)]
    pub number: u32,
    #[serde(default, deserialize_with = "lenient_date")]
    pub airdate: Option<NaiveDate>,
    #[serde(default)]
    pub airtime: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub airstamp: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub runtime: Option<u32>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub image: Option<Image>,
}

impl Episode {
    /// Moment the episode airs. Falls back to midnight UTC of the air date
    /// when the catalog has no exact timestamp.
    pub fn air_instant(&self) -> Option<DateTime<Utc>> {
        if let Some(stamp) = self.airstamp {
            return Some(stamp.with_timezone(&Utc));
        }
        self.airdate
            .map(|date| Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)))
    }

    pub fn has_aired_by(&self, now: DateTime<Utc>) -> bool {
        self.air_instant().map_or(true, |aired| aired <= now)
    }
}

/// Entry of the daily broadcast schedule, an episode with its show embedded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub id: EpisodeId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub season: Option<u32>,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub airtime: String,
    #[serde(default)]
    pub runtime: Option<u32>,
    pub show: Option<Show>,
    /// Calendar day the entry was requested for, filled in by the client.
    #[serde(default)]
    pub schedule_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum WatchStatus {
    Watching,
    PlanToWatch,
    Completed,
    Dropped,
}

impl WatchStatus {
    /// Status implied by how many episodes were watched out of those known.
    pub fn derive(watched: usize, total_known: usize) -> Self {
        if watched == 0 {
            WatchStatus::PlanToWatch
        } else if total_known > 0 && watched >= total_known {
            WatchStatus::Completed
        } else {
            WatchStatus::Watching
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistItem {
    pub show_id: ShowId,
    pub show: Show,
    pub date_added: DateTime<Utc>,
    pub status: WatchStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub watched_episodes: BTreeSet<EpisodeId>,
}

impl WatchlistItem {
    pub fn new(show: Show, date_added: DateTime<Utc>) -> Self {
        Self {
            show_id: show.id,
            show,
            date_added,
            status: WatchStatus::PlanToWatch,
            progress: 0.0,
            watched_episodes: BTreeSet::new(),
        }
    }

    pub fn watched_count(&self) -> usize {
        self.watched_episodes.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub show_id: ShowId,
    pub show_name: String,
    pub episode_name: String,
    pub season: u32,
    pub number: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

impl Notification {
    pub fn is_for(&self, show_id: ShowId, episode: &Episode) -> bool {
        self.show_id == show_id && self.season == episode.season && self.number == episode.number
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub uid: String,
    pub display_name: String,
    pub email: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: String,
}

impl Identity {
    /// Builds an identity, deriving a display name and avatar from the
    /// e-mail address when the provider has none.
    pub fn new(
        uid: impl Into<String>,
        display_name: Option<String>,
        email: Option<String>,
        photo_url: Option<String>,
    ) -> Self {
        let display_name = display_name
            .filter(|name| !name.is_empty())
            .or_else(|| {
                email
                    .as_deref()
                    .and_then(|e| e.split('@').next())
                    .map(str::to_string)
            })
            .unwrap_or_default();
        let photo_url = photo_url.filter(|url| !url.is_empty()).unwrap_or_else(|| {
            format!(
                "https://api.dicebear.com/7.x/avataaars/svg?seed={}",
                urlencoding::encode(email.as_deref().unwrap_or_default())
            )
        });

        Self {
            uid: uid.into(),
            display_name,
            email,
            photo_url,
        }
    }
}

/// Everything persisted remotely for one user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserData {
    #[serde(default)]
    pub watchlist: Vec<WatchlistItem>,
    #[serde(default)]
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShowAnalysis {
    pub why_watch: String,
    pub similar_shows: Vec<String>,
    pub target_audience: String,
    pub ai_rating: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub title: String,
    pub reason: String,
    pub match_percentage: u32,
}

pub fn strip_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    text
}

fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .filter(|s| !s.is_empty())
        .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()))
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .filter(|s| !s.is_empty())
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok()))
}
