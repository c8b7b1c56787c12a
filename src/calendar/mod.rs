use crate::episodes::EpisodeCache;
use crate::models::{Episode, Show, WatchlistItem};
use chrono::{Datelike, Duration, NaiveDate};

/// An episode of a tracked show airing on a given day.
#[derive(Debug, Clone, PartialEq)]
pub struct Release {
    pub show: Show,
    pub episode: Episode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub is_today: bool,
    pub releases: Vec<Release>,
}

/// Monday of the week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Monday through Sunday of the week containing `date`.
pub fn week_window(date: NaiveDate) -> [NaiveDate; 7] {
    let monday = week_start(date);
    std::array::from_fn(|offset| monday + Duration::days(offset as i64))
}

/// Releases of tracked shows on `day`, at most one per show.
pub fn releases_on(watchlist: &[WatchlistItem], cache: &EpisodeCache, day: NaiveDate) -> Vec<Release> {
    watchlist
        .iter()
        .filter_map(|item| {
            cache
                .episodes(item.show_id)
                .iter()
                .find(|ep| ep.airdate == Some(day))
                .map(|ep| Release {
                    show: item.show.clone(),
                    episode: ep.clone(),
                })
        })
        .collect()
}

/// Week-at-a-glance release grid.
#[derive(Debug, Clone, PartialEq)]
pub struct WeekView {
    reference: NaiveDate,
    expanded: Option<String>,
}

impl WeekView {
    pub fn new(reference: NaiveDate) -> Self {
        Self {
            reference,
            expanded: None,
        }
    }

    pub fn reference(&self) -> NaiveDate {
        self.reference
    }

    pub fn window(&self) -> [NaiveDate; 7] {
        week_window(self.reference)
    }

    pub fn change_week(&mut self, offset: i64) {
        self.reference += Duration::days(offset * 7);
    }

    pub fn expanded(&self) -> Option<&str> {
        self.expanded.as_deref()
    }

    /// Expands `key`, or collapses it when already expanded.
    pub fn toggle_expanded(&mut self, key: &str) {
        if self.expanded.as_deref() == Some(key) {
            self.expanded = None;
        } else {
            self.expanded = Some(key.to_string());
        }
    }

    pub fn days(&self, watchlist: &[WatchlistItem], cache: &EpisodeCache, today: NaiveDate) -> Vec<CalendarDay> {
        self.window()
            .into_iter()
            .map(|date| CalendarDay {
                date,
                is_today: date == today,
                releases: releases_on(watchlist, cache, date),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episodes::CacheEntry;
    use chrono::Utc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn item(id: u32) -> WatchlistItem {
        let show: Show = serde_json::from_str(&format!(r#"{{"id": {}, "name": "Show {}"}}"#, id, id)).unwrap();
        WatchlistItem::new(show, Utc::now())
    }

    fn episode(id: u32, airdate: &str) -> Episode {
        serde_json::from_str(&format!(
            r#"{{"id": {}, "name": "Ep {}", "season": 1, "number": {}, "airdate": "{}"}}"#,
            id, id, id, airdate
        ))
        .unwrap()
    }

    #[test]
    fn test_week_window_from_wednesday() {
        let window = week_window(date(2024, 6, 12));
        assert_eq!(window[0], date(2024, 6, 10));
        assert_eq!(window[6], date(2024, 6, 16));
    }

    #[test]
    fn test_week_window_edges() {
        assert_eq!(week_start(date(2024, 6, 16)), date(2024, 6, 10));
        assert_eq!(week_start(date(2024, 6, 10)), date(2024, 6, 10));
        assert_eq!(week_start(date(2024, 1, 3)), date(2024, 1, 1));
        assert_eq!(week_start(date(2023, 1, 1)), date(2022, 12, 26));
    }

    #[test]
    fn test_change_week() {
        let mut view = WeekView::new(date(2024, 6, 12));
        view.change_week(1);
        assert_eq!(view.window()[0], date(2024, 6, 17));
        view.change_week(-2);
        assert_eq!(view.reference(), date(2024, 6, 5));
        assert_eq!(view.window()[0], date(2024, 6, 3));
    }

    #[test]
    fn test_toggle_expanded() {
        let mut view = WeekView::new(date(2024, 6, 12));
        view.toggle_expanded("2024-06-12-1");
        assert_eq!(view.expanded(), Some("2024-06-12-1"));
        view.toggle_expanded("2024-06-13-2");
        assert_eq!(view.expanded(), Some("2024-06-13-2"));
        view.toggle_expanded("2024-06-13-2");
        assert_eq!(view.expanded(), None);
    }

    #[test]
    fn test_days_collect_releases() {
        let watchlist = vec![item(1), item(2), item(3)];
        let mut cache = EpisodeCache::new();
        cache.merge(vec![
            (1, CacheEntry::Loaded(vec![episode(1, "2024-06-12"), episode(2, "2024-06-12")])),
            (2, CacheEntry::Loaded(vec![episode(3, "2024-06-12"), episode(4, "2024-06-14")])),
            (3, CacheEntry::FetchFailed),
        ]);

        let view = WeekView::new(date(2024, 6, 12));
        let days = view.days(&watchlist, &cache, date(2024, 6, 12));

        assert_eq!(days.len(), 7);
        let wednesday = &days[2];
        assert!(wednesday.is_today);
        assert_eq!(wednesday.releases.len(), 2);
        assert_eq!(wednesday.releases[0].episode.id, 1);
        assert_eq!(wednesday.releases[1].show.id, 2);
        assert_eq!(days[4].releases.len(), 1);
        assert!(days[0].releases.is_empty());
    }
}
