use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex as StdMutex, MutexGuard,
    },
};

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    db::models::{CupProfile, SipEvent, SipSource},
    sip::CupConverter,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    /// UTC calendar day.
    pub date: NaiveDate,
    pub total_sips: u64,
    pub total_ml: f64,
    pub total_cups: f64,
    pub auto_sips: u64,
    pub manual_sips: u64,
    pub goal_ml: u32,
    pub goal_achieved: bool,
    pub progress_percentage: f64,
}

impl DailyStats {
    /// Fold one day's events. `cup_profile` converts the volume to cups; without
    /// one, `total_cups` is 0.
    pub fn from_events(
        date: NaiveDate,
        events: &[SipEvent],
        cup_profile: Option<&CupProfile>,
        goal_ml: u32,
    ) -> Self {
        let total_ml: f64 = events.iter().map(|event| event.ml_estimate).sum();
        let auto_sips = events
            .iter()
            .filter(|event| event.source == SipSource::Auto)
            .count() as u64;
        let total_sips = events.len() as u64;

        let total_cups = cup_profile
            .map(|profile| CupConverter::ml_to_cups(total_ml, profile))
            .unwrap_or(0.0);

        let progress_percentage = if goal_ml > 0 {
            total_ml / f64::from(goal_ml) * 100.0
        } else {
            0.0
        };

        Self {
            date,
            total_sips,
            total_ml,
            total_cups,
            auto_sips,
            manual_sips: total_sips - auto_sips,
            goal_ml,
            goal_achieved: goal_ml > 0 && total_ml >= f64::from(goal_ml),
            progress_percentage,
        }
    }

    pub fn remaining_ml(&self) -> f64 {
        (f64::from(self.goal_ml) - self.total_ml).max(0.0)
    }
}

/// Profile with the most events on the day; ties go to the lowest id.
pub fn dominant_profile_id(events: &[SipEvent]) -> Option<i64> {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for event in events {
        *counts.entry(event.profile_id).or_default() += 1;
    }

    counts
        .into_iter()
        .max_by(|(id_a, count_a), (id_b, count_b)| {
            count_a.cmp(count_b).then_with(|| id_b.cmp(id_a))
        })
        .map(|(id, _)| id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyStats {
    pub week_start: NaiveDate,
    /// Last day of the week, inclusive.
    pub week_end: NaiveDate,
    pub total_sips: u64,
    pub total_ml: f64,
    pub total_cups: f64,
    pub average_daily_ml: f64,
    pub goal_achieved_days: u32,
    /// Goal-achieved days counted backwards from `week_end`.
    pub streak_days: u32,
    pub daily_stats: Vec<DailyStats>,
}

impl WeeklyStats {
    pub const DAYS: i64 = 7;

    pub fn fold(week_start: NaiveDate, daily_stats: Vec<DailyStats>) -> Self {
        let total_sips = daily_stats.iter().map(|day| day.total_sips).sum();
        let total_ml: f64 = daily_stats.iter().map(|day| day.total_ml).sum();
        let total_cups = daily_stats.iter().map(|day| day.total_cups).sum();
        let goal_achieved_days = daily_stats.iter().filter(|day| day.goal_achieved).count() as u32;
        let streak_days = daily_stats
            .iter()
            .rev()
            .take_while(|day| day.goal_achieved)
            .count() as u32;

        Self {
            week_start,
            week_end: week_start + Duration::days(Self::DAYS - 1),
            total_sips,
            total_ml,
            total_cups,
            average_daily_ml: total_ml / Self::DAYS as f64,
            goal_achieved_days,
            streak_days,
            daily_stats,
        }
    }

    pub fn goal_achievement_rate(&self) -> f64 {
        if self.daily_stats.is_empty() {
            return 0.0;
        }
        f64::from(self.goal_achieved_days) / self.daily_stats.len() as f64 * 100.0
    }
}

/// Cached daily aggregates plus one async lock per date.
///
/// Writers hold the date lock across insert and invalidation; recomputation
/// holds it across query and cache fill. A recompute therefore never caches a
/// value that misses a committed write. [`StatsCache::clear`] bumps a
/// generation counter instead of taking every date lock, and fills computed
/// under an older generation are discarded.
#[derive(Default)]
pub struct StatsCache {
    entries: StdMutex<HashMap<NaiveDate, DailyStats>>,
    generation: AtomicU64,
    date_locks: StdMutex<HashMap<NaiveDate, Arc<Mutex<()>>>>,
}

impl StatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, date: NaiveDate) -> Option<DailyStats> {
        lock(&self.entries).get(&date).cloned()
    }

    /// Read before starting a recompute and hand back to [`StatsCache::put`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Store `stats` unless the cache was cleared after `generation` was read.
    pub fn put(&self, stats: DailyStats, generation: u64) -> bool {
        let mut entries = lock(&self.entries);
        if self.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        entries.insert(stats.date, stats);
        true
    }

    pub fn invalidate(&self, date: NaiveDate) -> bool {
        lock(&self.entries).remove(&date).is_some()
    }

    pub fn clear(&self) {
        let mut entries = lock(&self.entries);
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.clear();
    }

    /// Exclusive access to `date` until the guard drops. The lock is forgotten
    /// once nobody holds or waits for it.
    pub async fn lock_date(&self, date: NaiveDate) -> DateGuard<'_> {
        let date_lock = lock(&self.date_locks)
            .entry(date)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = Arc::clone(&date_lock).lock_owned().await;
        DateGuard {
            cache: self,
            date,
            date_lock,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_dates(&self) -> usize {
        lock(&self.date_locks).len()
    }
}

pub struct DateGuard<'a> {
    cache: &'a StatsCache,
    date: NaiveDate,
    date_lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DateGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut locks = lock(&self.cache.date_locks);
        // the map and this guard are the only holders left
        if Arc::strong_count(&self.date_lock) == 2 {
            if let Some(existing) = locks.get(&self.date) {
                if Arc::ptr_eq(existing, &self.date_lock) {
                    locks.remove(&self.date);
                }
            }
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::num::NonZeroU32;

    fn event(id: i64, profile_id: i64, ml: f64, source: SipSource) -> SipEvent {
        SipEvent {
            id,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap(),
            profile_id,
            ml_estimate: ml,
            source,
            confidence: None,
            detection_data: None,
        }
    }

    fn profile(id: i64, size_ml: u32) -> CupProfile {
        let now = Utc::now();
        CupProfile {
            id,
            name: "Mug".into(),
            size_ml: NonZeroU32::new(size_ml).unwrap(),
            sips_per_cup: NonZeroU32::new(10).unwrap(),
            color: None,
            is_default: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    #[test]
    fn daily_fold_counts_sources_and_goal() {
        let events = vec![
            event(1, 1, 25.0, SipSource::Auto),
            event(2, 1, 25.0, SipSource::Auto),
            event(3, 1, 250.0, SipSource::Manual),
        ];
        let stats = DailyStats::from_events(date(3), &events, Some(&profile(1, 250)), 250);

        assert_eq!(stats.total_sips, 3);
        assert_eq!(stats.auto_sips, 2);
        assert_eq!(stats.manual_sips, 1);
        assert_eq!(stats.total_ml, 300.0);
        assert_eq!(stats.total_cups, 1.2);
        assert!(stats.goal_achieved);
        assert!((stats.progress_percentage - 120.0).abs() < 1e-9);
        assert_eq!(stats.remaining_ml(), 0.0);
    }

    #[test]
    fn empty_day_without_profile() {
        let stats = DailyStats::from_events(date(3), &[], None, 2000);
        assert_eq!(stats.total_sips, 0);
        assert_eq!(stats.total_cups, 0.0);
        assert!(!stats.goal_achieved);
        assert_eq!(stats.remaining_ml(), 2000.0);
    }

    #[test]
    fn dominant_profile_breaks_ties_by_lowest_id() {
        let events = vec![
            event(1, 7, 10.0, SipSource::Auto),
            event(2, 3, 10.0, SipSource::Auto),
            event(3, 7, 10.0, SipSource::Auto),
            event(4, 3, 10.0, SipSource::Auto),
            event(5, 9, 10.0, SipSource::Auto),
        ];
        assert_eq!(dominant_profile_id(&events), Some(3));
        assert_eq!(dominant_profile_id(&events[..3]), Some(7));
        assert_eq!(dominant_profile_id(&[]), None);
    }

    #[test]
    fn weekly_fold_totals_and_streak() {
        let goal = 100;
        let days: Vec<DailyStats> = (0..7)
            .map(|offset| {
                let ml = match offset {
                    0 | 4 | 5 | 6 => 150.0,
                    _ => 40.0,
                };
                DailyStats::from_events(
                    date(3) + Duration::days(offset),
                    &[event(offset + 1, 1, ml, SipSource::Manual)],
                    Some(&profile(1, 250)),
                    goal,
                )
            })
            .collect();

        let week = WeeklyStats::fold(date(3), days);
        assert_eq!(week.week_end, date(9));
        assert_eq!(week.total_sips, 7);
        assert_eq!(week.total_ml, 720.0);
        assert!((week.average_daily_ml - 720.0 / 7.0).abs() < 1e-9);
        assert!((week.total_cups - 720.0 / 250.0).abs() < 1e-9);
        assert_eq!(week.goal_achieved_days, 4);
        assert_eq!(week.streak_days, 3);
        assert!((week.goal_achievement_rate() - 400.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn cache_invalidation() {
        let cache = StatsCache::new();
        let stats = DailyStats::from_events(date(3), &[], None, 2000);
        assert!(cache.put(stats.clone(), cache.generation()));
        assert_eq!(cache.get(date(3)), Some(stats));
        assert!(cache.invalidate(date(3)));
        assert!(!cache.invalidate(date(3)));
        assert!(cache.get(date(3)).is_none());
    }

    #[test]
    fn fill_started_before_clear_is_discarded() {
        let cache = StatsCache::new();
        let stale = DailyStats::from_events(date(3), &[], None, 2000);

        let generation = cache.generation();
        cache.clear();
        assert!(!cache.put(stale, generation));
        assert!(cache.get(date(3)).is_none());

        let fresh = DailyStats::from_events(date(3), &[], None, 1500);
        assert!(cache.put(fresh.clone(), cache.generation()));
        assert_eq!(cache.get(date(3)), Some(fresh));
    }

    #[tokio::test]
    async fn date_locks_are_exclusive_and_released() {
        let cache = Arc::new(StatsCache::new());

        let first = cache.lock_date(date(3)).await;
        let other_day = cache.lock_date(date(4)).await;
        assert_eq!(cache.tracked_dates(), 2);
        drop(other_day);
        assert_eq!(cache.tracked_dates(), 1);

        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                let _guard = cache.lock_date(date(3)).await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap();
        assert_eq!(cache.tracked_dates(), 0);
    }
}
