use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::{broadcast, Mutex};

use crate::{
    db::{
        helpers::day_bounds,
        models::{CupProfile, CupProfileInput, NewSipEvent, SipDetectionData, SipEvent, SipSource},
        Database,
    },
    detection::DetectionSignal,
    error::{TrackerError, TrackerResult},
    settings::SettingsStore,
    sip::{AggregatorConfig, AggregatorPhase, AggregatorState, ConfirmedSip, CupConverter, SipAggregator},
};

use super::{
    events::TrackerEvent,
    queue::PendingSip,
    stats::{dominant_profile_id, DailyStats, StatsCache, WeeklyStats},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const MAX_MANUAL_ML: f64 = 1000.0;

/// Coordinates detection, volume attribution, persistence and statistics.
///
/// Cloning is cheap; clones share the aggregator, cache and event channel.
#[derive(Clone)]
pub struct SipTracker {
    db: Database,
    settings: Arc<SettingsStore>,
    aggregator: Arc<StdMutex<SipAggregator>>,
    active_profile_id: Arc<Mutex<Option<i64>>>,
    stats: Arc<StatsCache>,
    events: broadcast::Sender<TrackerEvent>,
}

impl SipTracker {
    pub fn new(db: Database, settings: Arc<SettingsStore>) -> TrackerResult<Self> {
        let aggregator = SipAggregator::new(settings.aggregator())?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            db,
            settings,
            aggregator: Arc::new(StdMutex::new(aggregator)),
            active_profile_id: Arc::new(Mutex::new(None)),
            stats: Arc::new(StatsCache::new()),
            events,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    pub fn aggregator_phase(&self) -> AggregatorPhase {
        self.lock_aggregator().phase()
    }

    pub fn aggregator_state(&self) -> AggregatorState {
        self.lock_aggregator().state().clone()
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        self.lock_aggregator().config().clone()
    }

    // ---- automatic path ----

    /// Feed one frame's signal through the aggregator without touching storage.
    pub fn observe(&self, signal: &DetectionSignal) -> Option<ConfirmedSip> {
        self.lock_aggregator()
            .process_detection(signal, signal.timestamp)
    }

    /// Aggregate one signal and, on confirmation, store the sip.
    /// Failures are logged and reported on the event channel, never returned.
    pub async fn process_detection(&self, signal: &DetectionSignal) -> Option<SipEvent> {
        let confirmed = self.observe(signal)?;
        self.record_auto_sip(PendingSip::from(confirmed)).await
    }

    /// Attribute a volume to a confirmed sip and persist it, retrying once.
    pub async fn record_auto_sip(&self, pending: PendingSip) -> Option<SipEvent> {
        let onset = pending.sip.timestamp;

        let profile = match self.resolve_active_profile().await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                log_warn!("no cup profile configured, dropping sip at {}", onset.to_rfc3339());
                self.publish(TrackerEvent::SipDropped {
                    reason: "no cup profile configured".into(),
                });
                return None;
            }
            Err(err) => {
                log_error!("failed to resolve cup profile for sip at {}: {err}", onset.to_rfc3339());
                self.publish(TrackerEvent::SipDropped {
                    reason: err.to_string(),
                });
                return None;
            }
        };

        let new_event = NewSipEvent {
            timestamp: onset,
            profile_id: profile.id,
            ml_estimate: CupConverter::estimate_sip_ml(&profile),
            source: SipSource::Auto,
            confidence: Some(pending.sip.confidence),
            detection_data: Some(SipDetectionData {
                duration_ms: pending.sip.duration_ms,
                qualifying_frames: pending.sip.qualifying_frames,
                missed_frames: pending.sip.missed_frames,
                detector: pending.detector.map(|kind| kind.as_str().to_string()),
                session_id: pending.session_id,
            }),
        };

        match self.store(new_event.clone()).await {
            Ok(event) => Some(event),
            Err(first_err) => {
                log_warn!("storing sip failed, retrying once: {first_err}");
                match self.store(new_event).await {
                    Ok(event) => Some(event),
                    Err(err) => {
                        log_warn!("dropping sip at {} after retry: {err}", onset.to_rfc3339());
                        self.publish(TrackerEvent::SipDropped {
                            reason: err.to_string(),
                        });
                        None
                    }
                }
            }
        }
    }

    /// Discard any in-flight candidate and cooldown.
    pub fn reset_detection(&self) {
        self.lock_aggregator().reset();
    }

    /// Validate, persist and apply new aggregator thresholds. The aggregator
    /// restarts from Idle.
    pub fn update_config(&self, config: AggregatorConfig) -> TrackerResult<()> {
        config.validate()?;
        self.settings.update_aggregator(config.clone())?;
        self.lock_aggregator().update_config(config)?;
        log_info!("aggregator configuration updated");
        Ok(())
    }

    /// Re-read the settings file and apply it.
    pub fn reload_settings(&self) -> TrackerResult<()> {
        let settings = self.settings.reload()?;
        self.lock_aggregator().update_config(settings.aggregator)?;
        // goal may have changed
        self.stats.clear();
        Ok(())
    }

    pub fn update_daily_goal(&self, goal_ml: u32) -> TrackerResult<()> {
        self.settings.update_daily_goal(goal_ml)?;
        self.stats.clear();
        Ok(())
    }

    // ---- profiles ----

    /// Select the profile used for automatic sips. `None` falls back to the
    /// configured default.
    pub async fn set_active_profile(&self, profile_id: Option<i64>) -> TrackerResult<()> {
        if let Some(id) = profile_id {
            self.require_profile(id).await?;
        }
        *self.active_profile_id.lock().await = profile_id;
        Ok(())
    }

    /// Selected profile, then the settings default, then the database default.
    pub async fn resolve_active_profile(&self) -> TrackerResult<Option<CupProfile>> {
        let selected = *self.active_profile_id.lock().await;
        let configured = self.settings.default_cup_profile_id();

        for candidate in [selected, configured].into_iter().flatten() {
            if let Some(profile) = self.db.get_cup_profile(candidate).await? {
                return Ok(Some(profile));
            }
            log_warn!("cup profile {candidate} no longer exists, falling back");
        }

        Ok(self.db.get_default_cup_profile().await?)
    }

    pub async fn create_cup_profile(&self, input: CupProfileInput) -> TrackerResult<CupProfile> {
        let profile = self.db.create_cup_profile(input).await?;
        self.stats.clear();
        Ok(profile)
    }

    pub async fn update_cup_profile(
        &self,
        profile_id: i64,
        input: CupProfileInput,
    ) -> TrackerResult<CupProfile> {
        let profile = self.db.update_cup_profile(profile_id, input).await?;
        self.stats.clear();
        Ok(profile)
    }

    pub async fn delete_cup_profile(&self, profile_id: i64) -> TrackerResult<()> {
        self.db.delete_cup_profile(profile_id).await?;
        {
            let mut active = self.active_profile_id.lock().await;
            if *active == Some(profile_id) {
                *active = None;
            }
        }
        self.stats.clear();
        Ok(())
    }

    // ---- manual path ----

    /// Log one sip's worth of the given profile.
    pub async fn add_manual_sip(&self, profile_id: i64) -> TrackerResult<SipEvent> {
        let profile = self.require_profile(profile_id).await?;
        self.record_manual(profile.id, CupConverter::estimate_sip_ml(&profile))
            .await
    }

    /// Log a full cup of the given profile.
    pub async fn add_manual_cup(&self, profile_id: i64) -> TrackerResult<SipEvent> {
        let profile = self.require_profile(profile_id).await?;
        self.record_manual(profile.id, CupConverter::cup_ml(&profile))
            .await
    }

    /// Log an arbitrary amount against a profile.
    pub async fn add_manual_ml(&self, profile_id: i64, ml: f64) -> TrackerResult<SipEvent> {
        if !ml.is_finite() || ml <= 0.0 || ml > MAX_MANUAL_ML {
            return Err(TrackerError::validation(format!(
                "manual amount must be in (0, {MAX_MANUAL_ML}] ml, got {ml}"
            )));
        }
        let profile = self.require_profile(profile_id).await?;
        self.record_manual(profile.id, ml).await
    }

    /// Remove a sip from history and refresh the affected day.
    pub async fn delete_sip(&self, sip_id: i64) -> TrackerResult<SipEvent> {
        let removed = self.db.delete_sip_event(sip_id).await?;
        let date = removed.timestamp.date_naive();
        {
            let _guard = self.stats.lock_date(date).await;
            self.stats.invalidate(date);
        }
        self.publish(TrackerEvent::StatsInvalidated { date });
        Ok(removed)
    }

    // ---- statistics ----

    pub async fn get_daily_stats(&self, date: NaiveDate) -> TrackerResult<DailyStats> {
        if let Some(cached) = self.stats.get(date) {
            return Ok(cached);
        }

        let _guard = self.stats.lock_date(date).await;
        if let Some(cached) = self.stats.get(date) {
            return Ok(cached);
        }

        // read before the profile and goal so a concurrent clear discards this fill
        let generation = self.stats.generation();
        let (start, end) = day_bounds(date)?;
        let events = self.db.query_sip_events(start, end).await?;
        let profile = self.profile_for_cups(&events).await?;
        let stats = DailyStats::from_events(
            date,
            &events,
            profile.as_ref(),
            self.settings.daily_goal_ml(),
        );

        log_debug!(
            "recomputed stats for {date}: {} sips, {:.1} ml",
            stats.total_sips,
            stats.total_ml
        );
        self.stats.put(stats.clone(), generation);
        Ok(stats)
    }

    /// Seven consecutive days starting at `week_start`.
    pub async fn get_weekly_stats(&self, week_start: NaiveDate) -> TrackerResult<WeeklyStats> {
        let mut daily_stats = Vec::with_capacity(WeeklyStats::DAYS as usize);
        for offset in 0..WeeklyStats::DAYS {
            daily_stats.push(
                self.get_daily_stats(week_start + Duration::days(offset))
                    .await?,
            );
        }
        Ok(WeeklyStats::fold(week_start, daily_stats))
    }

    /// Sips per hour over the trailing `window_minutes` ending at `now`.
    pub async fn get_sip_rate(&self, window_minutes: u32, now: DateTime<Utc>) -> TrackerResult<f64> {
        if window_minutes == 0 {
            return Err(TrackerError::validation("window_minutes must be positive"));
        }

        let cutoff = now - Duration::minutes(i64::from(window_minutes));
        let events = self
            .db
            .query_sip_events(cutoff, now + Duration::microseconds(1))
            .await?;

        Ok(events.len() as f64 / (f64::from(window_minutes) / 60.0))
    }

    // ---- internals ----

    async fn require_profile(&self, profile_id: i64) -> TrackerResult<CupProfile> {
        self.db
            .get_cup_profile(profile_id)
            .await?
            .ok_or_else(|| TrackerError::profile_not_found(profile_id))
    }

    async fn record_manual(&self, profile_id: i64, ml: f64) -> TrackerResult<SipEvent> {
        let event = self
            .store(NewSipEvent {
                timestamp: Utc::now(),
                profile_id,
                ml_estimate: ml,
                source: SipSource::Manual,
                confidence: None,
                detection_data: None,
            })
            .await?;
        log_info!("manual entry of {:.1} ml recorded (id {})", ml, event.id);
        Ok(event)
    }

    /// Insert and invalidate under the date lock, then notify subscribers.
    async fn store(&self, new_event: NewSipEvent) -> TrackerResult<SipEvent> {
        let date = new_event.timestamp.date_naive();
        let event = {
            let _guard = self.stats.lock_date(date).await;
            let id = self.db.insert_sip_event(new_event.clone()).await?;
            self.stats.invalidate(date);
            new_event.into_event(id)
        };

        self.publish(TrackerEvent::SipRecorded {
            event: event.clone(),
        });
        self.publish(TrackerEvent::StatsInvalidated { date });
        Ok(event)
    }

    async fn profile_for_cups(&self, events: &[SipEvent]) -> TrackerResult<Option<CupProfile>> {
        if let Some(id) = dominant_profile_id(events) {
            if let Some(profile) = self.db.get_cup_profile(id).await? {
                return Ok(Some(profile));
            }
        }
        Ok(self.db.get_default_cup_profile().await?)
    }

    /// Report a confirmed sip lost before it reached storage.
    pub(crate) fn report_dropped(&self, reason: &str) {
        self.publish(TrackerEvent::SipDropped {
            reason: reason.to_string(),
        });
    }

    fn publish(&self, event: TrackerEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn lock_aggregator(&self) -> MutexGuard<'_, SipAggregator> {
        match self.aggregator.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::DetectorKind;
    use chrono::TimeZone;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        tracker: SipTracker,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("tracker.db")).unwrap();
        let settings = Arc::new(SettingsStore::new(dir.path().join("settings.json")).unwrap());
        let tracker = SipTracker::new(db, settings).unwrap();
        Fixture { _dir: dir, tracker }
    }

    fn drinking(timestamp: DateTime<Utc>) -> DetectionSignal {
        DetectionSignal {
            confidence: 0.9,
            face_detected: true,
            hand_detected: true,
            head_tilt_deg: 40.0,
            hand_face_distance_px: 30.0,
            motion_score: Some(0.4),
            timestamp,
        }
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    /// One second of qualifying frames at 50 fps starting at `start`.
    async fn feed_episode(tracker: &SipTracker, start: DateTime<Utc>) -> Vec<SipEvent> {
        let mut recorded = Vec::new();
        for frame in 0..=50 {
            let ts = start + Duration::milliseconds(frame * 20);
            if let Some(event) = tracker.process_detection(&drinking(ts)).await {
                recorded.push(event);
            }
        }
        recorded
    }

    async fn mug(tracker: &SipTracker) -> CupProfile {
        tracker
            .create_cup_profile(CupProfileInput::new("Mug", 250, 10).as_default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn confirmed_sip_is_stored_with_profile_volume() {
        let fx = fixture();
        let profile = mug(&fx.tracker).await;
        let mut events = fx.tracker.subscribe();

        let recorded = feed_episode(&fx.tracker, base_time()).await;
        assert_eq!(recorded.len(), 1);

        let sip = &recorded[0];
        assert_eq!(sip.timestamp, base_time());
        assert_eq!(sip.profile_id, profile.id);
        assert_eq!(sip.ml_estimate, 25.0);
        assert_eq!(sip.source, SipSource::Auto);
        assert_eq!(sip.confidence, Some(0.9));
        assert_eq!(sip.detection_data.as_ref().unwrap().duration_ms, 800);

        match events.recv().await.unwrap() {
            TrackerEvent::SipRecorded { event } => assert_eq!(event.id, sip.id),
            other => panic!("unexpected event {other:?}"),
        }
        match events.recv().await.unwrap() {
            TrackerEvent::StatsInvalidated { date } => {
                assert_eq!(date, base_time().date_naive())
            }
            other => panic!("unexpected event {other:?}"),
        }

        let stats = fx
            .tracker
            .get_daily_stats(base_time().date_naive())
            .await
            .unwrap();
        assert_eq!(stats.total_sips, 1);
        assert_eq!(stats.auto_sips, 1);
        assert_eq!(stats.total_ml, 25.0);
        assert_eq!(stats.total_cups, 0.1);
    }

    #[tokio::test]
    async fn sip_without_any_profile_is_dropped() {
        let fx = fixture();
        let mut events = fx.tracker.subscribe();

        let recorded = feed_episode(&fx.tracker, base_time()).await;
        assert!(recorded.is_empty());
        assert!(matches!(
            events.recv().await.unwrap(),
            TrackerEvent::SipDropped { .. }
        ));

        let stored = fx
            .tracker
            .database()
            .query_sip_events(base_time(), base_time() + Duration::days(1))
            .await
            .unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn manual_sip_is_visible_in_stats_immediately() {
        let fx = fixture();
        let profile = mug(&fx.tracker).await;

        // populate the cache first so a stale entry would show up
        let today = Utc::now().date_naive();
        let before = fx.tracker.get_daily_stats(today).await.unwrap();
        assert_eq!(before.total_sips, 0);

        let sip = fx.tracker.add_manual_sip(profile.id).await.unwrap();
        let cup = fx.tracker.add_manual_cup(profile.id).await.unwrap();
        assert_eq!(sip.ml_estimate, 25.0);
        assert_eq!(cup.ml_estimate, 250.0);
        assert_eq!(sip.source, SipSource::Manual);
        assert!(sip.confidence.is_none());

        let after = fx
            .tracker
            .get_daily_stats(cup.timestamp.date_naive())
            .await
            .unwrap();
        assert_eq!(after.total_sips, 2);
        assert_eq!(after.manual_sips, 2);
        assert_eq!(after.total_ml, 275.0);
        assert_eq!(after.total_cups, 1.1);
    }

    #[tokio::test]
    async fn manual_entry_for_unknown_profile_writes_nothing() {
        let fx = fixture();
        let err = fx.tracker.add_manual_sip(99).await.unwrap_err();
        assert!(err.is_not_found());

        let err = fx.tracker.add_manual_cup(99).await.unwrap_err();
        assert!(err.is_not_found());

        let now = Utc::now();
        let stored = fx
            .tracker
            .database()
            .query_sip_events(now - Duration::days(1), now + Duration::days(1))
            .await
            .unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn manual_ml_is_range_checked() {
        let fx = fixture();
        let profile = mug(&fx.tracker).await;

        for bad in [0.0, -5.0, 1000.5, f64::NAN] {
            let err = fx.tracker.add_manual_ml(profile.id, bad).await.unwrap_err();
            assert!(matches!(err, TrackerError::Validation { .. }));
        }

        let event = fx.tracker.add_manual_ml(profile.id, 1000.0).await.unwrap();
        assert_eq!(event.ml_estimate, 1000.0);
    }

    #[tokio::test]
    async fn concurrent_manual_entries_are_all_counted() {
        let fx = fixture();
        let profile = mug(&fx.tracker).await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let tracker = fx.tracker.clone();
            handles.push(tokio::spawn(async move {
                let event = tracker.add_manual_sip(profile.id).await.unwrap();
                // interleave reads with writes
                tracker
                    .get_daily_stats(event.timestamp.date_naive())
                    .await
                    .unwrap();
                event.timestamp.date_naive()
            }));
        }

        let mut dates = Vec::new();
        for handle in handles {
            dates.push(handle.await.unwrap());
        }
        dates.sort();
        dates.dedup();

        let mut total = 0;
        for date in dates {
            total += fx.tracker.get_daily_stats(date).await.unwrap().total_sips;
        }
        assert_eq!(total, 10);
    }

    #[tokio::test]
    async fn cups_follow_the_days_dominant_profile() {
        let fx = fixture();
        let mug = mug(&fx.tracker).await;
        let bottle = fx
            .tracker
            .create_cup_profile(CupProfileInput::new("Bottle", 500, 20))
            .await
            .unwrap();

        let db = fx.tracker.database();
        let day = base_time();
        for (offset, profile) in [(0, &bottle), (1, &bottle), (2, &mug)] {
            db.insert_sip_event(NewSipEvent {
                timestamp: day + Duration::minutes(offset),
                profile_id: profile.id,
                ml_estimate: 100.0,
                source: SipSource::Manual,
                confidence: None,
                detection_data: None,
            })
            .await
            .unwrap();
        }

        let stats = fx.tracker.get_daily_stats(day.date_naive()).await.unwrap();
        assert_eq!(stats.total_ml, 300.0);
        assert_eq!(stats.total_cups, 0.6);
    }

    #[tokio::test]
    async fn weekly_stats_fold_seven_days() {
        let fx = fixture();
        let profile = mug(&fx.tracker).await;
        fx.tracker.update_daily_goal(200).unwrap();

        let week_start = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let db = fx.tracker.database();
        for (day, ml) in [(0, 250.0), (2, 100.0), (5, 200.0), (6, 300.0), (7, 999.0)] {
            let ts = week_start.and_hms_opt(12, 0, 0).unwrap().and_utc() + Duration::days(day);
            db.insert_sip_event(NewSipEvent {
                timestamp: ts,
                profile_id: profile.id,
                ml_estimate: ml,
                source: SipSource::Manual,
                confidence: None,
                detection_data: None,
            })
            .await
            .unwrap();
        }

        let week = fx.tracker.get_weekly_stats(week_start).await.unwrap();
        assert_eq!(week.daily_stats.len(), 7);
        assert_eq!(week.week_end, NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
        assert_eq!(week.total_sips, 4);
        assert_eq!(week.total_ml, 850.0);
        assert_eq!(week.goal_achieved_days, 3);
        assert_eq!(week.streak_days, 2);
        assert!((week.average_daily_ml - 850.0 / 7.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn sip_rate_counts_trailing_window() {
        let fx = fixture();
        let profile = mug(&fx.tracker).await;
        let now = base_time();

        let db = fx.tracker.database();
        for minutes_ago in [5, 20, 45, 90] {
            db.insert_sip_event(NewSipEvent {
                timestamp: now - Duration::minutes(minutes_ago),
                profile_id: profile.id,
                ml_estimate: 25.0,
                source: SipSource::Auto,
                confidence: Some(0.8),
                detection_data: None,
            })
            .await
            .unwrap();
        }

        assert_eq!(fx.tracker.get_sip_rate(60, now).await.unwrap(), 3.0);
        assert_eq!(fx.tracker.get_sip_rate(30, now).await.unwrap(), 4.0);
        assert!(fx.tracker.get_sip_rate(0, now).await.is_err());
    }

    #[tokio::test]
    async fn delete_sip_refreshes_stats() {
        let fx = fixture();
        let profile = mug(&fx.tracker).await;
        let event = fx.tracker.add_manual_cup(profile.id).await.unwrap();
        let date = event.timestamp.date_naive();
        assert_eq!(fx.tracker.get_daily_stats(date).await.unwrap().total_sips, 1);

        fx.tracker.delete_sip(event.id).await.unwrap();
        assert_eq!(fx.tracker.get_daily_stats(date).await.unwrap().total_sips, 0);

        assert!(fx.tracker.delete_sip(event.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn active_profile_precedence() {
        let fx = fixture();
        let default = mug(&fx.tracker).await;
        let glass = fx
            .tracker
            .create_cup_profile(CupProfileInput::new("Glass", 300, 12))
            .await
            .unwrap();
        let bottle = fx
            .tracker
            .create_cup_profile(CupProfileInput::new("Bottle", 500, 20))
            .await
            .unwrap();

        let resolved = fx.tracker.resolve_active_profile().await.unwrap().unwrap();
        assert_eq!(resolved.id, default.id);

        fx.tracker
            .settings()
            .update_default_cup_profile(Some(glass.id))
            .unwrap();
        let resolved = fx.tracker.resolve_active_profile().await.unwrap().unwrap();
        assert_eq!(resolved.id, glass.id);

        fx.tracker.set_active_profile(Some(bottle.id)).await.unwrap();
        let resolved = fx.tracker.resolve_active_profile().await.unwrap().unwrap();
        assert_eq!(resolved.id, bottle.id);

        fx.tracker.delete_cup_profile(bottle.id).await.unwrap();
        let resolved = fx.tracker.resolve_active_profile().await.unwrap().unwrap();
        assert_eq!(resolved.id, glass.id);

        assert!(fx
            .tracker
            .set_active_profile(Some(bottle.id))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn config_updates_are_validated_and_reset_the_aggregator() {
        let fx = fixture();
        mug(&fx.tracker).await;

        fx.tracker.observe(&drinking(base_time()));
        let state = fx.tracker.aggregator_state();
        assert_eq!(state.phase, AggregatorPhase::Candidate);
        assert_eq!(state.onset_time, Some(base_time()));
        assert_eq!(state.qualifying_frames, 1);

        let mut invalid = AggregatorConfig::default();
        invalid.sip_duration_max_s = 0.5;
        let err = fx.tracker.update_config(invalid).unwrap_err();
        assert!(matches!(err, TrackerError::Validation { .. }));
        assert_eq!(fx.tracker.aggregator_phase(), AggregatorPhase::Candidate);

        let mut faster = AggregatorConfig::default();
        faster.sip_duration_min_s = 0.2;
        fx.tracker.update_config(faster.clone()).unwrap();
        assert_eq!(fx.tracker.aggregator_phase(), AggregatorPhase::Idle);
        assert!(fx.tracker.aggregator_state().onset_time.is_none());
        assert_eq!(fx.tracker.aggregator_config(), faster);
        assert_eq!(fx.tracker.settings().aggregator(), faster);
    }

    #[tokio::test]
    async fn auto_sip_carries_detector_and_session() {
        let fx = fixture();
        mug(&fx.tracker).await;

        let onset = base_time();
        let pending = PendingSip {
            sip: ConfirmedSip {
                timestamp: onset,
                confirmed_at: onset + Duration::milliseconds(900),
                confidence: 0.7,
                duration_ms: 900,
                qualifying_frames: 40,
                missed_frames: 2,
            },
            detector: Some(DetectorKind::LandmarkModel),
            session_id: Some("session-a".into()),
        };

        let event = fx.tracker.record_auto_sip(pending).await.unwrap();
        let data = event.detection_data.unwrap();
        assert_eq!(data.detector.as_deref(), Some("landmark_model"));
        assert_eq!(data.session_id.as_deref(), Some("session-a"));
        assert_eq!(data.missed_frames, 2);
    }

    #[tokio::test]
    async fn storage_failure_retries_then_drops() {
        let fx = fixture();
        mug(&fx.tracker).await;
        fx.tracker
            .database()
            .execute(|conn| Ok(conn.execute_batch("DROP TABLE sip_events")?))
            .await
            .unwrap();
        let mut events = fx.tracker.subscribe();

        let recorded = feed_episode(&fx.tracker, base_time()).await;
        assert!(recorded.is_empty());

        match events.recv().await.unwrap() {
            TrackerEvent::SipDropped { reason } => assert!(!reason.is_empty()),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(events.try_recv().is_err());

        // the aggregator carries on after the drop
        assert_eq!(fx.tracker.aggregator_phase(), AggregatorPhase::Cooldown);
    }

    #[tokio::test]
    async fn date_locks_do_not_accumulate() {
        let fx = fixture();
        let profile = mug(&fx.tracker).await;
        fx.tracker.add_manual_sip(profile.id).await.unwrap();

        let week_start = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        fx.tracker.get_weekly_stats(week_start).await.unwrap();
        fx.tracker.get_daily_stats(Utc::now().date_naive()).await.unwrap();

        assert_eq!(fx.tracker.stats.tracked_dates(), 0);
    }

    #[tokio::test]
    async fn goal_change_replaces_cached_stats() {
        let fx = fixture();
        let profile = mug(&fx.tracker).await;
        let event = fx.tracker.add_manual_cup(profile.id).await.unwrap();
        let date = event.timestamp.date_naive();

        let before = fx.tracker.get_daily_stats(date).await.unwrap();
        assert_eq!(before.goal_ml, 2000);
        assert!(!before.goal_achieved);

        fx.tracker.update_daily_goal(200).unwrap();
        let after = fx.tracker.get_daily_stats(date).await.unwrap();
        assert_eq!(after.goal_ml, 200);
        assert!(after.goal_achieved);
    }
}
