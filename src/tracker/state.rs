use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};

use crate::{
    error::StoreError,
    rules::matcher::RuleSet,
    settings::Settings,
    storage::{aggregate::AggregateStore, entities::SiteTotals, kv::KeyValueStore},
    utils::{
        clock::Clock,
        url::{is_untracked_scheme, normalized_host},
    },
};

use super::{
    bus::{EventBus, Outbound},
    events::{ActivityEvent, AlarmName, IdleState, TabId, TabInfo},
    session::{clear_snapshot, load_snapshot, save_snapshot, PendingBuffer, Session, TrackingState},
};

/// The tracking state machine. Owns the single current session and the pending buffer, and
/// commits the buffer into the aggregate store on flush.
///
/// Events are handled one at a time by whoever owns the tracker, so transitions never
/// interleave. Timers live outside, in [super::service::TrackerService].
pub struct SessionTracker<K> {
    store: Arc<AggregateStore<K>>,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    settings: Settings,
    rules: RuleSet,
    session: Option<Session>,
    pending: PendingBuffer,
    last_flush: Option<DateTime<Utc>>,
}

impl<K: KeyValueStore> SessionTracker<K> {
    pub fn new(
        store: Arc<AggregateStore<K>>,
        clock: Arc<dyn Clock>,
        bus: EventBus,
        settings: Settings,
        rules: RuleSet,
    ) -> Self {
        Self {
            store,
            clock,
            bus,
            settings,
            rules,
            session: None,
            pending: PendingBuffer::default(),
            last_flush: None,
        }
    }

    /// Resumes the session persisted by a previous run, if any. Its `last_tick_at` becomes the
    /// baseline of the next tick. Returns whether a session was restored.
    pub async fn restore(&mut self) -> Result<bool, StoreError> {
        let Some(session) = load_snapshot(self.store.kv()).await? else {
            return Ok(false);
        };
        info!(
            "Restored session for {} started at {}",
            session.site_key, session.started_at
        );
        self.session = Some(session);
        self.publish();
        Ok(true)
    }

    pub fn is_tracking(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn pending(&self) -> &PendingBuffer {
        &self.pending
    }

    pub fn last_flush(&self) -> Option<DateTime<Utc>> {
        self.last_flush
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    pub fn set_rules(&mut self, rules: RuleSet) {
        self.rules = rules;
    }

    /// Pure read of the live state. Never touches storage.
    pub fn current_state(&self) -> TrackingState {
        match &self.session {
            Some(session) => TrackingState::tracking(session, &self.pending),
            None => TrackingState::idle(),
        }
    }

    #[instrument(skip(self))]
    pub async fn handle_event(&mut self, event: ActivityEvent) {
        match event {
            ActivityEvent::TabActivated { tab } => self.track_tab(tab).await,
            ActivityEvent::TabUpdated {
                mut tab,
                url,
                status,
                active,
            } => {
                // Only navigations and finished loads of the active tab matter.
                if url.is_none() && status.as_deref() != Some("complete") {
                    return;
                }
                if !active {
                    return;
                }
                if url.is_some() {
                    tab.url = url;
                }
                self.track_tab(tab).await
            }
            ActivityEvent::WindowFocusChanged {
                window_id: None, ..
            } => self.stop_session().await,
            ActivityEvent::WindowFocusChanged { active_tab, .. } => {
                self.track_active(active_tab).await
            }
            ActivityEvent::IdleStateChanged {
                state: IdleState::Active,
                active_tab,
            } => self.track_active(active_tab).await,
            ActivityEvent::IdleStateChanged { .. } => self.stop_session().await,
            ActivityEvent::Alarm {
                name: AlarmName::Flush,
            } => {
                let _ = self.flush().await;
            }
            ActivityEvent::Alarm {
                name: AlarmName::CheckNotifications,
            } => debug!("Notification alarms are handled by the service"),
        }
    }

    async fn track_active(&mut self, tab: Option<TabInfo>) {
        match tab {
            Some(tab) => self.track_tab(tab).await,
            None => self.stop_session().await,
        }
    }

    /// Starts, keeps or stops tracking depending on what `tab` shows.
    pub async fn track_tab(&mut self, tab: TabInfo) {
        let resolved = tab.url.as_deref().and_then(|url| self.resolve_site(url));
        let Some((site_key, rule_id)) = resolved else {
            debug!("Tab {} has nothing to track", tab.id);
            self.stop_session().await;
            return;
        };

        let count_visit = self.should_count_visit(&site_key, self.clock.time());
        self.start_session(tab.id, site_key, rule_id, count_visit)
            .await;
    }

    /// Site key and matching rule for `url`, or `None` when the URL isn't tracked.
    fn resolve_site(&self, url: &str) -> Option<(String, Option<String>)> {
        if is_untracked_scheme(url) {
            return None;
        }
        let host = normalized_host(url)?;

        if let Some(matched) = self.rules.match_url(url) {
            return Some((matched.site_key, Some(matched.rule_id)));
        }
        if self.settings.track_only_matched_rules {
            return None;
        }
        Some((host, None))
    }

    fn should_count_visit(&self, site_key: &str, now: DateTime<Utc>) -> bool {
        match &self.session {
            None => true,
            Some(session) if session.site_key != site_key => true,
            Some(session) => {
                let gap = now - session.last_tick_at;
                gap > Duration::seconds(self.settings.visit_gap_seconds as i64)
            }
        }
    }

    async fn start_session(
        &mut self,
        tab_id: TabId,
        site_key: String,
        rule_id: Option<String>,
        count_visit: bool,
    ) {
        let now = self.clock.time();

        if let Some(session) = self
            .session
            .as_mut()
            .filter(|s| s.tab_id == tab_id && s.site_key == site_key)
        {
            // Same tab, same site: the heartbeat owns the accounting.
            session.last_tick_at = now;
            session.rule_id = rule_id;
            return;
        }

        self.stop_session().await;

        let session = Session::new(site_key, tab_id, rule_id, now);
        if count_visit {
            self.pending.add(&session.site_key, SiteTotals::new(0, 1));
        }
        info!("Started session for {} in tab {tab_id}", session.site_key);
        self.session = Some(session);
        self.persist_snapshot().await;
        self.publish();
    }

    /// Credits the final elapsed seconds, flushes, and forgets the session.
    pub async fn stop_session(&mut self) {
        if self.session.is_none() {
            return;
        }
        self.credit_elapsed(self.clock.time());

        if let Some(session) = self.session.take() {
            info!(
                "Stopped session for {} with {}s",
                session.site_key, session.accumulated_seconds
            );
        }
        let _ = self.flush().await;
        if let Err(e) = clear_snapshot(self.store.kv()).await {
            warn!("Failed to clear the session snapshot: {e}");
        }
        self.publish();
    }

    /// Heartbeat. Credits the whole seconds since the last tick and broadcasts the live state.
    pub fn tick(&mut self) {
        if self.session.is_none() {
            return;
        }
        let credited = self.credit_elapsed(self.clock.time());
        debug!("Tick credited {credited}s");
        self.publish();
    }

    /// Moves `last_tick_at` forward by exactly the credited seconds, so sub-second remainders
    /// carry over to the next tick.
    fn credit_elapsed(&mut self, now: DateTime<Utc>) -> u64 {
        let Some(session) = self.session.as_mut() else {
            return 0;
        };
        let elapsed = session.elapsed_seconds(now);
        if elapsed > 0 {
            session.accumulated_seconds += elapsed;
            session.last_tick_at += Duration::seconds(elapsed as i64);
            self.pending
                .add(&session.site_key, SiteTotals::new(elapsed, 0));
        }
        elapsed
    }

    /// Commits the whole pending buffer into today's bucket. On failure the buffer is kept as
    /// is for the next attempt.
    pub async fn flush(&mut self) -> Result<(), StoreError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let now = self.clock.time();

        if let Err(e) = self.store.merge_all(self.pending.sites(), now).await {
            warn!("Flush failed, keeping pending data for the next attempt: {e}");
            return Err(e);
        }

        info!("Flushed pending data for {} site(s)", self.pending.sites().len());
        self.pending.clear();
        self.last_flush = Some(now);
        self.persist_snapshot().await;
        Ok(())
    }

    /// Final accounting before the tracker goes away. The session itself is kept in the snapshot
    /// so that the next run can resume it.
    pub async fn shutdown(&mut self) {
        self.credit_elapsed(self.clock.time());
        if self.flush().await.is_ok() {
            info!("Tracker shut down cleanly");
        }
    }

    async fn persist_snapshot(&self) {
        let Some(session) = &self.session else {
            return;
        };
        if let Err(e) = save_snapshot(self.store.kv(), session).await {
            warn!("Failed to persist the session snapshot: {e}");
        }
    }

    fn publish(&self) {
        self.bus
            .publish(Outbound::TrackingUpdate(self.current_state()));
    }
}
