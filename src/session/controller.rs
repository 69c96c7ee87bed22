//! Session lifecycle
//!
//! Three independent axes:
//!
//! ```text
//! lifecycle     stopped <-> started
//! capture       disabled <-> enabled
//! presentation  hidden <-> presented   (presented implies started)
//! ```
//!
//! Start, stop, show and hide are serialized by a lifecycle lock, so a
//! surface can never come up after the session stopped. Flag changes happen
//! under a short state lock that is never held while calling into the
//! presentation surface. Surfaces must not call back into start, stop, show
//! or hide from their own callbacks; dismissal goes through
//! [`PresentationHandle`].

use super::presentation::{
    NoopSurface, PresentationEvent, PresentationHandle, PresentationSurface, SessionEvent,
};
use crate::error::Result;
use crate::intercept::{CaptureContext, CaptureInterceptor, NetworkConfiguration, HOOK_NAME};
use crate::models::{
    CachePolicy, InspectorOptions, RecordFilter, RetentionLimits, TrafficRecord, TriggerGesture,
};
use crate::storage::{RecordEvent, RecordSnapshot, RecordStore, SessionLog, StoragePaths};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::{broadcast, mpsc};

const EVENT_CAPACITY: usize = 64;

/// Outcome of a lifecycle call. Repeated calls are no-ops, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started,
    AlreadyStarted,
    Stopped,
    AlreadyStopped,
}

impl Transition {
    pub fn changed(self) -> bool {
        matches!(self, Transition::Started | Transition::Stopped)
    }
}

#[derive(Debug, Default)]
struct State {
    started: bool,
    presented: bool,
    session_started_at: Option<i64>,
}

pub struct SessionController {
    options: InspectorOptions,
    paths: StoragePaths,
    network: Arc<NetworkConfiguration>,
    context: Arc<CaptureContext>,
    hook: Arc<CaptureInterceptor>,
    lifecycle: Mutex<()>,
    state: Mutex<State>,
    filter: RwLock<RecordFilter>,
    surface: RwLock<Arc<dyn PresentationSurface>>,
    dismissals_tx: mpsc::UnboundedSender<PresentationEvent>,
    dismissals_rx: Mutex<mpsc::UnboundedReceiver<PresentationEvent>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(options: InspectorOptions, network: Arc<NetworkConfiguration>) -> Self {
        let store = Arc::new(RecordStore::new(options.retention));
        let context = Arc::new(CaptureContext::new(store));
        let hook = Arc::new(CaptureInterceptor::new(Arc::clone(&context)));
        let paths = StoragePaths::new(&options.storage_root);
        let (dismissals_tx, dismissals_rx) = mpsc::unbounded_channel();
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            options,
            paths,
            network,
            context,
            hook,
            lifecycle: Mutex::new(()),
            state: Mutex::new(State::default()),
            filter: RwLock::new(RecordFilter::default()),
            surface: RwLock::new(Arc::new(NoopSurface)),
            dismissals_tx,
            dismissals_rx: Mutex::new(dismissals_rx),
            events,
        }
    }

    // ---- lifecycle ----

    /// Install the capture hook, reset storage and begin recording
    pub fn start(&self) -> Transition {
        let _lifecycle = lock(&self.lifecycle);
        if self.lock_state().started {
            tracing::info!("trafficscope v{} - Already started!", crate::VERSION);
            return Transition::AlreadyStarted;
        }

        if !self.network.register(self.hook.clone()) {
            tracing::warn!("Capture hook was already installed");
        }
        self.network
            .set_cache_policy(self.context.config().cache_policy);

        let started_at = Utc::now().timestamp_millis();
        self.init_storage(started_at);
        let was_enabled = self.context.set_enabled(true);

        {
            let mut state = self.lock_state();
            state.started = true;
            state.session_started_at = Some(started_at);
        }
        self.emit(SessionEvent::Started);
        if !was_enabled {
            self.emit(SessionEvent::Enabled);
        }
        tracing::info!("trafficscope v{} - Started!", crate::VERSION);
        Transition::Started
    }

    /// Hide the surface, remove the hook and drop everything captured
    pub fn stop(&self) -> Transition {
        let _lifecycle = lock(&self.lifecycle);
        let was_presented = {
            let mut state = self.lock_state();
            if !state.started {
                tracing::info!("trafficscope v{} - Already stopped!", crate::VERSION);
                return Transition::AlreadyStopped;
            }
            let was_presented = state.presented;
            *state = State::default();
            was_presented
        };

        if was_presented {
            if let Err(err) = self.current_surface().hide() {
                tracing::warn!("Presentation surface failed to hide: {:#}", err);
            }
            self.mark_dismissed();
            self.emit(SessionEvent::Hidden);
        }

        self.network.unregister(HOOK_NAME);
        if self.context.set_enabled(false) {
            self.emit(SessionEvent::Disabled);
        }

        let store = self.context.store();
        store.clear();
        store.detach_log();
        if let Err(err) = self.paths.clear_old_data() {
            tracing::warn!("Failed to reset {:?}: {}", self.paths.traffic_dir(), err);
        }

        self.emit(SessionEvent::Stopped);
        tracing::info!("trafficscope v{} - Stopped!", crate::VERSION);
        Transition::Stopped
    }

    fn init_storage(&self, started_at: i64) {
        let store = self.context.store();
        store.detach_log();
        store.clear();

        match self.paths.purge_logs_older_than(self.options.log_max_age) {
            Ok(_) => {}
            Err(err) => tracing::warn!("Failed to purge old session logs: {}", err),
        }
        if let Err(err) = self.paths.clear_old_data() {
            tracing::warn!(
                "Failed to reset {:?}, continuing in memory only: {}",
                self.paths.traffic_dir(),
                err
            );
        }

        if !self.options.persist_session_log {
            return;
        }
        let path = self.paths.session_log_path(started_at);
        match SessionLog::create(&path) {
            Ok(log) => store.attach_log(log),
            Err(err) => tracing::warn!(
                "Failed to create session log {:?}, continuing in memory only: {}",
                path,
                err
            ),
        }
    }

    pub fn is_started(&self) -> bool {
        self.lock_state().started
    }

    /// When the current session started, in milliseconds since epoch
    pub fn session_started_at(&self) -> Option<i64> {
        self.lock_state().session_started_at
    }

    // ---- capture ----

    pub fn enable(&self) {
        if !self.context.set_enabled(true) {
            tracing::debug!("Capture enabled");
            self.emit(SessionEvent::Enabled);
        }
    }

    pub fn disable(&self) {
        if self.context.set_enabled(false) {
            tracing::debug!("Capture disabled");
            self.emit(SessionEvent::Disabled);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.context.is_enabled()
    }

    // ---- presentation ----

    /// Replace the surface. The returned handle reports user dismissal.
    pub fn attach_presenter(&self, surface: Arc<dyn PresentationSurface>) -> PresentationHandle {
        *self.surface.write().unwrap_or_else(PoisonError::into_inner) = surface;
        self.presentation_handle()
    }

    pub fn presentation_handle(&self) -> PresentationHandle {
        PresentationHandle::new(self.dismissals_tx.clone())
    }

    /// Returns true if the surface was brought up
    pub fn show(&self) -> bool {
        let _lifecycle = lock(&self.lifecycle);
        self.show_locked()
    }

    /// Returns true if the surface was taken down
    pub fn hide(&self) -> bool {
        let _lifecycle = lock(&self.lifecycle);
        self.hide_locked()
    }

    /// Flip presentation. Returns whether the surface is now presented.
    pub fn toggle(&self) -> bool {
        let _lifecycle = lock(&self.lifecycle);
        if self.is_presented() {
            self.hide_locked();
        } else {
            self.show_locked();
        }
        self.is_presented()
    }

    fn show_locked(&self) -> bool {
        self.drain_presentation_events();
        {
            let mut state = self.lock_state();
            if !state.started {
                tracing::debug!("Ignoring show while stopped");
                return false;
            }
            if state.presented {
                return false;
            }
            state.presented = true;
        }

        if let Err(err) = self.current_surface().show() {
            tracing::warn!("Presentation surface failed to show: {:#}", err);
            self.lock_state().presented = false;
            return false;
        }
        self.emit(SessionEvent::Presented);
        true
    }

    fn hide_locked(&self) -> bool {
        self.drain_presentation_events();
        {
            let mut state = self.lock_state();
            if !state.started || !state.presented {
                return false;
            }
            state.presented = false;
        }

        if let Err(err) = self.current_surface().hide() {
            tracing::warn!("Presentation surface failed to hide: {:#}", err);
        }
        self.mark_dismissed();
        self.emit(SessionEvent::Hidden);
        true
    }

    /// Device motion callback. Only acts when the shake gesture is selected.
    pub fn motion_detected(&self) -> bool {
        if self.gesture() != TriggerGesture::Shake {
            tracing::trace!("Ignoring motion, gesture is {:?}", self.gesture());
            return self.is_presented();
        }
        self.toggle()
    }

    pub fn is_presented(&self) -> bool {
        self.drain_presentation_events();
        self.lock_state().presented
    }

    /// Apply dismissals the surface reported since the last call
    pub fn drain_presentation_events(&self) {
        let mut rx = self
            .dismissals_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while let Ok(event) = rx.try_recv() {
            match event {
                PresentationEvent::Dismissed => {
                    let was_presented = std::mem::replace(&mut self.lock_state().presented, false);
                    if was_presented {
                        tracing::debug!("Presentation dismissed by user");
                        self.mark_dismissed();
                        self.emit(SessionEvent::Hidden);
                    }
                }
            }
        }
    }

    /// Last time the surface went from presented to hidden
    pub fn last_dismissed(&self) -> Option<DateTime<Utc>> {
        self.drain_presentation_events();
        self.context
            .config()
            .last_dismissed_at
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    fn mark_dismissed(&self) {
        let now = Utc::now().timestamp_millis();
        self.context
            .update_config(|config| config.last_dismissed_at = Some(now));
    }

    fn current_surface(&self) -> Arc<dyn PresentationSurface> {
        Arc::clone(&self.surface.read().unwrap_or_else(PoisonError::into_inner))
    }

    // ---- configuration ----

    pub fn ignore_url(&self, url: impl Into<String>) {
        let url = url.into();
        tracing::debug!("Ignoring URL {}", url);
        self.context
            .update_config(|config| config.ignore_rules.add_literal(url));
    }

    pub fn ignore_urls<I, S>(&self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context.update_config(|config| {
            for url in urls {
                config.ignore_rules.add_literal(url);
            }
        });
    }

    pub fn ignore_url_with_regex(&self, pattern: &str) -> Result<()> {
        self.ignore_urls_with_regexes([pattern])
    }

    /// Add every pattern or none of them
    pub fn ignore_urls_with_regexes<'a, I>(&self, patterns: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.context.update_config(|config| -> Result<()> {
            let mut rules = config.ignore_rules.clone();
            for pattern in patterns {
                rules.add_pattern(pattern)?;
            }
            config.ignore_rules = rules;
            Ok(())
        })
    }

    /// Stored now, handed to the network configuration on the next start or
    /// immediately if already started
    pub fn set_cache_policy(&self, policy: CachePolicy) {
        self.context
            .update_config(|config| config.cache_policy = policy);
        if self.is_started() {
            self.network.set_cache_policy(policy);
        }
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.context.config().cache_policy
    }

    pub fn set_gesture(&self, gesture: TriggerGesture) {
        self.context.update_config(|config| config.gesture = gesture);
    }

    pub fn gesture(&self) -> TriggerGesture {
        self.context.config().gesture
    }

    pub fn set_retention(&self, limits: RetentionLimits) {
        self.context.store().set_limits(limits);
    }

    // ---- records ----

    /// Records matching the current filter, most recent first
    pub fn list(&self) -> RecordSnapshot {
        let filter = self
            .filter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        self.context.store().query(&filter)
    }

    pub fn get(&self, id: &str) -> Option<Arc<TrafficRecord>> {
        self.context.store().get(id)
    }

    pub fn clear(&self) -> usize {
        self.context.store().clear()
    }

    /// Set the free-text part of the filter; empty text matches everything
    pub fn set_filter(&self, text: impl Into<String>) {
        let text = text.into();
        self.filter
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .text = (!text.is_empty()).then_some(text);
    }

    pub fn set_record_filter(&self, filter: RecordFilter) {
        *self.filter.write().unwrap_or_else(PoisonError::into_inner) = filter;
    }

    pub fn filter(&self) -> RecordFilter {
        self.filter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Raw bytes of the current session log, if one is being written
    pub fn session_log(&self) -> Option<Vec<u8>> {
        let path = self.context.store().log_path()?;
        match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Some(Vec::new()),
            Err(err) => {
                tracing::warn!("Failed to read session log {:?}: {}", path, err);
                None
            }
        }
    }

    // ---- wiring ----

    pub fn store(&self) -> &Arc<RecordStore> {
        self.context.store()
    }

    pub fn network(&self) -> &Arc<NetworkConfiguration> {
        &self.network
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub fn options(&self) -> &InspectorOptions {
        &self.options
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_records(&self) -> broadcast::Receiver<RecordEvent> {
        self.context.store().subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
