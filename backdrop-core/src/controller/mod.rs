//! Background lifecycle: state machine, frequency policy and persistence.
//!
//! Every entry point that changes what is on screen takes the operation
//! lock with `try_lock`. A call that finds it held is dropped with
//! [`BackdropError::Busy`] rather than queued, so at most one load, refresh,
//! apply or settings reload runs at a time.

mod events;
mod persist;
pub mod policy;

pub use events::ControllerEvent;
pub use persist::DebouncedWriter;

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use backdrop_model::{
    BackgroundDescriptor, BackgroundSettings, BackgroundUrls, CurrentBackgroundRecord,
    ImageBackground, SettingsPatch, SourceKind, SystemState,
};
use tokio::{
    sync::{broadcast, broadcast::error::RecvError},
    task::JoinHandle,
};

use crate::{
    error::{BackdropError, Result},
    ports::{BackgroundSource, KeyValueStore, StorageArea, get_json, set_json},
    time::Clock,
    transition::{TransitionOutcome, TransitionPipeline, TransitionRequest},
};

/// Synchronized-area key holding [`BackgroundSettings`].
pub const SETTINGS_KEY: &str = "backdrop.settings";
/// Device-local key holding the [`CurrentBackgroundRecord`].
pub const CURRENT_KEY: &str = "backdrop.current";

const DEFAULT_IMAGE_ID: &str = "default";

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Width / height of the area backgrounds are cropped for.
    pub viewport_aspect: f64,
    /// Bundled image shown when a load fails. Without one the configured
    /// solid color is used.
    pub default_image_url: Option<String>,
    pub preload_next: bool,
    pub persist_debounce: Duration,
    pub event_capacity: usize,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            viewport_aspect: 16.0 / 9.0,
            default_image_url: None,
            preload_next: true,
            persist_debounce: Duration::from_millis(500),
            event_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Pick a new background even if the frequency policy would keep the
    /// current one.
    pub force: bool,
    /// Mark transient failures as not worth a toast.
    pub suppress_errors: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Applied {
        descriptor: BackgroundDescriptor,
        outcome: TransitionOutcome,
        /// The persisted background was re-applied instead of a new one.
        reused: bool,
    },
    /// Settings changed without affecting what is on screen.
    Unchanged,
}

pub struct BackgroundController {
    pipeline: Arc<TransitionPipeline>,
    kv: Arc<dyn KeyValueStore>,
    sources: HashMap<SourceKind, Arc<dyn BackgroundSource>>,
    options: ControllerOptions,
    clock: Clock,
    op_lock: tokio::sync::Mutex<()>,
    state: parking_lot::Mutex<SystemState>,
    settings: parking_lot::Mutex<BackgroundSettings>,
    current: parking_lot::Mutex<Option<CurrentBackgroundRecord>>,
    next: parking_lot::Mutex<Option<BackgroundDescriptor>>,
    viewport_aspect: parking_lot::Mutex<f64>,
    writer: Arc<DebouncedWriter>,
    events: broadcast::Sender<ControllerEvent>,
    preload: parking_lot::Mutex<Option<JoinHandle<()>>>,
    watcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for BackgroundController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundController")
            .field("state", &*self.state.lock())
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .field("options", &self.options)
            .field("has_next", &self.next.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl BackgroundController {
    /// Load persisted settings and current record, and start following
    /// settings changes made elsewhere.
    pub async fn open(
        pipeline: Arc<TransitionPipeline>,
        kv: Arc<dyn KeyValueStore>,
        sources: Vec<Arc<dyn BackgroundSource>>,
        options: ControllerOptions,
        clock: Clock,
    ) -> Arc<Self> {
        let settings = match get_json::<BackgroundSettings>(kv.as_ref(), StorageArea::Sync, SETTINGS_KEY).await {
            Ok(settings) => settings.unwrap_or_default(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to load background settings; using defaults");
                BackgroundSettings::default()
            }
        };
        let current = match get_json::<CurrentBackgroundRecord>(kv.as_ref(), StorageArea::Local, CURRENT_KEY).await {
            Ok(current) => current,
            Err(err) => {
                tracing::warn!(error = %err, "discarding unreadable current background record");
                None
            }
        };

        let sources = sources.into_iter().map(|s| (s.kind(), s)).collect();
        let writer = DebouncedWriter::new(
            Arc::clone(&kv),
            StorageArea::Local,
            CURRENT_KEY,
            options.persist_debounce,
        );
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let viewport_aspect = options.viewport_aspect;

        let controller = Arc::new(Self {
            pipeline,
            kv,
            sources,
            options,
            clock,
            op_lock: tokio::sync::Mutex::new(()),
            state: parking_lot::Mutex::new(SystemState::Idle),
            settings: parking_lot::Mutex::new(settings),
            current: parking_lot::Mutex::new(current),
            next: parking_lot::Mutex::new(None),
            viewport_aspect: parking_lot::Mutex::new(viewport_aspect),
            writer,
            events,
            preload: parking_lot::Mutex::new(None),
            watcher: parking_lot::Mutex::new(None),
        });

        let watcher = spawn_settings_watcher(Arc::downgrade(&controller), controller.kv.subscribe());
        *controller.watcher.lock() = Some(watcher);
        controller
    }

    pub fn state(&self) -> SystemState {
        *self.state.lock()
    }

    pub fn settings(&self) -> BackgroundSettings {
        self.settings.lock().clone()
    }

    pub fn current(&self) -> Option<CurrentBackgroundRecord> {
        self.current.lock().clone()
    }

    /// Descriptor prepared ahead for the next refresh, if any.
    pub fn preloaded(&self) -> Option<BackgroundDescriptor> {
        self.next.lock().clone()
    }

    pub fn pipeline(&self) -> &Arc<TransitionPipeline> {
        &self.pipeline
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub fn viewport_aspect(&self) -> f64 {
        *self.viewport_aspect.lock()
    }

    /// Ignored unless finite and positive.
    pub fn set_viewport_aspect(&self, aspect: f64) {
        if aspect.is_finite() && aspect > 0.0 {
            *self.viewport_aspect.lock() = aspect;
        }
    }

    pub async fn load_background(self: &Arc<Self>, options: LoadOptions) -> Result<LoadOutcome> {
        let Ok(_guard) = self.op_lock.try_lock() else {
            return Err(busy("load_background"));
        };
        self.load_locked(options).await
    }

    /// Show the preloaded next background when it matches the active
    /// source, otherwise load a new one.
    pub async fn refresh(self: &Arc<Self>) -> Result<LoadOutcome> {
        let Ok(_guard) = self.op_lock.try_lock() else {
            return Err(busy("refresh"));
        };

        let source = self.settings.lock().source;
        let preloaded = self
            .next
            .lock()
            .take()
            .filter(|next| next.source_kind() == source);
        match preloaded {
            Some(descriptor) => {
                tracing::debug!(id = descriptor.id(), "refreshing to preloaded background");
                let _loading = self.begin_loading()?;
                self.apply_locked(descriptor, false, false).await
            }
            None => {
                self.load_locked(LoadOptions {
                    force: true,
                    suppress_errors: false,
                })
                .await
            }
        }
    }

    pub async fn apply_background(
        self: &Arc<Self>,
        descriptor: BackgroundDescriptor,
    ) -> Result<LoadOutcome> {
        let Ok(_guard) = self.op_lock.try_lock() else {
            return Err(busy("apply_background"));
        };
        let _loading = self.begin_loading()?;
        self.apply_locked(descriptor, false, false).await
    }

    /// Patch and persist settings; reloads when the change affects what is
    /// displayed.
    pub async fn update_settings(self: &Arc<Self>, patch: SettingsPatch) -> Result<LoadOutcome> {
        let Ok(_guard) = self.op_lock.try_lock() else {
            return Err(busy("update_settings"));
        };

        let (settings, needs_reload) = {
            let mut settings = self.settings.lock();
            let needs_reload = patch.apply_to(&mut settings);
            (settings.clone(), needs_reload)
        };
        set_json(self.kv.as_ref(), StorageArea::Sync, SETTINGS_KEY, &settings).await?;

        if !needs_reload {
            return Ok(LoadOutcome::Unchanged);
        }
        self.next.lock().take();
        self.load_locked(LoadOptions {
            force: true,
            suppress_errors: false,
        })
        .await
    }

    /// Wait for a running preload to finish.
    pub async fn settle_preload(&self) {
        let task = self.preload.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Persist pending state, stop background tasks and release every layer
    /// and handle.
    pub async fn shutdown(&self) {
        if let Some(task) = self.watcher.lock().take() {
            task.abort();
        }
        if let Some(task) = self.preload.lock().take() {
            task.abort();
        }
        if let Err(err) = self.writer.flush().await {
            tracing::warn!(error = %err, "failed to persist current background on shutdown");
        }
        let layers = self.pipeline.shutdown().await;
        let handles = self.pipeline.handles().release_all();
        self.pipeline.cache().flush().await;
        tracing::info!(layers, handles, "background controller shut down");
    }

    async fn load_locked(self: &Arc<Self>, options: LoadOptions) -> Result<LoadOutcome> {
        let _loading = self.begin_loading()?;

        let settings = self.settings();
        let current = self.current();
        let now_ms = self.clock.now_ms();
        if let Some(current) = current
            && !policy::needs_new_background(&settings, Some(&current), now_ms, options.force)
        {
            tracing::debug!(id = current.descriptor.id(), "re-applying current background");
            return self
                .apply_locked(current.descriptor, options.suppress_errors, true)
                .await;
        }

        match self.next_from_source(&settings).await {
            Ok(descriptor) => {
                self.apply_locked(descriptor, options.suppress_errors, false)
                    .await
            }
            Err(err) => Err(self.fail(err, options.suppress_errors).await),
        }
    }

    async fn apply_locked(
        self: &Arc<Self>,
        descriptor: BackgroundDescriptor,
        suppress_errors: bool,
        reused: bool,
    ) -> Result<LoadOutcome> {
        let settings = self.settings();
        let request = TransitionRequest {
            viewport_aspect: self.viewport_aspect(),
            prepare_timeout: settings.prepare_timeout_ms.map(Duration::from_millis),
        };

        let report = match self.pipeline.run_transition(descriptor, request).await {
            Ok(report) => report,
            Err(err) => return Err(self.fail(err, suppress_errors).await),
        };

        self.record_current(&report.descriptor, reused);
        self.set_state(SystemState::Applied)?;
        tracing::info!(
            id = report.descriptor.id(),
            source = %report.descriptor.source_kind(),
            outcome = ?report.outcome,
            reused,
            "background applied"
        );
        self.emit(ControllerEvent::Applied {
            descriptor: report.descriptor.clone(),
            outcome: report.outcome,
        });
        self.spawn_preload(settings);

        Ok(LoadOutcome::Applied {
            descriptor: report.descriptor,
            outcome: report.outcome,
            reused,
        })
    }

    /// Enter the error state, notify, and put a fallback on screen. Returns
    /// the error for the caller to propagate.
    async fn fail(&self, err: BackdropError, suppress_errors: bool) -> BackdropError {
        let suppressible = suppress_errors && err.is_transient();
        tracing::warn!(error = %err, suppressible, "background load failed");

        if let Err(state_err) = self.set_state(SystemState::Error) {
            tracing::debug!(error = %state_err, "state unchanged on failure");
        }
        self.emit(ControllerEvent::Error {
            message: err.to_string(),
            suppressible,
        });
        self.apply_fallback().await;
        err
    }

    async fn apply_fallback(&self) {
        let request = TransitionRequest::new(self.viewport_aspect());

        if let Some(url) = &self.options.default_image_url {
            let descriptor = BackgroundDescriptor::Files(ImageBackground::new(
                DEFAULT_IMAGE_ID,
                BackgroundUrls::new(url.clone()),
            ));
            match self.pipeline.run_transition(descriptor, request).await {
                Ok(_) => return,
                Err(err) => {
                    tracing::warn!(url = %url, error = %err, "default image fallback failed");
                }
            }
        }

        let color = self.settings.lock().color.clone();
        if let Err(err) = self
            .pipeline
            .run_transition(policy::color_descriptor(&color), request)
            .await
        {
            tracing::warn!(color = %color, error = %err, "solid color fallback failed");
        }
    }

    async fn next_from_source(&self, settings: &BackgroundSettings) -> Result<BackgroundDescriptor> {
        let source = match settings.source {
            SourceKind::Color => return Ok(policy::color_descriptor(&settings.color)),
            kind => self.sources.get(&kind).cloned().ok_or_else(|| {
                BackdropError::NotFound(format!("no background source registered for {kind}"))
            })?,
        };
        let timeout = self.pipeline.options().prepare_timeout;
        tokio::time::timeout(timeout, source.next(settings))
            .await
            .map_err(|_| BackdropError::timeout(format!("{} source", settings.source), timeout))?
    }

    fn record_current(&self, descriptor: &BackgroundDescriptor, reused: bool) {
        let record = {
            let mut current = self.current.lock();
            let applied_at = match current.as_ref() {
                Some(existing) if reused => existing.applied_at,
                _ => self.clock.now_ms(),
            };
            let record = CurrentBackgroundRecord {
                descriptor: descriptor.clone(),
                applied_at,
            };
            *current = Some(record.clone());
            record
        };
        match serde_json::to_value(&record) {
            Ok(value) => self.writer.schedule(value),
            Err(err) => tracing::warn!(error = %err, "failed to encode current background"),
        }
    }

    fn spawn_preload(self: &Arc<Self>, settings: BackgroundSettings) {
        if !self.options.preload_next || settings.source == SourceKind::Color {
            return;
        }
        let mut slot = self.preload.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let weak = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            let Some(this) = weak.upgrade() else {
                return;
            };
            let descriptor = match this.next_from_source(&settings).await {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    tracing::debug!(error = %err, "no next background to preload");
                    return;
                }
            };
            let aspect = this.viewport_aspect();
            match this.pipeline.prepare_ahead(descriptor, aspect).await {
                Ok(descriptor) => {
                    tracing::debug!(id = descriptor.id(), "next background preloaded");
                    *this.next.lock() = Some(descriptor);
                }
                Err(err) => tracing::debug!(error = %err, "preloading next background failed"),
            }
        }));
    }

    /// Enter `Loading`. The guard moves a still-loading controller to
    /// `Error` if the operation is dropped before it settles.
    fn begin_loading(&self) -> Result<LoadingGuard<'_>> {
        self.set_state(SystemState::Loading)?;
        Ok(LoadingGuard { controller: self })
    }

    fn set_state(&self, next: SystemState) -> Result<()> {
        let from = {
            let mut state = self.state.lock();
            let from = *state;
            if !from.can_transition_to(next) {
                return Err(BackdropError::InvalidTransition {
                    from: from.to_string(),
                    to: next.to_string(),
                });
            }
            *state = next;
            from
        };
        tracing::debug!(%from, to = %next, "controller state changed");
        self.emit(ControllerEvent::StateChanged { from, to: next });
        Ok(())
    }

    fn emit(&self, event: ControllerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

struct LoadingGuard<'a> {
    controller: &'a BackgroundController,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if self.controller.state() != SystemState::Loading {
            return;
        }
        tracing::warn!("background operation cancelled while loading");
        if self.controller.set_state(SystemState::Error).is_ok() {
            self.controller.emit(ControllerEvent::Error {
                message: "background operation cancelled".to_string(),
                suppressible: true,
            });
        }
    }
}

fn busy(operation: &str) -> BackdropError {
    tracing::debug!(operation, "dropped: another background operation is in flight");
    BackdropError::Busy(operation.to_string())
}

fn spawn_settings_watcher(
    controller: Weak<BackgroundController>,
    mut changes: broadcast::Receiver<crate::ports::StorageChange>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let change = match changes.recv().await {
                Ok(change) => change,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "settings watcher lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if change.area != StorageArea::Sync || change.key != SETTINGS_KEY {
                continue;
            }
            let Some(value) = change.new_value else {
                continue;
            };
            let Some(controller) = controller.upgrade() else {
                break;
            };
            match serde_json::from_value::<BackgroundSettings>(value) {
                Ok(settings) => *controller.settings.lock() = settings,
                Err(err) => tracing::warn!(error = %err, "ignoring malformed settings update"),
            }
        }
    })
}
