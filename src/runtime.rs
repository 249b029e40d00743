//! Per-device runtime
//!
//! A [`PointerDevice`] owns everything one physical remote needs while it
//! is monitored:
//!
//! - the set of OS nodes it was discovered through,
//! - an actor task that owns the decoder and gesture machine and serializes
//!   reports, events and deadlines,
//! - one tokio task per event node,
//! - one OS thread for the raw hidraw node.
//!
//! Dropping the actor cancels every pending gesture deadline, so nothing
//! fires after [`PointerDevice::stop`].

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::context::AppContext;
use crate::decoders::{new_driver, DeviceDriver};
use crate::device_class::{DeviceClass, DeviceKind, NodeKind, VIRTUAL_PATH, VIRTUAL_POINTER};
use crate::evdev::{EvdevError, EventReader, GenericEvent};
use crate::gesture::GestureConfig;
use crate::hidraw::{HidrawError, HidrawReader};
use crate::output::OutputError;

use evdev::KeyCode;

/// Upper bound on waiting for one worker to exit
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Poll period while waiting for the raw reader thread
const THREAD_JOIN_POLL: Duration = Duration::from_millis(10);

// ============================================================================
// Known paths
// ============================================================================

/// OS nodes through which one device was discovered
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownPathSet {
    paths: BTreeSet<PathBuf>,
}

impl KnownPathSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the path was already known
    pub fn insert(&mut self, path: impl Into<PathBuf>) -> bool {
        self.paths.insert(path.into())
    }

    /// Returns `false` if the path was not known
    pub fn remove(&mut self, path: &Path) -> bool {
        self.paths.remove(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }

    /// Primary hidraw node: the lowest-numbered one
    pub fn raw_node(&self) -> Option<&PathBuf> {
        self.paths
            .iter()
            .find(|p| NodeKind::of(p) == Some(NodeKind::Hidraw))
    }

    pub fn event_nodes(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths
            .iter()
            .filter(|p| NodeKind::of(p) == Some(NodeKind::Event))
    }
}

/// Outcome of [`PointerDevice::remove_path`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRemoval {
    NotKnown,
    Remaining,
    LastPath,
}

// ============================================================================
// Workers
// ============================================================================

struct EventWorker {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct RawWorker {
    path: PathBuf,
    stop: watch::Sender<bool>,
    handle: std::thread::JoinHandle<()>,
}

struct Workers {
    actor_stop: watch::Sender<bool>,
    actor: JoinHandle<()>,
    reports: mpsc::UnboundedSender<Vec<u8>>,
    events: mpsc::UnboundedSender<GenericEvent>,
    event_readers: HashMap<PathBuf, EventWorker>,
    raw_reader: Option<RawWorker>,
}

impl Workers {
    fn spawn(driver: Box<dyn DeviceDriver>) -> Self {
        let (reports, reports_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (actor_stop, stop_rx) = watch::channel(false);
        let actor = tokio::spawn(run_actor(driver, reports_rx, events_rx, stop_rx));

        Self {
            actor_stop,
            actor,
            reports,
            events,
            event_readers: HashMap::new(),
            raw_reader: None,
        }
    }

    fn spawn_event_reader(&mut self, kind: DeviceKind, path: &Path) {
        let reader = EventReader::new(path);
        let (stop, stop_rx) = watch::channel(false);
        let tx = self.events.clone();

        let handle = tokio::spawn(async move {
            match reader.run(tx, stop_rx).await {
                Ok(()) => {}
                Err(EvdevError::DeviceGone(path)) => {
                    tracing::info!(device = %kind, path = %path.display(), "Event node gone");
                }
                Err(e) => {
                    tracing::error!(device = %kind, path = %reader.path().display(), error = %e, "Event reader failed");
                }
            }
        });

        self.event_readers.insert(path.to_path_buf(), EventWorker { stop, handle });
    }

    fn spawn_raw_reader(&mut self, class: &'static DeviceClass, path: &Path) {
        let framing = match class.framing {
            Some(framing) => framing,
            None => return,
        };
        let kind = class.kind;
        let reader = HidrawReader::new(path, framing);
        let (stop, stop_rx) = watch::channel(false);
        let tx = self.reports.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("hidraw-{}", kind))
            .spawn(move || match reader.run(tx, stop_rx) {
                Ok(()) => {}
                Err(HidrawError::DeviceGone(path)) => {
                    tracing::info!(device = %kind, path = %path.display(), "Raw node gone");
                }
                Err(e) => {
                    tracing::error!(device = %kind, path = %reader.path().display(), error = %e, "Raw reader failed");
                }
            });

        match spawned {
            Ok(handle) => {
                self.raw_reader = Some(RawWorker {
                    path: path.to_path_buf(),
                    stop,
                    handle,
                });
            }
            Err(e) => {
                tracing::error!(device = %kind, error = %e, "Could not spawn raw reader thread");
            }
        }
    }

    /// Stop the reader bound to `path`, if any
    async fn stop_reader(&mut self, path: &Path) {
        if let Some(worker) = self.event_readers.remove(path) {
            let _ = worker.stop.send(true);
            join_task(worker.handle, path).await;
        }
        if self.raw_reader.as_ref().map_or(false, |r| r.path == path) {
            if let Some(worker) = self.raw_reader.take() {
                let _ = worker.stop.send(true);
                join_thread(worker.handle, path).await;
            }
        }
    }

    async fn shutdown(self) {
        let _ = self.actor_stop.send(true);
        for worker in self.event_readers.values() {
            let _ = worker.stop.send(true);
        }
        if let Some(worker) = &self.raw_reader {
            let _ = worker.stop.send(true);
        }

        join_task(self.actor, Path::new("actor")).await;
        for (path, worker) in self.event_readers {
            join_task(worker.handle, &path).await;
        }
        if let Some(worker) = self.raw_reader {
            join_thread(worker.handle, &worker.path).await;
        }
    }
}

async fn join_task(handle: JoinHandle<()>, what: &Path) {
    let abort = handle.abort_handle();
    match tokio::time::timeout(JOIN_TIMEOUT, handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) if e.is_cancelled() => {}
        Ok(Err(e)) => tracing::error!(worker = %what.display(), "Worker panicked: {:?}", e),
        Err(_) => {
            tracing::warn!(worker = %what.display(), "Worker did not stop in time, aborting");
            abort.abort();
        }
    }
}

async fn join_thread(handle: std::thread::JoinHandle<()>, what: &Path) {
    let deadline = tokio::time::Instant::now() + JOIN_TIMEOUT;
    while !handle.is_finished() {
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(worker = %what.display(), "Reader thread did not stop in time, detaching");
            return;
        }
        tokio::time::sleep(THREAD_JOIN_POLL).await;
    }
    if handle.join().is_err() {
        tracing::error!(worker = %what.display(), "Reader thread panicked");
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

/// Single consumer of everything one device produces
async fn run_actor(
    mut driver: Box<dyn DeviceDriver>,
    mut reports: mpsc::UnboundedReceiver<Vec<u8>>,
    mut events: mpsc::UnboundedReceiver<GenericEvent>,
    mut stop: watch::Receiver<bool>,
) {
    let kind = driver.kind();
    tracing::debug!(device = %kind, "Device actor started");

    loop {
        let deadline = driver.next_deadline();
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            Some(report) = reports.recv() => driver.handle_report(&report, Instant::now()),
            Some(event) = events.recv() => driver.handle_event(&event, Instant::now()),
            _ = wait_for(deadline) => driver.handle_deadline(Instant::now()),
        }
    }

    tracing::debug!(device = %kind, "Device actor stopped");
}

// ============================================================================
// Pointer device
// ============================================================================

/// Runtime of one supported remote (or the virtual pointer)
pub struct PointerDevice {
    class: &'static DeviceClass,
    ctx: Arc<AppContext>,
    gestures: GestureConfig,
    paths: Mutex<KnownPathSet>,
    workers: tokio::sync::Mutex<Option<Workers>>,
}

impl PointerDevice {
    pub fn new(class: &'static DeviceClass, ctx: Arc<AppContext>, gestures: GestureConfig) -> Self {
        Self {
            class,
            ctx,
            gestures,
            paths: Mutex::new(KnownPathSet::new()),
            workers: tokio::sync::Mutex::new(None),
        }
    }

    /// The always-present pointer with no hardware behind it
    pub fn virtual_pointer(ctx: Arc<AppContext>) -> Self {
        let device = Self::new(&VIRTUAL_POINTER, ctx, VIRTUAL_POINTER.gestures);
        device.add_path(VIRTUAL_PATH);
        device
    }

    pub fn kind(&self) -> DeviceKind {
        self.class.kind
    }

    pub fn class(&self) -> &'static DeviceClass {
        self.class
    }

    fn with_paths<R>(&self, f: impl FnOnce(&mut KnownPathSet) -> R) -> R {
        match self.paths.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Record a node; returns `false` if it was already known
    pub fn add_path(&self, path: impl Into<PathBuf>) -> bool {
        self.with_paths(|paths| paths.insert(path))
    }

    pub fn knows_path(&self, path: &Path) -> bool {
        self.with_paths(|paths| paths.contains(path))
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.with_paths(|paths| paths.iter().cloned().collect())
    }

    pub async fn is_monitoring(&self) -> bool {
        self.workers.lock().await.is_some()
    }

    /// Start the actor and any reader that is not running yet
    pub async fn ensure_monitoring(&self) {
        if self.kind().is_virtual() {
            return;
        }

        let mut guard = self.workers.lock().await;
        if guard.is_none() {
            let driver = match new_driver(self.kind(), Arc::clone(&self.ctx), self.gestures) {
                Some(driver) => driver,
                None => return,
            };
            *guard = Some(Workers::spawn(driver));
            tracing::info!(device = %self.kind(), "Monitoring started");
        }
        let workers = match guard.as_mut() {
            Some(workers) => workers,
            None => return,
        };

        let paths = self.with_paths(|paths| paths.clone());
        for path in paths.event_nodes() {
            if !workers.event_readers.contains_key(path) {
                workers.spawn_event_reader(self.kind(), path);
            }
        }
        if workers.raw_reader.is_none() {
            if let Some(path) = paths.raw_node() {
                workers.spawn_raw_reader(self.class, path);
            }
        }
    }

    /// Forget `path` and stop its reader
    pub async fn remove_path(&self, path: &Path) -> PathRemoval {
        let outcome = self.with_paths(|paths| {
            if !paths.remove(path) {
                PathRemoval::NotKnown
            } else if paths.is_empty() {
                PathRemoval::LastPath
            } else {
                PathRemoval::Remaining
            }
        });

        if outcome != PathRemoval::NotKnown {
            if let Some(workers) = self.workers.lock().await.as_mut() {
                workers.stop_reader(path).await;
            }
        }
        outcome
    }

    /// Stop every worker; safe to call repeatedly
    pub async fn stop(&self) {
        if self.kind().is_virtual() {
            return;
        }
        let workers = self.workers.lock().await.take();
        if let Some(workers) = workers {
            workers.shutdown().await;
            tracing::info!(device = %self.kind(), "Monitoring stopped");
        }
    }

    pub fn emit_key(&self, key: KeyCode) -> Result<(), OutputError> {
        self.ctx.output().emit_key(key)
    }

    pub fn emit_chord(&self, keys: &[KeyCode]) -> Result<(), OutputError> {
        self.ctx.output().emit_chord(keys)
    }
}

impl std::fmt::Debug for PointerDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointerDevice")
            .field("kind", &self.kind())
            .field("paths", &self.paths())
            .finish()
    }
}
