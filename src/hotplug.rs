//! Hotplug notifications for device nodes
//!
//! Watches `/dev` and `/dev/input` with inotify and turns node creation and
//! removal into [`HotplugEvent`]s on an async channel.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::device_class::{DeviceTree, NodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotplugEvent {
    pub action: HotplugAction,
    pub path: PathBuf,
}

/// Live inotify watch; dropping it ends the stream
pub struct HotplugMonitor {
    /// Kept alive to maintain the OS watch
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<HotplugEvent>,
}

impl HotplugMonitor {
    pub fn start(tree: &DeviceTree) -> Result<Self, HotplugError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                for hotplug in translate(&event) {
                    tracing::debug!(path = %hotplug.path.display(), action = ?hotplug.action, "Hotplug event");
                    let _ = tx.send(hotplug);
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Hotplug watcher error");
            }
        })
        .map_err(HotplugError::Watch)?;

        for dir in tree.watch_dirs() {
            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|e| HotplugError::WatchDir(dir.clone(), e))?;
            tracing::info!(dir = %dir.display(), "Watching for device nodes");
        }

        Ok(Self { _watcher: watcher, rx })
    }

    /// Next add/remove; `None` once the watcher is gone
    pub async fn next(&mut self) -> Option<HotplugEvent> {
        self.rx.recv().await
    }
}

fn is_device_node(path: &Path) -> bool {
    matches!(NodeKind::of(path), Some(NodeKind::Hidraw | NodeKind::Event))
}

fn translate(event: &Event) -> Vec<HotplugEvent> {
    let action = match event.kind {
        EventKind::Create(_) => HotplugAction::Add,
        EventKind::Remove(_) => HotplugAction::Remove,
        _ => return Vec::new(),
    };
    event
        .paths
        .iter()
        .filter(|path| is_device_node(path))
        .map(|path| HotplugEvent {
            action,
            path: path.clone(),
        })
        .collect()
}

/// Hotplug error type
#[derive(Debug)]
pub enum HotplugError {
    /// inotify watcher could not be created
    Watch(notify::Error),
    /// A node directory could not be watched
    WatchDir(PathBuf, notify::Error),
}

impl std::fmt::Display for HotplugError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HotplugError::Watch(e) => write!(f, "Failed to create hotplug watcher: {}", e),
            HotplugError::WatchDir(dir, e) => write!(f, "Failed to watch {}: {}", dir.display(), e),
        }
    }
}

impl std::error::Error for HotplugError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HotplugError::Watch(e) | HotplugError::WatchDir(_, e) => Some(e),
        }
    }
}
