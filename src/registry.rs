//! Device registry and active-device arbitration
//!
//! Holds one [`PointerDevice`] per recognized remote, keyed by
//! [`DeviceKind`], plus the always-present virtual pointer. Hotplug events
//! grow, shrink, create and tear down runtimes; [`DeviceRegistry::set_active`]
//! decides which one drives the overlay.
//!
//! Only the active device is monitored. Switching clears the active slot
//! first so the outgoing device can no longer dispatch, then stops it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::config::{HotplugConfig, SharedConfig};
use crate::context::AppContext;
use crate::device_class::{DeviceClass, DeviceKind, DeviceTree};
use crate::gesture::GestureConfig;
use crate::hotplug::{HotplugAction, HotplugEvent};
use crate::runtime::{PathRemoval, PointerDevice};

/// Capacity of the observer channel
const EVENT_CAPACITY: usize = 32;

/// Membership and active-device changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    DeviceAdded(DeviceKind),
    PathAdded(DeviceKind, PathBuf),
    DeviceRemoved(DeviceKind),
    ActiveChanged(DeviceKind),
}

/// Summary of one registered device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub kind: DeviceKind,
    pub description: &'static str,
    pub active: bool,
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attach {
    Created,
    Extended,
    AlreadyKnown,
}

pub struct DeviceRegistry {
    tree: DeviceTree,
    ctx: Arc<AppContext>,
    config: SharedConfig,
    devices: Mutex<BTreeMap<DeviceKind, Arc<PointerDevice>>>,
    switching: AtomicBool,
    events: broadcast::Sender<RegistryEvent>,
}

impl DeviceRegistry {
    pub fn new(tree: DeviceTree, ctx: Arc<AppContext>, config: SharedConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tree,
            ctx,
            config,
            devices: Mutex::new(BTreeMap::new()),
            switching: AtomicBool::new(false),
            events,
        }
    }

    pub fn tree(&self) -> &DeviceTree {
        &self.tree
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Register an observer
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: RegistryEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn gestures_for(&self, kind: DeviceKind) -> GestureConfig {
        match self.config.read() {
            Ok(config) => config.gesture_config(kind),
            Err(_) => kind.class().gestures,
        }
    }

    fn hotplug_config(&self) -> HotplugConfig {
        match self.config.read() {
            Ok(config) => config.hotplug.clone(),
            Err(_) => HotplugConfig::default(),
        }
    }

    fn auto_activate(&self) -> bool {
        self.config.read().map(|c| c.auto_activate).unwrap_or(true)
    }

    pub async fn device(&self, kind: DeviceKind) -> Option<Arc<PointerDevice>> {
        self.devices.lock().await.get(&kind).cloned()
    }

    async fn owner_of(&self, path: &Path) -> Option<Arc<PointerDevice>> {
        self.devices
            .lock()
            .await
            .values()
            .find(|device| !device.kind().is_virtual() && device.knows_path(path))
            .cloned()
    }

    pub async fn list(&self) -> Vec<DeviceInfo> {
        let active = self.ctx.active();
        self.devices
            .lock()
            .await
            .values()
            .map(|device| DeviceInfo {
                kind: device.kind(),
                description: device.class().description,
                active: active == Some(device.kind()),
                paths: device.paths(),
            })
            .collect()
    }

    // ========================================================================
    // Startup
    // ========================================================================

    /// Enumerate present nodes and pick the initial active device
    pub async fn start(&self) {
        {
            let mut devices = self.devices.lock().await;
            devices
                .entry(DeviceKind::Virtual)
                .or_insert_with(|| Arc::new(PointerDevice::virtual_pointer(Arc::clone(&self.ctx))));
        }

        for path in self.tree.scan() {
            if let Some((class, probe)) = self.tree.identify(&path) {
                tracing::debug!(path = %path.display(), name = %probe.name, "Recognized node");
                self.attach(class, path).await;
            }
        }

        let physical: Vec<DeviceKind> = self
            .devices
            .lock()
            .await
            .keys()
            .copied()
            .filter(|kind| !kind.is_virtual())
            .collect();

        let initial = match physical.as_slice() {
            [only] => *only,
            [] => DeviceKind::Virtual,
            several => {
                tracing::info!(count = several.len(), "Several remotes present, waiting for a selection");
                DeviceKind::Virtual
            }
        };

        if self.begin_switch() {
            self.switch_to(initial).await;
            self.end_switch();
        }
    }

    async fn attach(&self, class: &'static DeviceClass, path: PathBuf) -> Attach {
        let kind = class.kind;
        let (device, created) = {
            let mut devices = self.devices.lock().await;
            match devices.get(&kind) {
                Some(device) => (Arc::clone(device), false),
                None => {
                    let device = Arc::new(PointerDevice::new(class, Arc::clone(&self.ctx), self.gestures_for(kind)));
                    devices.insert(kind, Arc::clone(&device));
                    (device, true)
                }
            }
        };

        if !device.add_path(&path) {
            return Attach::AlreadyKnown;
        }

        if created {
            tracing::info!(device = %kind, path = %path.display(), "Device added: {}", class.description);
            self.notify(RegistryEvent::DeviceAdded(kind));
            Attach::Created
        } else {
            tracing::info!(device = %kind, path = %path.display(), "Device gained a node");
            if self.ctx.is_active(kind) {
                device.ensure_monitoring().await;
            }
            self.notify(RegistryEvent::PathAdded(kind, path));
            Attach::Extended
        }
    }

    // ========================================================================
    // Hotplug
    // ========================================================================

    pub async fn on_hotplug(self: &Arc<Self>, event: HotplugEvent) {
        match event.action {
            HotplugAction::Add => self.on_add(event.path).await,
            HotplugAction::Remove => self.on_remove(&event.path).await,
        }
    }

    async fn on_add(self: &Arc<Self>, path: PathBuf) {
        if self.owner_of(&path).await.is_some() {
            tracing::debug!(path = %path.display(), "Node already known");
            return;
        }

        let class = match self.wait_until_ready(&path).await {
            Some(class) => class,
            None => return,
        };

        if self.attach(class, path).await == Attach::Created && self.auto_activate() {
            let current = self.ctx.active();
            if current.map_or(true, |kind| kind.is_virtual()) {
                self.set_active(class.kind);
            }
        }
    }

    /// Probe until sysfs describes the node, then classify it
    async fn wait_until_ready(&self, path: &Path) -> Option<&'static DeviceClass> {
        let settle = self.hotplug_config();
        for attempt in 0..settle.settle_retries {
            if path.exists() {
                if let Ok(probe) = self.tree.probe(path) {
                    return match crate::device_class::classify(&probe) {
                        Some(class) => Some(class),
                        None => {
                            tracing::trace!(path = %path.display(), "Unsupported node");
                            None
                        }
                    };
                }
            }
            tracing::trace!(path = %path.display(), attempt, "Node not ready");
            tokio::time::sleep(settle.settle_interval()).await;
        }
        tracing::warn!(
            path = %path.display(),
            retries = settle.settle_retries,
            "Node never became ready, ignoring it"
        );
        None
    }

    async fn on_remove(&self, path: &Path) {
        let device = match self.owner_of(path).await {
            Some(device) => device,
            None => return,
        };
        let kind = device.kind();

        match device.remove_path(path).await {
            PathRemoval::NotKnown => return,
            PathRemoval::Remaining => {
                tracing::info!(device = %kind, path = %path.display(), "Device lost a node");
                return;
            }
            PathRemoval::LastPath => {}
        }

        // Only the caller that takes it out of the map tears it down
        let removed = {
            let mut devices = self.devices.lock().await;
            match devices.get(&kind) {
                Some(current) if Arc::ptr_eq(current, &device) => devices.remove(&kind),
                _ => None,
            }
        };
        if removed.is_none() {
            return;
        }

        let was_active = self.ctx.is_active(kind);
        if was_active {
            self.ctx.deactivate();
        }
        device.stop().await;
        tracing::info!(device = %kind, "Device removed");
        self.notify(RegistryEvent::DeviceRemoved(kind));

        if was_active {
            self.ctx.activate(DeviceKind::Virtual);
            self.notify(RegistryEvent::ActiveChanged(DeviceKind::Virtual));
        }
    }

    // ========================================================================
    // Arbitration
    // ========================================================================

    fn begin_switch(&self) -> bool {
        self.switching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn end_switch(&self) {
        self.switching.store(false, Ordering::Release);
    }

    /// Make `kind` the active device
    ///
    /// Returns the handle of the switch task, or `None` if `kind` is
    /// already active or another switch is still running.
    pub fn set_active(self: &Arc<Self>, kind: DeviceKind) -> Option<JoinHandle<()>> {
        if self.ctx.is_active(kind) {
            return None;
        }
        if !self.begin_switch() {
            tracing::debug!(device = %kind, "Device switch already in progress");
            return None;
        }

        let registry = Arc::clone(self);
        Some(tokio::spawn(async move {
            registry.switch_to(kind).await;
            registry.end_switch();
        }))
    }

    async fn switch_to(&self, kind: DeviceKind) {
        let device = match self.device(kind).await {
            Some(device) => device,
            None => {
                tracing::warn!(device = %kind, "Cannot activate unknown device");
                return;
            }
        };

        let previous = self.ctx.deactivate();
        if let Some(previous) = previous.filter(|&p| p != kind) {
            if let Some(old) = self.device(previous).await {
                old.stop().await;
            }
        }

        device.ensure_monitoring().await;

        // Unplugged while we were switching
        let still_present = match self.device(kind).await {
            Some(current) => Arc::ptr_eq(&current, &device),
            None => false,
        };
        if !still_present {
            device.stop().await;
            tracing::warn!(device = %kind, "Device vanished during switch");
            self.ctx.activate(DeviceKind::Virtual);
            self.notify(RegistryEvent::ActiveChanged(DeviceKind::Virtual));
            return;
        }

        self.ctx.activate(kind);
        self.notify(RegistryEvent::ActiveChanged(kind));
    }

    /// Stop every runtime
    pub async fn shutdown(&self) {
        self.ctx.deactivate();
        let devices: Vec<Arc<PointerDevice>> = self.devices.lock().await.values().cloned().collect();
        for device in devices {
            device.stop().await;
        }
        tracing::info!("All devices stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::new_shared_config;
    use crate::context::testing::TestContext;
    use crate::device_class::fixtures::FakeTree;
    use std::time::Duration;

    const ASA_VENDOR: u16 = 0x1915;
    const ASA_SMART: u16 = 0x1001;
    const ASA_COMPOSITE: u16 = 0x1025;

    fn registry(fake: &FakeTree) -> (TestContext, Arc<DeviceRegistry>) {
        let t = TestContext::new();
        let config = new_shared_config();
        {
            let mut config = config.write().unwrap();
            config.hotplug.settle_retries = 3;
            config.hotplug.settle_interval_ms = 10;
        }
        let registry = Arc::new(DeviceRegistry::new(fake.tree(), t.ctx.clone(), config));
        (t, registry)
    }

    fn drain(rx: &mut broadcast::Receiver<RegistryEvent>) -> Vec<RegistryEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn added(path: PathBuf) -> HotplugEvent {
        HotplugEvent {
            action: HotplugAction::Add,
            path,
        }
    }

    fn removed(path: PathBuf) -> HotplugEvent {
        HotplugEvent {
            action: HotplugAction::Remove,
            path,
        }
    }

    #[tokio::test]
    async fn test_start_without_remotes_activates_virtual() {
        let fake = FakeTree::new();
        let (t, registry) = registry(&fake);
        registry.start().await;

        assert_eq!(t.ctx.active(), Some(DeviceKind::Virtual));
        let list = registry.list().await;
        assert_eq!(list.len(), 1);
        assert!(list[0].active);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_groups_nodes_of_one_remote() {
        let fake = FakeTree::new();
        fake.add_hidraw("hidraw0", ASA_VENDOR, ASA_SMART, Some(1));
        fake.add_event("event3", ASA_VENDOR, ASA_SMART);
        let (t, registry) = registry(&fake);
        registry.start().await;

        assert_eq!(t.ctx.active(), Some(DeviceKind::AsaSmartControl));
        let device = registry.device(DeviceKind::AsaSmartControl).await.unwrap();
        assert_eq!(device.paths().len(), 2);
        assert!(device.is_monitoring().await);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_with_several_remotes_keeps_virtual() {
        let fake = FakeTree::new();
        fake.add_hidraw("hidraw0", ASA_VENDOR, ASA_SMART, Some(1));
        fake.add_event("event5", ASA_VENDOR, ASA_COMPOSITE);
        let (t, registry) = registry(&fake);
        registry.start().await;

        assert_eq!(t.ctx.active(), Some(DeviceKind::Virtual));
        assert_eq!(registry.list().await.len(), 3);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_hotplug_add_is_idempotent() {
        let fake = FakeTree::new();
        let (_t, registry) = registry(&fake);
        registry.start().await;
        let mut rx = registry.subscribe();

        let node = fake.add_event("event5", ASA_VENDOR, ASA_COMPOSITE);
        registry.on_hotplug(added(node.clone())).await;
        registry.on_hotplug(added(node.clone())).await;

        let events = drain(&mut rx);
        let additions = events
            .iter()
            .filter(|e| matches!(e, RegistryEvent::DeviceAdded(_) | RegistryEvent::PathAdded(..)))
            .count();
        assert_eq!(additions, 1);
        let device = registry.device(DeviceKind::AsaComposite).await.unwrap();
        assert_eq!(device.paths(), vec![node]);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_hotplug_second_node_extends_device() {
        let fake = FakeTree::new();
        fake.add_hidraw("hidraw0", ASA_VENDOR, ASA_SMART, Some(1));
        let (_t, registry) = registry(&fake);
        registry.start().await;
        let mut rx = registry.subscribe();

        let node = fake.add_event("event3", ASA_VENDOR, ASA_SMART);
        registry.on_hotplug(added(node.clone())).await;

        assert_eq!(
            drain(&mut rx),
            vec![RegistryEvent::PathAdded(DeviceKind::AsaSmartControl, node)]
        );
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_auto_activate_new_remote() {
        let fake = FakeTree::new();
        let (t, registry) = registry(&fake);
        registry.start().await;
        let mut rx = registry.subscribe();

        let node = fake.add_event("event5", ASA_VENDOR, ASA_COMPOSITE);
        registry.on_hotplug(added(node)).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(RegistryEvent::ActiveChanged(kind)) = rx.recv().await {
                    if kind == DeviceKind::AsaComposite {
                        break;
                    }
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(t.ctx.active(), Some(DeviceKind::AsaComposite));
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_unready_node_is_given_up() {
        let fake = FakeTree::new();
        let (_t, registry) = registry(&fake);
        registry.start().await;

        let ghost = fake.dir.path().join("dev/hidraw7");
        registry.on_hotplug(added(ghost)).await;
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_tears_down_once() {
        let fake = FakeTree::new();
        let raw = fake.add_hidraw("hidraw0", ASA_VENDOR, ASA_SMART, Some(1));
        let event = fake.add_event("event3", ASA_VENDOR, ASA_SMART);
        let (t, registry) = registry(&fake);
        registry.start().await;
        let device = registry.device(DeviceKind::AsaSmartControl).await.unwrap();
        let mut rx = registry.subscribe();

        registry.on_hotplug(removed(raw.clone())).await;
        assert!(drain(&mut rx).is_empty());

        registry.on_hotplug(removed(event.clone())).await;
        registry.on_hotplug(removed(event)).await;
        registry.on_hotplug(removed(raw)).await;

        assert_eq!(
            drain(&mut rx),
            vec![
                RegistryEvent::DeviceRemoved(DeviceKind::AsaSmartControl),
                RegistryEvent::ActiveChanged(DeviceKind::Virtual),
            ]
        );
        assert_eq!(t.ctx.active(), Some(DeviceKind::Virtual));
        assert!(!device.is_monitoring().await);
        assert!(registry.device(DeviceKind::AsaSmartControl).await.is_none());
    }

    #[tokio::test]
    async fn test_set_active_single_flight() {
        let fake = FakeTree::new();
        fake.add_hidraw("hidraw0", ASA_VENDOR, ASA_SMART, Some(1));
        fake.add_event("event5", ASA_VENDOR, ASA_COMPOSITE);
        let (t, registry) = registry(&fake);
        registry.start().await;

        let first = registry.set_active(DeviceKind::AsaSmartControl);
        let second = registry.set_active(DeviceKind::AsaComposite);
        assert!(first.is_some());
        assert!(second.is_none());
        first.unwrap().await.unwrap();

        assert_eq!(t.ctx.active(), Some(DeviceKind::AsaSmartControl));
        let loser = registry.device(DeviceKind::AsaComposite).await.unwrap();
        assert!(!loser.is_monitoring().await);

        // Switching again stops the previous device
        registry.set_active(DeviceKind::AsaComposite).unwrap().await.unwrap();
        let previous = registry.device(DeviceKind::AsaSmartControl).await.unwrap();
        assert!(!previous.is_monitoring().await);
        assert!(registry.set_active(DeviceKind::AsaComposite).is_none());
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_activation_publishes_modes() {
        let fake = FakeTree::new();
        fake.add_event("event8", 0x248A, 0x8266);
        let (t, registry) = registry(&fake);
        registry.start().await;

        assert_eq!(t.ctx.active(), Some(DeviceKind::GenericVrBox));
        assert!(!t.overlay.compatible_modes().contains(&crate::mode::Mode::Pen));
        registry.shutdown().await;
    }
}
