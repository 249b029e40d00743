//! Supported remotes and node classification
//!
//! Every supported remote is described by a static [`DeviceClass`]. A node
//! under `/dev` is matched against the classes by looking at what sysfs
//! says about it (vendor, product, USB interface protocol).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::gesture::GestureConfig;
use crate::hidraw::Framing;
use crate::mode::Mode;

/// Path under which the virtual pointer is registered
pub const VIRTUAL_PATH: &str = "virtual";

/// How many ancestors of a sysfs device dir are searched for the USB
/// interface descriptor
const INTERFACE_SEARCH_DEPTH: usize = 6;

/// Identity of a device family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    BaseusOrangeDotAi,
    GenericVrBox,
    AsaSmartControl,
    AsaComposite,
    Virtual,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 5] = [
        DeviceKind::BaseusOrangeDotAi,
        DeviceKind::GenericVrBox,
        DeviceKind::AsaSmartControl,
        DeviceKind::AsaComposite,
        DeviceKind::Virtual,
    ];

    /// Stable identifier used in config files and on D-Bus
    pub fn id(self) -> &'static str {
        match self {
            DeviceKind::BaseusOrangeDotAi => "baseus-orange-dot-ai",
            DeviceKind::GenericVrBox => "generic-vr-box",
            DeviceKind::AsaSmartControl => "asa-smart-control",
            DeviceKind::AsaComposite => "asa-composite",
            DeviceKind::Virtual => "virtual",
        }
    }

    pub fn class(self) -> &'static DeviceClass {
        match self {
            DeviceKind::BaseusOrangeDotAi => &BASEUS_ORANGE_DOT_AI,
            DeviceKind::GenericVrBox => &GENERIC_VR_BOX,
            DeviceKind::AsaSmartControl => &ASA_SMART_CONTROL,
            DeviceKind::AsaComposite => &ASA_COMPOSITE,
            DeviceKind::Virtual => &VIRTUAL_POINTER,
        }
    }

    pub fn is_virtual(self) -> bool {
        self == DeviceKind::Virtual
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceKind::ALL
            .into_iter()
            .find(|k| k.id() == s)
            .ok_or_else(|| format!("unknown device: {}", s))
    }
}

/// Kind of OS node a path refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    Hidraw,
    Event,
    Virtual,
}

impl NodeKind {
    /// Infer the node kind from a path's file name
    pub fn of(path: &Path) -> Option<NodeKind> {
        if path == Path::new(VIRTUAL_PATH) {
            return Some(NodeKind::Virtual);
        }
        let name = path.file_name()?.to_str()?;
        if name.starts_with("hidraw") {
            Some(NodeKind::Hidraw)
        } else if name.starts_with("event") {
            Some(NodeKind::Event)
        } else {
            None
        }
    }
}

/// What sysfs reports about one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProbe {
    pub path: PathBuf,
    pub node: NodeKind,
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: String,
    /// `bInterfaceProtocol` of the owning USB interface, if any
    pub interface_protocol: Option<u8>,
}

/// Static description of a supported remote
pub struct DeviceClass {
    pub kind: DeviceKind,
    pub vendor_id: u16,
    pub product_id: u16,
    pub description: &'static str,
    /// Extra predicate for nodes sharing vendor/product with unrelated
    /// interfaces of the same unit
    pub interface_filter: Option<fn(&DeviceProbe) -> bool>,
    pub compatible_modes: &'static [Mode],
    pub supports_auto_mode: bool,
    pub gestures: GestureConfig,
    /// Framing of the vendor report, for classes read through hidraw
    pub framing: Option<Framing>,
}

impl fmt::Debug for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceClass")
            .field("kind", &self.kind)
            .field("vendor_id", &format_args!("0x{:04X}", self.vendor_id))
            .field("product_id", &format_args!("0x{:04X}", self.product_id))
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl DeviceClass {
    pub fn matches(&self, probe: &DeviceProbe) -> bool {
        if self.kind.is_virtual() || probe.node == NodeKind::Virtual {
            return false;
        }
        probe.vendor_id == self.vendor_id
            && probe.product_id == self.product_id
            && self.interface_filter.map_or(true, |filter| filter(probe))
    }
}

fn hidraw_interface_01(probe: &DeviceProbe) -> bool {
    probe.node != NodeKind::Hidraw || probe.interface_protocol == Some(0x01)
}

fn hidraw_interface_02(probe: &DeviceProbe) -> bool {
    probe.node != NodeKind::Hidraw || probe.interface_protocol == Some(0x02)
}

fn no_hidraw(probe: &DeviceProbe) -> bool {
    probe.node != NodeKind::Hidraw
}

const ALL_MODES: &[Mode] = &Mode::ALL;

pub static BASEUS_ORANGE_DOT_AI: DeviceClass = DeviceClass {
    kind: DeviceKind::BaseusOrangeDotAi,
    vendor_id: 0xABC8,
    product_id: 0xCA08,
    description: "Baseus Orange Dot AI Wireless Presenter",
    interface_filter: Some(hidraw_interface_02),
    compatible_modes: ALL_MODES,
    supports_auto_mode: true,
    gestures: GestureConfig::press_resolved(400, 600, 50),
    framing: Some(Framing::Sentinel { terminator: 182, len: 16 }),
};

pub static GENERIC_VR_BOX: DeviceClass = DeviceClass {
    kind: DeviceKind::GenericVrBox,
    vendor_id: 0x248A,
    product_id: 0x8266,
    description: "Generic VR BOX Bluetooth Remote",
    interface_filter: Some(no_hidraw),
    compatible_modes: &[Mode::Mouse, Mode::Spotlight, Mode::Laser, Mode::MagnifyGlass],
    supports_auto_mode: false,
    gestures: GestureConfig::press_resolved(400, 600, 50).without_release_after_hold(),
    framing: None,
};

pub static ASA_SMART_CONTROL: DeviceClass = DeviceClass {
    kind: DeviceKind::AsaSmartControl,
    vendor_id: 0x1915,
    product_id: 0x1001,
    description: "ASA Smart Control",
    interface_filter: Some(hidraw_interface_01),
    compatible_modes: ALL_MODES,
    supports_auto_mode: true,
    gestures: GestureConfig::release_resolved(300),
    framing: Some(Framing::Fixed(8)),
};

pub static ASA_COMPOSITE: DeviceClass = DeviceClass {
    kind: DeviceKind::AsaComposite,
    vendor_id: 0x1915,
    product_id: 0x1025,
    description: "ASA Composite Presenter",
    interface_filter: Some(no_hidraw),
    compatible_modes: ALL_MODES,
    supports_auto_mode: true,
    gestures: GestureConfig::release_resolved(300),
    framing: None,
};

pub static VIRTUAL_POINTER: DeviceClass = DeviceClass {
    kind: DeviceKind::Virtual,
    vendor_id: 0,
    product_id: 0,
    description: "Virtual pointer",
    interface_filter: None,
    compatible_modes: ALL_MODES,
    supports_auto_mode: false,
    gestures: GestureConfig::press_resolved(400, 600, 50),
    framing: None,
};

/// Physical classes in classification order
pub static DEVICE_CLASSES: [&DeviceClass; 4] = [
    &BASEUS_ORANGE_DOT_AI,
    &GENERIC_VR_BOX,
    &ASA_SMART_CONTROL,
    &ASA_COMPOSITE,
];

/// First class that claims `probe`
pub fn classify(probe: &DeviceProbe) -> Option<&'static DeviceClass> {
    DEVICE_CLASSES.iter().copied().find(|class| class.matches(probe))
}

// ============================================================================
// sysfs probing
// ============================================================================

/// Roots of the `/dev` and `/sys` trees
///
/// Tests point these at a temporary directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTree {
    pub dev_root: PathBuf,
    pub sysfs_root: PathBuf,
}

impl Default for DeviceTree {
    fn default() -> Self {
        Self {
            dev_root: PathBuf::from("/dev"),
            sysfs_root: PathBuf::from("/sys"),
        }
    }
}

impl DeviceTree {
    pub fn new(dev_root: impl Into<PathBuf>, sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            dev_root: dev_root.into(),
            sysfs_root: sysfs_root.into(),
        }
    }

    /// Directories watched for hotplug
    pub fn watch_dirs(&self) -> [PathBuf; 2] {
        [self.dev_root.clone(), self.dev_root.join("input")]
    }

    /// Every hidraw and event node currently present, sorted
    pub fn scan(&self) -> Vec<PathBuf> {
        let mut nodes = Vec::new();
        for dir in self.watch_dirs() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::debug!(dir = %dir.display(), error = %e, "Cannot list node directory");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if matches!(NodeKind::of(&path), Some(NodeKind::Hidraw | NodeKind::Event)) {
                    nodes.push(path);
                }
            }
        }
        nodes.sort();
        nodes
    }

    /// Read identity information for `path` from sysfs
    pub fn probe(&self, path: &Path) -> io::Result<DeviceProbe> {
        let node = NodeKind::of(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "not a device node"))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "bad node name"))?;

        match node {
            NodeKind::Hidraw => self.probe_hidraw(path, name),
            NodeKind::Event => self.probe_event(path, name),
            NodeKind::Virtual => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "virtual pointer has no sysfs entry",
            )),
        }
    }

    /// Probe and classify in one go
    pub fn identify(&self, path: &Path) -> Option<(&'static DeviceClass, DeviceProbe)> {
        match self.probe(path) {
            Ok(probe) => classify(&probe).map(|class| (class, probe)),
            Err(e) => {
                tracing::trace!(path = %path.display(), error = %e, "Probe failed");
                None
            }
        }
    }

    fn probe_hidraw(&self, path: &Path, name: &str) -> io::Result<DeviceProbe> {
        let device_dir = self.sysfs_root.join("class/hidraw").join(name).join("device");
        let uevent = fs::read_to_string(device_dir.join("uevent"))?;
        let (vendor_id, product_id, hid_name) = parse_hid_uevent(&uevent)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "uevent without HID_ID"))?;

        Ok(DeviceProbe {
            path: path.to_path_buf(),
            node: NodeKind::Hidraw,
            vendor_id,
            product_id,
            name: hid_name,
            interface_protocol: find_interface_protocol(&device_dir),
        })
    }

    fn probe_event(&self, path: &Path, name: &str) -> io::Result<DeviceProbe> {
        let device_dir = self.sysfs_root.join("class/input").join(name).join("device");
        let vendor_id = read_hex_u16(&device_dir.join("id/vendor"))?;
        let product_id = read_hex_u16(&device_dir.join("id/product"))?;
        let dev_name = fs::read_to_string(device_dir.join("name"))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        Ok(DeviceProbe {
            path: path.to_path_buf(),
            node: NodeKind::Event,
            vendor_id,
            product_id,
            name: dev_name,
            interface_protocol: find_interface_protocol(&device_dir),
        })
    }
}

fn read_hex_u16(path: &Path) -> io::Result<u16> {
    let text = fs::read_to_string(path)?;
    u16::from_str_radix(text.trim(), 16)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Parse `HID_ID=0003:0000ABC8:0000CA08` and `HID_NAME=...` from a uevent
fn parse_hid_uevent(uevent: &str) -> Option<(u16, u16, String)> {
    let mut ids = None;
    let mut name = String::new();

    for line in uevent.lines() {
        if let Some(value) = line.strip_prefix("HID_ID=") {
            let mut parts = value.split(':').skip(1);
            let vendor = u32::from_str_radix(parts.next()?, 16).ok()?;
            let product = u32::from_str_radix(parts.next()?, 16).ok()?;
            ids = Some((vendor as u16, product as u16));
        } else if let Some(value) = line.strip_prefix("HID_NAME=") {
            name = value.trim().to_string();
        }
    }

    ids.map(|(vendor, product)| (vendor, product, name))
}

/// Walk up from a sysfs device dir looking for `bInterfaceProtocol`
fn find_interface_protocol(device_dir: &Path) -> Option<u8> {
    let resolved = fs::canonicalize(device_dir).unwrap_or_else(|_| device_dir.to_path_buf());
    resolved
        .ancestors()
        .take(INTERFACE_SEARCH_DEPTH)
        .find_map(|dir| fs::read_to_string(dir.join("bInterfaceProtocol")).ok())
        .and_then(|text| u8::from_str_radix(text.trim(), 16).ok())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::fs;
    use std::path::{Path, PathBuf};

    /// Fake `/dev` and `/sys` trees under one temporary directory
    pub struct FakeTree {
        pub dir: tempfile::TempDir,
    }

    impl FakeTree {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::create_dir_all(dir.path().join("dev/input")).unwrap();
            fs::create_dir_all(dir.path().join("sys/class/hidraw")).unwrap();
            fs::create_dir_all(dir.path().join("sys/class/input")).unwrap();
            Self { dir }
        }

        pub fn tree(&self) -> super::DeviceTree {
            super::DeviceTree::new(self.dir.path().join("dev"), self.dir.path().join("sys"))
        }

        fn usb_interface(&self, name: &str, protocol: Option<u8>) -> PathBuf {
            let iface = self.dir.path().join("sys/devices/usb1").join(format!("1-1:1.{}", name));
            fs::create_dir_all(&iface).unwrap();
            if let Some(p) = protocol {
                fs::write(iface.join("bInterfaceProtocol"), format!("{:02x}\n", p)).unwrap();
            }
            iface
        }

        /// Add `/dev/<name>` plus its sysfs entry
        pub fn add_hidraw(&self, name: &str, vendor: u16, product: u16, protocol: Option<u8>) -> PathBuf {
            let iface = self.usb_interface(name, protocol);
            let hid = iface.join(format!("0003:{:04X}:{:04X}.0001", vendor, product));
            fs::create_dir_all(&hid).unwrap();
            fs::write(
                hid.join("uevent"),
                format!(
                    "DRIVER=hid-generic\nHID_ID=0003:0000{:04X}:0000{:04X}\nHID_NAME=Test Remote\n",
                    vendor, product
                ),
            )
            .unwrap();
            let class_dir = self.dir.path().join("sys/class/hidraw").join(name);
            fs::create_dir_all(&class_dir).unwrap();
            symlink(&hid, &class_dir.join("device"));
            self.touch_node(Path::new(name))
        }

        /// Add `/dev/input/<name>` plus its sysfs entry
        pub fn add_event(&self, name: &str, vendor: u16, product: u16) -> PathBuf {
            let iface = self.usb_interface(name, None);
            let input = iface.join("input/input7");
            fs::create_dir_all(input.join("id")).unwrap();
            fs::write(input.join("id/vendor"), format!("{:04x}\n", vendor)).unwrap();
            fs::write(input.join("id/product"), format!("{:04x}\n", product)).unwrap();
            fs::write(input.join("name"), "Test Remote Keyboard\n").unwrap();
            let class_dir = self.dir.path().join("sys/class/input").join(name);
            fs::create_dir_all(&class_dir).unwrap();
            symlink(&input, &class_dir.join("device"));
            self.touch_node(&Path::new("input").join(name))
        }

        fn touch_node(&self, rel: &Path) -> PathBuf {
            let node = self.dir.path().join("dev").join(rel);
            fs::write(&node, b"").unwrap();
            node
        }
    }

    fn symlink(target: &Path, link: &Path) {
        std::os::unix::fs::symlink(target, link).unwrap();
    }
}
