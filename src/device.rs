//! The daemon's generic device object. This module carries a narrow reference
//! implementation: just enough lifecycle/claim/broadcast behavior for the
//! core's shadows to drive and observe, without reimplementing a real
//! netlink-backed device manager.

use std::collections::HashMap;
use std::collections::HashSet;

/// Lifecycle/topology events the generic device object can broadcast to its
/// registered users.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DeviceEvent {
    Add,
    Remove,
    TopoChange,
}

/// A strategy for bringing a device up or down locally, composed into
/// [`crate::shadow::bridge::BridgeShadow`] as a trait object rather than a
/// saved-and-restored function pointer.
pub trait DeviceActivator: Send + Sync {
    /// Brings the device up (`true`) or down (`false`); returns whether the
    /// local activation succeeded. The reference implementation on
    /// [`LocalDevice`] always succeeds — actually toggling kernel interface
    /// state is a daemon concern this crate does not own.
    fn activate(&self, up: bool) -> bool;
}

/// One local device as the generic device layer sees it: a name, a present
/// flag, and the set of users (by name) that currently claim it.
#[derive(Debug, Clone)]
pub struct LocalDevice {
    name: String,
    present: bool,
    users: HashSet<String>,
}

impl LocalDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            present: false,
            users: HashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn present(&self) -> bool {
        self.present
    }

    pub fn set_present(&mut self, present: bool) {
        self.present = present;
    }

    /// Claims this device on behalf of `user`; returns `false` if already
    /// claimed by that user (idempotent claim).
    pub fn claim(&mut self, user: impl Into<String>) -> bool {
        self.users.insert(user.into())
    }

    /// Releases this device's claim for `user`; returns `false` if it was
    /// not claimed.
    pub fn release(&mut self, user: &str) -> bool {
        self.users.remove(user)
    }

    pub fn is_claimed_by(&self, user: &str) -> bool {
        self.users.contains(user)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

impl DeviceActivator for LocalDevice {
    fn activate(&self, _up: bool) -> bool {
        true
    }
}

/// The activator a [`crate::shadow::bridge::BridgeShadow`] is given when no
/// daemon-specific activation behavior is supplied: local activation always
/// succeeds, mirroring [`LocalDevice`]'s own implementation above.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultActivator;

impl DeviceActivator for DefaultActivator {
    fn activate(&self, _up: bool) -> bool {
        true
    }
}

/// The daemon's device registry: exclusively owns every [`LocalDevice`]
/// that is not itself embedded in a [`crate::shadow::device::DeviceShadow`].
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, LocalDevice>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the device named `name`, creating it (not present, unclaimed)
    /// on first reference.
    pub fn get_or_create(&mut self, name: &str) -> &mut LocalDevice {
        self.devices
            .entry(name.to_string())
            .or_insert_with(|| LocalDevice::new(name))
    }

    pub fn get(&self, name: &str) -> Option<&LocalDevice> {
        self.devices.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut LocalDevice> {
        self.devices.get_mut(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<LocalDevice> {
        self.devices.remove(name)
    }
}
