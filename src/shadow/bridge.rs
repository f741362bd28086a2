//! The Bridge Shadow: a [`crate::shadow::device::DeviceShadow`]
//! specialization that additionally tracks a membership map, activation
//! counters, and the preserved "up" behavior.
//!
//! Membership is a map owned by the bridge; each [`MemberShadow`] holds no
//! back-pointer to its parent. All orchestration that needs both
//! a member and the bridge's membership map — `enable_member`,
//! `disable_member`, device-event coupling, notification routing — is
//! therefore implemented here rather than on `MemberShadow` itself.

use std::collections::{HashMap, HashSet};

use serde_json::json;
use thiserror::Error;
use tracing::{error, instrument, warn};

use crate::device::{DeviceActivator, DeviceEvent, DeviceRegistry, LocalDevice};
use crate::error::UbusDevError;
use crate::invoker::{Cookie, Invoker};
use crate::schema::ConfigBlob;
use crate::shadow::device::ReloadOutcome;
use crate::shadow::member::MemberShadow;
use crate::shadow::{RetryCounter, SyncState};
use crate::transport::PeerId;

/// The RPC a timed-out pending bridge operation must reissue.
#[derive(Debug, Clone)]
pub enum BridgeReissue {
    Create(ConfigBlob),
    Reload(ConfigBlob),
    Free,
    Prepare,
    None,
}

/// `set_up` failed because the bridge has no present members and is not
/// `force_active`.
#[derive(Debug, Error)]
pub enum SetUpError {
    #[error("bridge `{0}` has no members present and is not force-active")]
    NoMembers(String),
    #[error(transparent)]
    Transport(#[from] UbusDevError),
}

/// A bridge device: a [`DeviceShadow`](crate::shadow::device::DeviceShadow)
/// specialization plus a membership map.
pub struct BridgeShadow {
    name: String,
    class_name: String,
    device: LocalDevice,
    activator: Box<dyn DeviceActivator>,
    state: SyncState,
    retry: RetryCounter,
    config: Option<ConfigBlob>,
    empty: bool,
    force_active: bool,
    active: bool,
    members: HashMap<String, MemberShadow>,
    n_present: usize,
    n_failed: usize,
}

impl BridgeShadow {
    pub fn new(
        name: impl Into<String>,
        class_name: impl Into<String>,
        activator: Box<dyn DeviceActivator>,
    ) -> Self {
        let name = name.into();
        Self {
            device: LocalDevice::new(&name),
            name,
            class_name: class_name.into(),
            activator,
            state: SyncState::Synced,
            retry: RetryCounter::default(),
            config: None,
            empty: false,
            force_active: false,
            active: false,
            members: HashMap::new(),
            n_present: 0,
            n_failed: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn device(&self) -> &LocalDevice {
        &self.device
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn force_active(&self) -> bool {
        self.force_active
    }

    pub fn config(&self) -> Option<&ConfigBlob> {
        self.config.as_ref()
    }

    pub fn n_present(&self) -> usize {
        self.n_present
    }

    pub fn n_failed(&self) -> usize {
        self.n_failed
    }

    pub fn attempts(&self) -> u32 {
        self.retry.attempts()
    }

    pub fn member(&self, name: &str) -> Option<&MemberShadow> {
        self.members.get(name)
    }

    pub fn member_mut(&mut self, name: &str) -> Option<&mut MemberShadow> {
        self.members.get_mut(name)
    }

    pub fn members(&self) -> impl Iterator<Item = &MemberShadow> {
        self.members.values()
    }

    /// Config-init: an empty bridge becomes `force_active` and
    /// issues `create` immediately, since no member event will ever trigger
    /// it. A non-empty bridge creates member records on demand for every
    /// declared `ifname` and waits for device-presence events to drive its
    /// own `create`.
    #[instrument(skip(self, registry, invoker, config), fields(bridge = %self.name))]
    pub async fn config_init(
        &mut self,
        config: ConfigBlob,
        registry: &mut DeviceRegistry,
        endpoint: &str,
        peer: &PeerId,
        invoker: &Invoker<'_>,
    ) -> Result<(), UbusDevError> {
        self.empty = config.is_empty_bridge();
        self.apply_member_list(registry, &config.ifnames());
        self.config = Some(config.clone());

        if self.empty {
            self.force_active = true;
            self.device.set_present(true);
            self.issue_create(config, endpoint, peer, invoker).await?;
        }
        Ok(())
    }

    /// Reload: parses the new config, diffs against the stored
    /// one, and — only if the RPC actually dispatched — replaces the stored
    /// config and applies the new membership list.
    #[instrument(skip(self, registry, invoker, new_config), fields(bridge = %self.name))]
    pub async fn reload(
        &mut self,
        new_config: ConfigBlob,
        registry: &mut DeviceRegistry,
        endpoint: &str,
        peer: &PeerId,
        invoker: &Invoker<'_>,
    ) -> Result<ReloadOutcome, UbusDevError> {
        if self.config.as_ref() == Some(&new_config) {
            return Ok(ReloadOutcome::NoChange);
        }

        invoker
            .invoke_async(endpoint, peer, "reload", new_config.0.clone(), Cookie(0))
            .await?;

        self.empty = new_config.is_empty_bridge();
        self.apply_member_list(registry, &new_config.ifnames());
        self.config = Some(new_config.clone());
        self.state = SyncState::PendingReload(new_config);
        self.retry.reset();
        Ok(ReloadOutcome::Restart)
    }

    /// Tears the bridge's remote counterpart down entirely (the adapter's
    /// `free` operation). Distinct from [`BridgeShadow::set_down`], which
    /// disables the interface but keeps the shadow allocated.
    #[instrument(skip(self, invoker), fields(bridge = %self.name))]
    pub async fn free(
        &mut self,
        endpoint: &str,
        peer: &PeerId,
        invoker: &Invoker<'_>,
    ) -> Result<(), UbusDevError> {
        invoker
            .invoke_async(endpoint, peer, "free", json!({ "name": self.name }), Cookie(0))
            .await?;
        self.state = SyncState::PendingFree;
        self.retry.reset();
        Ok(())
    }

    /// `hotplug-prepare`: the only operation that pre-activates
    /// a bridge — `force_active` and present are set *before* any member is
    /// added.
    #[instrument(skip(self, invoker), fields(bridge = %self.name))]
    pub async fn hotplug_prepare(
        &mut self,
        endpoint: &str,
        peer: &PeerId,
        invoker: &Invoker<'_>,
    ) -> Result<(), UbusDevError> {
        self.force_active = true;
        self.device.set_present(true);
        invoker
            .invoke_async(endpoint, peer, "prepare", json!({ "bridge": self.name }), Cookie(0))
            .await?;
        self.state = SyncState::PendingPrepare;
        self.retry.reset();
        Ok(())
    }

    /// `set_up`: enables every member; if none end up present
    /// and the bridge is not `force_active`, the interface is disabled
    /// remotely instead.
    #[instrument(skip(self, registry, invoker), fields(bridge = %self.name))]
    pub async fn set_up(
        &mut self,
        registry: &mut DeviceRegistry,
        endpoint: &str,
        peer: &PeerId,
        invoker: &Invoker<'_>,
    ) -> Result<(), SetUpError> {
        if self.members.is_empty() && !self.force_active {
            return Err(SetUpError::NoMembers(self.name.clone()));
        }

        let names: Vec<String> = self.members.keys().cloned().collect();
        for name in names {
            self.enable_member(&name, registry, endpoint, peer, invoker).await?;
        }

        if self.n_present == 0 && !self.force_active {
            self.device.set_present(false);
            invoker
                .invoke_async(endpoint, peer, "free", json!({ "name": self.name }), Cookie(0))
                .await?;
            self.state = SyncState::PendingDisable;
            self.retry.reset();
        }
        Ok(())
    }

    /// `set_down`: invokes the preserved "up" behavior with
    /// `false`, disables every present member, and issues `free`, landing
    /// in `PENDING_DISABLE` rather than being deallocated.
    #[instrument(skip(self, invoker), fields(bridge = %self.name))]
    pub async fn set_down(
        &mut self,
        endpoint: &str,
        peer: &PeerId,
        invoker: &Invoker<'_>,
    ) -> Result<(), UbusDevError> {
        self.activator.activate(false);

        let present: Vec<String> = self
            .members
            .iter()
            .filter(|(_, member)| member.present())
            .map(|(name, _)| name.clone())
            .collect();
        for name in present {
            self.disable_member(&name, endpoint, peer, invoker).await?;
        }

        invoker
            .invoke_async(endpoint, peer, "free", json!({ "name": self.name }), Cookie(0))
            .await?;
        self.state = SyncState::PendingDisable;
        self.retry.reset();
        Ok(())
    }

    /// Creates a member record for `member_name`, or returns the existing
    /// one untouched if it was already present. Returns `true` iff a new record was inserted.
    pub fn create_member(
        &mut self,
        registry: &mut DeviceRegistry,
        member_name: &str,
        hotplug: bool,
    ) -> bool {
        if self.members.contains_key(member_name) {
            return false;
        }
        registry.get_or_create(member_name);
        self.members
            .insert(member_name.to_string(), MemberShadow::new(member_name, hotplug));
        true
    }

    /// Claims the member's underlying device and attaches it to the bridge.
    /// If the bridge is not yet synchronized the claim is released again and
    /// the attempt is recorded as failed — the bridge-wide member-failure
    /// retry drives the eventual attach.
    #[instrument(skip(self, registry, invoker), fields(bridge = %self.name, member = member_name))]
    pub async fn enable_member(
        &mut self,
        member_name: &str,
        registry: &mut DeviceRegistry,
        endpoint: &str,
        peer: &PeerId,
        invoker: &Invoker<'_>,
    ) -> Result<(), UbusDevError> {
        if !self.members.contains_key(member_name) {
            return Ok(());
        }

        registry.get_or_create(member_name).claim(&self.name);

        if !self.state.is_synced() {
            if let Some(member) = self.members.get_mut(member_name) {
                if member.present() {
                    member.set_present(false);
                    self.n_present = self.n_present.saturating_sub(1);
                }
                member.set_state(SyncState::PendingAdd);
            }
            self.n_failed += 1;
            if let Some(device) = registry.get_mut(member_name) {
                device.release(&self.name);
            }
            return Ok(());
        }

        invoker
            .invoke_async(
                endpoint,
                peer,
                "add",
                json!({ "bridge": self.name, "member": member_name }),
                Cookie(0),
            )
            .await?;
        if let Some(member) = self.members.get_mut(member_name) {
            member.set_state(SyncState::PendingAdd);
            member.reset_retry();
        }
        Ok(())
    }

    /// Issues `hotplug-remove` for `member_name`.
    #[instrument(skip(self, invoker), fields(bridge = %self.name, member = member_name))]
    pub async fn disable_member(
        &mut self,
        member_name: &str,
        endpoint: &str,
        peer: &PeerId,
        invoker: &Invoker<'_>,
    ) -> Result<(), UbusDevError> {
        invoker
            .invoke_async(
                endpoint,
                peer,
                "remove",
                json!({ "bridge": self.name, "member": member_name }),
                Cookie(0),
            )
            .await?;
        if let Some(member) = self.members.get_mut(member_name) {
            member.set_state(SyncState::PendingRemove);
            member.reset_retry();
        }
        Ok(())
    }

    /// Drops `member_name` from the membership map outright, e.g. because a
    /// hotplug-origin member's device went away. Returns the removed record,
    /// if any.
    pub fn delete_member(&mut self, member_name: &str) -> Option<MemberShadow> {
        let removed = self.members.remove(member_name);
        if let Some(member) = &removed {
            if member.present() {
                self.n_present = self.n_present.saturating_sub(1);
            }
        }
        removed
    }

    /// A present member was dropped without being hotplug-origin: clears its
    /// present flag and, if the bridge now has no present members, marks the
    /// bridge device not-present too.
    fn remove_member(&mut self, member_name: &str) {
        if let Some(member) = self.members.get_mut(member_name) {
            if member.present() {
                member.set_present(false);
                self.n_present = self.n_present.saturating_sub(1);
            }
        }
        if self.n_present == 0 {
            self.device.set_present(false);
        }
    }

    /// Device-event coupling: `DEV_EVENT_ADD` either triggers
    /// the bridge's own `create` (the first present member, bridge not yet
    /// active) or enables the member against an already-synced bridge.
    /// `DEV_EVENT_REMOVE` either leaves a hotplug member's cleanup to the
    /// caller's vlist-delete, or removes a configured member directly.
    #[instrument(skip(self, registry, invoker), fields(bridge = %self.name, member = member_name))]
    pub async fn on_member_device_event(
        &mut self,
        member_name: &str,
        event: DeviceEvent,
        registry: &mut DeviceRegistry,
        endpoint: &str,
        peer: &PeerId,
        invoker: &Invoker<'_>,
    ) -> Result<(), UbusDevError> {
        match event {
            DeviceEvent::Add => {
                let is_first = match self.members.get_mut(member_name) {
                    Some(member) if !member.present() => {
                        member.set_present(true);
                        self.n_present += 1;
                        self.n_present == 1
                    }
                    _ => return Ok(()),
                };

                if is_first && !self.active {
                    let config = self.config.clone().unwrap_or_else(ConfigBlob::empty_object);
                    self.issue_create(config, endpoint, peer, invoker).await?;
                } else {
                    self.enable_member(member_name, registry, endpoint, peer, invoker).await?;
                }
                Ok(())
            }
            DeviceEvent::Remove => {
                let hotplug = self
                    .members
                    .get(member_name)
                    .map(MemberShadow::is_hotplug)
                    .unwrap_or(false);
                if !hotplug {
                    self.remove_member(member_name);
                }
                Ok(())
            }
            DeviceEvent::TopoChange => Ok(()),
        }
    }

    /// Member-failure retry: re-attempts `enable_member` for
    /// every member still waiting on a bridge sync that has since landed.
    #[instrument(skip(self, registry, invoker), fields(bridge = %self.name, n_failed = self.n_failed))]
    pub async fn retry_failed_members(
        &mut self,
        registry: &mut DeviceRegistry,
        endpoint: &str,
        peer: &PeerId,
        invoker: &Invoker<'_>,
    ) {
        if self.n_failed == 0 {
            return;
        }
        let candidates: Vec<String> = self
            .members
            .iter()
            .filter(|(_, member)| matches!(member.state(), SyncState::PendingAdd) && !member.present())
            .map(|(name, _)| name.clone())
            .collect();
        self.n_failed = 0;
        for name in candidates {
            if let Err(error) = self.enable_member(&name, registry, endpoint, peer, invoker).await {
                warn!(bridge = %self.name, member = %name, %error, "member-failure retry could not re-enable member");
            }
        }
    }

    /// A `create` notification named this bridge: the preserved
    /// "up" behavior is invoked, and only on its success does the bridge
    /// become `active`.
    pub fn on_create_confirmed(&mut self) {
        if matches!(self.state, SyncState::PendingCreate(_)) {
            let activated = self.activator.activate(true);
            self.state = SyncState::Synced;
            self.retry.reset();
            self.device.set_present(true);
            self.active = activated;
        }
    }

    pub fn on_reload_confirmed(&mut self) {
        if matches!(self.state, SyncState::PendingReload(_)) {
            self.state = SyncState::Synced;
            self.retry.reset();
            self.device.set_present(true);
        }
    }

    /// A `free` notification named this bridge. Returns `true` iff the
    /// caller should now destroy the shadow — `PENDING_DISABLE` settles to
    /// `active=false` but keeps the record.
    pub fn on_free_confirmed(&mut self) -> bool {
        match self.state {
            SyncState::PendingDisable => {
                self.active = false;
                self.state = SyncState::Synced;
                self.retry.reset();
                false
            }
            SyncState::PendingFree => {
                self.config = None;
                self.members.clear();
                self.n_present = 0;
                self.n_failed = 0;
                true
            }
            _ => false,
        }
    }

    pub fn on_prepare_confirmed(&mut self) {
        if matches!(self.state, SyncState::PendingPrepare) {
            self.state = SyncState::Synced;
            self.retry.reset();
            self.force_active = true;
            self.device.set_present(true);
        }
    }

    /// Returns `true` (caller should broadcast `DEV_EVENT_TOPO_CHANGE`) iff
    /// this confirmed a pending add.
    pub fn on_member_add_confirmed(&mut self, member_name: &str) -> bool {
        let Some(member) = self.members.get_mut(member_name) else {
            return false;
        };
        if matches!(member.state(), SyncState::PendingAdd) {
            member.set_state(SyncState::Synced);
            member.reset_retry();
            if !member.present() {
                member.set_present(true);
                self.n_present += 1;
            }
            true
        } else {
            false
        }
    }

    /// Returns `true` (broadcast topology-change) iff this confirmed a
    /// pending remove; releases the member's device-user claim either way
    /// is a no-op if it was already released.
    pub fn on_member_remove_confirmed(
        &mut self,
        registry: &mut DeviceRegistry,
        member_name: &str,
    ) -> bool {
        let Some(member) = self.members.get_mut(member_name) else {
            return false;
        };
        if matches!(member.state(), SyncState::PendingRemove) {
            member.set_state(SyncState::Synced);
            member.reset_retry();
            if let Some(device) = registry.get_mut(member_name) {
                device.release(&self.name);
            }
            true
        } else {
            false
        }
    }

    /// The bridge's own retry timer fired.
    pub fn on_timeout(&mut self, max_retry: u32) -> BridgeReissue {
        if !self.retry.record_attempt(max_retry) {
            error!(bridge = %self.name, state = self.state.name(), "retries exhausted");
            return BridgeReissue::None;
        }
        match &self.state {
            SyncState::PendingCreate(config) => BridgeReissue::Create(config.clone()),
            SyncState::PendingReload(config) => BridgeReissue::Reload(config.clone()),
            SyncState::PendingFree | SyncState::PendingDisable => BridgeReissue::Free,
            SyncState::PendingPrepare => BridgeReissue::Prepare,
            _ => BridgeReissue::None,
        }
    }

    async fn issue_create(
        &mut self,
        config: ConfigBlob,
        endpoint: &str,
        peer: &PeerId,
        invoker: &Invoker<'_>,
    ) -> Result<(), UbusDevError> {
        invoker
            .invoke_async(endpoint, peer, "create", config.0.clone(), Cookie(0))
            .await?;
        self.state = SyncState::PendingCreate(config);
        self.retry.reset();
        Ok(())
    }

    /// Applies a vlist-style update round: members named in `names` are
    /// created on demand; members absent from `names` are dropped, unless
    /// they are hotplug-origin.
    fn apply_member_list(&mut self, registry: &mut DeviceRegistry, names: &[String]) {
        let keep: HashSet<&str> = names.iter().map(String::as_str).collect();
        let to_remove: Vec<String> = self
            .members
            .iter()
            .filter(|(name, member)| !member.is_hotplug() && !keep.contains(name.as_str()))
            .map(|(name, _)| name.clone())
            .collect();
        for name in to_remove {
            self.delete_member(&name);
        }
        for name in names {
            self.create_member(registry, name, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DefaultActivator;
    use crate::transport::{FakeTransport, RpcTransport};
    use serde_json::json;

    fn new_bridge(name: &str) -> BridgeShadow {
        BridgeShadow::new(name, "br", Box::new(DefaultActivator))
    }

    #[tokio::test]
    async fn config_init_with_members_creates_records_without_issuing_create() {
        let transport = FakeTransport::new();
        transport.publish_endpoint("h", "peer-1");
        let peer = transport.resolve("h").await.unwrap();
        let invoker = Invoker::new(&transport);
        let mut registry = DeviceRegistry::new();
        let mut bridge = new_bridge("br0");

        bridge
            .config_init(
                ConfigBlob::new(json!({"ifname": ["eth0", "eth1"]})),
                &mut registry,
                "h",
                &peer,
                &invoker,
            )
            .await
            .unwrap();

        assert_eq!(bridge.members().count(), 2);
        assert!(bridge.state().is_synced());
        assert!(transport.recorded_calls().is_empty());
    }

    #[tokio::test]
    async fn config_init_empty_bridge_is_force_active_and_issues_create() {
        let transport = FakeTransport::new();
        transport.publish_endpoint("h", "peer-1");
        let peer = transport.resolve("h").await.unwrap();
        let invoker = Invoker::new(&transport);
        let mut registry = DeviceRegistry::new();
        let mut bridge = new_bridge("br1");

        bridge
            .config_init(ConfigBlob::new(json!({"empty": true})), &mut registry, "h", &peer, &invoker)
            .await
            .unwrap();

        assert!(bridge.force_active());
        assert!(bridge.device().present());
        assert!(matches!(bridge.state(), SyncState::PendingCreate(_)));
        assert_eq!(transport.recorded_calls()[0].method, "create");

        bridge.on_create_confirmed();
        assert!(bridge.active());
        assert!(bridge.state().is_synced());
    }

    #[tokio::test]
    async fn first_present_member_triggers_bridge_create() {
        let transport = FakeTransport::new();
        transport.publish_endpoint("h", "peer-1");
        let peer = transport.resolve("h").await.unwrap();
        let invoker = Invoker::new(&transport);
        let mut registry = DeviceRegistry::new();
        let mut bridge = new_bridge("br0");

        bridge
            .config_init(
                ConfigBlob::new(json!({"ifname": ["eth0", "eth1"]})),
                &mut registry,
                "h",
                &peer,
                &invoker,
            )
            .await
            .unwrap();

        bridge
            .on_member_device_event(
                "eth0",
                DeviceEvent::Add,
                &mut registry,
                "h",
                &peer,
                &invoker,
            )
            .await
            .unwrap();

        assert!(matches!(bridge.state(), SyncState::PendingCreate(_)));
        assert_eq!(transport.recorded_calls()[0].method, "create");
        assert_eq!(
            transport.recorded_calls()[0].args,
            json!({"ifname": ["eth0", "eth1"]})
        );

        bridge.on_create_confirmed();
        assert!(bridge.active());

        bridge
            .on_member_device_event(
                "eth1",
                DeviceEvent::Add,
                &mut registry,
                "h",
                &peer,
                &invoker,
            )
            .await
            .unwrap();
        assert_eq!(transport.recorded_calls()[1].method, "add");
        assert_eq!(
            transport.recorded_calls()[1].args,
            json!({"bridge": "br0", "member": "eth1"})
        );

        assert!(bridge.on_member_add_confirmed("eth1"));
    }

    #[tokio::test]
    async fn enabling_a_member_before_bridge_sync_is_recorded_as_failed() {
        let transport = FakeTransport::new();
        transport.publish_endpoint("h", "peer-1");
        let peer = transport.resolve("h").await.unwrap();
        let invoker = Invoker::new(&transport);
        let mut registry = DeviceRegistry::new();
        let mut bridge = new_bridge("br0");
        bridge.create_member(&mut registry, "eth0", false);
        bridge.state = SyncState::PendingCreate(ConfigBlob::empty_object());

        bridge
            .enable_member("eth0", &mut registry, "h", &peer, &invoker)
            .await
            .unwrap();

        assert_eq!(bridge.n_failed(), 1);
        assert!(!bridge.member("eth0").unwrap().present());
        assert!(transport.recorded_calls().is_empty());
        assert!(!registry.get("eth0").unwrap().is_claimed_by("br0"));
    }

    #[tokio::test]
    async fn unsolicited_hotplug_member_survives_a_vlist_update_round() {
        let mut registry = DeviceRegistry::new();
        let mut bridge = new_bridge("br0");
        bridge.create_member(&mut registry, "wlan0", true);
        if let Some(member) = bridge.member_mut("wlan0") {
            member.set_present(true);
        }

        bridge.apply_member_list(&mut registry, &[]);

        assert!(bridge.member("wlan0").is_some());
    }

    #[tokio::test]
    async fn set_up_without_members_fails() {
        let transport = FakeTransport::new();
        transport.publish_endpoint("h", "peer-1");
        let peer = transport.resolve("h").await.unwrap();
        let invoker = Invoker::new(&transport);
        let mut registry = DeviceRegistry::new();
        let mut bridge = new_bridge("br0");

        let result = bridge.set_up(&mut registry, "h", &peer, &invoker).await;
        assert!(matches!(result, Err(SetUpError::NoMembers(_))));
    }

    #[tokio::test]
    async fn set_down_invokes_activator_and_disables_members() {
        let transport = FakeTransport::new();
        transport.publish_endpoint("h", "peer-1");
        let peer = transport.resolve("h").await.unwrap();
        let invoker = Invoker::new(&transport);
        let mut registry = DeviceRegistry::new();
        let mut bridge = new_bridge("br0");
        bridge.create_member(&mut registry, "eth0", false);
        bridge.state = SyncState::Synced;
        if let Some(member) = bridge.member_mut("eth0") {
            member.set_present(true);
        }

        bridge.set_down("h", &peer, &invoker).await.unwrap();

        assert!(matches!(bridge.state(), SyncState::PendingDisable));
        let calls = transport.recorded_calls();
        assert_eq!(calls[0].method, "remove");
        assert_eq!(calls[1].method, "free");

        bridge.on_free_confirmed();
        assert!(!bridge.active());
        assert!(bridge.state().is_synced());
    }

    #[tokio::test]
    async fn reload_with_unchanged_config_is_a_no_op() {
        let transport = FakeTransport::new();
        transport.publish_endpoint("h", "peer-1");
        let peer = transport.resolve("h").await.unwrap();
        let invoker = Invoker::new(&transport);
        let mut registry = DeviceRegistry::new();
        let mut bridge = new_bridge("br0");
        bridge
            .config_init(
                ConfigBlob::new(json!({"ifname": ["eth0"]})),
                &mut registry,
                "h",
                &peer,
                &invoker,
            )
            .await
            .unwrap();

        let outcome = bridge
            .reload(
                ConfigBlob::new(json!({"ifname": ["eth0"]})),
                &mut registry,
                "h",
                &peer,
                &invoker,
            )
            .await
            .unwrap();
        assert_eq!(outcome, ReloadOutcome::NoChange);
        assert!(transport.recorded_calls().is_empty());
    }

    #[tokio::test]
    async fn reload_with_changed_config_adds_the_new_member() {
        let transport = FakeTransport::new();
        transport.publish_endpoint("h", "peer-1");
        let peer = transport.resolve("h").await.unwrap();
        let invoker = Invoker::new(&transport);
        let mut registry = DeviceRegistry::new();
        let mut bridge = new_bridge("br0");
        bridge
            .config_init(
                ConfigBlob::new(json!({"ifname": ["eth0"]})),
                &mut registry,
                "h",
                &peer,
                &invoker,
            )
            .await
            .unwrap();

        let outcome = bridge
            .reload(
                ConfigBlob::new(json!({"ifname": ["eth0", "eth1"]})),
                &mut registry,
                "h",
                &peer,
                &invoker,
            )
            .await
            .unwrap();

        assert_eq!(outcome, ReloadOutcome::Restart);
        assert!(matches!(bridge.state(), SyncState::PendingReload(_)));
        assert_eq!(bridge.members().count(), 2);

        bridge.on_reload_confirmed();
        assert!(bridge.state().is_synced());
        assert!(bridge.device().present());
        assert_eq!(bridge.config().unwrap(), &json!({"ifname": ["eth0", "eth1"]}));
    }

    #[test]
    fn member_failure_retry_resets_n_failed() {
        let mut bridge = new_bridge("br0");
        bridge.n_failed = 2;
        assert_eq!(bridge.n_failed(), 2);
    }
}
