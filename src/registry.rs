//! The `Plugin` registry: wires classes, shadows, and the timer wheel
//! together. It is the ambient object a host daemon holds, one per
//! registered plug-in instance, and the thing [`crate::adapter`] and
//! [`crate::notify`] operate on.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tracing::warn;

use crate::class::{load_classes_from_root, DeviceClass};
use crate::device::DeviceRegistry;
use crate::error::UbusDevError;
use crate::invoker::{Cookie, Invoker};
use crate::shadow::bridge::BridgeShadow;
use crate::shadow::device::DeviceShadow;
use crate::shadow::member::MemberReissue;
use crate::shadow::bridge::BridgeReissue;
use crate::shadow::device::Reissue;
use crate::shadow::SyncState;
use crate::timer::{ShadowKey, TimerWheel, DEFAULT_MAX_RETRY, DEFAULT_RETRY_PERIOD};
use crate::transport::{PeerId, RpcTransport, TransportEvent};

/// Top-level object a host daemon holds: one per registered plug-in
/// instance. Fields are `pub(crate)` so [`crate::adapter`] and
/// [`crate::notify`] can drive them directly without a proliferation of
/// narrow accessor methods.
pub struct Plugin {
    pub(crate) transport: Box<dyn RpcTransport>,
    pub(crate) classes: HashMap<String, DeviceClass>,
    pub(crate) devices: HashMap<String, DeviceShadow>,
    pub(crate) bridges: HashMap<String, BridgeShadow>,
    pub(crate) device_registry: DeviceRegistry,
    pub(crate) timers: TimerWheel,
    pub(crate) max_retry: u32,
    pub(crate) retry_period: Duration,
}

impl Plugin {
    pub fn new(transport: Box<dyn RpcTransport>) -> Self {
        Self {
            transport,
            classes: HashMap::new(),
            devices: HashMap::new(),
            bridges: HashMap::new(),
            device_registry: DeviceRegistry::new(),
            timers: TimerWheel::new(),
            max_retry: DEFAULT_MAX_RETRY,
            retry_period: DEFAULT_RETRY_PERIOD,
        }
    }

    /// Overrides the default retry policy.
    pub fn with_retry_policy(mut self, max_retry: u32, retry_period: Duration) -> Self {
        self.max_retry = max_retry;
        self.retry_period = retry_period;
        self
    }

    /// Loads every class declared under `<config_root>/ubusdev-config`
    ///. A missing directory is silently a no-op.
    pub fn load_classes(&mut self, config_root: &Path) {
        for class in load_classes_from_root(config_root) {
            self.classes.insert(class.spec.name.clone(), class);
        }
    }

    /// Registers a single already-parsed class, bypassing the filesystem
    /// loader (used by tests and the demo harness).
    pub fn register_class(&mut self, class: DeviceClass) {
        self.classes.insert(class.spec.name.clone(), class);
    }

    pub fn transport(&self) -> &dyn RpcTransport {
        self.transport.as_ref()
    }

    pub fn class(&self, name: &str) -> Option<&DeviceClass> {
        self.classes.get(name)
    }

    pub fn device(&self, name: &str) -> Option<&DeviceShadow> {
        self.devices.get(name)
    }

    pub fn bridge(&self, name: &str) -> Option<&BridgeShadow> {
        self.bridges.get(name)
    }

    pub(crate) fn class_is_bridge(&self, class_name: &str) -> bool {
        self.classes
            .get(class_name)
            .map(|class| class.spec.bridge_capable)
            .unwrap_or(false)
    }

    /// Subscribes every registered class to its handler endpoint, best
    /// effort — a class whose endpoint is absent settles into `Waiting`
    /// rather than aborting the whole set.
    pub async fn subscribe_all(&mut self) {
        for class in self.classes.values_mut() {
            if let Err(error) = class.link.subscribe(self.transport.as_ref()).await {
                warn!(endpoint = class.link.endpoint(), %error, "initial subscribe failed");
            }
        }
    }

    /// Feeds one transport-level event (a handler notification, a lost
    /// subscription, or the handler's object reappearing) into the plug-in.
    pub async fn on_transport_event(&mut self, event: TransportEvent) -> Result<(), UbusDevError> {
        match event {
            TransportEvent::Notification {
                endpoint,
                notify_type,
                payload,
            } => crate::notify::dispatch_notification(self, &endpoint, &notify_type, payload).await,
            TransportEvent::SubscriptionRemoved { endpoint } => {
                self.on_subscription_removed(&endpoint);
                Ok(())
            }
            TransportEvent::ObjectAdded { endpoint } => self.on_object_added(&endpoint).await,
        }
    }

    fn on_subscription_removed(&mut self, endpoint: &str) {
        for class in self.classes.values_mut() {
            if class.link.endpoint() == endpoint {
                class.link.on_subscription_removed();
            }
        }
    }

    async fn on_object_added(&mut self, endpoint: &str) -> Result<(), UbusDevError> {
        let matching: Vec<String> = self
            .classes
            .values()
            .filter(|class| class.link.endpoint() == endpoint)
            .map(|class| class.spec.name.clone())
            .collect();
        for name in matching {
            if let Some(class) = self.classes.get_mut(&name) {
                class.link.on_object_added(self.transport.as_ref()).await?;
            }
        }
        Ok(())
    }

    /// Notifies the plug-in that a bridge member's underlying device
    /// changed presence. A host daemon
    /// calls this whenever its generic device layer raises
    /// `DEV_EVENT_ADD`/`DEV_EVENT_REMOVE` for a device claimed by a bridge.
    pub async fn on_member_device_event(
        &mut self,
        class_name: &str,
        bridge_name: &str,
        member_name: &str,
        event: crate::device::DeviceEvent,
    ) -> Result<(), UbusDevError> {
        let (endpoint, peer) = self.subscribed_peer(class_name)?;
        let invoker = Invoker::new(self.transport.as_ref());
        let Some(bridge) = self.bridges.get_mut(bridge_name) else {
            return Err(UbusDevError::NotFound {
                kind: "bridge",
                name: bridge_name.to_string(),
            });
        };
        bridge
            .on_member_device_event(member_name, event, &mut self.device_registry, &endpoint, &peer, &invoker)
            .await?;

        self.maybe_arm_bridge_timer(bridge_name);
        self.maybe_arm_member_timer(bridge_name, member_name);
        Ok(())
    }

    /// Resolves `class_name`'s endpoint and peer id, failing with
    /// `HandlerAbsent` if the class is unsubscribed.
    pub(crate) fn subscribed_peer(&self, class_name: &str) -> Result<(String, PeerId), UbusDevError> {
        let class = self.classes.get(class_name).ok_or_else(|| UbusDevError::NotFound {
            kind: "class",
            name: class_name.to_string(),
        })?;
        if !class.link.is_subscribed() {
            warn!(class = class_name, endpoint = class.link.endpoint(), "handler not subscribed");
            return Err(UbusDevError::HandlerAbsent {
                endpoint: class.link.endpoint().to_string(),
            });
        }
        let peer = class.link.peer().cloned().ok_or_else(|| UbusDevError::HandlerAbsent {
            endpoint: class.link.endpoint().to_string(),
        })?;
        Ok((class.link.endpoint().to_string(), peer))
    }

    /// Arms `bridge_name`'s retry timer iff it is currently in a pending
    /// state. A no-op for an already-synced bridge, so call sites don't
    /// each need to branch on whether their operation actually dispatched
    /// an RPC.
    pub(crate) fn maybe_arm_bridge_timer(&mut self, bridge_name: &str) {
        let Some(bridge) = self.bridges.get(bridge_name) else {
            return;
        };
        if !bridge.state().is_synced() {
            self.timers.arm(ShadowKey::Bridge(bridge_name.to_string()), self.retry_period);
        }
    }

    pub(crate) fn maybe_arm_device_timer(&mut self, name: &str) {
        let Some(shadow) = self.devices.get(name) else {
            return;
        };
        if !shadow.state().is_synced() {
            self.timers.arm(ShadowKey::Device(name.to_string()), self.retry_period);
        }
    }

    /// Arms `member_name`'s retry timer iff the bridge is synced (meaning
    /// `enable_member`/`disable_member` actually dispatched an RPC rather
    /// than recording a pending-sync failure) and the member landed in a
    /// pending state.
    pub(crate) fn maybe_arm_member_timer(&mut self, bridge_name: &str, member_name: &str) {
        let Some(bridge) = self.bridges.get(bridge_name) else {
            return;
        };
        if !bridge.state().is_synced() {
            return;
        }
        let Some(member) = bridge.member(member_name) else {
            return;
        };
        if matches!(member.state(), SyncState::PendingAdd | SyncState::PendingRemove) {
            self.timers.arm(
                ShadowKey::Member {
                    bridge: bridge_name.to_string(),
                    member: member_name.to_string(),
                },
                self.retry_period,
            );
        }
    }

    /// Drives one fired timer to completion: reissues its RPC (if retries
    /// remain) and re-arms, or lets it lapse terminally.
    pub async fn handle_timer_fired(&mut self, key: ShadowKey) -> Result<(), UbusDevError> {
        match key {
            ShadowKey::Device(name) => self.retry_device(&name).await,
            ShadowKey::Bridge(name) => self.retry_bridge(&name).await,
            ShadowKey::Member { bridge, member } => self.retry_member(&bridge, &member).await,
            ShadowKey::BridgeMemberRetry(bridge) => self.run_member_failure_retry(&bridge).await,
        }
    }

    async fn retry_device(&mut self, name: &str) -> Result<(), UbusDevError> {
        let Some(shadow) = self.devices.get_mut(name) else {
            return Ok(());
        };
        let class_name = shadow.class_name().to_string();
        let reissue = shadow.on_timeout(self.max_retry);

        let Ok((endpoint, peer)) = self.subscribed_peer(&class_name) else {
            return Ok(());
        };
        let invoker = Invoker::new(self.transport.as_ref());
        let method_and_args = match reissue {
            Reissue::Create(config) => Some(("create", config.0)),
            Reissue::Reload(config) => Some(("reload", config.0)),
            Reissue::Free => Some(("free", serde_json::json!({ "name": name }))),
            Reissue::None => None,
        };
        if let Some((method, args)) = method_and_args {
            invoker.invoke_async(&endpoint, &peer, method, args, Cookie(0)).await?;
            self.timers.arm(ShadowKey::Device(name.to_string()), self.retry_period);
        }
        Ok(())
    }

    async fn retry_bridge(&mut self, name: &str) -> Result<(), UbusDevError> {
        let Some(bridge) = self.bridges.get_mut(name) else {
            return Ok(());
        };
        let class_name = bridge.class_name().to_string();
        let reissue = bridge.on_timeout(self.max_retry);

        let Ok((endpoint, peer)) = self.subscribed_peer(&class_name) else {
            return Ok(());
        };
        let invoker = Invoker::new(self.transport.as_ref());
        let method_and_args = match reissue {
            BridgeReissue::Create(config) => Some(("create", config.0)),
            BridgeReissue::Reload(config) => Some(("reload", config.0)),
            BridgeReissue::Free => Some(("free", serde_json::json!({ "name": name }))),
            BridgeReissue::Prepare => Some(("prepare", serde_json::json!({ "bridge": name }))),
            BridgeReissue::None => None,
        };
        if let Some((method, args)) = method_and_args {
            invoker.invoke_async(&endpoint, &peer, method, args, Cookie(0)).await?;
            self.timers.arm(ShadowKey::Bridge(name.to_string()), self.retry_period);
        }
        Ok(())
    }

    async fn retry_member(&mut self, bridge_name: &str, member_name: &str) -> Result<(), UbusDevError> {
        let Some(bridge) = self.bridges.get_mut(bridge_name) else {
            return Ok(());
        };
        let class_name = bridge.class_name().to_string();
        let Some(member) = bridge.member_mut(member_name) else {
            return Ok(());
        };
        let reissue = member.on_timeout(self.max_retry);

        let Ok((endpoint, peer)) = self.subscribed_peer(&class_name) else {
            return Ok(());
        };
        let invoker = Invoker::new(self.transport.as_ref());
        let method_and_args = match reissue {
            MemberReissue::Add => Some((
                "add",
                serde_json::json!({ "bridge": bridge_name, "member": member_name }),
            )),
            MemberReissue::Remove => Some((
                "remove",
                serde_json::json!({ "bridge": bridge_name, "member": member_name }),
            )),
            MemberReissue::None => None,
        };
        if let Some((method, args)) = method_and_args {
            invoker.invoke_async(&endpoint, &peer, method, args, Cookie(0)).await?;
            self.timers.arm(
                ShadowKey::Member {
                    bridge: bridge_name.to_string(),
                    member: member_name.to_string(),
                },
                self.retry_period,
            );
        }
        Ok(())
    }

    async fn run_member_failure_retry(&mut self, bridge_name: &str) -> Result<(), UbusDevError> {
        let Some(bridge) = self.bridges.get(bridge_name) else {
            return Ok(());
        };
        let class_name = bridge.class_name().to_string();
        let Ok((endpoint, peer)) = self.subscribed_peer(&class_name) else {
            return Ok(());
        };
        let invoker = Invoker::new(self.transport.as_ref());
        if let Some(bridge) = self.bridges.get_mut(bridge_name) {
            bridge
                .retry_failed_members(&mut self.device_registry, &endpoint, &peer, &invoker)
                .await;
        }
        Ok(())
    }
}
