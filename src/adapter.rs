//! The Adapter Surface: the handful of operations a host
//! daemon actually calls — `create`/`reload`/`free`/the hotplug trio/the
//! dump pair/bridge `set_up`/`set_down` — each resolving its class's handler
//! link before touching any shadow.

use serde_json::Value;

use crate::device::DefaultActivator;
use crate::error::UbusDevError;
use crate::invoker::Invoker;
use crate::registry::Plugin;
use crate::schema::{ConfigBlob, Schema};
use crate::shadow::bridge::{BridgeShadow, SetUpError};
use crate::shadow::device::{DeviceShadow, ReloadOutcome};

impl Plugin {
    /// Allocates a device or bridge's remote counterpart.
    /// Which shadow kind is created follows the class's `bridge` flag, not a
    /// caller-supplied hint.
    pub async fn create(&mut self, class_name: &str, name: &str, config: Value) -> Result<(), UbusDevError> {
        let class = self.classes.get(class_name).ok_or_else(|| UbusDevError::NotFound {
            kind: "class",
            name: class_name.to_string(),
        })?;
        class
            .spec
            .config_schema
            .validate(&config)
            .map_err(|source| UbusDevError::ConfigError {
                class: class_name.to_string(),
                source,
            })?;
        let bridge_capable = class.spec.bridge_capable;

        let (endpoint, peer) = self.subscribed_peer(class_name)?;
        let invoker = Invoker::new(self.transport.as_ref());
        let blob = ConfigBlob::new(config);

        if bridge_capable {
            let mut bridge = BridgeShadow::new(name, class_name, Box::new(DefaultActivator));
            bridge
                .config_init(blob, &mut self.device_registry, &endpoint, &peer, &invoker)
                .await?;
            self.bridges.insert(name.to_string(), bridge);
            self.maybe_arm_bridge_timer(name);
        } else {
            let mut shadow = DeviceShadow::new(name, class_name);
            shadow.create(&endpoint, &peer, blob, &invoker).await?;
            self.devices.insert(name.to_string(), shadow);
            self.maybe_arm_device_timer(name);
        }
        Ok(())
    }

    /// Reloads an existing device or bridge's config.
    pub async fn reload(
        &mut self,
        class_name: &str,
        name: &str,
        config: Value,
    ) -> Result<ReloadOutcome, UbusDevError> {
        let class = self.classes.get(class_name).ok_or_else(|| UbusDevError::NotFound {
            kind: "class",
            name: class_name.to_string(),
        })?;
        class
            .spec
            .config_schema
            .validate(&config)
            .map_err(|source| UbusDevError::ConfigError {
                class: class_name.to_string(),
                source,
            })?;

        let (endpoint, peer) = self.subscribed_peer(class_name)?;
        let invoker = Invoker::new(self.transport.as_ref());
        let blob = ConfigBlob::new(config);

        if let Some(bridge) = self.bridges.get_mut(name) {
            let outcome = bridge
                .reload(blob, &mut self.device_registry, &endpoint, &peer, &invoker)
                .await?;
            self.maybe_arm_bridge_timer(name);
            return Ok(outcome);
        }
        if let Some(shadow) = self.devices.get_mut(name) {
            let outcome = shadow.reload(&endpoint, &peer, blob, &invoker).await?;
            self.maybe_arm_device_timer(name);
            return Ok(outcome);
        }
        Err(UbusDevError::NotFound {
            kind: "device",
            name: name.to_string(),
        })
    }

    /// Tears a device or bridge's remote counterpart down.
    pub async fn free(&mut self, class_name: &str, name: &str) -> Result<(), UbusDevError> {
        let (endpoint, peer) = self.subscribed_peer(class_name)?;
        let invoker = Invoker::new(self.transport.as_ref());

        if let Some(bridge) = self.bridges.get_mut(name) {
            bridge.free(&endpoint, &peer, &invoker).await?;
            self.maybe_arm_bridge_timer(name);
            return Ok(());
        }
        if let Some(shadow) = self.devices.get_mut(name) {
            shadow.free(&endpoint, &peer, &invoker).await?;
            self.maybe_arm_device_timer(name);
            return Ok(());
        }
        Err(UbusDevError::NotFound {
            kind: "device",
            name: name.to_string(),
        })
    }

    /// `hotplug-prepare`: allocates the bridge shadow on first
    /// reference, pre-activating it ahead of any member joining.
    pub async fn hotplug_prepare(&mut self, class_name: &str, bridge_name: &str) -> Result<(), UbusDevError> {
        let (endpoint, peer) = self.subscribed_peer(class_name)?;
        let invoker = Invoker::new(self.transport.as_ref());

        let bridge = self
            .bridges
            .entry(bridge_name.to_string())
            .or_insert_with(|| BridgeShadow::new(bridge_name, class_name, Box::new(DefaultActivator)));
        bridge.hotplug_prepare(&endpoint, &peer, &invoker).await?;
        self.maybe_arm_bridge_timer(bridge_name);
        Ok(())
    }

    /// `hotplug-add`: a device joins `bridge_name` out of band,
    /// independent of the bridge's configured `ifname` list.
    pub async fn hotplug_add(
        &mut self,
        class_name: &str,
        bridge_name: &str,
        member_name: &str,
    ) -> Result<(), UbusDevError> {
        let (endpoint, peer) = self.subscribed_peer(class_name)?;
        let invoker = Invoker::new(self.transport.as_ref());

        let Some(bridge) = self.bridges.get_mut(bridge_name) else {
            return Err(UbusDevError::NotFound {
                kind: "bridge",
                name: bridge_name.to_string(),
            });
        };
        bridge.create_member(&mut self.device_registry, member_name, true);
        bridge
            .enable_member(member_name, &mut self.device_registry, &endpoint, &peer, &invoker)
            .await?;
        self.maybe_arm_bridge_timer(bridge_name);
        self.maybe_arm_member_timer(bridge_name, member_name);
        Ok(())
    }

    /// `hotplug-remove`: a member leaves `bridge_name` out of
    /// band.
    pub async fn hotplug_remove(
        &mut self,
        class_name: &str,
        bridge_name: &str,
        member_name: &str,
    ) -> Result<(), UbusDevError> {
        let (endpoint, peer) = self.subscribed_peer(class_name)?;
        let invoker = Invoker::new(self.transport.as_ref());

        let Some(bridge) = self.bridges.get_mut(bridge_name) else {
            return Err(UbusDevError::NotFound {
                kind: "bridge",
                name: bridge_name.to_string(),
            });
        };
        bridge.disable_member(member_name, &endpoint, &peer, &invoker).await?;
        self.maybe_arm_bridge_timer(bridge_name);
        self.maybe_arm_member_timer(bridge_name, member_name);
        Ok(())
    }

    /// Brings a bridge's members up.
    pub async fn bridge_set_up(&mut self, class_name: &str, bridge_name: &str) -> Result<(), SetUpError> {
        let (endpoint, peer) = self.subscribed_peer(class_name)?;
        let invoker = Invoker::new(self.transport.as_ref());

        let Some(bridge) = self.bridges.get_mut(bridge_name) else {
            return Err(SetUpError::Transport(UbusDevError::NotFound {
                kind: "bridge",
                name: bridge_name.to_string(),
            }));
        };
        bridge
            .set_up(&mut self.device_registry, &endpoint, &peer, &invoker)
            .await?;
        self.maybe_arm_bridge_timer(bridge_name);
        Ok(())
    }

    /// Brings a bridge's members down and disables the interface.
    pub async fn bridge_set_down(&mut self, class_name: &str, bridge_name: &str) -> Result<(), UbusDevError> {
        let (endpoint, peer) = self.subscribed_peer(class_name)?;
        let invoker = Invoker::new(self.transport.as_ref());

        let Some(bridge) = self.bridges.get_mut(bridge_name) else {
            return Err(UbusDevError::NotFound {
                kind: "bridge",
                name: bridge_name.to_string(),
            });
        };
        bridge.set_down(&endpoint, &peer, &invoker).await?;
        self.maybe_arm_bridge_timer(bridge_name);
        Ok(())
    }

    /// `dump_info`: a synchronous RPC projected through the
    /// class's declared `info_schema`. Fails with `NotFound` if the class
    /// declared no `info_schema` at all.
    pub async fn dump_info(&self, class_name: &str, name: &str) -> Result<Value, UbusDevError> {
        let schema = self
            .classes
            .get(class_name)
            .and_then(|class| class.spec.info_schema.as_ref())
            .ok_or_else(|| UbusDevError::NotFound {
                kind: "info_schema",
                name: class_name.to_string(),
            })?;
        self.dump(class_name, name, "info", schema).await
    }

    /// `dump_stats`, analogous to [`Plugin::dump_info`].
    pub async fn dump_stats(&self, class_name: &str, name: &str) -> Result<Value, UbusDevError> {
        let schema = self
            .classes
            .get(class_name)
            .and_then(|class| class.spec.stats_schema.as_ref())
            .ok_or_else(|| UbusDevError::NotFound {
                kind: "stats_schema",
                name: class_name.to_string(),
            })?;
        self.dump(class_name, name, "stats", schema).await
    }

    async fn dump(&self, class_name: &str, name: &str, method: &str, schema: &Schema) -> Result<Value, UbusDevError> {
        let (endpoint, peer) = self.subscribed_peer(class_name)?;
        let invoker = Invoker::new(self.transport.as_ref());
        let reply = invoker
            .invoke_sync(&endpoint, &peer, method, serde_json::json!({ "name": name }))
            .await?;

        let mut out = serde_json::Map::new();
        schema.project_into(&reply, &mut out);
        Ok(Value::Object(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{parse_class_spec, DeviceClass};
    use crate::transport::FakeTransport;
    use serde_json::json;

    fn eth_class() -> DeviceClass {
        DeviceClass::new(
            parse_class_spec(&json!({
                "name": "eth",
                "handler": "h",
                "config_schema": [{"name": "mtu", "kind": "i64"}],
                "info_schema": [{"name": "carrier", "kind": "bool"}],
            }))
            .unwrap(),
        )
    }

    fn bridge_class() -> DeviceClass {
        DeviceClass::new(
            parse_class_spec(&json!({
                "name": "br",
                "handler": "h",
                "bridge": true,
                "member_prefix": "brmember-",
                "config_schema": [],
            }))
            .unwrap(),
        )
    }

    async fn plugin_with(transport: FakeTransport, class: DeviceClass) -> Plugin {
        transport.publish_endpoint("network.device.ubus.h", "peer-1");
        let mut plugin = Plugin::new(Box::new(transport));
        plugin.register_class(class);
        plugin.subscribe_all().await;
        plugin
    }

    #[tokio::test]
    async fn create_allocates_a_plain_device_shadow() {
        let mut plugin = plugin_with(FakeTransport::new(), eth_class()).await;

        plugin.create("eth", "eth0", json!({"mtu": 1500})).await.unwrap();

        assert!(plugin.device("eth0").is_some());
        assert!(plugin.bridge("eth0").is_none());
    }

    #[tokio::test]
    async fn create_allocates_a_bridge_shadow_for_a_bridge_capable_class() {
        let mut plugin = plugin_with(FakeTransport::new(), bridge_class()).await;

        plugin.create("br", "br0", json!({"empty": true})).await.unwrap();

        assert!(plugin.bridge("br0").is_some());
        assert!(plugin.device("br0").is_none());
    }

    #[tokio::test]
    async fn create_rejects_a_config_that_fails_validation() {
        let mut plugin = plugin_with(FakeTransport::new(), eth_class()).await;

        let result = plugin.create("eth", "eth0", json!({"mtu": "not a number"})).await;
        assert!(matches!(result, Err(UbusDevError::ConfigError { .. })));
    }

    #[tokio::test]
    async fn create_with_unknown_class_fails() {
        let mut plugin = plugin_with(FakeTransport::new(), eth_class()).await;

        let result = plugin.create("missing", "eth0", json!({})).await;
        assert!(matches!(result, Err(UbusDevError::NotFound { kind: "class", .. })));
    }

    #[tokio::test]
    async fn hotplug_prepare_then_add_enables_the_member() {
        let mut plugin = plugin_with(FakeTransport::new(), bridge_class()).await;

        plugin.hotplug_prepare("br", "br0").await.unwrap();
        assert!(plugin.bridge("br0").unwrap().force_active());

        plugin.hotplug_add("br", "br0", "wlan0").await.unwrap();
        assert!(plugin.bridge("br0").unwrap().member("wlan0").is_some());
    }

    #[tokio::test]
    async fn dump_info_projects_the_declared_schema() {
        let transport = FakeTransport::new();
        transport.publish_endpoint("network.device.ubus.h", "peer-1");
        let mut plugin = Plugin::new(Box::new(transport));
        plugin.register_class(eth_class());
        plugin.subscribe_all().await;

        let result = plugin.dump_info("eth", "eth0").await.unwrap();
        assert_eq!(result, json!({}));
    }

    #[tokio::test]
    async fn dump_stats_fails_when_class_declares_no_stats_schema() {
        let mut plugin = plugin_with(FakeTransport::new(), eth_class()).await;

        let result = plugin.dump_stats("eth", "eth0").await;
        assert!(matches!(
            result,
            Err(UbusDevError::NotFound { kind: "stats_schema", .. })
        ));
    }

    #[tokio::test]
    async fn bridge_set_up_without_members_fails() {
        let mut plugin = plugin_with(FakeTransport::new(), bridge_class()).await;
        plugin.create("br", "br0", json!({"ifname": []})).await.unwrap();

        let result = plugin.bridge_set_up("br", "br0").await;
        assert!(matches!(result, Err(SetUpError::NoMembers(_))));
    }
}
