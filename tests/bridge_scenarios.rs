//! End-to-end scenarios against a [`Plugin`] driven entirely through the
//! in-process fake transport, covering bridge creation, empty bridges,
//! handler disappearance, unsolicited hotplug, reload, and set-up/set-down.

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::json;

use ubusdev::class::{DeviceClass, parse_class_spec};
use ubusdev::timer::ShadowKey;
use ubusdev::transport::{FakeTransport, TransportEvent};
use ubusdev::{Plugin, ReloadOutcome, SyncState};

fn bridge_class() -> DeviceClass {
    DeviceClass::new(
        parse_class_spec(&json!({
            "name": "br",
            "handler": "h",
            "bridge": true,
            "member_prefix": "brmember-",
            "config_schema": [
                {"name": "empty", "kind": "bool"},
                {"name": "ifname", "kind": "array_of_string"},
            ],
        }))
        .unwrap(),
    )
}

async fn plugin_with_bridge_class() -> Plugin {
    let transport = FakeTransport::new();
    transport.publish_endpoint("network.device.ubus.h", "peer-1");
    let mut plugin = Plugin::new(Box::new(transport));
    plugin.register_class(bridge_class());
    plugin.subscribe_all().await;
    plugin
}

async fn notify(plugin: &mut Plugin, notify_type: &str, payload: serde_json::Value) {
    plugin
        .on_transport_event(TransportEvent::Notification {
            endpoint: "network.device.ubus.h".to_string(),
            notify_type: notify_type.to_string(),
            payload,
        })
        .await
        .unwrap();
}

/// Scenario 1: create a bridge with two configured members; the
/// first present member triggers the bridge's own `create`, and once that
/// lands the remaining member is enabled individually.
#[tokio::test]
async fn create_bridge_with_two_members() {
    let mut plugin = plugin_with_bridge_class().await;

    plugin
        .create("br", "br0", json!({"ifname": ["eth0", "eth1"]}))
        .await
        .unwrap();
    assert_eq!(plugin.bridge("br0").unwrap().members().count(), 2);

    plugin
        .on_member_device_event("br", "br0", "eth0", ubusdev::DeviceEvent::Add)
        .await
        .unwrap();
    assert_matches!(plugin.bridge("br0").unwrap().state(), SyncState::PendingCreate(_));

    notify(&mut plugin, "create", json!({"devices": ["br0"]})).await;
    assert!(plugin.bridge("br0").unwrap().active());

    plugin
        .on_member_device_event("br", "br0", "eth1", ubusdev::DeviceEvent::Add)
        .await
        .unwrap();
    assert_matches!(plugin.bridge("br0").unwrap().member("eth1").unwrap().state(), SyncState::PendingAdd);

    notify(&mut plugin, "add", json!({"bridge": "br0", "member": "eth0"})).await;
    notify(&mut plugin, "add", json!({"bridge": "br0", "member": "eth1"})).await;
    assert!(plugin.bridge("br0").unwrap().member("eth1").unwrap().state().is_synced());
}

/// Scenario 1b: a second member's `DEV_EVENT_ADD` arrives while the
/// bridge is still `PendingCreate` — this defers the attach (`n_failed`)
/// rather than taking the already-synced `enable_member` path. The
/// bridge-wide member-failure retry, armed once `create` lands, must bring
/// the member up `present` with `n_present` back in agreement.
#[tokio::test]
async fn deferred_member_is_marked_present_after_create_and_retry() {
    let mut plugin = plugin_with_bridge_class().await;

    plugin
        .create("br", "br0", json!({"ifname": ["eth0", "eth1"]}))
        .await
        .unwrap();

    plugin
        .on_member_device_event("br", "br0", "eth0", ubusdev::DeviceEvent::Add)
        .await
        .unwrap();
    assert_matches!(plugin.bridge("br0").unwrap().state(), SyncState::PendingCreate(_));

    // eth1 shows up before the bridge itself is synced: deferred, not attached.
    plugin
        .on_member_device_event("br", "br0", "eth1", ubusdev::DeviceEvent::Add)
        .await
        .unwrap();
    let bridge = plugin.bridge("br0").unwrap();
    assert!(!bridge.member("eth1").unwrap().present());
    assert_eq!(bridge.n_present(), 1);
    assert_eq!(bridge.n_failed(), 1);

    notify(&mut plugin, "create", json!({"devices": ["br0"]})).await;
    assert!(plugin.bridge("br0").unwrap().active());

    plugin
        .handle_timer_fired(ShadowKey::BridgeMemberRetry("br0".to_string()))
        .await
        .unwrap();
    notify(&mut plugin, "add", json!({"bridge": "br0", "member": "eth1"})).await;

    let bridge = plugin.bridge("br0").unwrap();
    assert!(bridge.member("eth1").unwrap().present());
    assert!(bridge.member("eth1").unwrap().state().is_synced());
    assert_eq!(bridge.n_present(), 2);
}

/// Scenario 2: an empty bridge is force-active and issues `create`
/// immediately, since no member event will ever arrive to trigger it.
#[tokio::test]
async fn create_empty_bridge() {
    let mut plugin = plugin_with_bridge_class().await;

    plugin.create("br", "br1", json!({"empty": true})).await.unwrap();
    let bridge = plugin.bridge("br1").unwrap();
    assert!(bridge.force_active());
    assert!(bridge.device().present());
    assert_matches!(bridge.state(), SyncState::PendingCreate(_));

    notify(&mut plugin, "create", json!({"devices": ["br1"]})).await;
    let bridge = plugin.bridge("br1").unwrap();
    assert!(bridge.active());
    assert!(bridge.state().is_synced());
}

/// Scenario 3: handler disappearance makes `reload` a no-op that
/// still returns `NoChange`-equivalent surfaced failure rather than issuing
/// an RPC, and a subsequent `object-added` event causes exactly one
/// subscribe attempt with no automatic reload.
#[tokio::test]
async fn handler_disappearance_blocks_reload_until_resubscribed() {
    let mut plugin = plugin_with_bridge_class().await;
    plugin.create("br", "br0", json!({"empty": true})).await.unwrap();
    notify(&mut plugin, "create", json!({"devices": ["br0"]})).await;

    plugin
        .on_transport_event(TransportEvent::SubscriptionRemoved {
            endpoint: "network.device.ubus.h".to_string(),
        })
        .await
        .unwrap();

    let result = plugin.reload("br", "br0", json!({"empty": true})).await;
    assert_matches!(result, Err(ubusdev::UbusDevError::HandlerAbsent { .. }));

    plugin
        .on_transport_event(TransportEvent::ObjectAdded {
            endpoint: "network.device.ubus.h".to_string(),
        })
        .await
        .unwrap();
    assert!(plugin.class("br").unwrap().link.is_subscribed());
}

/// Scenario 5: an out-of-band hotplug add for an unknown member
/// creates a hotplug-origin record, already synced, which a subsequent
/// vlist update round must not delete.
#[tokio::test]
async fn unsolicited_hotplug_add_survives_reload() {
    let mut plugin = plugin_with_bridge_class().await;
    plugin.create("br", "br0", json!({"empty": true})).await.unwrap();
    notify(&mut plugin, "create", json!({"devices": ["br0"]})).await;

    notify(&mut plugin, "add", json!({"bridge": "br0", "member": "wlan0"})).await;
    let member = plugin.bridge("br0").unwrap().member("wlan0").unwrap();
    assert!(member.is_hotplug());
    assert!(member.state().is_synced());

    // A vlist update round driven by a real config change (not a no-op
    // reload) must still preserve the hotplug-origin member.
    plugin.reload("br", "br0", json!({"ifname": []})).await.unwrap();
    assert!(plugin.bridge("br0").unwrap().member("wlan0").is_some());
}

/// Scenario 6: reloading with a changed config returns `Restart`,
/// issues exactly one `reload`, and settles to `SYNCED` with the new config
/// once the notification lands.
#[tokio::test]
async fn reload_with_change_on_bridge() {
    let mut plugin = plugin_with_bridge_class().await;
    plugin.create("br", "br0", json!({"ifname": ["eth0"]})).await.unwrap();

    let outcome = plugin
        .reload("br", "br0", json!({"ifname": ["eth0", "eth1"]}))
        .await
        .unwrap();
    assert_eq!(outcome, ReloadOutcome::Restart);
    assert_matches!(plugin.bridge("br0").unwrap().state(), SyncState::PendingReload(_));

    notify(&mut plugin, "reload", json!({"devices": ["br0"]})).await;
    let bridge = plugin.bridge("br0").unwrap();
    assert!(bridge.state().is_synced());
    assert!(bridge.device().present());
    assert_eq!(bridge.config().unwrap(), &json!({"ifname": ["eth0", "eth1"]}));
}

/// `create` followed by a bare `set_down` leaves the bridge shadow
/// allocated with `active=false`; only a `PENDING_FREE` confirmation
/// deallocates it.
#[tokio::test]
async fn set_down_keeps_shadow_allocated_free_destroys_it() {
    let mut plugin = plugin_with_bridge_class().await;
    plugin.create("br", "br0", json!({"empty": true})).await.unwrap();
    notify(&mut plugin, "create", json!({"devices": ["br0"]})).await;

    plugin.bridge_set_down("br", "br0").await.unwrap();
    notify(&mut plugin, "free", json!({"devices": ["br0"]})).await;
    assert!(plugin.bridge("br0").is_some());
    assert!(!plugin.bridge("br0").unwrap().active());

    plugin.free("br", "br0").await.unwrap();
    notify(&mut plugin, "free", json!({"devices": ["br0"]})).await;
    assert!(plugin.bridge("br0").is_none());
}
