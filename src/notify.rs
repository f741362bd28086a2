//! The Notification Router: decodes one inbound
//! notification and routes it to the shadow(s) it names, driving each to
//! `SYNCED` (or destroying it, for a confirmed `PENDING_FREE`).

use serde_json::Value;
use tracing::{info, warn};

use crate::error::{NotifyDecodeError, UbusDevError};
use crate::registry::Plugin;
use crate::timer::ShadowKey;

/// A decoded notification payload: device-list shape for
/// `create`/`reload`/`free`, hotplug-pair shape for `prepare`/`add`/`remove`.
#[derive(Debug, Clone)]
enum Notification {
    DeviceList(Vec<String>),
    HotplugPair { bridge: String, member: String },
}

fn decode(notify_type: &str, payload: &Value) -> Result<Notification, NotifyDecodeError> {
    if let Some(message) = payload.get("message").and_then(Value::as_str) {
        info!(notify_type, message, "handler notification message");
    }

    match notify_type {
        "create" | "reload" | "free" => {
            if let Some(name) = payload.get("name").and_then(Value::as_str) {
                return Ok(Notification::DeviceList(vec![name.to_string()]));
            }
            let devices = payload
                .get("devices")
                .and_then(Value::as_array)
                .ok_or(NotifyDecodeError::MissingField("devices"))?;
            let names: Vec<String> = devices
                .iter()
                .filter_map(|value| value.as_str().map(str::to_owned))
                .collect();
            if names.is_empty() {
                return Err(NotifyDecodeError::WrongFieldShape { field: "devices" });
            }
            Ok(Notification::DeviceList(names))
        }
        "prepare" => {
            let bridge = payload
                .get("bridge")
                .and_then(Value::as_str)
                .ok_or(NotifyDecodeError::MissingField("bridge"))?;
            Ok(Notification::DeviceList(vec![bridge.to_string()]))
        }
        "add" | "remove" => {
            let bridge = payload
                .get("bridge")
                .and_then(Value::as_str)
                .ok_or(NotifyDecodeError::MissingField("bridge"))?;
            let member = payload
                .get("member")
                .and_then(Value::as_str)
                .ok_or(NotifyDecodeError::MissingField("member"))?;
            Ok(Notification::HotplugPair {
                bridge: bridge.to_string(),
                member: member.to_string(),
            })
        }
        other => Err(NotifyDecodeError::UnknownType(other.to_string())),
    }
}

/// Routes one inbound notification. Malformed payloads are logged and
/// dropped rather than propagated upward — handlers never surface errors
/// except as non-zero RPC replies on the operations that asked for one.
pub async fn dispatch_notification(
    plugin: &mut Plugin,
    endpoint: &str,
    notify_type: &str,
    payload: Value,
) -> Result<(), UbusDevError> {
    let decoded = match decode(notify_type, &payload) {
        Ok(decoded) => decoded,
        Err(source) => {
            warn!(endpoint, notify_type, %source, "dropping malformed notification");
            return Ok(());
        }
    };

    match (notify_type, decoded) {
        ("create", Notification::DeviceList(names)) => {
            for name in names {
                handle_create(plugin, &name);
            }
        }
        ("reload", Notification::DeviceList(names)) => {
            for name in names {
                handle_reload(plugin, &name);
            }
        }
        ("free", Notification::DeviceList(names)) => {
            for name in names {
                handle_free(plugin, &name);
            }
        }
        ("prepare", Notification::DeviceList(names)) => {
            for name in names {
                handle_prepare(plugin, &name);
            }
        }
        ("add", Notification::HotplugPair { bridge, member }) => {
            handle_add(plugin, &bridge, &member);
        }
        ("remove", Notification::HotplugPair { bridge, member }) => {
            handle_remove(plugin, &bridge, &member);
        }
        _ => {}
    }
    Ok(())
}

fn handle_create(plugin: &mut Plugin, name: &str) {
    if let Some(bridge) = plugin.bridges.get_mut(name) {
        bridge.on_create_confirmed();
        plugin.timers.cancel(&ShadowKey::Bridge(name.to_string()));
        maybe_schedule_member_retry(plugin, name);
        return;
    }
    if let Some(shadow) = plugin.devices.get_mut(name) {
        shadow.on_create_confirmed();
        plugin.timers.cancel(&ShadowKey::Device(name.to_string()));
    }
}

fn handle_reload(plugin: &mut Plugin, name: &str) {
    if let Some(bridge) = plugin.bridges.get_mut(name) {
        bridge.on_reload_confirmed();
        plugin.timers.cancel(&ShadowKey::Bridge(name.to_string()));
        return;
    }
    if let Some(shadow) = plugin.devices.get_mut(name) {
        shadow.on_reload_confirmed();
        plugin.timers.cancel(&ShadowKey::Device(name.to_string()));
    }
}

fn handle_free(plugin: &mut Plugin, name: &str) {
    if let Some(bridge) = plugin.bridges.get_mut(name) {
        let destroy = bridge.on_free_confirmed();
        plugin.timers.cancel(&ShadowKey::Bridge(name.to_string()));
        if destroy {
            plugin.bridges.remove(name);
        }
        return;
    }
    if let Some(shadow) = plugin.devices.get_mut(name) {
        let destroy = shadow.on_free_confirmed();
        plugin.timers.cancel(&ShadowKey::Device(name.to_string()));
        if destroy {
            plugin.devices.remove(name);
        }
    }
}

fn handle_prepare(plugin: &mut Plugin, name: &str) {
    if let Some(bridge) = plugin.bridges.get_mut(name) {
        bridge.on_prepare_confirmed();
        plugin.timers.cancel(&ShadowKey::Bridge(name.to_string()));
    }
}

fn handle_add(plugin: &mut Plugin, bridge_name: &str, member_name: &str) {
    let Some(bridge) = plugin.bridges.get_mut(bridge_name) else {
        return;
    };

    if bridge.member(member_name).is_none() {
        // Unsolicited hotplug add: no configured member exists
        // under this name, so create one directly, already synced.
        bridge.create_member(&mut plugin.device_registry, member_name, true);
        if let Some(member) = bridge.member_mut(member_name) {
            member.set_present(true);
        }
        return;
    }

    let confirmed = bridge.on_member_add_confirmed(member_name);
    plugin.timers.cancel(&ShadowKey::Member {
        bridge: bridge_name.to_string(),
        member: member_name.to_string(),
    });
    if confirmed {
        info!(bridge = bridge_name, member = member_name, "DEV_EVENT_TOPO_CHANGE");
    }
}

fn handle_remove(plugin: &mut Plugin, bridge_name: &str, member_name: &str) {
    let Some(bridge) = plugin.bridges.get_mut(bridge_name) else {
        return;
    };
    let confirmed = bridge.on_member_remove_confirmed(&mut plugin.device_registry, member_name);
    plugin.timers.cancel(&ShadowKey::Member {
        bridge: bridge_name.to_string(),
        member: member_name.to_string(),
    });
    if confirmed {
        info!(bridge = bridge_name, member = member_name, "DEV_EVENT_TOPO_CHANGE");
    }
}

/// Schedules the bounded-time member-failure retry once a
/// bridge lands on `SYNCED` carrying failed enable attempts.
fn maybe_schedule_member_retry(plugin: &mut Plugin, bridge_name: &str) {
    let Some(bridge) = plugin.bridges.get(bridge_name) else {
        return;
    };
    if bridge.state().is_synced() && bridge.n_failed() > 0 {
        plugin.timers.arm(
            ShadowKey::BridgeMemberRetry(bridge_name.to_string()),
            plugin.retry_period,
        );
    }
}
