//! Manual-exploration harness for the ubusdev plug-in core.
//!
//! Loads class metadata from `--config-root`, wires up an in-process
//! [`ubusdev::transport::FakeTransport`] standing in for a live ubus bus,
//! publishes a synthetic peer for each class's handler endpoint, runs one
//! command, and prints the resulting shadow state (or dump reply) as JSON.
//! Each invocation is a fresh process — there is no persistence across
//! runs, mirroring "talk to a fake external handler" rather than a
//! long-running daemon.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde_json::Value;

use ubusdev::timer::{DEFAULT_MAX_RETRY, DEFAULT_RETRY_PERIOD};
use ubusdev::transport::{FakeTransport, TransportEvent};
use ubusdev::{Plugin, UbusDevError, load_classes_from_root};

#[derive(Debug, Parser)]
#[command(name = "ubusdev-harness", about = "Exercise the ubusdev plug-in core against a fake handler")]
struct Args {
    /// Directory containing `ubusdev-config/*.json` class-metadata records.
    #[arg(long, value_name = "DIR")]
    config_root: PathBuf,

    /// Override the retry period `T`, e.g. `500ms`.
    #[arg(long, value_parser = humantime::parse_duration)]
    retry_period: Option<Duration>,

    /// Override `MAX_RETRY`.
    #[arg(long)]
    max_retry: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Allocate a device or bridge's remote counterpart.
    Create {
        class: String,
        name: String,
        /// Config blob as inline JSON, e.g. `{"ifname":["eth0","eth1"]}`.
        config: String,
    },
    /// Reload an existing device or bridge's config.
    Reload { class: String, name: String, config: String },
    /// Tear a device or bridge's remote counterpart down.
    Free { class: String, name: String },
    /// Pre-activate a bridge ahead of any member joining.
    HotplugPrepare { class: String, bridge: String },
    /// Attach a member to a bridge out of band.
    HotplugAdd { class: String, bridge: String, member: String },
    /// Detach a member from a bridge out of band.
    HotplugRemove { class: String, bridge: String, member: String },
    /// Fetch and project a class's `dump_info` reply.
    DumpInfo { class: String, name: String },
    /// Fetch and project a class's `dump_stats` reply.
    DumpStats { class: String, name: String },
    /// Feed a synthetic inbound notification as if the handler had sent it.
    Notify {
        /// The class name whose handler endpoint sent this notification.
        class: String,
        notify_type: String,
        /// Notification payload as inline JSON.
        payload: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    ubusdev::telemetry::initialise_tracing().map_err(|error| anyhow!(error.to_string()))?;

    let args = Args::parse();
    let classes = load_classes_from_root(&args.config_root);
    if classes.is_empty() {
        return Err(anyhow!(
            "no classes loaded from {}/ubusdev-config",
            args.config_root.display()
        ));
    }

    let transport = FakeTransport::new();
    for class in &classes {
        let endpoint = class.link.endpoint().to_string();
        transport.publish_endpoint(&endpoint, &format!("peer-{endpoint}"));
    }

    let mut plugin = Plugin::new(Box::new(transport));
    let (max_retry, retry_period) = (
        args.max_retry.unwrap_or(DEFAULT_MAX_RETRY),
        args.retry_period.unwrap_or(DEFAULT_RETRY_PERIOD),
    );
    plugin = plugin.with_retry_policy(max_retry, retry_period);
    for class in classes {
        plugin.register_class(class);
    }
    plugin.subscribe_all().await;

    let target = class_name(&args.command).to_string();
    if plugin.class(&target).is_none() {
        return Err(anyhow!("no such class `{target}`"));
    }

    let output = run_command(&mut plugin, args.command)
        .await
        .context("command failed")?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn class_name(command: &Command) -> &str {
    match command {
        Command::Create { class, .. }
        | Command::Reload { class, .. }
        | Command::Free { class, .. }
        | Command::HotplugPrepare { class, .. }
        | Command::HotplugAdd { class, .. }
        | Command::HotplugRemove { class, .. }
        | Command::DumpInfo { class, .. }
        | Command::DumpStats { class, .. }
        | Command::Notify { class, .. } => class,
    }
}

async fn run_command(plugin: &mut Plugin, command: Command) -> Result<Value, UbusDevError> {
    match command {
        Command::Create { class, name, config } => {
            let config = parse_json(&config);
            plugin.create(&class, &name, config).await?;
            Ok(shadow_snapshot(plugin, &name))
        }
        Command::Reload { class, name, config } => {
            let config = parse_json(&config);
            let outcome = plugin.reload(&class, &name, config).await?;
            Ok(serde_json::json!({"outcome": format!("{outcome:?}"), "shadow": shadow_snapshot(plugin, &name)}))
        }
        Command::Free { class, name } => {
            plugin.free(&class, &name).await?;
            Ok(shadow_snapshot(plugin, &name))
        }
        Command::HotplugPrepare { class, bridge } => {
            plugin.hotplug_prepare(&class, &bridge).await?;
            Ok(shadow_snapshot(plugin, &bridge))
        }
        Command::HotplugAdd { class, bridge, member } => {
            plugin.hotplug_add(&class, &bridge, &member).await?;
            Ok(shadow_snapshot(plugin, &bridge))
        }
        Command::HotplugRemove { class, bridge, member } => {
            plugin.hotplug_remove(&class, &bridge, &member).await?;
            Ok(shadow_snapshot(plugin, &bridge))
        }
        Command::DumpInfo { class, name } => plugin.dump_info(&class, &name).await,
        Command::DumpStats { class, name } => plugin.dump_stats(&class, &name).await,
        Command::Notify { class, notify_type, payload } => {
            let payload = parse_json(&payload);
            let endpoint = plugin
                .class(&class)
                .map(|class| class.link.endpoint().to_string())
                .unwrap_or_default();
            plugin
                .on_transport_event(TransportEvent::Notification {
                    endpoint,
                    notify_type,
                    payload,
                })
                .await?;
            Ok(serde_json::json!({"ok": true}))
        }
    }
}

fn parse_json(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

fn shadow_snapshot(plugin: &Plugin, name: &str) -> Value {
    if let Some(bridge) = plugin.bridge(name) {
        return serde_json::json!({
            "kind": "bridge",
            "name": bridge.name(),
            "state": bridge.state().name(),
            "active": bridge.active(),
            "force_active": bridge.force_active(),
            "n_present": bridge.n_present(),
            "n_failed": bridge.n_failed(),
        });
    }
    if let Some(device) = plugin.device(name) {
        return serde_json::json!({
            "kind": "device",
            "name": device.name(),
            "state": device.state().name(),
            "present": device.device().present(),
        });
    }
    serde_json::json!({"kind": "unknown", "name": name})
}
