//! Class registration: loads JSON class-metadata records
//! from `<config-root>/ubusdev-config` and builds one [`DeviceClass`] per
//! record. The JSON-schema *compiler* proper is out of scope; the
//! [`crate::schema`] module implements just enough of a schema model to
//! satisfy the rest of this crate.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::link::HandlerLink;
use crate::schema::{Schema, SchemaError, SchemaField};

const CONFIG_DIR_NAME: &str = "ubusdev-config";

/// A class-metadata record as read from JSON.
#[derive(Debug, Deserialize)]
struct RawDeviceClassSpec {
    name: String,
    handler: String,
    #[serde(default)]
    bridge: bool,
    member_prefix: Option<String>,
    config_schema: Vec<SchemaField>,
    #[serde(default)]
    info_schema: Option<Vec<SchemaField>>,
    #[serde(default)]
    stats_schema: Option<Vec<SchemaField>>,
}

/// Immutable per-class declaration, parsed once at registration.
///
/// The `bon::Builder` derive exists for test fixtures (see the `tests`
/// module below and `tests/bridge_scenarios.rs`) — production code always
/// goes through [`parse_class_spec`]/[`DeviceClassSpec::from_raw`] instead.
#[derive(Debug, Clone, Eq, PartialEq, bon::Builder)]
pub struct DeviceClassSpec {
    #[builder(into)]
    pub name: String,
    #[builder(into)]
    pub handler: String,
    #[builder(default)]
    pub bridge_capable: bool,
    pub member_prefix: Option<String>,
    #[builder(default)]
    pub config_schema: Schema,
    pub info_schema: Option<Schema>,
    pub stats_schema: Option<Schema>,
}

impl DeviceClassSpec {
    /// The subscription endpoint name for this class's handler.
    pub fn ubus_endpoint(&self) -> String {
        format!("network.device.ubus.{}", self.handler)
    }

    fn from_raw(raw: RawDeviceClassSpec) -> Result<Self, SchemaError> {
        if raw.bridge && raw.member_prefix.is_none() {
            return Err(SchemaError::MissingMemberPrefix);
        }
        Ok(Self {
            name: raw.name,
            handler: raw.handler,
            bridge_capable: raw.bridge,
            member_prefix: raw.member_prefix,
            config_schema: Schema::from_fields(raw.config_schema),
            info_schema: raw.info_schema.map(Schema::from_fields),
            stats_schema: raw.stats_schema.map(Schema::from_fields),
        })
    }
}

/// A registered device class: its immutable spec plus the live handler
/// subscription.
pub struct DeviceClass {
    pub spec: DeviceClassSpec,
    pub link: HandlerLink,
}

impl DeviceClass {
    pub fn new(spec: DeviceClassSpec) -> Self {
        let endpoint = spec.ubus_endpoint();
        Self {
            spec,
            link: HandlerLink::new(endpoint),
        }
    }

    /// Dump capability is present iff the class declared the matching
    /// schema.
    pub fn supports_info_dump(&self) -> bool {
        self.spec.info_schema.is_some()
    }

    pub fn supports_stats_dump(&self) -> bool {
        self.spec.stats_schema.is_some()
    }
}

/// Parses one class-metadata JSON value into a [`DeviceClassSpec`].
pub fn parse_class_spec(value: &Value) -> Result<DeviceClassSpec, SchemaError> {
    let raw: RawDeviceClassSpec =
        serde_json::from_value(value.clone()).map_err(|_| SchemaError::NotAnObject)?;
    DeviceClassSpec::from_raw(raw)
}

/// Loads every class declared under `<config_root>/ubusdev-config/*.json`.
///
/// A missing directory is non-fatal — the plug-in is simply disabled.
/// A record that fails to parse is logged and skipped; the rest of
/// the directory still loads.
pub fn load_classes_from_root(config_root: &Path) -> Vec<DeviceClass> {
    let config_dir = config_root.join(CONFIG_DIR_NAME);
    let entries = match fs::read_dir(&config_dir) {
        Ok(entries) => entries,
        Err(_) => {
            debug!(dir = %config_dir.display(), "no ubusdev-config directory, plug-in disabled");
            return Vec::new();
        }
    };

    let mut classes = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        match load_class_file(&path) {
            Ok(class) => classes.push(class),
            Err(error) => {
                warn!(file = %path.display(), %error, "discarding class metadata that failed to load");
            }
        }
    }
    classes
}

fn load_class_file(path: &Path) -> Result<DeviceClass, SchemaError> {
    let contents = fs::read_to_string(path).map_err(|_| SchemaError::NotAnObject)?;
    let value: Value = serde_json::from_str(&contents).map_err(|_| SchemaError::NotAnObject)?;
    let spec = parse_class_spec(&value)?;
    Ok(DeviceClass::new(spec))
}
