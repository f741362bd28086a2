//! External device-handler bridge plug-in.
//!
//! The state-synchronization engine couples a daemon's local device shadow
//! to an external handler reached over an asynchronous RPC bus, plus the
//! bridge-membership sub-state-machine that manages a dynamic set of member
//! devices.

pub mod adapter;
pub mod class;
pub mod device;
pub mod error;
pub mod invoker;
pub mod link;
pub mod notify;
pub mod registry;
pub mod schema;
pub mod shadow;
pub mod telemetry;
pub mod timer;
pub mod transport;

pub use class::{DeviceClass, DeviceClassSpec, load_classes_from_root, parse_class_spec};
pub use device::{DeviceActivator, DeviceEvent, DeviceRegistry, LocalDevice};
pub use error::UbusDevError;
pub use link::{HandlerLink, LinkState};
pub use registry::Plugin;
pub use schema::{ConfigBlob, FieldKind, Schema, SchemaField};
pub use shadow::SyncState;
pub use shadow::bridge::BridgeShadow;
pub use shadow::device::{DeviceShadow, ReloadOutcome};
pub use shadow::member::MemberShadow;
pub use transport::{FakeTransport, PeerId, RpcTransport, TransportEvent};
