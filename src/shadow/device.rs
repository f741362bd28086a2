//! The Device Shadow: SyncState and retry bookkeeping for a
//! non-bridge device.

use tracing::{error, instrument};

use crate::device::LocalDevice;
use crate::invoker::{Cookie, Invoker};
use crate::schema::ConfigBlob;
use crate::shadow::{RetryCounter, SyncState};
use crate::transport::PeerId;
use crate::error::UbusDevError;

/// Outcome of a `reload` call.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReloadOutcome {
    NoChange,
    Restart,
}

/// The RPC a timed-out pending operation must reissue. Stateless messages (`free`) need no payload; `create`/`reload`
/// carry the config they were dispatched with.
#[derive(Debug, Clone)]
pub enum Reissue {
    Create(ConfigBlob),
    Reload(ConfigBlob),
    Free,
    None,
}

/// One local device bound to a device class, mirroring the remote object
/// via asynchronous RPC.
pub struct DeviceShadow {
    name: String,
    class_name: String,
    device: LocalDevice,
    state: SyncState,
    retry: RetryCounter,
    current_config: Option<ConfigBlob>,
}

impl DeviceShadow {
    pub fn new(name: impl Into<String>, class_name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            device: LocalDevice::new(&name),
            name,
            class_name: class_name.into(),
            state: SyncState::Synced,
            retry: RetryCounter::default(),
            current_config: None,
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

    pub fn device_mut(&mut self) -> &mut LocalDevice {
        &mut self.device
    }

    pub fn attempts(&self) -> u32 {
        self.retry.attempts()
    }

    /// Allocates the remote counterpart: issues `create(config)`, sets
    /// `PENDING_CREATE`. The daemon's automatic `config_init` is suppressed
    /// — this shadow's own config-init only runs once the `create`
    /// notification arrives.
    #[instrument(skip(self, invoker, config), fields(name = %self.name))]
    pub async fn create(
        &mut self,
        endpoint: &str,
        peer: &PeerId,
        config: ConfigBlob,
        invoker: &Invoker<'_>,
    ) -> Result<(), UbusDevError> {
        invoker
            .invoke_async(endpoint, peer, "create", config.0.clone(), Cookie(0))
            .await?;
        self.state = SyncState::PendingCreate(config);
        self.retry.reset();
        Ok(())
    }

    /// Diffs `new_config` against the currently synced config; unchanged
    /// configs return `NoChange` with no RPC issued.
    #[instrument(skip(self, invoker, new_config), fields(name = %self.name))]
    pub async fn reload(
        &mut self,
        endpoint: &str,
        peer: &PeerId,
        new_config: ConfigBlob,
        invoker: &Invoker<'_>,
    ) -> Result<ReloadOutcome, UbusDevError> {
        if self.current_config.as_ref() == Some(&new_config) {
            return Ok(ReloadOutcome::NoChange);
        }

        self.device.set_present(false);
        invoker
            .invoke_async(endpoint, peer, "reload", new_config.0.clone(), Cookie(0))
            .await?;
        self.state = SyncState::PendingReload(new_config);
        self.retry.reset();
        Ok(ReloadOutcome::Restart)
    }

    /// Issues `free({name})`, sets `PENDING_FREE`.
    #[instrument(skip(self, invoker), fields(name = %self.name))]
    pub async fn free(
        &mut self,
        endpoint: &str,
        peer: &PeerId,
        invoker: &Invoker<'_>,
    ) -> Result<(), UbusDevError> {
        invoker
            .invoke_async(endpoint, peer, "free", self.free_args(), Cookie(0))
            .await?;
        self.state = SyncState::PendingFree;
        self.retry.reset();
        Ok(())
    }

    fn free_args(&self) -> serde_json::Value {
        serde_json::json!({ "name": self.name })
    }

    /// A `create` notification named this shadow.
    pub fn on_create_confirmed(&mut self) {
        if let SyncState::PendingCreate(config) = &self.state {
            self.current_config = Some(config.clone());
            self.state = SyncState::Synced;
            self.retry.reset();
            self.device.set_present(true);
        }
    }

    /// A `reload` notification named this shadow.
    pub fn on_reload_confirmed(&mut self) {
        if let SyncState::PendingReload(config) = &self.state {
            self.current_config = Some(config.clone());
            self.state = SyncState::Synced;
            self.retry.reset();
            self.device.set_present(true);
        }
    }

    /// A `free` notification named this shadow. Returns `true` if the
    /// shadow should now be destroyed by its caller.
    pub fn on_free_confirmed(&mut self) -> bool {
        matches!(self.state, SyncState::PendingFree)
    }

    /// The per-shadow retry timer fired. Returns the RPC to reissue, or
    /// [`Reissue::None`] if retries are exhausted.
    pub fn on_timeout(&mut self, max_retry: u32) -> Reissue {
        if !self.retry.record_attempt(max_retry) {
            error!(name = %self.name, state = self.state.name(), "retries exhausted");
            return Reissue::None;
        }
        match &self.state {
            SyncState::PendingCreate(config) => Reissue::Create(config.clone()),
            SyncState::PendingReload(config) => Reissue::Reload(config.clone()),
            SyncState::PendingFree => Reissue::Free,
            _ => Reissue::None,
        }
    }

    /// Convenience used only by the timeout path to re-issue a `free`
    /// reconstructed from the shadow's own name.
    pub fn reissue_free_args(&self) -> serde_json::Value {
        self.free_args()
    }
}
