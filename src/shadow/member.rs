//! The Member State Machine: one bridge member's sub-state.
//!
//! A `MemberShadow` does not hold a back-pointer to its parent bridge.
//! Membership is a map owned by the `BridgeShadow`, with each member
//! resolved through that map at the point of use rather than through a
//! stored handle. The orchestration that needs both the member and its
//! parent's membership map — `enable_member`/`disable_member`,
//! device-event coupling, and notification handling — lives on
//! [`crate::shadow::bridge::BridgeShadow`], which owns the map this shadow
//! lives in.

use crate::shadow::{RetryCounter, SyncState};

/// The RPC a timed-out member operation must reissue.
#[derive(Debug, Clone, Copy)]
pub enum MemberReissue {
    Add,
    Remove,
    None,
}

/// One member of a bridge's membership map.
pub struct MemberShadow {
    name: String,
    present: bool,
    hotplug: bool,
    state: SyncState,
    retry: RetryCounter,
}

impl MemberShadow {
    /// Creates a member record. `hotplug` marks it as introduced
    /// out-of-band rather than via the bridge's configured `ifname` list,
    /// so a later config-driven membership rebuild leaves it untouched.
    pub fn new(name: impl Into<String>, hotplug: bool) -> Self {
        Self {
            name: name.into(),
            present: false,
            hotplug,
            state: SyncState::Synced,
            retry: RetryCounter::default(),
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

    pub fn is_hotplug(&self) -> bool {
        self.hotplug
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub(crate) fn set_state(&mut self, state: SyncState) {
        self.state = state;
    }

    pub fn attempts(&self) -> u32 {
        self.retry.attempts()
    }

    pub(crate) fn reset_retry(&mut self) {
        self.retry.reset();
    }

    /// The per-member retry timer fired. Returns the RPC to reissue, or
    /// [`MemberReissue::None`] once `MAX_RETRY` is exhausted.
    pub fn on_timeout(&mut self, max_retry: u32) -> MemberReissue {
        if !self.retry.record_attempt(max_retry) {
            return MemberReissue::None;
        }
        match self.state {
            SyncState::PendingAdd => MemberReissue::Add,
            SyncState::PendingRemove => MemberReissue::Remove,
            _ => MemberReissue::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hotplug_members_are_flagged() {
        let member = MemberShadow::new("wlan0", true);
        assert!(member.is_hotplug());
        assert!(!member.present());
    }

    #[test]
    fn timeout_past_max_retry_yields_none() {
        let mut member = MemberShadow::new("eth1", false);
        member.set_state(SyncState::PendingAdd);
        assert!(matches!(member.on_timeout(3), MemberReissue::Add));
        assert!(matches!(member.on_timeout(3), MemberReissue::Add));
        assert!(matches!(member.on_timeout(3), MemberReissue::Add));
        assert!(matches!(member.on_timeout(3), MemberReissue::None));
    }
}
