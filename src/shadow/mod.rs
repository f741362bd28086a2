//! Shadows: the local records that couple a
//! device to its remote counterpart and track the single in-flight RPC each
//! may have outstanding.

pub mod bridge;
pub mod device;
pub mod member;

use strum_macros::AsRefStr;

use crate::schema::ConfigBlob;

/// Each pending `SyncState` arm carries
/// the payload its timeout handler needs to reissue the RPC, instead of
/// reconstructing arguments by case-analysis on shadow fields.
#[derive(Debug, Clone, AsRefStr)]
pub enum SyncState {
    Synced,
    PendingCreate(ConfigBlob),
    PendingReload(ConfigBlob),
    PendingFree,
    PendingDisable,
    PendingPrepare,
    PendingAdd,
    PendingRemove,
}

impl SyncState {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncState::Synced)
    }

    pub fn name(&self) -> &'static str {
        self.as_ref()
    }
}

/// Shared attempt-counter/retry bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryCounter {
    attempts: u32,
}

impl RetryCounter {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Records one more attempt; returns `true` if the shadow may still
    /// retry (`attempts <= max_retry` after incrementing), `false` if this
    /// attempt exhausted the budget.
    pub fn record_attempt(&mut self, max_retry: u32) -> bool {
        self.attempts += 1;
        self.attempts <= max_retry
    }
}
