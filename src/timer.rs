//! Per-shadow retry timers.
//!
//! A single [`TimerWheel`], owned by [`crate::registry::Plugin`], backs
//! every shadow's timer via a `tokio_util::time::DelayQueue` keyed by
//! [`ShadowKey`] — re-arming a key cancels any previous deadline for it, so
//! "transition to `SYNCED` cancels the timer" is just `TimerWheel::cancel`.

use std::collections::HashMap;
use std::time::Duration;

use tokio_stream::StreamExt;
use tokio_util::time::DelayQueue;
use tokio_util::time::delay_queue;

/// Default retry period `T`.
pub const DEFAULT_RETRY_PERIOD: Duration = Duration::from_secs(1);

/// Default `MAX_RETRY`.
pub const DEFAULT_MAX_RETRY: u32 = 3;

/// Identifies the shadow a fired timer belongs to.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum ShadowKey {
    Device(String),
    Bridge(String),
    Member { bridge: String, member: String },
    /// The bounded-time member-failure retry scheduled by a bridge once it
    /// reaches `SYNCED` with `n_failed > 0`.
    BridgeMemberRetry(String),
}

/// Owns the single shared timer queue every shadow's retry deadline lives
/// in.
#[derive(Default)]
pub struct TimerWheel {
    queue: DelayQueue<ShadowKey>,
    keys: HashMap<ShadowKey, delay_queue::Key>,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms (or re-arms) `key`'s timer to fire after `period`.
    pub fn arm(&mut self, key: ShadowKey, period: Duration) {
        self.cancel(&key);
        let queue_key = self.queue.insert(key.clone(), period);
        self.keys.insert(key, queue_key);
    }

    /// Cancels `key`'s timer, if armed. A no-op otherwise (idempotent).
    pub fn cancel(&mut self, key: &ShadowKey) {
        if let Some(queue_key) = self.keys.remove(key) {
            self.queue.remove(&queue_key);
        }
    }

    pub fn is_armed(&self, key: &ShadowKey) -> bool {
        self.keys.contains_key(key)
    }

    /// Awaits the next timer to fire, removing it from the armed set.
    /// Resolves to `None` only if the queue is permanently empty and
    /// closed, which does not happen in normal operation — callers `select!`
    /// this alongside transport events.
    pub async fn next_fired(&mut self) -> Option<ShadowKey> {
        match self.queue.next().await {
            Some(Ok(expired)) => {
                let key = expired.into_inner();
                self.keys.remove(&key);
                Some(key)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn arming_a_key_fires_after_its_period() {
        let mut wheel = TimerWheel::new();
        wheel.arm(ShadowKey::Bridge("br0".into()), Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(11)).await;
        let fired = wheel.next_fired().await;
        assert_eq!(fired, Some(ShadowKey::Bridge("br0".into())));
        assert!(!wheel.is_armed(&ShadowKey::Bridge("br0".into())));
    }

    #[tokio::test]
    async fn cancel_before_fire_is_a_no_op_safe_call() {
        let mut wheel = TimerWheel::new();
        let key = ShadowKey::Device("eth0".into());
        wheel.arm(key.clone(), Duration::from_secs(5));
        wheel.cancel(&key);
        assert!(!wheel.is_armed(&key));
        wheel.cancel(&key);
    }

    #[tokio::test(start_paused = true)]
    async fn re_arming_replaces_the_previous_deadline() {
        let mut wheel = TimerWheel::new();
        let key = ShadowKey::Device("eth0".into());
        wheel.arm(key.clone(), Duration::from_millis(100));
        wheel.arm(key.clone(), Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(11)).await;
        let fired = wheel.next_fired().await;
        assert_eq!(fired, Some(key));
    }
}
