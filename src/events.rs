//! Per-record notification channels
//!
//! Two kinds of channel hang off every asset record: a one-shot
//! [`NotificationChannel`] that fires consumer callbacks when a load
//! completes, and a [`VotingEvent`] used to negotiate hot reloads, where
//! every subscriber must agree before a phase passes.

use crate::error::AssetError;
use crate::record::AssetHandle;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Outcome handed to a load callback: a live handle on success, the
/// shared failure otherwise
pub type LoadResult = std::result::Result<AssetHandle, Arc<AssetError>>;

/// Consumer callback invoked on the owner thread after a load completes
pub type LoadCallback = Box<dyn FnOnce(LoadResult) + Send>;

/// One-shot subscriber channel for load completion
///
/// Callbacks are drained exactly once per completed load, in the order
/// they were subscribed. Subscribers arriving after a completion are
/// picked up by the next delivery of the same record.
#[derive(Default)]
pub struct NotificationChannel {
    subscribers: Mutex<Vec<LoadCallback>>,
}

impl NotificationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback; it fires on the next delivery of this record
    pub fn subscribe(&self, callback: LoadCallback) {
        self.subscribers.lock().push(callback);
    }

    /// Take all pending callbacks, leaving the channel empty
    pub fn drain(&self) -> Vec<LoadCallback> {
        std::mem::take(&mut *self.subscribers.lock())
    }

    /// Drop all pending callbacks without invoking them
    pub fn clear(&self) {
        self.subscribers.lock().clear();
    }

    /// Number of callbacks currently waiting
    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }
}

/// Phase of the hot-reload negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadPhase {
    /// Subscribers may prepare to release derived state; a `false` vote
    /// aborts the reload with the record untouched
    Validate,
    /// Subscribers drop references and derived caches; a `false` vote
    /// abandons the reload before the record is unloaded
    PreReload,
    /// Fired after the record is reloaded; subscribers re-acquire
    PostReload,
}

/// Voting subscriber: returns whether the given phase may proceed
pub type ReloadVoter = Arc<dyn Fn(ReloadPhase) -> bool + Send + Sync>;

/// AND-combining event channel for hot-reload negotiation
///
/// Unlike a broadcast, `fire` collects every subscriber's vote and only
/// reports `true` when all of them agreed. An empty channel passes.
#[derive(Default)]
pub struct VotingEvent {
    voters: Mutex<Vec<(u64, ReloadVoter)>>,
    next_token: AtomicU64,
}

impl VotingEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a voter; the returned token removes it again via
    /// [`VotingEvent::unsubscribe`]
    pub fn subscribe(&self, voter: impl Fn(ReloadPhase) -> bool + Send + Sync + 'static) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.voters.lock().push((token, Arc::new(voter)));
        token
    }

    /// Remove a previously subscribed voter; returns whether it was
    /// still present
    pub fn unsubscribe(&self, token: u64) -> bool {
        let mut voters = self.voters.lock();
        let before = voters.len();
        voters.retain(|(held, _)| *held != token);
        voters.len() != before
    }

    /// Invoke every voter for `phase`; all of them are polled even after
    /// a `false` so each subscriber observes every phase it is fired for.
    ///
    /// Voters are cloned out of the lock before any of them runs, so a
    /// voter may lock record state, subscribe or unsubscribe without
    /// deadlocking the channel.
    pub fn fire(&self, phase: ReloadPhase) -> bool {
        let voters: Vec<ReloadVoter> = self
            .voters
            .lock()
            .iter()
            .map(|(_, voter)| Arc::clone(voter))
            .collect();
        let mut pass = true;
        for voter in &voters {
            pass &= voter(phase);
        }
        pass
    }

    /// Number of subscribed voters
    pub fn len(&self) -> usize {
        self.voters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.voters.lock().is_empty()
    }
}
