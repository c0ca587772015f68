//! Per-session turn locks.
//!
//! A turn (read history, call the backend, append the reply) must not
//! interleave with another turn on the same session. Turns on different
//! sessions run in parallel.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use gemchat_types::chat::SessionId;

type LockTable = DashMap<SessionId, Arc<Mutex<()>>>;

/// Per-session async mutex table.
///
/// The mutex is fair, so waiting turns are admitted in the order they
/// asked for the lock. An entry lives only while some turn holds or awaits
/// it; the last [`TurnPermit`] to go removes it.
#[derive(Clone, Default)]
pub struct TurnLocks {
    locks: Arc<LockTable>,
}

/// Exclusive turn rights on one session, released on drop.
///
/// Owned, so it can travel inside a stream that outlives the caller's
/// stack frame.
pub struct TurnPermit {
    id: SessionId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockTable>,
}

impl TurnLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, id: SessionId) -> Arc<Mutex<()>> {
        // The map guard is released at the end of this statement, before any await.
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive turn rights on a session.
    ///
    /// Cancelling the wait leaves no entry behind.
    pub async fn acquire(&self, id: SessionId) -> TurnPermit {
        let mut permit = TurnPermit {
            id,
            guard: None,
            locks: Arc::clone(&self.locks),
        };
        // Declared after `permit` so a cancelled wait drops its lock handle first.
        let waiting = self.lock_for(id).lock_owned();
        permit.guard = Some(waiting.await);
        permit
    }

    /// Whether a turn on this session is in flight or queued.
    pub fn is_busy(&self, id: &SessionId) -> bool {
        self.locks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for TurnPermit {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Held under the shard lock, so a concurrent `lock_for` either
        // cloned the handle already (count > 1) or will insert a new one.
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl fmt::Debug for TurnPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnPermit")
            .field("session_id", &self.id)
            .field("held", &self.guard.is_some())
            .finish()
    }
}
