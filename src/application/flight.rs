//! In-flight render deduplication.
//!
//! Concurrent requests for the same cache key share a single render: the
//! first requester becomes the leader and performs the work, later arrivals
//! attach a receiver and get the leader's outcome fanned out to them. The
//! entry is removed when the leader completes — or when its guard drops
//! without completing, in which case waiters observe a closed channel.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::application::render::RenderError;
use crate::cache::ContentKey;

/// Shared result of one render flight.
pub type FlightOutcome = Result<Bytes, RenderError>;

#[derive(Default, Clone)]
pub struct FlightTable {
    inner: Arc<DashMap<ContentKey, Vec<oneshot::Sender<FlightOutcome>>>>,
}

/// Role assigned to a caller joining a flight.
pub enum Admission {
    /// First caller for the key; must render and then call [`FlightGuard::complete`].
    Leader(FlightGuard),
    /// A render for the key is already in flight; await its outcome.
    Follower(oneshot::Receiver<FlightOutcome>),
}

impl FlightTable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    pub fn join(&self, key: &ContentKey) -> Admission {
        use dashmap::mapref::entry::Entry;

        match self.inner.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(Vec::new());
                Admission::Leader(FlightGuard {
                    key: key.clone(),
                    inner: Arc::clone(&self.inner),
                    completed: false,
                })
            }
            Entry::Occupied(mut occupied) => {
                let (tx, rx) = oneshot::channel();
                occupied.get_mut().push(tx);
                Admission::Follower(rx)
            }
        }
    }
}

pub struct FlightGuard {
    key: ContentKey,
    inner: Arc<DashMap<ContentKey, Vec<oneshot::Sender<FlightOutcome>>>>,
    completed: bool,
}

impl FlightGuard {
    /// Close the flight and deliver `outcome` to every waiting follower.
    pub fn complete(mut self, outcome: &FlightOutcome) {
        if let Some((_key, waiters)) = self.inner.remove(&self.key) {
            for waiter in waiters {
                let _ = waiter.send(outcome.clone());
            }
        }
        self.completed = true;
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        // Leader bailed without an outcome; dropping the senders wakes the
        // followers with a closed-channel error.
        if !self.completed {
            self.inner.remove(&self.key);
        }
    }
}
