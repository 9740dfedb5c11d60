//! Pure worker-table state machine for LRU load balancing.
//!
//! Kept free of any socket I/O so the dispatch/liveness rules can be unit
//! tested directly, separating state tracking from the task that drives it.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;
use rpc_proto::Kind;

pub type WorkerId = Bytes;

/// Tracks every worker ever contacted within the liveness window (`community`)
/// and the subset currently idle, in oldest-first dispatch order (`workers`).
pub struct WorkerTable {
    community: HashMap<WorkerId, Instant>,
    order: VecDeque<WorkerId>,
    heartbeat_interval_max: Duration,
}

impl WorkerTable {
    pub fn new(heartbeat_interval_max: Duration) -> Self {
        Self {
            community: HashMap::new(),
            order: VecDeque::new(),
            heartbeat_interval_max,
        }
    }

    pub fn backend_ready(&self) -> bool {
        !self.order.is_empty()
    }

    fn mark_idle(&mut self, worker_id: WorkerId) {
        if !self.order.contains(&worker_id) {
            self.order.push_back(worker_id);
        }
    }

    /// Apply one backend frame from `worker_id` of the given `kind`. Returns
    /// whether the worker newly transitioned from unknown to known (for
    /// logging at the call site).
    pub fn on_backend_event(&mut self, worker_id: WorkerId, kind: Kind, now: Instant) -> bool {
        let first_contact = !self.community.contains_key(&worker_id);
        self.community.insert(worker_id.clone(), now);

        if first_contact {
            // A worker's first message is always its startup heartbeat; it
            // becomes available immediately.
            self.mark_idle(worker_id);
        } else if matches!(kind, Kind::Done | Kind::Error) {
            // Task complete: worker becomes available again.
            self.mark_idle(worker_id);
        }
        // Kind::Update / Kind::Heartbeat / Kind::Ready on an already-known
        // worker only refresh `community` above; the worker stays unavailable
        // if it was busy.

        first_contact
    }

    /// Pop the least-recently-dispatched idle worker, if any (LRU dispatch).
    pub fn dispatch(&mut self) -> Option<WorkerId> {
        self.order.pop_front()
    }

    /// Drop any worker whose last-seen timestamp is older than the liveness
    /// window. Returns the ids removed (for logging).
    pub fn expire(&mut self, now: Instant) -> Vec<WorkerId> {
        let cutoff = now.checked_sub(self.heartbeat_interval_max);
        let Some(cutoff) = cutoff else {
            return Vec::new();
        };
        let dead: Vec<WorkerId> = self
            .community
            .iter()
            .filter(|(_, &last_seen)| last_seen < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &dead {
            self.community.remove(id);
            self.order.retain(|w| w != id);
        }
        dead
    }

    #[cfg(test)]
    pub fn idle_order(&self) -> Vec<WorkerId> {
        self.order.iter().cloned().collect()
    }

    #[cfg(test)]
    pub fn community_len(&self) -> usize {
        self.community.len()
    }
}
