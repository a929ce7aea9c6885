//! Server groups and the shared Raft leader pointer
//!
//! Every connection to a replicated backend holds a [`ServerHandle`]. The
//! handles of one logical cluster share a [`ServerGroup`], which tracks the
//! node currently believed to be the leader.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::info;

/// Shared state for all connections to one logical server group
#[derive(Debug)]
pub struct ServerGroup {
    leader: AtomicU32,
    in_flight: Vec<AtomicU64>,
}

impl ServerGroup {
    /// Create a group of `servers` nodes with `leader` as the initial leader
    pub fn new(servers: usize, leader: u32) -> Arc<Self> {
        Arc::new(Self {
            leader: AtomicU32::new(leader),
            in_flight: (0..servers).map(|_| AtomicU64::new(0)).collect(),
        })
    }

    /// Node currently believed to be the leader
    pub fn leader(&self) -> u32 {
        self.leader.load(Ordering::Acquire)
    }

    /// Unconditionally store a new leader
    pub fn set_leader(&self, id: u32) {
        self.leader.store(id, Ordering::Release);
    }

    /// Store `new_leader` only if `current` is still the believed leader.
    ///
    /// Returns true when the pointer was updated.
    pub fn replace_leader_if_current(&self, current: u32, new_leader: u32) -> bool {
        self.leader
            .compare_exchange(current, new_leader, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Number of servers in the group
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Requests currently outstanding against `server`
    pub fn load(&self, server: u32) -> u64 {
        self.in_flight
            .get(server as usize)
            .map_or(0, |n| n.load(Ordering::Relaxed))
    }

    pub(crate) fn request_sent(&self, server: u32) {
        if let Some(n) = self.in_flight.get(server as usize) {
            n.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn response_received(&self, server: u32) {
        if let Some(n) = self.in_flight.get(server as usize) {
            // Saturate rather than wrap if a response is seen twice
            let _ = n.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
        }
    }

    /// Log the per-server outstanding request counts
    pub fn print_load_state(&self) {
        let leader = self.leader();
        for (id, n) in self.in_flight.iter().enumerate() {
            info!(
                server = id,
                in_flight = n.load(Ordering::Relaxed),
                leader = (id as u32 == leader),
                "load state"
            );
        }
    }
}

/// A connection's view of the server it talks to
#[derive(Debug, Clone)]
pub struct ServerHandle {
    pub id: u32,
    pub group: Arc<ServerGroup>,
}

impl ServerHandle {
    pub fn new(id: u32, group: Arc<ServerGroup>) -> Self {
        Self { id, group }
    }

    /// A single-node group where this server is the leader
    pub fn standalone() -> Self {
        Self::new(0, ServerGroup::new(1, 0))
    }

    /// True if this connection's server is the believed leader
    pub fn is_leader(&self) -> bool {
        self.group.leader() == self.id
    }
}
