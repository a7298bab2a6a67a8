//! Cluster configuration for a consensus group.
//!
//! All three roles consume one shared peer set: the learner's peer set *is*
//! the acceptor quorum set, since the roles are co-located on every node.
//! Majority arithmetic therefore uses a single size.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::PeerId;

/// Describes one node of the group: where to reach its co-located
/// acceptor/learner roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// The node's id, unique within the group.
    pub id: PeerId,
    /// Hostname or address the node listens on.
    pub host: String,
    /// Port the node listens on.
    pub port: u16,
}

/// Static configuration shared by every role on a node.
///
/// ## Tuning
///
/// `learn_interval` is the period of the learner's pull/gossip broadcast.
/// It is the engine's only timer: liveness after message loss comes from
/// re-broadcasting learn-queries, not from per-message timeouts, so a
/// shorter interval means faster convergence at the cost of more traffic.
#[derive(Debug, Clone)]
pub struct GroupConfig {
    /// The consensus group this configuration belongs to.
    pub group: u64,
    /// Every node of the group, including the local one.
    pub peers: Vec<Peer>,
    /// Period of the learner's learn-query broadcast.
    pub learn_interval: Duration,
}

impl GroupConfig {
    /// Create a configuration with the default learning interval (500ms).
    pub fn new(group: u64, peers: Vec<Peer>) -> Self {
        Self {
            group,
            peers,
            learn_interval: Duration::from_millis(500),
        }
    }

    /// Create a configuration with a short learning interval, suitable for
    /// in-process tests where convergence speed matters more than traffic.
    pub fn for_tests(group: u64, peers: Vec<Peer>) -> Self {
        Self {
            group,
            peers,
            learn_interval: Duration::from_millis(20),
        }
    }

    /// The majority threshold: `floor(N/2) + 1` out of the configured peers.
    ///
    /// Any two majorities of the same peer set overlap in at least one node,
    /// which is what makes a majority-accepted value permanent.
    pub fn majority(&self) -> usize {
        self.peers.len() / 2 + 1
    }

    /// Look up a peer descriptor by id.
    pub fn peer(&self, id: PeerId) -> Option<&Peer> {
        self.peers.iter().find(|p| p.id == id)
    }
}
