//! Core types for the Synod consensus engine.
//!
//! This module defines the fundamental building blocks used throughout
//! the implementation:
//!
//! - [`PeerId`]: Identifies a node within the consensus group
//! - [`InstanceId`]: Position in the ordered sequence of agreed values
//! - [`Ballot`]: Proposal ordering token, unique per proposer
//! - [`SynodError`]: Error type for all engine operations

use serde::{Deserialize, Serialize};

/// Identifies a node within the consensus group.
///
/// Peer ids are assigned by the cluster configuration and must be unique
/// within a group. They double as the proposer component of a [`Ballot`],
/// which is what makes ballots collision-free across proposers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct PeerId(pub u64);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer({})", self.0)
    }
}

/// A consensus instance: one position in the ordered sequence of values
/// being agreed upon.
///
/// Instances are filled independently; the learner delivers them to the
/// application strictly in increasing order, starting at
/// [`InstanceId::FIRST`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

impl InstanceId {
    /// The first instance to be agreed upon and delivered.
    pub const FIRST: Self = Self(1);

    /// Create a new instance id.
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// Get the next sequential instance.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "instance({})", self.0)
    }
}

/// Ballot number — the token that orders competing proposals.
///
/// A ballot is a `(round, proposer)` composite. Ordering is lexicographic:
/// rounds compare first, and the proposer id breaks ties. Because every
/// proposer stamps its own id into the ballots it issues, two proposers can
/// never issue the same ballot, and any proposer can always outbid an
/// observed ballot by picking a larger round.
///
/// # Invariants
///
/// - Ballots issued by a single proposer are strictly increasing.
/// - An acceptor never accepts a value at a ballot below the one it has
///   promised for that instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Ballot {
    /// The round component; compared first.
    pub round: u64,
    /// The issuing proposer; breaks ties between equal rounds.
    pub proposer: PeerId,
}

impl Ballot {
    /// The zero ballot, meaning "nothing promised or accepted yet".
    ///
    /// Real proposals always use a round of at least 1, so the zero ballot
    /// is strictly below every ballot a proposer can issue.
    pub const ZERO: Self = Self {
        round: 0,
        proposer: PeerId(0),
    };

    /// Create a ballot for the given round and proposer.
    pub const fn new(round: u64, proposer: PeerId) -> Self {
        Self { round, proposer }
    }
}

impl std::fmt::Display for Ballot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ballot({}.{})", self.round, self.proposer.0)
    }
}

/// Errors that can occur during engine operations.
///
/// There is no fatal class here: every variant degrades to "log it and let
/// the periodic mechanism retry" at the role-loop boundary. A failed send is
/// corrected by the next broadcast round, a malformed message is dropped,
/// and a stale ballot is ordinary protocol behavior rather than an error.
#[derive(Debug, thiserror::Error)]
pub enum SynodError {
    /// Failed to encode or decode a wire message.
    #[error("codec error: {0}")]
    Codec(String),

    /// Best-effort send failed; the peer is likely unreachable.
    #[error("transport error: {0}")]
    Transport(String),

    /// A message referenced a peer id not present in the group config.
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// An inbound envelope carried a different group id than ours.
    #[error("wrong group: expected {expected}, got {got}")]
    WrongGroup {
        /// The group id this node is configured with.
        expected: u64,
        /// The group id carried by the envelope.
        got: u64,
    },

    /// A role's inbound queue has been closed; the node is shutting down.
    #[error("role channel closed")]
    ChannelClosed,
}
