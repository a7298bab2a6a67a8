//! A leaderless multi-instance Paxos (Synod) consensus engine.
//!
//! `synod` runs the classic three-role protocol over a fixed peer set:
//! every node hosts a proposer, an acceptor and a learner, and any node
//! may propose at any time. Consecutive instances are decided
//! independently, and each learner delivers the chosen values to its
//! application strictly in instance order.
//!
//! # Protocol shape
//!
//! A proposal runs the two Synod phases against the acceptors:
//!
//! 1. **Prepare/Promise** — the proposer broadcasts a ballot; each
//!    acceptor that has not promised a higher ballot promises this one and
//!    reports any value it already accepted for the instance. On a
//!    majority of promises the proposer must adopt the highest-ballot
//!    prior value it saw, which is what makes a majority-accepted value
//!    permanent.
//! 2. **Accept/Accepted** — the proposer broadcasts the value at its
//!    ballot; acceptors accept unless they promised higher, and a majority
//!    of acceptances makes the value chosen.
//!
//! Learners never observe the Accept phase. They poll: on a fixed interval
//! each learner broadcasts a query for the instance it expects next, and
//! learns the instance once a majority of distinct peers report the same
//! value. That periodic re-broadcast is also the engine's entire recovery
//! mechanism — any lost message is eventually compensated by asking again.
//!
//! # Runtime shape
//!
//! Each role runs as one tokio task owning its state, fed through an
//! unbounded queue; see [`node::PaxosNode`] for the wiring. The engine is
//! transport-agnostic behind [`transport::Transport`] and fully in-memory:
//! no persistence, so a restarted node rejoins with empty state and
//! recovers what it can through the learner.
//!
//! # Modules
//!
//! | module | contents |
//! |---|---|
//! | [`types`] | peer/instance/ballot identifiers, the error type |
//! | [`messages`] | wire structs and the envelope |
//! | [`codec`] | serialization seam, JSON implementation |
//! | [`config`] | peer set, group id, majority arithmetic |
//! | [`transport`] | delivery seam, in-memory channel transport |
//! | [`acceptor`] | promise/accept state, the protocol's memory |
//! | [`proposer`] | two-phase proposal driver |
//! | [`learner`] | quorum detection, ordered delivery |
//! | [`node`] | task spawning and message dispatch |

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod acceptor;
pub mod codec;
pub mod config;
pub mod learner;
pub mod messages;
pub mod node;
pub mod proposer;
pub mod transport;
pub mod types;

pub use codec::{JsonCodec, MessageCodec};
pub use config::{GroupConfig, Peer};
pub use learner::StateMachine;
pub use node::PaxosNode;
pub use transport::{ChannelTransport, Transport};
pub use types::{Ballot, InstanceId, PeerId, SynodError};
