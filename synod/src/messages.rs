//! Wire messages exchanged between the three roles.
//!
//! Every message travels inside an [`Envelope`] that names the consensus
//! group and the role it is addressed to. A network-receive collaborator
//! decodes inbound bytes into an envelope and hands it to the addressed
//! role's inbound queue; see [`crate::node::PaxosNode::handle_incoming`].
//!
//! ## Message flow
//!
//! ```text
//! Proposer                      Acceptors                     Learner
//!   │── Prepare(bal, i) ──────────>│                            │
//!   │<── Promise(bal, i, prior?) ──│                            │
//!   │── Accept(bal, i, v) ────────>│                            │
//!   │<── Accepted(bal, i, ok) ─────│                            │
//!   │                              │<── LearnRequest(i) ────────│ periodic
//!   │                              │── LearnResponse(i, v?) ───>│
//! ```
//!
//! Responses to Prepare/Accept are addressed back to the proposer encoded
//! in the ballot itself, so those requests carry no separate sender field.

use serde::{Deserialize, Serialize};

use crate::types::{Ballot, InstanceId, PeerId};

/// The role a message is addressed to.
///
/// Each node runs all three roles; the envelope's role tag selects which
/// inbound queue a message is routed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Drives the two-phase protocol for instances it originates.
    Proposer,
    /// Holds per-instance promise/acceptance state and votes on proposals.
    Acceptor,
    /// Discovers chosen values and delivers them to the state machine.
    Learner,
}

/// Phase 1 request: a proposer asks acceptors for permission to propose
/// at `ballot` for `instance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareRequest {
    /// The ballot the proposer wants to run.
    pub ballot: Ballot,
    /// The instance being contended.
    pub instance: InstanceId,
}

/// Phase 1 response: whether the acceptor promises not to accept ballots
/// below `ballot` for `instance`.
///
/// On a grant, the promise carries any previously accepted `(ballot, value)`
/// pair so the proposer can preserve it (the Paxos value-adoption rule).
/// `granted: false` mirrors the Accept-phase rejection: the `promised` field
/// names the ballot that superseded the request, so the proposer can retry
/// with a bigger one instead of waiting on a reply that never comes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromiseResponse {
    /// The acceptor issuing the response.
    pub responder: PeerId,
    /// The ballot this response refers to.
    pub ballot: Ballot,
    /// The instance the response applies to.
    pub instance: InstanceId,
    /// Whether the promise was granted.
    pub granted: bool,
    /// The acceptor's currently promised ballot; on rejection, the ballot
    /// that superseded the request.
    pub promised: Ballot,
    /// Ballot of the acceptor's previously accepted value, if any.
    pub accepted_ballot: Option<Ballot>,
    /// The previously accepted value itself, present iff `accepted_ballot` is.
    pub accepted_value: Option<String>,
}

/// Phase 2 request: a proposer asks acceptors to accept `value` at
/// `ballot` for `instance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptRequest {
    /// The ballot the value is proposed under.
    pub ballot: Ballot,
    /// The instance the value is proposed for.
    pub instance: InstanceId,
    /// The proposed value.
    pub value: String,
}

/// Phase 2 response: whether the acceptor stored the value.
///
/// `accepted: false` is not an error — it is the protocol's way of telling
/// a proposer its ballot has been superseded. The `promised` field carries
/// the ballot that outbid it, so the proposer can retry with a bigger one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedResponse {
    /// The acceptor issuing the response.
    pub responder: PeerId,
    /// The ballot this response refers to.
    pub ballot: Ballot,
    /// The instance this response refers to.
    pub instance: InstanceId,
    /// Whether the value was accepted.
    pub accepted: bool,
    /// The acceptor's currently promised ballot; on rejection, the ballot
    /// that superseded the request.
    pub promised: Ballot,
}

/// Learn-query: a learner asks a peer what value it has accepted for
/// `instance`, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnRequest {
    /// The learner asking; the response is addressed back to it.
    pub requester: PeerId,
    /// The instance being queried.
    pub instance: InstanceId,
}

/// Learn-response: the queried peer's locally accepted value for
/// `instance`.
///
/// An empty `value` means "no value recorded" and counts as no vote at the
/// querying learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnResponse {
    /// The peer answering the query.
    pub responder: PeerId,
    /// The instance the answer applies to.
    pub instance: InstanceId,
    /// The locally accepted value, or the empty string for none.
    pub value: String,
}

/// The kind-tagged payload of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body")]
pub enum Payload {
    /// Phase 1 request, addressed to acceptors.
    Prepare(PrepareRequest),
    /// Phase 1 response, addressed to the issuing proposer.
    Promise(PromiseResponse),
    /// Phase 2 request, addressed to acceptors.
    Accept(AcceptRequest),
    /// Phase 2 response, addressed to the issuing proposer.
    Accepted(AcceptedResponse),
    /// Learn-query, addressed to learners.
    LearnRequest(LearnRequest),
    /// Learn-response, addressed to the querying learner.
    LearnResponse(LearnResponse),
}

/// Typed, tagged wrapper for every wire message.
///
/// Addressed point-to-point to a peer's (host, port) by the transport;
/// the `group` id guards against cross-group delivery and the `role` tag
/// selects the inbound queue on the receiving node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// The consensus group this message belongs to.
    pub group: u64,
    /// The role the message is addressed to.
    pub role: Role,
    /// The message itself.
    pub payload: Payload,
}
