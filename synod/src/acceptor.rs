//! Acceptor role: per-instance promise/acceptance state.
//!
//! The acceptor is the protocol's memory. For every instance it tracks the
//! highest ballot it has promised and the most recent value it has accepted,
//! and it answers three kinds of questions:
//!
//! 1. **Prepare(ballot, instance)**: "may I propose at this ballot?" —
//!    promised only if `ballot` exceeds the highest ballot previously
//!    promised for that instance. A promise carries any previously accepted
//!    `(ballot, value)` pair so the proposer can preserve it. A stale
//!    prepare is answered with a rejection naming the promised ballot, so
//!    the superseded proposer can outbid it instead of stalling.
//!
//! 2. **Accept(ballot, instance, value)**: "store this value" — accepted
//!    only if `ballot >=` the promised ballot. A rejection is ordinary
//!    protocol behavior, signaled back with the superseding ballot rather
//!    than raised as an error.
//!
//! 3. **Learn-query(instance)**: "what have you accepted?" — a read-only
//!    answer used by the learners' pull protocol.
//!
//! ## Key invariant
//!
//! An acceptor never accepts a value at a ballot below the one it has
//! promised for that instance. Once a majority of acceptors has accepted a
//! given `(ballot, value)`, no competing value can gather a majority at a
//! ballot `<=` it, which is the Paxos safety property.
//!
//! ## Ownership
//!
//! Instance records are owned exclusively by the acceptor task. The learner
//! back-fills learned values through [`AcceptorMsg::Adopt`] messages on the
//! acceptor's own queue, never by touching the map directly, so all state
//! mutation stays on one task.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::codec::MessageCodec;
use crate::config::GroupConfig;
use crate::messages::{
    AcceptRequest, AcceptedResponse, LearnRequest, LearnResponse, Payload, PrepareRequest,
    PromiseResponse, Role,
};
use crate::transport::{Transport, send_to_peer};
use crate::types::{Ballot, InstanceId, PeerId};

/// Per-instance acceptor record.
///
/// Created lazily on the first Prepare/Accept that mentions the instance
/// and never deleted.
#[derive(Debug, Default)]
struct Instance {
    /// Highest ballot promised for this instance.
    promised: Ballot,
    /// Most recently accepted `(ballot, value)`, if any.
    accepted: Option<(Ballot, String)>,
}

/// Messages processed by the acceptor task.
#[derive(Debug)]
pub enum AcceptorMsg {
    /// Phase 1 request from a proposer.
    Prepare(PrepareRequest),
    /// Phase 2 request from a proposer.
    Accept(AcceptRequest),
    /// Learn-query forwarded from the local learner task; answered over
    /// the wire to the requesting peer.
    LearnQuery(LearnRequest),
    /// Back-fill from the local learner: a majority-learned value for the
    /// instance. Not a new ballot.
    Adopt {
        /// The learned instance.
        instance: InstanceId,
        /// The value a majority of peers reported for it.
        value: String,
    },
}

/// The acceptor's mutable state.
///
/// The handlers are pure with respect to the network: they return the
/// response to send (if any) and leave delivery to [`run_acceptor`], which
/// keeps them directly unit-testable.
pub struct AcceptorState {
    /// This node's peer id, stamped into responses.
    id: PeerId,
    /// Instance records, keyed by instance id. Grows monotonically.
    instances: BTreeMap<InstanceId, Instance>,
}

impl AcceptorState {
    /// Create an empty acceptor state for the given node.
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            instances: BTreeMap::new(),
        }
    }

    /// Handle a Prepare request.
    ///
    /// Promises iff the ballot exceeds the instance's promised ballot. A
    /// stale ballot produces `granted: false` carrying the promised ballot,
    /// same as the Accept path: the proposer must hear it was superseded,
    /// or it would wait on a promise that never comes.
    pub fn handle_prepare(&mut self, request: PrepareRequest) -> PromiseResponse {
        let instance = self.instances.entry(request.instance).or_default();

        if request.ballot <= instance.promised {
            warn!(
                ballot = %request.ballot,
                promised = %instance.promised,
                instance = %request.instance,
                "rejecting prepare at stale ballot"
            );
            return PromiseResponse {
                responder: self.id,
                ballot: request.ballot,
                instance: request.instance,
                granted: false,
                promised: instance.promised,
                accepted_ballot: None,
                accepted_value: None,
            };
        }

        instance.promised = request.ballot;

        debug!(
            ballot = %request.ballot,
            instance = %request.instance,
            has_prior = instance.accepted.is_some(),
            "promised"
        );

        PromiseResponse {
            responder: self.id,
            ballot: request.ballot,
            instance: request.instance,
            granted: true,
            promised: request.ballot,
            accepted_ballot: instance.accepted.as_ref().map(|(b, _)| *b),
            accepted_value: instance.accepted.as_ref().map(|(_, v)| v.clone()),
        }
    }

    /// Handle an Accept request.
    ///
    /// Accepts iff the ballot is at least the promised ballot; on success
    /// the `(ballot, value)` pair becomes the instance's accepted state.
    /// A stale ballot produces `accepted: false` carrying the promised
    /// ballot, so the proposer knows what to outbid.
    pub fn handle_accept(&mut self, request: AcceptRequest) -> AcceptedResponse {
        let instance = self.instances.entry(request.instance).or_default();

        if request.ballot < instance.promised {
            warn!(
                ballot = %request.ballot,
                promised = %instance.promised,
                instance = %request.instance,
                "rejecting accept at stale ballot"
            );
            return AcceptedResponse {
                responder: self.id,
                ballot: request.ballot,
                instance: request.instance,
                accepted: false,
                promised: instance.promised,
            };
        }

        instance.promised = request.ballot;
        instance.accepted = Some((request.ballot, request.value));

        debug!(
            ballot = %request.ballot,
            instance = %request.instance,
            "accepted"
        );

        AcceptedResponse {
            responder: self.id,
            ballot: request.ballot,
            instance: request.instance,
            accepted: true,
            promised: request.ballot,
        }
    }

    /// Answer a learn-query with the locally accepted value for the
    /// instance, or the empty string if none is recorded. Read-only.
    pub fn answer_learn_query(&self, request: &LearnRequest) -> LearnResponse {
        let value = self
            .accepted_value(request.instance)
            .map(str::to_string)
            .unwrap_or_default();

        LearnResponse {
            responder: self.id,
            instance: request.instance,
            value,
        }
    }

    /// Adopt a majority-learned value for an instance.
    ///
    /// Overwrites or initializes the instance's cached value unconditionally.
    /// This is a back-fill from the learner, not a new ballot, so the
    /// promised ballot is left untouched.
    pub fn adopt_learned(&mut self, instance_id: InstanceId, value: String) {
        let instance = self.instances.entry(instance_id).or_default();
        let ballot = instance
            .accepted
            .take()
            .map(|(b, _)| b)
            .unwrap_or(instance.promised);
        instance.accepted = Some((ballot, value));

        debug!(instance = %instance_id, "adopted learned value");
    }

    /// The accepted value for an instance, if any.
    pub fn accepted_value(&self, instance: InstanceId) -> Option<&str> {
        self.instances
            .get(&instance)
            .and_then(|i| i.accepted.as_ref())
            .map(|(_, v)| v.as_str())
    }
}

/// Run the acceptor event loop.
///
/// Drains the inbound queue on a single task — the only place acceptor
/// state is mutated — and sends responses fire-and-forget. Prepare/Accept
/// responses are addressed to the proposer encoded in the request's ballot;
/// learn-responses go back to the requester. Send failures are logged and
/// dropped, and the loop runs until shut down or until the queue closes.
pub async fn run_acceptor<C: MessageCodec>(
    config: GroupConfig,
    transport: Arc<dyn Transport>,
    codec: C,
    mut state: AcceptorState,
    mut inbox: mpsc::UnboundedReceiver<AcceptorMsg>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let msg = tokio::select! {
            _ = shutdown.changed() => break,
            msg = inbox.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let outbound: Option<(PeerId, Role, Payload)> = match msg {
            AcceptorMsg::Prepare(request) => {
                let proposer = request.ballot.proposer;
                let resp = state.handle_prepare(request);
                Some((proposer, Role::Proposer, Payload::Promise(resp)))
            }
            AcceptorMsg::Accept(request) => {
                let proposer = request.ballot.proposer;
                let resp = state.handle_accept(request);
                Some((proposer, Role::Proposer, Payload::Accepted(resp)))
            }
            AcceptorMsg::LearnQuery(request) => {
                let resp = state.answer_learn_query(&request);
                Some((request.requester, Role::Learner, Payload::LearnResponse(resp)))
            }
            AcceptorMsg::Adopt { instance, value } => {
                state.adopt_learned(instance, value);
                None
            }
        };

        if let Some((to, role, payload)) = outbound {
            if let Err(e) = send_to_peer(transport.as_ref(), &codec, &config, to, role, payload).await
            {
                warn!(to = %to, error = %e, "acceptor reply dropped");
            }
        }
    }

    debug!("acceptor loop stopped");
}
