//! Learner role: discovers chosen values and feeds the state machine.
//!
//! Learners never watch the Accept phase directly. Instead they run a
//! pull/gossip sub-protocol: on a fixed interval, a learner broadcasts a
//! learn-query for the instance it expects next, and every peer answers
//! with whatever its local acceptor has recorded for that instance. When a
//! majority of distinct peers report the same non-empty value, the value
//! is necessarily the chosen one (any majority overlaps the majority that
//! accepted it), and the instance transitions to learned.
//!
//! ```text
//! per instance:   Unqueried ──tick──> Querying ──majority──> Learned
//! ```
//!
//! ## Rounds
//!
//! Each broadcast starts a fresh round for the queried instance: votes
//! from the previous round are discarded, not accumulated, so a quorum
//! decision only ever combines responses received since the most recent
//! broadcast. Within a round, a later response from a peer overwrites that
//! peer's earlier vote. The re-broadcast is also the engine's entire
//! liveness story — lost queries and responses are simply asked again.
//!
//! ## Delivery
//!
//! Learned values are delivered to the application strictly in instance
//! order through a cursor that starts at instance 1. An instance that
//! reaches quorum ahead of the cursor is held; whenever the cursor
//! advances, already-learned successors are drained immediately rather
//! than waiting for another quorum event to retrigger them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::acceptor::AcceptorMsg;
use crate::codec::MessageCodec;
use crate::config::GroupConfig;
use crate::messages::{LearnRequest, LearnResponse, Payload, Role};
use crate::transport::{Transport, broadcast};
use crate::types::{InstanceId, PeerId};

/// Messages processed by the learner task.
#[derive(Debug)]
pub enum LearnerMsg {
    /// Periodic signal from the ticker task: broadcast a learn-query for
    /// the currently expected instance.
    Tick,
    /// Learn-query from a peer, to be answered from the local acceptor.
    Request(LearnRequest),
    /// Learn-response from a peer, a vote in the current round.
    Response(LearnResponse),
}

/// What a quorum event asks the surrounding loop to do.
///
/// [`LearnerState`] is pure: it mutates only its own maps and reports the
/// back-fill and deliveries for [`run_learner`] to carry out.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LearnOutcome {
    /// A newly learned `(instance, value)` to back-fill into the local
    /// acceptor's cache.
    pub adopted: Option<(InstanceId, String)>,
    /// Values to hand to the state machine, in delivery order.
    pub deliver: Vec<String>,
}

/// Consumes chosen values in instance order.
///
/// Invoked from the learner task only: exactly once per instance,
/// strictly in increasing instance order, never concurrently.
pub trait StateMachine: Send {
    /// Apply the chosen value for the next instance.
    fn deliver(&mut self, value: String);
}

/// Delivers values into a channel; handy glue for applications that
/// consume the chosen stream elsewhere.
impl StateMachine for mpsc::UnboundedSender<String> {
    fn deliver(&mut self, value: String) {
        if self.send(value).is_err() {
            warn!("state machine receiver dropped, value discarded");
        }
    }
}

/// The learner's mutable state.
pub struct LearnerState {
    /// This node's peer id, stamped into learn-queries.
    id: PeerId,
    /// The majority threshold, from the shared peer set.
    majority: usize,
    /// Votes for the in-flight round of each queried instance:
    /// instance → (peer → reported value). Cleared per instance at the
    /// start of each new round.
    tmp_state: HashMap<InstanceId, HashMap<PeerId, String>>,
    /// Learned values. Append-only: `state[i]` never changes once set.
    state: BTreeMap<InstanceId, String>,
    /// The next instance to deliver. Strictly increasing, starts at 1.
    current_instance: InstanceId,
}

impl LearnerState {
    /// Create an empty learner for the given node.
    pub fn new(id: PeerId, majority: usize) -> Self {
        Self {
            id,
            majority,
            tmp_state: HashMap::new(),
            state: BTreeMap::new(),
            current_instance: InstanceId::FIRST,
        }
    }

    /// The instance the learner expects to deliver next.
    pub fn current_instance(&self) -> InstanceId {
        self.current_instance
    }

    /// The learned value for an instance, if any.
    pub fn learned(&self, instance: InstanceId) -> Option<&str> {
        self.state.get(&instance).map(String::as_str)
    }

    /// Start a new round for the currently expected instance.
    ///
    /// Discards any votes left over from the previous round and returns
    /// the learn-query to broadcast to every peer.
    pub fn on_tick(&mut self) -> LearnRequest {
        self.tmp_state.remove(&self.current_instance);
        LearnRequest {
            requester: self.id,
            instance: self.current_instance,
        }
    }

    /// Record a peer's vote and detect quorum.
    ///
    /// An empty value is "nothing recorded" and counts as no vote. A
    /// response for an already-learned instance is a harmless duplicate:
    /// the learned value is never overwritten and nothing is re-delivered.
    pub fn on_response(&mut self, resp: LearnResponse) -> LearnOutcome {
        if resp.value.is_empty() {
            return LearnOutcome::default();
        }
        if self.state.contains_key(&resp.instance) {
            debug!(instance = %resp.instance, "response for already-learned instance ignored");
            return LearnOutcome::default();
        }

        let instance = resp.instance;
        let winner = {
            let votes = self.tmp_state.entry(instance).or_default();
            votes.insert(resp.responder, resp.value);

            // Tally the round's votes per value; a majority of distinct
            // peers behind one value decides the instance.
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for value in votes.values() {
                *counts.entry(value.as_str()).or_insert(0) += 1;
            }
            let mut winner = None;
            for (value, count) in counts {
                if count >= self.majority {
                    winner = Some(value.to_string());
                    break;
                }
            }
            winner
        };

        let value = match winner {
            Some(value) => value,
            None => return LearnOutcome::default(),
        };

        info!(instance = %instance, "instance learned");
        self.state.insert(instance, value.clone());
        self.tmp_state.remove(&instance);

        let mut outcome = LearnOutcome {
            adopted: Some((instance, value)),
            deliver: Vec::new(),
        };

        // Deliver in cursor order, draining any successors that were
        // learned ahead of time.
        while let Some(value) = self.state.get(&self.current_instance) {
            outcome.deliver.push(value.clone());
            self.current_instance = self.current_instance.next();
        }

        outcome
    }
}

/// Run the learner event loop.
///
/// Ticks become learn-query broadcasts; inbound learn-queries are
/// forwarded to the local acceptor (which owns the value cache and replies
/// over the wire); inbound responses feed the round tally. Quorum events
/// back-fill the acceptor through its queue and drive the state machine
/// callback, which runs on this task only.
pub async fn run_learner<C: MessageCodec>(
    config: GroupConfig,
    transport: Arc<dyn Transport>,
    codec: C,
    mut state: LearnerState,
    mut state_machine: Box<dyn StateMachine>,
    acceptor: mpsc::UnboundedSender<AcceptorMsg>,
    mut inbox: mpsc::UnboundedReceiver<LearnerMsg>,
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

        match msg {
            LearnerMsg::Tick => {
                let request = state.on_tick();
                broadcast(
                    transport.as_ref(),
                    &codec,
                    &config,
                    Role::Learner,
                    Payload::LearnRequest(request),
                )
                .await;
            }
            LearnerMsg::Request(request) => {
                // The acceptor owns the per-instance values; route the
                // query through its queue and let it answer on the wire.
                if acceptor.send(AcceptorMsg::LearnQuery(request)).is_err() {
                    break;
                }
            }
            LearnerMsg::Response(resp) => {
                let outcome = state.on_response(resp);
                if let Some((instance, value)) = outcome.adopted {
                    if acceptor.send(AcceptorMsg::Adopt { instance, value }).is_err() {
                        break;
                    }
                }
                for value in outcome.deliver {
                    state_machine.deliver(value);
                }
            }
        }
    }

    debug!("learner loop stopped");
}
