//! Proposer role: drives the two-phase protocol for locally submitted
//! values.
//!
//! ## Proposal lifecycle
//!
//! ```text
//! 1. submit(value) → value queued; if idle, start a proposal:
//!    pick a fresh ballot (round, self_id) and the next instance
//! 2. Broadcast Prepare(ballot, instance) to all acceptors
//! 3. On a majority of Promises: if any promise carried a previously
//!    accepted value, adopt the highest-ballot one in place of our own
//!    candidate (the Paxos safety rule)
//! 4. Broadcast Accept(ballot, instance, value)
//! 5. On a majority of Accepted(ok): the value is chosen for the instance.
//!    Dissemination is the learners' pull protocol, not the proposer's job.
//! ```
//!
//! If the chosen value was an adopted one, the local candidate was not
//! consumed: the proposer retries it on the next instance. A rejection in
//! either phase (a refused promise or a refused accept) means a bigger
//! ballot is out there; the proposer re-prepares the same instance with a
//! ballot whose round exceeds the one it observed — there is no other
//! backoff or timeout, and a proposal that loses a majority to a rival is
//! always told so by at least one acceptor.
//!
//! Proposals are driven one at a time; further submissions queue up behind
//! the in-flight one.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::codec::MessageCodec;
use crate::config::GroupConfig;
use crate::messages::{
    AcceptRequest, AcceptedResponse, Payload, PrepareRequest, PromiseResponse, Role,
};
use crate::transport::{Transport, broadcast};
use crate::types::{Ballot, InstanceId, PeerId};

/// Messages processed by the proposer task.
#[derive(Debug)]
pub enum ProposerMsg {
    /// A value submitted by the local application.
    Submit(String),
    /// Phase 1 response from an acceptor.
    Promise(PromiseResponse),
    /// Phase 2 response from an acceptor.
    Accepted(AcceptedResponse),
}

/// Outbound work produced by a proposer state transition.
///
/// The state machine stays pure; [`run_proposer`] turns effects into
/// broadcasts.
#[derive(Debug, PartialEq, Eq)]
pub enum ProposerEffect {
    /// Broadcast a Prepare to every acceptor.
    Prepare(PrepareRequest),
    /// Broadcast a Prepare after the contention stagger: the proposal was
    /// superseded and is restarting at a bigger ballot.
    RetryPrepare(PrepareRequest),
    /// Broadcast an Accept to every acceptor.
    Accept(AcceptRequest),
}

/// Phase of the in-flight proposal.
enum Phase {
    /// Nothing in flight.
    Idle,
    /// Prepare broadcast, collecting promises.
    Preparing {
        ballot: Ballot,
        instance: InstanceId,
        candidate: String,
        /// Promises per peer; a later promise from the same peer overwrites
        /// its earlier one, so a majority is a majority of distinct peers.
        promises: HashMap<PeerId, Option<(Ballot, String)>>,
    },
    /// Accept broadcast, collecting acceptances.
    Accepting {
        ballot: Ballot,
        instance: InstanceId,
        /// The locally submitted value this proposal set out to commit.
        candidate: String,
        /// The value actually proposed, which may be an adopted prior value.
        value: String,
        accepted: HashSet<PeerId>,
    },
}

/// The proposer's mutable state.
pub struct ProposerState {
    id: PeerId,
    majority: usize,
    /// Rounds already used by this proposer; strictly increasing.
    next_round: u64,
    /// The next instance this proposer will try to fill.
    next_instance: InstanceId,
    /// Locally submitted values not yet chosen.
    pending: VecDeque<String>,
    phase: Phase,
}

impl ProposerState {
    /// Create an idle proposer for the given node.
    pub fn new(id: PeerId, majority: usize) -> Self {
        Self {
            id,
            majority,
            next_round: 1,
            next_instance: InstanceId::FIRST,
            pending: VecDeque::new(),
            phase: Phase::Idle,
        }
    }

    /// This proposer's peer id.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Whether no proposal is in flight.
    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    /// Number of submitted values not yet chosen.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Queue a value and start a proposal if none is in flight.
    pub fn handle_submit(&mut self, value: String) -> Vec<ProposerEffect> {
        self.pending.push_back(value);
        self.start_next()
    }

    /// Handle a Promise from an acceptor.
    ///
    /// A rejected promise means a bigger ballot is out there and restarts
    /// the proposal above it, same as an Accept rejection. Responses for a
    /// ballot other than the in-flight one are stale duplicates and are
    /// ignored.
    pub fn handle_promise(&mut self, resp: PromiseResponse) -> Vec<ProposerEffect> {
        enum Outcome {
            Ignore,
            Ready,
            Superseded(Ballot),
        }

        let outcome = match &mut self.phase {
            Phase::Preparing {
                ballot,
                instance,
                promises,
                ..
            } if resp.ballot == *ballot && resp.instance == *instance => {
                if resp.granted {
                    promises.insert(resp.responder, resp.accepted_ballot.zip(resp.accepted_value));
                    if promises.len() >= self.majority {
                        Outcome::Ready
                    } else {
                        Outcome::Ignore
                    }
                } else {
                    Outcome::Superseded(resp.promised)
                }
            }
            _ => {
                debug!(ballot = %resp.ballot, "ignoring promise for inactive ballot");
                Outcome::Ignore
            }
        };

        match outcome {
            Outcome::Ignore => Vec::new(),
            Outcome::Ready => self.begin_accept_phase(),
            Outcome::Superseded(promised) => self.restart_above(promised),
        }
    }

    /// Handle an Accepted from an acceptor.
    ///
    /// A majority of acceptances means the value is chosen; a rejection
    /// restarts the proposal at a bigger ballot.
    pub fn handle_accepted(&mut self, resp: AcceptedResponse) -> Vec<ProposerEffect> {
        enum Outcome {
            Ignore,
            Chosen,
            Superseded(Ballot),
        }

        let outcome = match &mut self.phase {
            Phase::Accepting {
                ballot,
                instance,
                accepted,
                ..
            } if resp.ballot == *ballot && resp.instance == *instance => {
                if resp.accepted {
                    accepted.insert(resp.responder);
                    if accepted.len() >= self.majority {
                        Outcome::Chosen
                    } else {
                        Outcome::Ignore
                    }
                } else {
                    Outcome::Superseded(resp.promised)
                }
            }
            _ => {
                debug!(ballot = %resp.ballot, "ignoring accepted for inactive ballot");
                Outcome::Ignore
            }
        };

        match outcome {
            Outcome::Ignore => Vec::new(),
            Outcome::Chosen => self.finish_chosen(),
            Outcome::Superseded(promised) => self.restart_above(promised),
        }
    }

    /// Start a proposal for the next pending value, if idle.
    fn start_next(&mut self) -> Vec<ProposerEffect> {
        if !self.is_idle() {
            return Vec::new();
        }
        let candidate = match self.pending.front() {
            Some(value) => value.clone(),
            None => return Vec::new(),
        };

        let ballot = self.fresh_ballot(0);
        let instance = self.next_instance;

        info!(ballot = %ballot, instance = %instance, "starting proposal");

        self.phase = Phase::Preparing {
            ballot,
            instance,
            candidate,
            promises: HashMap::new(),
        };
        vec![ProposerEffect::Prepare(PrepareRequest { ballot, instance })]
    }

    /// Move from Preparing to Accepting once a majority has promised.
    fn begin_accept_phase(&mut self) -> Vec<ProposerEffect> {
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        match phase {
            Phase::Preparing {
                ballot,
                instance,
                candidate,
                promises,
            } => {
                // Adopt the highest-ballot previously accepted value, if any
                // promise carried one. Our own candidate waits its turn.
                let mut best: Option<(Ballot, String)> = None;
                for (prior_ballot, prior_value) in promises.into_values().flatten() {
                    let higher = match &best {
                        Some((b, _)) => prior_ballot > *b,
                        None => true,
                    };
                    if higher {
                        best = Some((prior_ballot, prior_value));
                    }
                }

                let value = match best {
                    Some((prior_ballot, prior_value)) => {
                        debug!(
                            ballot = %ballot,
                            instance = %instance,
                            prior_ballot = %prior_ballot,
                            "adopting previously accepted value"
                        );
                        prior_value
                    }
                    None => candidate.clone(),
                };

                self.phase = Phase::Accepting {
                    ballot,
                    instance,
                    candidate,
                    value: value.clone(),
                    accepted: HashSet::new(),
                };
                vec![ProposerEffect::Accept(AcceptRequest {
                    ballot,
                    instance,
                    value,
                })]
            }
            other => {
                self.phase = other;
                Vec::new()
            }
        }
    }

    /// The in-flight value gathered a majority: the instance is decided.
    fn finish_chosen(&mut self) -> Vec<ProposerEffect> {
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        match phase {
            Phase::Accepting {
                ballot,
                instance,
                candidate,
                value,
                ..
            } => {
                info!(ballot = %ballot, instance = %instance, "value chosen");
                self.next_instance = instance.next();
                if value == candidate {
                    self.pending.pop_front();
                }
                // An adopted value leaves our candidate queued: it is
                // retried on the next instance.
                self.start_next()
            }
            other => {
                self.phase = other;
                Vec::new()
            }
        }
    }

    /// An acceptor promised a higher ballot: re-prepare the same instance
    /// with a ballot that outbids it. Reached from either phase, since a
    /// rejection can arrive as a refused promise or a refused accept.
    fn restart_above(&mut self, promised: Ballot) -> Vec<ProposerEffect> {
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        let (instance, candidate) = match phase {
            Phase::Preparing {
                instance,
                candidate,
                ..
            } => (instance, candidate),
            Phase::Accepting {
                instance,
                candidate,
                ..
            } => (instance, candidate),
            Phase::Idle => return Vec::new(),
        };

        let ballot = self.fresh_ballot(promised.round + 1);
        warn!(
            instance = %instance,
            superseded_by = %promised,
            retry = %ballot,
            "proposal superseded, retrying with a bigger ballot"
        );
        self.phase = Phase::Preparing {
            ballot,
            instance,
            candidate,
            promises: HashMap::new(),
        };
        vec![ProposerEffect::RetryPrepare(PrepareRequest {
            ballot,
            instance,
        })]
    }

    /// Issue a ballot with a round of at least `at_least`, above every
    /// round this proposer has used before.
    fn fresh_ballot(&mut self, at_least: u64) -> Ballot {
        let round = self.next_round.max(at_least);
        self.next_round = round + 1;
        Ballot::new(round, self.id)
    }
}

/// Run the proposer event loop.
///
/// Turns state-machine effects into broadcasts addressed to the acceptor
/// role. Restarts after a superseded proposal are delayed by a small
/// per-proposer stagger so that two proposers contending for the same
/// instance do not re-prepare in lockstep forever; the delayed broadcast
/// runs on its own task, so the loop keeps draining responses while the
/// stagger elapses.
pub async fn run_proposer<C: MessageCodec>(
    config: GroupConfig,
    transport: Arc<dyn Transport>,
    codec: C,
    mut state: ProposerState,
    mut inbox: mpsc::UnboundedReceiver<ProposerMsg>,
    mut shutdown: watch::Receiver<bool>,
) {
    let stagger = Duration::from_millis(state.id().0 * 3 + 1);

    loop {
        let msg = tokio::select! {
            _ = shutdown.changed() => break,
            msg = inbox.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let effects = match msg {
            ProposerMsg::Submit(value) => state.handle_submit(value),
            ProposerMsg::Promise(resp) => state.handle_promise(resp),
            ProposerMsg::Accepted(resp) => state.handle_accepted(resp),
        };

        for effect in effects {
            match effect {
                ProposerEffect::Prepare(req) => {
                    broadcast(
                        transport.as_ref(),
                        &codec,
                        &config,
                        Role::Acceptor,
                        Payload::Prepare(req),
                    )
                    .await;
                }
                ProposerEffect::Accept(req) => {
                    broadcast(
                        transport.as_ref(),
                        &codec,
                        &config,
                        Role::Acceptor,
                        Payload::Accept(req),
                    )
                    .await;
                }
                ProposerEffect::RetryPrepare(req) => {
                    // The stagger runs on its own task; a response arriving
                    // during the delay can retire the retry, in which case
                    // the late broadcast is answered with rejections the
                    // state machine ignores.
                    let transport = transport.clone();
                    let codec = codec.clone();
                    let config = config.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(stagger).await;
                        broadcast(
                            transport.as_ref(),
                            &codec,
                            &config,
                            Role::Acceptor,
                            Payload::Prepare(req),
                        )
                        .await;
                    });
                }
            }
        }
    }

    debug!("proposer loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_proposer() -> ProposerState {
        // N=3, threshold 2.
        ProposerState::new(PeerId(1), 2)
    }

    fn promise(
        from: u64,
        ballot: Ballot,
        instance: InstanceId,
        prior: Option<(Ballot, &str)>,
    ) -> PromiseResponse {
        PromiseResponse {
            responder: PeerId(from),
            ballot,
            instance,
            granted: true,
            promised: ballot,
            accepted_ballot: prior.map(|(b, _)| b),
            accepted_value: prior.map(|(_, v)| v.to_string()),
        }
    }

    fn promise_rejected(
        from: u64,
        ballot: Ballot,
        instance: InstanceId,
        promised: Ballot,
    ) -> PromiseResponse {
        PromiseResponse {
            responder: PeerId(from),
            ballot,
            instance,
            granted: false,
            promised,
            accepted_ballot: None,
            accepted_value: None,
        }
    }

    fn accepted(from: u64, ballot: Ballot, instance: InstanceId, ok: bool) -> AcceptedResponse {
        AcceptedResponse {
            responder: PeerId(from),
            ballot,
            instance,
            accepted: ok,
            promised: ballot,
        }
    }

    #[test]
    fn test_submit_starts_prepare() {
        let mut proposer = make_proposer();

        let effects = proposer.handle_submit("set x=1".to_string());

        assert_eq!(
            effects,
            vec![ProposerEffect::Prepare(PrepareRequest {
                ballot: Ballot::new(1, PeerId(1)),
                instance: InstanceId::FIRST,
            })]
        );
        assert!(!proposer.is_idle());
    }

    #[test]
    fn test_second_submit_queues_behind_inflight() {
        let mut proposer = make_proposer();

        proposer.handle_submit("first".to_string());
        let effects = proposer.handle_submit("second".to_string());

        assert!(effects.is_empty());
        assert_eq!(proposer.pending_len(), 2);
    }

    #[test]
    fn test_majority_of_promises_triggers_accept_with_candidate() {
        let mut proposer = make_proposer();
        proposer.handle_submit("mine".to_string());
        let ballot = Ballot::new(1, PeerId(1));

        let effects = proposer.handle_promise(promise(2, ballot, InstanceId::FIRST, None));
        assert!(effects.is_empty(), "one promise is not a majority of 3");

        let effects = proposer.handle_promise(promise(3, ballot, InstanceId::FIRST, None));
        assert_eq!(
            effects,
            vec![ProposerEffect::Accept(AcceptRequest {
                ballot,
                instance: InstanceId::FIRST,
                value: "mine".to_string(),
            })]
        );
    }

    #[test]
    fn test_duplicate_promise_from_same_peer_does_not_count_twice() {
        let mut proposer = make_proposer();
        proposer.handle_submit("mine".to_string());
        let ballot = Ballot::new(1, PeerId(1));

        let effects = proposer.handle_promise(promise(2, ballot, InstanceId::FIRST, None));
        assert!(effects.is_empty());
        let effects = proposer.handle_promise(promise(2, ballot, InstanceId::FIRST, None));
        assert!(effects.is_empty(), "same peer twice is still one promise");
    }

    #[test]
    fn test_adopts_highest_ballot_prior_value() {
        let mut proposer = make_proposer();
        proposer.handle_submit("mine".to_string());
        let ballot = Ballot::new(1, PeerId(1));

        let low_prior = Some((Ballot::new(3, PeerId(2)), "old-low"));
        let high_prior = Some((Ballot::new(4, PeerId(3)), "old-high"));
        proposer.handle_promise(promise(2, ballot, InstanceId::FIRST, low_prior));
        let effects =
            proposer.handle_promise(promise(3, ballot, InstanceId::FIRST, high_prior));

        assert_eq!(
            effects,
            vec![ProposerEffect::Accept(AcceptRequest {
                ballot,
                instance: InstanceId::FIRST,
                value: "old-high".to_string(),
            })]
        );
    }

    #[test]
    fn test_superseded_prepare_restarts_with_bigger_ballot() {
        let mut proposer = make_proposer();
        proposer.handle_submit("mine".to_string());
        let ballot = Ballot::new(1, PeerId(1));

        // A rival at round 5 got to the acceptors first; our prepare comes
        // back refused instead of silently vanishing.
        let effects = proposer.handle_promise(promise_rejected(
            2,
            ballot,
            InstanceId::FIRST,
            Ballot::new(5, PeerId(2)),
        ));

        match effects.as_slice() {
            [ProposerEffect::RetryPrepare(req)] => {
                assert_eq!(req.instance, InstanceId::FIRST);
                assert!(req.ballot.round > 5, "must outbid the observed round");
                assert_eq!(req.ballot.proposer, PeerId(1));
            }
            other => panic!("expected a retry prepare, got {other:?}"),
        }
        assert!(!proposer.is_idle());
        assert_eq!(proposer.pending_len(), 1);
    }

    #[test]
    fn test_stale_rejected_promise_ignored_after_restart() {
        let mut proposer = make_proposer();
        proposer.handle_submit("mine".to_string());
        let old_ballot = Ballot::new(1, PeerId(1));

        proposer.handle_promise(promise_rejected(
            2,
            old_ballot,
            InstanceId::FIRST,
            Ballot::new(5, PeerId(2)),
        ));

        // A second rejection for the abandoned ballot must not restart again.
        let effects = proposer.handle_promise(promise_rejected(
            3,
            old_ballot,
            InstanceId::FIRST,
            Ballot::new(5, PeerId(2)),
        ));
        assert!(effects.is_empty());
    }

    #[test]
    fn test_stale_promise_ignored() {
        let mut proposer = make_proposer();
        proposer.handle_submit("mine".to_string());

        let stale = Ballot::new(9, PeerId(9));
        let effects = proposer.handle_promise(promise(2, stale, InstanceId::FIRST, None));
        assert!(effects.is_empty());
    }

    #[test]
    fn test_majority_accepted_chooses_and_pops_pending() {
        let mut proposer = make_proposer();
        proposer.handle_submit("mine".to_string());
        let ballot = Ballot::new(1, PeerId(1));

        proposer.handle_promise(promise(2, ballot, InstanceId::FIRST, None));
        proposer.handle_promise(promise(3, ballot, InstanceId::FIRST, None));

        proposer.handle_accepted(accepted(2, ballot, InstanceId::FIRST, true));
        let effects = proposer.handle_accepted(accepted(3, ballot, InstanceId::FIRST, true));

        assert!(effects.is_empty(), "nothing pending after the choice");
        assert!(proposer.is_idle());
        assert_eq!(proposer.pending_len(), 0);
    }

    #[test]
    fn test_adopted_choice_retries_candidate_on_next_instance() {
        let mut proposer = make_proposer();
        proposer.handle_submit("mine".to_string());
        let ballot = Ballot::new(1, PeerId(1));

        let prior = Some((Ballot::new(1, PeerId(2)), "theirs"));
        proposer.handle_promise(promise(2, ballot, InstanceId::FIRST, prior));
        proposer.handle_promise(promise(3, ballot, InstanceId::FIRST, None));

        proposer.handle_accepted(accepted(2, ballot, InstanceId::FIRST, true));
        let effects = proposer.handle_accepted(accepted(3, ballot, InstanceId::FIRST, true));

        // "theirs" got instance 1; "mine" restarts at instance 2.
        assert_eq!(proposer.pending_len(), 1);
        match effects.as_slice() {
            [ProposerEffect::Prepare(req)] => {
                assert_eq!(req.instance, InstanceId::new(2));
                assert!(req.ballot > ballot);
            }
            other => panic!("expected a new prepare, got {other:?}"),
        }
    }

    #[test]
    fn test_rejection_restarts_with_bigger_ballot() {
        let mut proposer = make_proposer();
        proposer.handle_submit("mine".to_string());
        let ballot = Ballot::new(1, PeerId(1));

        proposer.handle_promise(promise(2, ballot, InstanceId::FIRST, None));
        proposer.handle_promise(promise(3, ballot, InstanceId::FIRST, None));

        let rejection = AcceptedResponse {
            responder: PeerId(2),
            ballot,
            instance: InstanceId::FIRST,
            accepted: false,
            promised: Ballot::new(7, PeerId(2)),
        };
        let effects = proposer.handle_accepted(rejection);

        match effects.as_slice() {
            [ProposerEffect::RetryPrepare(req)] => {
                assert_eq!(req.instance, InstanceId::FIRST);
                assert!(req.ballot.round > 7, "must outbid the observed round");
                assert_eq!(req.ballot.proposer, PeerId(1));
            }
            other => panic!("expected a retry prepare, got {other:?}"),
        }
        // The candidate is still pending.
        assert_eq!(proposer.pending_len(), 1);
    }

    #[test]
    fn test_stale_accepted_ignored_after_restart() {
        let mut proposer = make_proposer();
        proposer.handle_submit("mine".to_string());
        let old_ballot = Ballot::new(1, PeerId(1));

        proposer.handle_promise(promise(2, old_ballot, InstanceId::FIRST, None));
        proposer.handle_promise(promise(3, old_ballot, InstanceId::FIRST, None));
        proposer.handle_accepted(AcceptedResponse {
            responder: PeerId(2),
            ballot: old_ballot,
            instance: InstanceId::FIRST,
            accepted: false,
            promised: Ballot::new(2, PeerId(2)),
        });

        // Late acceptances for the superseded ballot change nothing.
        let effects = proposer.handle_accepted(accepted(3, old_ballot, InstanceId::FIRST, true));
        assert!(effects.is_empty());
        assert!(!proposer.is_idle());
    }

    #[test]
    fn test_chosen_starts_next_pending_proposal() {
        let mut proposer = make_proposer();
        proposer.handle_submit("first".to_string());
        proposer.handle_submit("second".to_string());
        let ballot = Ballot::new(1, PeerId(1));

        proposer.handle_promise(promise(2, ballot, InstanceId::FIRST, None));
        proposer.handle_promise(promise(3, ballot, InstanceId::FIRST, None));
        proposer.handle_accepted(accepted(2, ballot, InstanceId::FIRST, true));
        let effects = proposer.handle_accepted(accepted(3, ballot, InstanceId::FIRST, true));

        match effects.as_slice() {
            [ProposerEffect::Prepare(req)] => {
                assert_eq!(req.instance, InstanceId::new(2));
            }
            other => panic!("expected prepare for the next value, got {other:?}"),
        }
        assert_eq!(proposer.pending_len(), 1);
    }

    #[test]
    fn test_ballots_strictly_increase() {
        let mut proposer = make_proposer();

        let b1 = proposer.fresh_ballot(0);
        let b2 = proposer.fresh_ballot(0);
        let b3 = proposer.fresh_ballot(10);
        let b4 = proposer.fresh_ballot(0);

        assert!(b1 < b2);
        assert!(b2 < b3);
        assert_eq!(b3.round, 10);
        assert!(b3 < b4);
    }

    #[tokio::test]
    async fn test_retry_stagger_does_not_block_response_processing() {
        use tokio::time::timeout;

        use crate::codec::JsonCodec;
        use crate::config::Peer;
        use crate::messages::Envelope;
        use crate::transport::ChannelTransport;

        // Peer id 100 gives a 301ms stagger; responses must keep flowing
        // long before that elapses.
        let peers: Vec<Peer> = (100..=102u64)
            .map(|i| Peer {
                id: PeerId(i),
                host: "node".to_string(),
                port: 5000 + i as u16,
            })
            .collect();
        let config = GroupConfig::for_tests(1, peers);
        let transport = ChannelTransport::new();
        let mut self_inbox = transport.register("node", 5100);

        let (tx, inbox) = mpsc::unbounded_channel();
        let (_shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(run_proposer(
            config.clone(),
            transport.clone(),
            JsonCodec,
            ProposerState::new(PeerId(100), 2),
            inbox,
            shutdown_rx,
        ));

        tx.send(ProposerMsg::Submit("v".to_string())).expect("submit");

        // Refuse the initial prepare at (1, 100), forcing a staggered
        // retry at round 51, then grant the retry ballot right away.
        let first = Ballot::new(1, PeerId(100));
        tx.send(ProposerMsg::Promise(promise_rejected(
            101,
            first,
            InstanceId::FIRST,
            Ballot::new(50, PeerId(101)),
        )))
        .expect("reject");

        let retry = Ballot::new(51, PeerId(100));
        for from in [101, 102] {
            tx.send(ProposerMsg::Promise(promise(
                from,
                retry,
                InstanceId::FIRST,
                None,
            )))
            .expect("promise");
        }

        // The Accept broadcast must arrive well inside the stagger window.
        loop {
            let bytes = timeout(Duration::from_millis(150), self_inbox.recv())
                .await
                .expect("accept must not wait out the stagger")
                .expect("transport inbox closed");
            let envelope: Envelope = JsonCodec.decode(&bytes).expect("decode");
            if let Payload::Accept(req) = envelope.payload {
                assert_eq!(req.ballot, retry);
                assert_eq!(req.value, "v");
                break;
            }
        }
    }
}
