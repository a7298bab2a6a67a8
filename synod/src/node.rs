//! Node assembly: spawns the three role tasks and dispatches wire traffic.
//!
//! Every node hosts all three roles. Each role runs as one tokio task that
//! owns its state outright and drains an unbounded queue; nothing else
//! touches that state. [`PaxosNode`] holds the sending ends of those
//! queues, so the application thread and the network receive path both
//! talk to the roles the same way: by enqueueing messages.
//!
//! ```text
//!                 ┌────────────┐
//!   submit() ───> │  proposer  │ ──Prepare/Accept──> peers
//!                 └────────────┘
//!   wire bytes ─> handle_incoming() ─┬─> proposer queue (Promise/Accepted)
//!                                    ├─> acceptor queue (Prepare/Accept)
//!                                    └─> learner  queue (LearnRequest/Response)
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::acceptor::{run_acceptor, AcceptorMsg, AcceptorState};
use crate::codec::MessageCodec;
use crate::config::GroupConfig;
use crate::learner::{run_learner, LearnerMsg, LearnerState, StateMachine};
use crate::messages::{Envelope, Payload, Role};
use crate::proposer::{run_proposer, ProposerMsg, ProposerState};
use crate::transport::Transport;
use crate::types::{PeerId, SynodError};

/// Handle to a running consensus node.
///
/// Dropping the handle does not stop the role tasks; call
/// [`PaxosNode::shutdown`] to stop them.
pub struct PaxosNode<C: MessageCodec> {
    id: PeerId,
    group: u64,
    codec: C,
    proposer: mpsc::UnboundedSender<ProposerMsg>,
    acceptor: mpsc::UnboundedSender<AcceptorMsg>,
    learner: mpsc::UnboundedSender<LearnerMsg>,
    shutdown: watch::Sender<bool>,
}

impl<C: MessageCodec> PaxosNode<C> {
    /// Spawn the proposer, acceptor, learner and ticker tasks for the node
    /// `local` of the group.
    ///
    /// `state_machine` receives chosen values in instance order, invoked
    /// from the learner task. The caller supplies the transport and is
    /// responsible for feeding received bytes into
    /// [`handle_incoming`](Self::handle_incoming).
    pub fn spawn(
        local: PeerId,
        config: GroupConfig,
        transport: Arc<dyn Transport>,
        codec: C,
        state_machine: Box<dyn StateMachine>,
    ) -> Result<Self, SynodError> {
        if config.peer(local).is_none() {
            return Err(SynodError::UnknownPeer(local));
        }

        let (proposer_tx, proposer_rx) = mpsc::unbounded_channel();
        let (acceptor_tx, acceptor_rx) = mpsc::unbounded_channel();
        let (learner_tx, learner_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let majority = config.majority();

        tokio::spawn(run_proposer(
            config.clone(),
            transport.clone(),
            codec.clone(),
            ProposerState::new(local, majority),
            proposer_rx,
            shutdown_rx.clone(),
        ));

        tokio::spawn(run_acceptor(
            config.clone(),
            transport.clone(),
            codec.clone(),
            AcceptorState::new(local),
            acceptor_rx,
            shutdown_rx.clone(),
        ));

        tokio::spawn(run_learner(
            config.clone(),
            transport,
            codec.clone(),
            LearnerState::new(local, majority),
            state_machine,
            acceptor_tx.clone(),
            learner_rx,
            shutdown_rx.clone(),
        ));

        // The ticker owns the clock; the learner only ever sees messages.
        let ticker_learner = learner_tx.clone();
        let mut ticker_shutdown = shutdown_rx;
        let learn_interval = config.learn_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(learn_interval);
            loop {
                tokio::select! {
                    _ = ticker_shutdown.changed() => break,
                    _ = ticker.tick() => {
                        if ticker_learner.send(LearnerMsg::Tick).is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("ticker stopped");
        });

        info!(node = %local, group = config.group, "node started");

        Ok(Self {
            id: local,
            group: config.group,
            codec,
            proposer: proposer_tx,
            acceptor: acceptor_tx,
            learner: learner_tx,
            shutdown: shutdown_tx,
        })
    }

    /// This node's peer id.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Submit a value for consensus.
    ///
    /// The value is queued on the local proposer and will eventually be
    /// chosen for some instance, though possibly not the next one if other
    /// proposers are active.
    pub fn submit(&self, value: impl Into<String>) -> Result<(), SynodError> {
        self.proposer
            .send(ProposerMsg::Submit(value.into()))
            .map_err(|_| SynodError::ChannelClosed)
    }

    /// Decode one wire message and route it to the addressed role's queue.
    ///
    /// Messages for another group are rejected; a payload that does not
    /// belong to the addressed role is logged and dropped.
    pub fn handle_incoming(&self, bytes: &[u8]) -> Result<(), SynodError> {
        let envelope: Envelope = self.codec.decode(bytes)?;

        if envelope.group != self.group {
            return Err(SynodError::WrongGroup {
                expected: self.group,
                got: envelope.group,
            });
        }

        let routed = match (envelope.role, envelope.payload) {
            (Role::Acceptor, Payload::Prepare(req)) => self
                .acceptor
                .send(AcceptorMsg::Prepare(req))
                .map_err(|_| SynodError::ChannelClosed),
            (Role::Acceptor, Payload::Accept(req)) => self
                .acceptor
                .send(AcceptorMsg::Accept(req))
                .map_err(|_| SynodError::ChannelClosed),
            (Role::Proposer, Payload::Promise(resp)) => self
                .proposer
                .send(ProposerMsg::Promise(resp))
                .map_err(|_| SynodError::ChannelClosed),
            (Role::Proposer, Payload::Accepted(resp)) => self
                .proposer
                .send(ProposerMsg::Accepted(resp))
                .map_err(|_| SynodError::ChannelClosed),
            (Role::Learner, Payload::LearnRequest(req)) => self
                .learner
                .send(LearnerMsg::Request(req))
                .map_err(|_| SynodError::ChannelClosed),
            (Role::Learner, Payload::LearnResponse(resp)) => self
                .learner
                .send(LearnerMsg::Response(resp))
                .map_err(|_| SynodError::ChannelClosed),
            (role, payload) => {
                warn!(?role, ?payload, "payload does not match addressed role, dropping");
                Ok(())
            }
        };

        routed
    }

    /// Signal every role task to stop after its current message.
    pub fn shutdown(&self) {
        // Ignore the error: all receivers gone means already stopped.
        let _ = self.shutdown.send(true);
        info!(node = %self.id, "node shutting down");
    }
}
