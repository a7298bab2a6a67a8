//! Outbound transport seam and an in-memory implementation.
//!
//! The engine never opens sockets itself: every role hands serialized
//! envelopes to a [`Transport`], which delivers them best-effort. Sends are
//! fire-and-forget — a failed send is logged and dropped, and the learner's
//! periodic broadcast round doubles as the retry mechanism.
//!
//! [`ChannelTransport`] routes bytes between in-process nodes over tokio
//! channels. It exists for tests and simulations; a deployment would supply
//! a UDP- or TCP-backed implementation of the same trait.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::codec::MessageCodec;
use crate::config::GroupConfig;
use crate::messages::{Envelope, Payload, Role};
use crate::types::{PeerId, SynodError};

/// Best-effort, point-to-point byte delivery to a peer's (host, port).
///
/// Implementations must not block the caller on peer availability beyond
/// what a single send requires; failures are reported but callers treat
/// them as non-fatal.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `bytes` to the peer listening at `host:port`.
    async fn send_to(&self, host: &str, port: u16, bytes: Vec<u8>) -> Result<(), SynodError>;
}

/// Serialize a payload into an envelope and send it to one peer.
///
/// Send failures are the caller's to log; an unknown peer id is reported
/// as [`SynodError::UnknownPeer`].
pub async fn send_to_peer<C: MessageCodec>(
    transport: &dyn Transport,
    codec: &C,
    config: &GroupConfig,
    to: PeerId,
    role: Role,
    payload: Payload,
) -> Result<(), SynodError> {
    let peer = config.peer(to).ok_or(SynodError::UnknownPeer(to))?;
    let envelope = Envelope {
        group: config.group,
        role,
        payload,
    };
    let bytes = codec.encode(&envelope)?;
    transport.send_to(&peer.host, peer.port, bytes).await
}

/// Serialize a payload once and send it to every peer in the group,
/// including the local node.
///
/// Per-peer failures are logged and skipped; the broadcast always attempts
/// every peer.
pub async fn broadcast<C: MessageCodec>(
    transport: &dyn Transport,
    codec: &C,
    config: &GroupConfig,
    role: Role,
    payload: Payload,
) {
    let envelope = Envelope {
        group: config.group,
        role,
        payload,
    };
    let bytes = match codec.encode(&envelope) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to encode broadcast envelope");
            return;
        }
    };

    for peer in &config.peers {
        if let Err(e) = transport
            .send_to(&peer.host, peer.port, bytes.clone())
            .await
        {
            warn!(peer = %peer.id, error = %e, "broadcast send failed, skipping peer");
        }
    }
}

/// In-memory transport routing bytes between in-process nodes.
///
/// Each node registers an inbox under its (host, port); sends look the
/// destination up and push onto its channel. Unregistered destinations and
/// disconnected nodes produce a transport error, which models an
/// unreachable peer.
#[derive(Default)]
pub struct ChannelTransport {
    inboxes: Mutex<HashMap<(String, u16), mpsc::UnboundedSender<Vec<u8>>>>,
}

impl ChannelTransport {
    /// Create an empty transport.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an inbox for `host:port` and return its receiving end.
    ///
    /// The caller is expected to drain the receiver and feed each message
    /// into its node's dispatch entry point.
    pub fn register(&self, host: &str, port: u16) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes
            .lock()
            .expect("transport registry poisoned")
            .insert((host.to_string(), port), tx);
        rx
    }

    /// Drop the inbox for `host:port`, making the node unreachable until it
    /// registers again. Used to simulate message loss and peer crashes.
    pub fn disconnect(&self, host: &str, port: u16) {
        self.inboxes
            .lock()
            .expect("transport registry poisoned")
            .remove(&(host.to_string(), port));
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send_to(&self, host: &str, port: u16, bytes: Vec<u8>) -> Result<(), SynodError> {
        let sender = {
            let inboxes = self.inboxes.lock().expect("transport registry poisoned");
            inboxes.get(&(host.to_string(), port)).cloned()
        };

        match sender {
            Some(tx) => tx
                .send(bytes)
                .map_err(|_| SynodError::Transport(format!("{host}:{port} inbox closed"))),
            None => Err(SynodError::Transport(format!("{host}:{port} unreachable"))),
        }
    }
}
