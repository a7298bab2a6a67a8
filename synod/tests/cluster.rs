//! End-to-end cluster tests over the in-memory transport.
//!
//! Each test stands up a full group: every node runs all three roles, a
//! pump task drains its transport inbox into the dispatch entry point, and
//! chosen values arrive on a per-node channel in delivery order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use synod::messages::{Envelope, Payload, PrepareRequest, Role};
use synod::{
    Ballot, ChannelTransport, GroupConfig, InstanceId, JsonCodec, MessageCodec, PaxosNode, Peer,
    PeerId, Transport,
};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

struct TestNode {
    node: Arc<PaxosNode<JsonCodec>>,
    delivered: mpsc::UnboundedReceiver<String>,
}

fn make_config(n: u64) -> GroupConfig {
    let peers = (1..=n)
        .map(|i| Peer {
            id: PeerId(i),
            host: "node".to_string(),
            port: 4000 + i as u16,
        })
        .collect();
    GroupConfig::for_tests(1, peers)
}

/// Drain a node's transport inbox into its dispatch entry point.
fn pump(node: Arc<PaxosNode<JsonCodec>>, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            // Send failures here mean the node has shut down.
            let _ = node.handle_incoming(&bytes);
        }
    });
}

fn start_cluster(n: u64) -> (Arc<ChannelTransport>, GroupConfig, Vec<TestNode>) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();

    let transport = ChannelTransport::new();
    let config = make_config(n);

    let mut nodes = Vec::new();
    for peer in config.peers.clone() {
        let (app_tx, app_rx) = mpsc::unbounded_channel::<String>();
        let node = PaxosNode::spawn(
            peer.id,
            config.clone(),
            transport.clone(),
            JsonCodec,
            Box::new(app_tx),
        )
        .expect("spawn node");
        let node = Arc::new(node);

        let inbox = transport.register(&peer.host, peer.port);
        pump(node.clone(), inbox);

        nodes.push(TestNode {
            node,
            delivered: app_rx,
        });
    }

    (transport, config, nodes)
}

async fn next_delivery(node: &mut TestNode) -> String {
    timeout(DELIVERY_TIMEOUT, node.delivered.recv())
        .await
        .expect("delivery timed out")
        .expect("delivery channel closed")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_value_reaches_every_node() {
    let (_transport, _config, mut nodes) = start_cluster(3);

    nodes[0].node.submit("deploy v1").expect("submit");

    for node in &mut nodes {
        assert_eq!(next_delivery(node).await, "deploy v1");
    }

    for node in &nodes {
        node.node.shutdown();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_one_proposer_many_values_in_submission_order() {
    let (_transport, _config, mut nodes) = start_cluster(3);

    let values = ["a", "b", "c", "d"];
    for value in values {
        nodes[0].node.submit(value).expect("submit");
    }

    // One proposer, no contention: chosen order is submission order, and
    // every node sees the same sequence.
    for node in &mut nodes {
        for expected in values {
            assert_eq!(next_delivery(node).await, expected);
        }
    }

    for node in &nodes {
        node.node.shutdown();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_competing_proposers_agree_on_one_order() {
    let (_transport, _config, mut nodes) = start_cluster(3);

    nodes[0].node.submit("from-1").expect("submit");
    nodes[1].node.submit("from-2").expect("submit");

    let mut sequences = Vec::new();
    for node in &mut nodes {
        let first = next_delivery(node).await;
        let second = next_delivery(node).await;
        sequences.push(vec![first, second]);
    }

    // The instance order is whatever contention produced, but it is the
    // same on every node and contains both values exactly once.
    assert_eq!(sequences[0], sequences[1]);
    assert_eq!(sequences[1], sequences[2]);
    let mut sorted = sequences[0].clone();
    sorted.sort();
    assert_eq!(sorted, vec!["from-1".to_string(), "from-2".to_string()]);

    for node in &nodes {
        node.node.shutdown();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_proposal_outbids_earlier_rival_prepare() {
    let (transport, config, mut nodes) = start_cluster(3);

    // A rival proposer ran its prepare phase first: every acceptor has
    // promised ballot (5, peer 2) for instance 1 before node 1 submits.
    let rival = Envelope {
        group: config.group,
        role: Role::Acceptor,
        payload: Payload::Prepare(PrepareRequest {
            ballot: Ballot::new(5, PeerId(2)),
            instance: InstanceId::FIRST,
        }),
    };
    let bytes = JsonCodec.encode(&rival).expect("encode");
    for peer in &config.peers {
        transport
            .send_to(&peer.host, peer.port, bytes.clone())
            .await
            .expect("send rival prepare");
    }

    // Node 1's prepare at (1, 1) is refused everywhere; the rejections
    // carry the rival ballot and the proposal restarts above it.
    nodes[0].node.submit("outbid").expect("submit");

    for node in &mut nodes {
        assert_eq!(next_delivery(node).await, "outbid");
    }

    for node in &nodes {
        node.node.shutdown();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_disconnected_node_catches_up_after_reconnect() {
    let (transport, config, mut nodes) = start_cluster(3);

    // Partition node 3 away. The remaining two are still a majority.
    let peer3 = config.peer(PeerId(3)).expect("peer 3").clone();
    transport.disconnect(&peer3.host, peer3.port);

    nodes[0].node.submit("while-away").expect("submit");

    assert_eq!(next_delivery(&mut nodes[0]).await, "while-away");
    assert_eq!(next_delivery(&mut nodes[1]).await, "while-away");

    // Heal the partition: node 3's next learn round pulls the value from
    // the surviving acceptors.
    let inbox = transport.register(&peer3.host, peer3.port);
    pump(nodes[2].node.clone(), inbox);

    assert_eq!(next_delivery(&mut nodes[2]).await, "while-away");

    for node in &nodes {
        node.node.shutdown();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_majority_loss_stalls_until_heal() {
    let (transport, config, mut nodes) = start_cluster(3);

    // Two of three gone: no quorum, nothing can be chosen.
    for id in [2u64, 3u64] {
        let peer = config.peer(PeerId(id)).expect("peer").clone();
        transport.disconnect(&peer.host, peer.port);
    }

    nodes[0].node.submit("stalled").expect("submit");

    let stalled = timeout(Duration::from_millis(300), nodes[0].delivered.recv()).await;
    assert!(stalled.is_err(), "no delivery without a majority");

    // One peer returns, restoring quorum. The stalled proposal lost its
    // Prepare broadcast for good (sends are fire-and-forget), but a fresh
    // proposal from a live node goes through.
    let peer2 = config.peer(PeerId(2)).expect("peer 2").clone();
    let inbox = transport.register(&peer2.host, peer2.port);
    pump(nodes[1].node.clone(), inbox);

    nodes[1].node.submit("after-heal").expect("submit");

    assert_eq!(next_delivery(&mut nodes[0]).await, "after-heal");
    assert_eq!(next_delivery(&mut nodes[1]).await, "after-heal");

    for node in &nodes {
        node.node.shutdown();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_five_node_cluster_tolerates_two_missing() {
    let (transport, config, mut nodes) = start_cluster(5);

    for id in [4u64, 5u64] {
        let peer = config.peer(PeerId(id)).expect("peer").clone();
        transport.disconnect(&peer.host, peer.port);
    }

    nodes[1].node.submit("three-alive").expect("submit");

    for node in nodes.iter_mut().take(3) {
        assert_eq!(next_delivery(node).await, "three-alive");
    }

    for node in &nodes {
        node.node.shutdown();
    }
}
