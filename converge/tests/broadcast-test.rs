use converge::config::{DisseminationConfig, NodeConfig, TopologySource};
use converge::core::Payload;
use converge::testkit::{
  wait_until, FailureConfig, FailureConfigMap, FailureMode, SimNetwork,
};
use converge::workloads::Broadcast;
use maplit::btreemap;
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> NodeConfig {
  NodeConfig {
    dissemination: DisseminationConfig {
      workers: 4,
      backoff: Duration::from_millis(20),
      rpc_timeout: Duration::from_millis(100),
    },
    ..NodeConfig::default()
  }
}

fn converged(nodes: &[Arc<Broadcast>], expected: &[i64]) -> bool {
  nodes.iter().all(|n| n.messages() == expected)
}

async fn broadcast(net: &SimNetwork, dest: &str, message: i64) {
  let reply = net.call(dest, Payload::Broadcast { message: message }).await;
  assert_eq!(reply.unwrap(), Payload::BroadcastOk);
}

#[tokio::test(flavor = "multi_thread")]
async fn broadcast_test_reaches_everyone_despite_loss() {
  let mut fail_map = FailureConfigMap::default();
  fail_map.cluster_wide = FailureConfig::lossy(0.25);
  let net = SimNetwork::new(12).with_failures(fail_map, FailureMode::Message);
  let config = fast_config();
  let nodes = net.spawn(|m| Broadcast::new(m, &config));

  let expected = (0..40).collect::<Vec<i64>>();
  for v in expected.iter() {
    let dest = format!("n{}", v % 12);
    broadcast(&net, &dest, *v).await;
  }
  let done =
    wait_until(Duration::from_secs(30), || converged(&nodes, &expected)).await;
  let sizes = nodes.iter().map(|n| n.messages().len()).collect::<Vec<_>>();
  assert!(done, "{:?}", sizes);
  let quiet = || nodes.iter().all(|n| n.is_quiet());
  assert!(wait_until(Duration::from_secs(30), quiet).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn broadcast_test_redelivery_is_idempotent() {
  let net = SimNetwork::new(3);
  let config = fast_config();
  let nodes = net.spawn(|m| Broadcast::new(m, &config));
  let batch = Payload::MultiBroadcast {
    message: vec![3, 1, 3, 2],
  };
  for _ in 0..3 {
    let reply = net.call("n1", batch.clone()).await.unwrap();
    assert_eq!(reply, Payload::BroadcastOk);
  }
  broadcast(&net, "n2", 1).await;
  assert!(wait_until(Duration::from_secs(5), || converged(&nodes, &[1, 2, 3])).await);
  assert!(wait_until(Duration::from_secs(5), || nodes.iter().all(|n| n.is_quiet())).await);
  let reply = net.call("n0", Payload::Read { key: None }).await.unwrap();
  assert_eq!(
    reply,
    Payload::ReadOk {
      messages: Some(vec![1, 2, 3]),
      value: None
    }
  );
}

#[tokio::test(flavor = "multi_thread")]
async fn broadcast_test_partition_heals() {
  let net = SimNetwork::new(5);
  let config = fast_config();
  let nodes = net.spawn(|m| Broadcast::new(m, &config));
  // n4 is a leaf hanging off n0.
  net.partition(&["n4"]);
  broadcast(&net, "n4", 7).await;
  broadcast(&net, "n0", 8).await;
  tokio::time::sleep(Duration::from_millis(500)).await;
  assert_eq!(nodes[4].messages(), vec![7]);
  assert!(nodes[..4].iter().all(|n| n.messages() == vec![8]));
  assert!(!nodes[4].is_quiet());

  net.heal();
  assert!(wait_until(Duration::from_secs(10), || converged(&nodes, &[7, 8])).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn broadcast_test_provided_topology() {
  let net = SimNetwork::new(3);
  let config = NodeConfig {
    topology: TopologySource::Provided,
    ..fast_config()
  };
  let nodes = net.spawn(|m| Broadcast::new(m, &config));
  // Values seen before the topology are forwarded once it arrives.
  broadcast(&net, "n0", 1).await;
  let line = btreemap! {
    "n0".to_string() => vec!["n1".to_string()],
    "n1".to_string() => vec!["n0".to_string(), "n2".to_string()],
    "n2".to_string() => vec!["n1".to_string()],
  };
  for node in net.peers().to_vec() {
    let reply = net
      .call(&node, Payload::Topology { topology: line.clone() })
      .await
      .unwrap();
    assert_eq!(reply, Payload::TopologyOk);
  }
  assert_eq!(nodes[1].neighbors(), vec!["n0", "n2"]);
  broadcast(&net, "n2", 2).await;
  assert!(wait_until(Duration::from_secs(5), || converged(&nodes, &[1, 2])).await);

  // The first topology sticks.
  let star = btreemap! { "n1".to_string() => vec![] };
  net.call("n1", Payload::Topology { topology: star }).await.unwrap();
  assert_eq!(nodes[1].neighbors(), vec!["n0", "n2"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn broadcast_test_tree_neighbors() {
  let net = SimNetwork::new(8);
  let config = fast_config();
  let nodes = net.spawn(|m| Broadcast::new(m, &config));
  assert_eq!(nodes[0].neighbors(), vec!["n1", "n2", "n3", "n4", "n5"]);
  assert_eq!(nodes[1].neighbors(), vec!["n0", "n6", "n7"]);
  let reply = net.call("n0", Payload::Add { delta: 1 }).await;
  assert!(reply.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn broadcast_test_lost_acknowledgements_are_harmless() {
  let mut fail_map = FailureConfigMap::default();
  fail_map.cluster_wide = FailureConfig::lossy(0.5);
  let net = SimNetwork::new(6).with_failures(fail_map, FailureMode::Response);
  let config = fast_config();
  let nodes = net.spawn(|m| Broadcast::new(m, &config));
  for v in 0..10 {
    broadcast(&net, "n0", v).await;
  }
  // Requests always arrive, so every node accepts each value on first
  // contact even while its acknowledgements are lost and batches repeat.
  let expected = (0..10).collect::<Vec<i64>>();
  assert!(wait_until(Duration::from_secs(10), || converged(&nodes, &expected)).await);
  let quiet = || nodes.iter().all(|n| n.is_quiet());
  assert!(wait_until(Duration::from_secs(30), quiet).await);
  assert!(nodes.iter().all(|n| n.messages() == expected));
}
