use converge::config::{DisseminationConfig, NodeConfig, WriteSemantics};
use converge::core::{MicroOp, OpKind, Payload};
use converge::testkit::{
  wait_until, FailureConfig, FailureConfigMap, FailureMode, SimNetwork,
};
use converge::workloads::TxnStore;
use maplit::btreemap;
use std::sync::Arc;
use std::time::Duration;

fn config(semantics: WriteSemantics) -> NodeConfig {
  NodeConfig {
    dissemination: DisseminationConfig {
      workers: 4,
      backoff: Duration::from_millis(20),
      rpc_timeout: Duration::from_millis(100),
    },
    write_semantics: semantics,
    ..NodeConfig::default()
  }
}

async fn txn(net: &SimNetwork, dest: &str, ops: Vec<MicroOp>) -> Vec<MicroOp> {
  let request = Payload::Txn {
    txn: ops,
    from: None,
  };
  match net.call(dest, request).await.unwrap() {
    Payload::TxnOk { txn } => txn,
    other => panic!("unexpected reply {:?}", other),
  }
}

fn settled(nodes: &[Arc<TxnStore>]) -> bool {
  nodes.iter().all(|n| n.is_quiet())
}

#[tokio::test(flavor = "multi_thread")]
async fn txn_test_copy_write_reaches_peers() {
  let net = SimNetwork::new(3);
  let config = config(WriteSemantics::Copy);
  let nodes = net.spawn(|m| TxnStore::new(m, &config));
  txn(&net, "n0", vec![MicroOp::write(1, 5)]).await;
  assert!(wait_until(Duration::from_secs(5), || settled(&nodes)).await);
  let read = txn(&net, "n1", vec![MicroOp::read(1)]).await;
  assert_eq!(read, vec![MicroOp(OpKind::Read, 1, Some(0))]);
  for node in nodes.iter() {
    assert_eq!(node.snapshot(), btreemap! {1 => 0});
  }
}

#[tokio::test(flavor = "multi_thread")]
async fn txn_test_literal_writes_converge_under_request_loss() {
  let mut fail_map = FailureConfigMap::default();
  fail_map.cluster_wide = FailureConfig::lossy(0.3);
  let net = SimNetwork::new(4).with_failures(fail_map, FailureMode::Request);
  let config = config(WriteSemantics::Literal);
  let nodes = net.spawn(|m| TxnStore::new(m, &config));
  // Each node owns a disjoint set of keys and writes them in order.
  for round in 0..5i64 {
    for i in 0..4i64 {
      let dest = format!("n{}", i);
      let ops = vec![MicroOp::write(i, round), MicroOp::write(10 + i, round * i)];
      txn(&net, &dest, ops).await;
    }
  }
  let expected = btreemap! {
    0 => 4, 1 => 4, 2 => 4, 3 => 4,
    10 => 0, 11 => 4, 12 => 8, 13 => 12,
  };
  let converged = || nodes.iter().all(|n| n.snapshot() == expected);
  assert!(wait_until(Duration::from_secs(30), converged).await);
  assert!(wait_until(Duration::from_secs(30), || settled(&nodes)).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn txn_test_replicated_txn_is_not_relayed() {
  let net = SimNetwork::new(3);
  let config = config(WriteSemantics::Literal);
  let nodes = net.spawn(|m| TxnStore::new(m, &config));
  let replicated = Payload::Txn {
    txn: vec![MicroOp::write(7, 7)],
    from: Some("n2".to_string()),
  };
  net.call("n0", replicated).await.unwrap();
  tokio::time::sleep(Duration::from_millis(200)).await;
  assert_eq!(nodes[0].snapshot(), btreemap! {7 => 7});
  assert!(nodes[1].snapshot().is_empty());
  assert!(nodes[2].snapshot().is_empty());

  let malformed = Payload::Txn {
    txn: vec![MicroOp(OpKind::Write, 1, None)],
    from: None,
  };
  assert!(net.call("n1", malformed).await.is_err());
  assert!(nodes[1].snapshot().is_empty());
}
