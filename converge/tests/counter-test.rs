use converge::config::{CounterStrategy, KvService, NodeConfig};
use converge::core::{ErrorCode, Payload};
use converge::testkit::{
  FailureConfig, FailureConfigMap, FailureMode, SimNetwork,
};
use converge::workloads::Counter;
use serde_json::json;
use std::time::Duration;

fn config(strategy: CounterStrategy) -> NodeConfig {
  NodeConfig {
    counter: strategy,
    request_timeout: Duration::from_millis(200),
    ..NodeConfig::default()
  }
}

async fn read(net: &SimNetwork, dest: &str) -> i64 {
  match net.call(dest, Payload::Read { key: None }).await.unwrap() {
    Payload::ReadOk {
      value: Some(value), ..
    } => value.as_i64().unwrap(),
    other => panic!("unexpected reply {:?}", other),
  }
}

async fn concurrent_adds(net: &SimNetwork) -> i64 {
  let mut handles = Vec::new();
  let mut total = 0;
  for i in 0..60i64 {
    let net = net.clone();
    let delta = i % 7;
    total += delta;
    handles.push(tokio::spawn(async move {
      let dest = format!("n{}", i % net.peers().len() as i64);
      net.call(&dest, Payload::Add { delta: delta }).await
    }));
  }
  for h in handles {
    assert_eq!(h.await.unwrap().unwrap(), Payload::AddOk);
  }
  total
}

#[tokio::test(flavor = "multi_thread")]
async fn counter_test_durable_cas_converges() {
  let net = SimNetwork::new(5);
  let config = config(CounterStrategy::DurableCas);
  net.spawn(|m| Counter::new(m, &config));
  let total = concurrent_adds(&net).await;
  for node in net.peers().to_vec() {
    assert_eq!(read(&net, &node).await, total);
  }
  assert_eq!(net.kv(KvService::SeqKv).get("counter"), Some(json!(total)));
}

#[tokio::test(flavor = "multi_thread")]
async fn counter_test_shards_converge() {
  let mut fail_map = FailureConfigMap::default();
  fail_map.cluster_wide = FailureConfig {
    drop_prob: 0.0,
    delay: Some((Duration::from_millis(1), Duration::from_millis(20))),
  };
  let net = SimNetwork::new(5).with_failures(fail_map, FailureMode::Message);
  let config = config(CounterStrategy::Shards);
  let nodes = net.spawn(|m| Counter::new(m, &config));
  let total = concurrent_adds(&net).await;
  let shards = nodes.iter().map(|n| n.local()).sum::<i64>();
  assert_eq!(shards, total);
  for node in net.peers().to_vec() {
    assert_eq!(read(&net, &node).await, total);
  }
  // Each node only ever wrote its own cell.
  let kv = net.kv(KvService::SeqKv);
  assert!(kv.get("counter").is_none());
  let cells = (0..5)
    .map(|i| kv.get(&format!("n{}", i)).and_then(|v| v.as_i64()).unwrap_or(0))
    .sum::<i64>();
  assert_eq!(cells, total);
}

#[tokio::test(flavor = "multi_thread")]
async fn counter_test_unreachable_shard_counts_as_zero() {
  let net = SimNetwork::new(3);
  let config = config(CounterStrategy::Shards);
  let nodes = net.spawn(|m| Counter::new(m, &config));
  for (i, node) in ["n0", "n1", "n2"].iter().enumerate() {
    let delta = 10i64.pow(i as u32);
    net.call(node, Payload::Add { delta: delta }).await.unwrap();
  }
  net.partition(&["n2"]);
  assert_eq!(read(&net, "n0").await, 11);
  assert_eq!(read(&net, "n2").await, 100);
  net.heal();
  assert_eq!(nodes[2].local(), 100);
  assert_eq!(read(&net, "n0").await, 111);

  let reply = net.call("n1", Payload::Local).await.unwrap();
  assert_eq!(reply, Payload::LocalOk { value: 10 });
  assert!(net.call("n1", Payload::Add { delta: -1 }).await.is_err());
  assert_eq!(read(&net, "n1").await, 111);
}

#[tokio::test(flavor = "multi_thread")]
async fn counter_test_overflowing_add_is_rejected() {
  let net = SimNetwork::new(3);
  let config = config(CounterStrategy::Shards);
  let nodes = net.spawn(|m| Counter::new(m, &config));
  let max = Payload::Add { delta: i64::MAX };
  assert_eq!(net.call("n0", max).await.unwrap(), Payload::AddOk);
  let err = net.call("n0", Payload::Add { delta: 1 }).await.unwrap_err();
  assert_eq!(err.code(), ErrorCode::MalformedRequest);
  assert_eq!(nodes[0].local(), i64::MAX);

  // Other shards still grow, and the cluster-wide sum saturates.
  net.call("n1", Payload::Add { delta: 5 }).await.unwrap();
  assert_eq!(read(&net, "n1").await, i64::MAX);
  assert_eq!(
    net.kv(KvService::SeqKv).get("n0"),
    Some(json!(i64::MAX))
  );
}
