use converge::config::{KvService, NodeConfig};
use converge::core::Payload;
use converge::testkit::SimNetwork;
use converge::workloads::ReplicatedLog;
use maplit::btreemap;
use serde_json::json;
use std::collections::BTreeSet;

async fn send(net: &SimNetwork, dest: &str, key: &str, msg: i64) -> u64 {
  let request = Payload::Send {
    key: key.to_string(),
    msg: msg,
  };
  match net.call(dest, request).await.unwrap() {
    Payload::SendOk { offset } => offset,
    other => panic!("unexpected reply {:?}", other),
  }
}

#[tokio::test(flavor = "multi_thread")]
async fn log_test_offsets_and_poll() {
  let net = SimNetwork::new(3);
  let config = NodeConfig::default();
  net.spawn(|m| ReplicatedLog::new(m, &config));
  for (i, msg) in [10, 11, 12, 13].iter().enumerate() {
    let dest = format!("n{}", i % 3);
    assert_eq!(send(&net, &dest, "a", *msg).await, i as u64);
  }
  assert_eq!(send(&net, "n2", "b", 20).await, 0);

  // n1 never appended to b, and still sees it after resyncing.
  let poll = Payload::Poll {
    offsets: btreemap! {
      "a".to_string() => 2,
      "b".to_string() => 0,
      "c".to_string() => 0,
      "d".to_string() => 9,
    },
  };
  let reply = net.call("n1", poll).await.unwrap();
  assert_eq!(
    reply,
    Payload::PollOk {
      msgs: btreemap! {
        "a".to_string() => vec![(2, 12), (3, 13)],
        "b".to_string() => vec![(0, 20)],
      }
    }
  );
  assert_eq!(
    net.kv(KvService::LinKv).get("log-a"),
    Some(json!([10, 11, 12, 13]))
  );
}

#[tokio::test(flavor = "multi_thread")]
async fn log_test_concurrent_appends_get_distinct_offsets() {
  let net = SimNetwork::new(5);
  let config = NodeConfig::default();
  let nodes = net.spawn(|m| ReplicatedLog::new(m, &config));
  let mut handles = Vec::new();
  for i in 0..50i64 {
    let net = net.clone();
    handles.push(tokio::spawn(async move {
      let dest = format!("n{}", i % 5);
      (send(&net, &dest, "hot", 100 + i).await, 100 + i)
    }));
  }
  let mut assigned = Vec::new();
  for h in handles {
    assigned.push(h.await.unwrap());
  }
  let offsets = assigned.iter().map(|(o, _)| *o).collect::<BTreeSet<_>>();
  assert_eq!(offsets, (0..50).collect::<BTreeSet<u64>>());

  let reply = net
    .call("n3", Payload::Poll { offsets: btreemap! {"hot".to_string() => 0} })
    .await
    .unwrap();
  let entries = match reply {
    Payload::PollOk { mut msgs } => msgs.remove("hot").unwrap(),
    other => panic!("unexpected reply {:?}", other),
  };
  assert_eq!(entries.len(), 50);
  for (offset, msg) in assigned {
    assert_eq!(entries[offset as usize], (offset, msg));
  }
  // Every node's cache agrees with the durable list once resynced.
  for node in nodes.iter() {
    node.poll(btreemap! {"hot".to_string() => 0}).await;
    assert_eq!(node.entries("hot", 0), entries);
  }
}

#[tokio::test(flavor = "multi_thread")]
async fn log_test_committed_offsets() {
  let net = SimNetwork::new(1);
  let config = NodeConfig::default();
  net.spawn(|m| ReplicatedLog::new(m, &config));
  let commit = Payload::CommitOffsets {
    offsets: btreemap! {"a".to_string() => 4, "b".to_string() => 1},
  };
  assert_eq!(net.call("n0", commit).await.unwrap(), Payload::CommitOffsetsOk);
  let list = Payload::ListCommittedOffsets {
    keys: vec!["a".to_string(), "z".to_string()],
  };
  assert_eq!(
    net.call("n0", list).await.unwrap(),
    Payload::ListCommittedOffsetsOk {
      offsets: btreemap! {"a".to_string() => 4},
    }
  );
}
