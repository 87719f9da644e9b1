use converge::config::NodeConfig;
use converge::core::Node;
use converge::workloads::{Counter, UniqueIds};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{
  duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines,
};
use tokio::task::JoinHandle;
use tokio::time::timeout;

struct Harness {
  input: DuplexStream,
  output: Lines<BufReader<DuplexStream>>,
  node: JoinHandle<converge::core::Result<()>>,
}
impl Harness {
  fn start<F, S>(factory: F) -> Harness
  where
    S: converge::core::Service,
    F: FnOnce(std::sync::Arc<dyn converge::core::Messenger>) -> S
      + Send
      + 'static,
  {
    let (input, node_in) = duplex(1 << 16);
    let (node_out, output) = duplex(1 << 16);
    let node = tokio::spawn(Node::run_with(BufReader::new(node_in), node_out, factory));
    Harness {
      input: input,
      output: BufReader::new(output).lines(),
      node: node,
    }
  }

  async fn send(&mut self, msg: Value) {
    let mut line = msg.to_string();
    line.push('\n');
    self.input.write_all(line.as_bytes()).await.unwrap();
  }

  async fn recv(&mut self) -> Value {
    let line = timeout(Duration::from_secs(5), self.output.next_line())
      .await
      .expect("node went quiet")
      .unwrap()
      .expect("node closed its output");
    serde_json::from_str(&line).unwrap()
  }

  async fn init(&mut self, peers: &[&str]) {
    self
      .send(json!({
        "src": "c0",
        "dest": peers[0],
        "body": {"type": "init", "msg_id": 1, "node_id": peers[0], "node_ids": peers}
      }))
      .await;
    let reply = self.recv().await;
    assert_eq!(reply["body"]["type"], "init_ok");
    assert_eq!(reply["body"]["in_reply_to"], 1);
  }
}

#[tokio::test(flavor = "multi_thread")]
async fn node_test_handshake_and_replies() {
  let mut h = Harness::start(UniqueIds::new);
  h.send(json!({"src": "c1", "dest": "n0", "body": {"type": "generate", "msg_id": 1}}))
    .await;
  let early = h.recv().await;
  assert_eq!(early["body"]["type"], "error");
  assert_eq!(early["body"]["code"], 11);
  assert_eq!(early["body"]["in_reply_to"], 1);

  h.init(&["n0", "n1"]).await;

  // No msg_id, no reply.
  h.send(json!({"src": "c1", "dest": "n0", "body": {"type": "generate"}})).await;
  h.send(json!({"src": "c1", "dest": "n0", "body": {"type": "generate", "msg_id": 2}}))
    .await;
  let reply = h.recv().await;
  assert_eq!(reply["src"], "n0");
  assert_eq!(reply["dest"], "c1");
  assert_eq!(reply["body"]["type"], "generate_ok");
  assert_eq!(reply["body"]["in_reply_to"], 2);
  let id = reply["body"]["id"].as_str().unwrap().to_string();
  assert!(id.starts_with("n0-"));

  h.send(json!({"src": "c1", "dest": "n0", "body": {"type": "generate", "msg_id": 3}}))
    .await;
  let reply = h.recv().await;
  assert_ne!(reply["body"]["id"].as_str().unwrap(), id);
}

#[tokio::test(flavor = "multi_thread")]
async fn node_test_rejects_bad_requests() {
  let mut h = Harness::start(UniqueIds::new);
  h.init(&["n0"]).await;

  h.send(json!({"src": "c1", "dest": "n0", "body": {"type": "broadcast", "msg_id": 4}}))
    .await;
  let reply = h.recv().await;
  assert_eq!(reply["body"]["type"], "error");
  assert_eq!(reply["body"]["code"], 12);
  assert_eq!(reply["body"]["in_reply_to"], 4);

  h.send(json!({"src": "c1", "dest": "n0", "body": {"type": "add", "delta": 1, "msg_id": 5}}))
    .await;
  let reply = h.recv().await;
  assert_eq!(reply["body"]["code"], 10);
  assert_eq!(reply["body"]["in_reply_to"], 5);

  h.input.write_all(b"not json\n").await.unwrap();
  h.send(json!({"src": "c1", "dest": "n0", "body": {"type": "generate", "msg_id": 6}}))
    .await;
  assert_eq!(h.recv().await["body"]["in_reply_to"], 6);

  drop(h.input);
  let finished = timeout(Duration::from_secs(5), h.node).await.unwrap();
  assert!(finished.unwrap().is_ok());
}

/// Serves one client `read` against a counter node, playing the store and
/// peer n1. With `withhold` set, n1 stays silent and the id of its pending
/// `local` is returned along with the total.
async fn counter_read(
  h: &mut Harness,
  msg_id: u64,
  withhold: bool,
) -> (i64, Option<Value>) {
  h.send(json!({"src": "c1", "dest": "n0", "body": {"type": "read", "msg_id": msg_id}}))
    .await;
  let mut unanswered = None;
  loop {
    let msg = h.recv().await;
    let body = &msg["body"];
    match (msg["dest"].as_str().unwrap(), body["type"].as_str().unwrap()) {
      ("seq-kv", "read") => {
        assert_eq!(body["key"], "n0");
        let reply = json!({"src": "seq-kv", "dest": "n0", "body": {
          "type": "error", "code": 20, "text": "not found",
          "in_reply_to": body["msg_id"],
        }});
        h.send(reply).await;
      }
      ("n1", "local") if withhold => unanswered = Some(body["msg_id"].clone()),
      ("n1", "local") => {
        let reply = json!({"src": "n1", "dest": "n0", "body": {
          "type": "local_ok", "value": 42, "in_reply_to": body["msg_id"],
        }});
        h.send(reply).await;
      }
      ("c1", "read_ok") => {
        assert_eq!(body["in_reply_to"], msg_id);
        return (body["value"].as_i64().unwrap(), unanswered);
      }
      other => panic!("unexpected message {:?}", other),
    }
  }
}

#[tokio::test(flavor = "multi_thread")]
async fn node_test_rpc_replies_are_correlated() {
  let config = NodeConfig {
    request_timeout: Duration::from_millis(200),
    ..NodeConfig::default()
  };
  let mut h = Harness::start(move |m| Counter::new(m, &config));
  h.init(&["n0", "n1"]).await;

  // The store and n1 are asked in either order before the client is
  // answered.
  assert_eq!(counter_read(&mut h, 7, false).await, (42, None));

  // A silent peer counts as zero once its request times out.
  let (total, late) = counter_read(&mut h, 8, true).await;
  assert_eq!(total, 0);
  let late = late.expect("n1 was asked for its partial sum");

  // Its reply arriving afterwards is dropped and the node keeps serving.
  h.send(json!({"src": "n1", "dest": "n0", "body": {
    "type": "local_ok", "value": 1000, "in_reply_to": late,
  }}))
  .await;
  assert_eq!(counter_read(&mut h, 9, false).await, (42, None));
}
