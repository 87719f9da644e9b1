use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Identifies a cluster member, a client, or a durable store service.
pub type PeerId = String;

/// Topic name of the replicated log.
pub type Topic = String;

/// The envelope every message travels in.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Message {
  pub src: PeerId,
  pub dest: PeerId,
  pub body: Body,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Body {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub msg_id: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub in_reply_to: Option<u64>,
  #[serde(flatten)]
  pub payload: Payload,
}
impl Body {
  pub fn new(payload: Payload) -> Body {
    Body {
      msg_id: None,
      in_reply_to: None,
      payload: payload,
    }
  }
}

/// Every message kind, validated once at decode time. The `type` field of the
/// body selects the variant.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
  Init {
    node_id: PeerId,
    node_ids: Vec<PeerId>,
  },
  InitOk,
  Error {
    code: u32,
    #[serde(default)]
    text: String,
  },
  Generate,
  GenerateOk {
    id: String,
  },
  Broadcast {
    message: i64,
  },
  MultiBroadcast {
    message: Vec<i64>,
  },
  BroadcastOk,
  /// A client read carries no key; a durable store read does.
  Read {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
  },
  ReadOk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    messages: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
  },
  Topology {
    topology: BTreeMap<PeerId, Vec<PeerId>>,
  },
  TopologyOk,
  Add {
    delta: i64,
  },
  AddOk,
  Local,
  LocalOk {
    value: i64,
  },
  Send {
    key: Topic,
    msg: i64,
  },
  SendOk {
    offset: u64,
  },
  Poll {
    offsets: BTreeMap<Topic, u64>,
  },
  PollOk {
    msgs: BTreeMap<Topic, Vec<(u64, i64)>>,
  },
  CommitOffsets {
    offsets: BTreeMap<Topic, u64>,
  },
  CommitOffsetsOk,
  ListCommittedOffsets {
    keys: Vec<Topic>,
  },
  ListCommittedOffsetsOk {
    offsets: BTreeMap<Topic, u64>,
  },
  Txn {
    txn: Vec<MicroOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from: Option<PeerId>,
  },
  TxnOk {
    txn: Vec<MicroOp>,
  },
  Write {
    key: String,
    value: Value,
  },
  WriteOk,
  Cas {
    key: String,
    from: Value,
    to: Value,
    #[serde(default)]
    create_if_not_exists: bool,
  },
  CasOk,
}
impl Payload {
  pub fn kind(&self) -> &'static str {
    match self {
      Payload::Init { .. } => "init",
      Payload::InitOk => "init_ok",
      Payload::Error { .. } => "error",
      Payload::Generate => "generate",
      Payload::GenerateOk { .. } => "generate_ok",
      Payload::Broadcast { .. } => "broadcast",
      Payload::MultiBroadcast { .. } => "multi_broadcast",
      Payload::BroadcastOk => "broadcast_ok",
      Payload::Read { .. } => "read",
      Payload::ReadOk { .. } => "read_ok",
      Payload::Topology { .. } => "topology",
      Payload::TopologyOk => "topology_ok",
      Payload::Add { .. } => "add",
      Payload::AddOk => "add_ok",
      Payload::Local => "local",
      Payload::LocalOk { .. } => "local_ok",
      Payload::Send { .. } => "send",
      Payload::SendOk { .. } => "send_ok",
      Payload::Poll { .. } => "poll",
      Payload::PollOk { .. } => "poll_ok",
      Payload::CommitOffsets { .. } => "commit_offsets",
      Payload::CommitOffsetsOk => "commit_offsets_ok",
      Payload::ListCommittedOffsets { .. } => "list_committed_offsets",
      Payload::ListCommittedOffsetsOk { .. } => "list_committed_offsets_ok",
      Payload::Txn { .. } => "txn",
      Payload::TxnOk { .. } => "txn_ok",
      Payload::Write { .. } => "write",
      Payload::WriteOk => "write_ok",
      Payload::Cas { .. } => "cas",
      Payload::CasOk => "cas_ok",
    }
  }

  pub fn error(err: &Error) -> Payload {
    Payload::Error {
      code: err.code().into(),
      text: err.to_string(),
    }
  }

  /// Turns an `error` reply back into an `Err`.
  pub fn into_result(self) -> Result<Payload> {
    match self {
      Payload::Error { code, text } => Err(Error::from_code(code, text)),
      other => Ok(other),
    }
  }

  pub fn unsupported(self) -> Error {
    Error::NotSupported(self.kind().to_string())
  }
}

#[derive(
  Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum OpKind {
  #[serde(rename = "r")]
  Read,
  #[serde(rename = "w")]
  Write,
}

/// One `[op, key, value]` step of a transaction. The value slot is `null` in
/// requested reads and carries the observed value in replies.
#[derive(
  Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct MicroOp(pub OpKind, pub i64, pub Option<i64>);
impl MicroOp {
  pub fn read(key: i64) -> MicroOp {
    MicroOp(OpKind::Read, key, None)
  }

  pub fn write(key: i64, value: i64) -> MicroOp {
    MicroOp(OpKind::Write, key, Some(value))
  }
}

#[cfg(test)]
use serde_json::json;

#[test]
fn test_body_wire_format() {
  let body: Body = serde_json::from_value(json!({
    "type": "txn",
    "msg_id": 3,
    "txn": [["r", 1, null], ["w", 2, 5]]
  }))
  .unwrap();
  assert_eq!(body.msg_id, Some(3));
  assert_eq!(
    body.payload,
    Payload::Txn {
      txn: vec![MicroOp::read(1), MicroOp::write(2, 5)],
      from: None
    }
  );

  let reply = Body {
    msg_id: Some(9),
    in_reply_to: Some(4),
    payload: Payload::PollOk {
      msgs: vec![("k1".to_string(), vec![(0, 7), (1, 8)])]
        .into_iter()
        .collect(),
    },
  };
  assert_eq!(
    serde_json::to_value(&reply).unwrap(),
    json!({
      "type": "poll_ok",
      "msg_id": 9,
      "in_reply_to": 4,
      "msgs": {"k1": [[0, 7], [1, 8]]}
    })
  );
}

#[test]
fn test_read_variants_share_a_tag() {
  let client: Payload = serde_json::from_value(json!({"type": "read"})).unwrap();
  assert_eq!(client, Payload::Read { key: None });
  let store: Payload =
    serde_json::from_value(json!({"type": "read", "key": "n1"})).unwrap();
  assert_eq!(store, Payload::Read { key: Some("n1".to_string()) });
  let counter = Payload::ReadOk {
    messages: None,
    value: Some(json!(12)),
  };
  assert_eq!(
    serde_json::to_value(&counter).unwrap(),
    json!({"type": "read_ok", "value": 12})
  );
}

#[test]
fn test_missing_field_is_rejected() {
  let res = serde_json::from_value::<Body>(json!({"type": "send", "key": "k"}));
  assert!(res.is_err());
  let err = Payload::Error {
    code: 22,
    text: "nope".to_string(),
  };
  assert!(matches!(err.into_result(), Err(Error::Conflict(_))));
}
