use crate::cluster::{Courier, Dissemination};
use crate::config::{NodeConfig, WriteSemantics};
use crate::core::{
  Error, Messenger, MicroOp, OpKind, Payload, PeerId, Result, Service,
};
use crate::trace;
use crate::workloads::LOG_LEVEL;
use async_trait::async_trait;
use itertools::Itertools;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// The writes of one transaction, stamped with the order in which the
/// originating node applied it.
pub type WriteSet = (u64, Vec<MicroOp>);

/// Write sets travel as `txn{txn, from}`, acknowledged by `txn_ok`. A batch
/// is flattened in stamp order, so a peer replays one origin's writes in the
/// order they were made.
pub struct TxnCourier {
  origin: PeerId,
}
impl Courier<WriteSet> for TxnCourier {
  fn package(&self, batch: Vec<WriteSet>) -> Payload {
    Payload::Txn {
      txn: batch.into_iter().flat_map(|(_, ops)| ops).collect(),
      from: Some(self.origin.clone()),
    }
  }

  fn acknowledged(&self, reply: &Payload) -> bool {
    matches!(reply, Payload::TxnOk { .. })
  }
}

struct Values {
  cells: HashMap<i64, i64>,
  applied: u64,
}

/// A totally available key/value store over integers.
///
/// Transactions run against the local map only, serialized by one lock, and
/// never abort. The writes of a client transaction are then pushed to every
/// other member, which applies them without passing them on. Members
/// converge once every write set is delivered.
pub struct TxnStore {
  messenger: Arc<dyn Messenger>,
  semantics: WriteSemantics,
  values: Mutex<Values>,
  engine: Dissemination<WriteSet>,
}
impl TxnStore {
  pub fn new(messenger: Arc<dyn Messenger>, config: &NodeConfig) -> TxnStore {
    let courier = TxnCourier {
      origin: messenger.id().to_string(),
    };
    let engine = Dissemination::new(
      messenger.clone(),
      courier,
      config.dissemination.clone(),
    );
    TxnStore {
      messenger: messenger,
      semantics: config.write_semantics,
      values: Mutex::new(Values {
        cells: HashMap::new(),
        applied: 0,
      }),
      engine: engine,
    }
  }

  /// Runs `txn` locally. Returns the transaction with every read filled in,
  /// and the stamped writes.
  pub fn apply(&self, txn: Vec<MicroOp>) -> Result<(Vec<MicroOp>, WriteSet)> {
    if let Some(op) = txn.iter().find(|op| op.0 == OpKind::Write && op.2.is_none())
    {
      return Err(Error::Malformed(format!(
        "write to key {} carries no value",
        op.1
      )));
    }
    let mut values = self.values.lock();
    let mut writes = Vec::new();
    let done = txn
      .into_iter()
      .map(|MicroOp(kind, key, value)| match (kind, value) {
        (OpKind::Read, _) => {
          let read = values.cells.get(&key).copied().unwrap_or(0);
          MicroOp(OpKind::Read, key, Some(read))
        }
        (OpKind::Write, Some(value)) => {
          let assigned = match self.semantics {
            WriteSemantics::Copy => {
              values.cells.get(&value).copied().unwrap_or(0)
            }
            WriteSemantics::Literal => value,
          };
          values.cells.insert(key, assigned);
          writes.push(MicroOp::write(key, value));
          MicroOp::write(key, value)
        }
        (OpKind::Write, None) => MicroOp(kind, key, value),
      })
      .collect_vec();
    values.applied += 1;
    Ok((done, (values.applied, writes)))
  }

  /// A sorted copy of the store.
  pub fn snapshot(&self) -> BTreeMap<i64, i64> {
    self.values.lock().cells.iter().map(|(k, v)| (*k, *v)).collect()
  }

  pub fn is_quiet(&self) -> bool {
    self.engine.is_idle()
  }
}
#[async_trait]
impl Service for TxnStore {
  async fn recv(&self, src: &str, payload: Payload) -> Result<Payload> {
    match payload {
      Payload::Txn { txn, from } => {
        let (done, writes) = self.apply(txn)?;
        match from {
          Some(origin) => trace!(
            LOG_LEVEL,
            self.messenger.id(),
            format!("replayed {} writes from {}", writes.1.len(), origin)
          ),
          None if writes.1.is_empty() => {}
          None => {
            let targets = self.messenger.others();
            self.engine.enqueue_except(&targets, &[writes], src);
          }
        }
        Ok(Payload::TxnOk { txn: done })
      }
      other => Err(other.unsupported()),
    }
  }
}

#[cfg(test)]
use crate::testkit::SimNetwork;

#[cfg(test)]
fn store(semantics: WriteSemantics) -> TxnStore {
  let net = SimNetwork::new(1);
  let config = NodeConfig {
    write_semantics: semantics,
    ..NodeConfig::default()
  };
  TxnStore::new(Arc::new(net.messenger("n0")), &config)
}

#[tokio::test]
async fn test_write_semantics() {
  let literal = store(WriteSemantics::Literal);
  let (done, writes) = literal
    .apply(vec![MicroOp::write(1, 5), MicroOp::read(1), MicroOp::read(2)])
    .unwrap();
  assert_eq!(
    done,
    vec![
      MicroOp::write(1, 5),
      MicroOp(OpKind::Read, 1, Some(5)),
      MicroOp(OpKind::Read, 2, Some(0)),
    ]
  );
  assert_eq!(writes, (1, vec![MicroOp::write(1, 5)]));

  // Copy semantics read the value slot as the key to copy from.
  let copy = store(WriteSemantics::Copy);
  copy.apply(vec![MicroOp::write(1, 5)]).unwrap();
  assert_eq!(copy.snapshot(), maplit::btreemap! {1 => 0});
  literal.apply(vec![MicroOp::write(2, 1)]).unwrap();
  let (_, writes) = copy.apply(vec![MicroOp::write(2, 1)]).unwrap();
  assert_eq!(writes.0, 2);
  assert_eq!(literal.snapshot(), maplit::btreemap! {1 => 5, 2 => 1});
}

#[tokio::test]
async fn test_malformed_txn_changes_nothing() {
  let store = store(WriteSemantics::Literal);
  let txn = vec![MicroOp::write(1, 5), MicroOp(OpKind::Write, 2, None)];
  let err = store.apply(txn).unwrap_err();
  assert!(matches!(err, Error::Malformed(_)));
  assert!(store.snapshot().is_empty());
}
