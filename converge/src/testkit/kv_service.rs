use crate::core::{Error, Payload, Result, Service};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

/// An in-memory store service answering `read`, `write` and `cas`, with the
/// error codes of the real services. Every operation is atomic.
#[derive(Default)]
pub struct MemKv {
  values: Mutex<HashMap<String, Value>>,
}
impl MemKv {
  pub fn new() -> MemKv {
    MemKv::default()
  }

  pub fn get(&self, key: &str) -> Option<Value> {
    self.values.lock().get(key).cloned()
  }

  fn cas(&self, key: String, from: Value, to: Value, create: bool) -> Result<()> {
    let mut values = self.values.lock();
    match values.get(&key) {
      None if create => {}
      None => return Err(Error::KeyNotFound(key)),
      Some(current) if *current != from => {
        return Err(Error::Conflict(format!(
          "{}: expected {}, had {}",
          key, from, current
        )))
      }
      Some(_) => {}
    }
    values.insert(key, to);
    Ok(())
  }
}
#[async_trait]
impl Service for MemKv {
  async fn recv(&self, _: &str, payload: Payload) -> Result<Payload> {
    match payload {
      Payload::Read { key: Some(key) } => match self.get(&key) {
        Some(value) => Ok(Payload::ReadOk {
          messages: None,
          value: Some(value),
        }),
        None => Err(Error::KeyNotFound(key)),
      },
      Payload::Read { key: None } => {
        Err(Error::Malformed("read without a key".to_string()))
      }
      Payload::Write { key, value } => {
        self.values.lock().insert(key, value);
        Ok(Payload::WriteOk)
      }
      Payload::Cas {
        key,
        from,
        to,
        create_if_not_exists,
      } => {
        self.cas(key, from, to, create_if_not_exists)?;
        Ok(Payload::CasOk)
      }
      other => Err(other.unsupported()),
    }
  }
}

#[cfg(test)]
use serde_json::json;

#[cfg(test)]
fn cas(key: &str, from: Value, to: Value, create: bool) -> Payload {
  Payload::Cas {
    key: key.to_string(),
    from: from,
    to: to,
    create_if_not_exists: create,
  }
}

#[test]
fn test_mem_kv_semantics() {
  let kv = MemKv::new();
  let read = Payload::Read {
    key: Some("k".to_string()),
  };
  tokio_test::block_on(async {
    let err = kv.recv("n0", read.clone()).await.unwrap_err();
    assert!(matches!(err, Error::KeyNotFound(_)));
    let err = kv.recv("n0", cas("k", json!(0), json!(1), false)).await;
    assert!(matches!(err, Err(Error::KeyNotFound(_))));

    kv.recv("n0", cas("k", json!(0), json!(1), true)).await.unwrap();
    assert_eq!(kv.get("k"), Some(json!(1)));
    let err = kv.recv("n0", cas("k", json!(0), json!(2), true)).await;
    assert!(matches!(err, Err(Error::Conflict(_))));
    kv.recv("n0", cas("k", json!(1), json!(2), false)).await.unwrap();

    let reply = kv.recv("n0", read).await.unwrap();
    assert_eq!(
      reply,
      Payload::ReadOk {
        messages: None,
        value: Some(json!(2))
      }
    );
    let write = Payload::Write {
      key: "k".to_string(),
      value: json!([1, 2]),
    };
    assert_eq!(kv.recv("n0", write).await.unwrap(), Payload::WriteOk);
    assert_eq!(kv.get("k"), Some(json!([1, 2])));
  });
}
