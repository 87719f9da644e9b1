use crate::core::{
  Body, Error, Message, Messenger, Payload, PeerId, Result, Service, LOG_LEVEL,
};
use crate::{debug, error, info, warn};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
  stdin, stdout, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt,
  BufReader,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

/// A message whose body has not been validated yet. Keeping the envelope
/// lets a malformed body still be answered.
#[derive(Deserialize)]
struct RawMessage {
  src: PeerId,
  dest: PeerId,
  body: Value,
}

enum Inbound {
  Valid(Message),
  Malformed {
    src: PeerId,
    dest: PeerId,
    msg_id: Option<u64>,
    reason: String,
  },
}

fn decode(line: &str) -> Result<Inbound> {
  let raw: RawMessage = serde_json::from_str(line)?;
  let msg_id = raw.body.get("msg_id").and_then(Value::as_u64);
  Ok(match serde_json::from_value::<Body>(raw.body) {
    Ok(body) => Inbound::Valid(Message {
      src: raw.src,
      dest: raw.dest,
      body: body,
    }),
    Err(e) => Inbound::Malformed {
      src: raw.src,
      dest: raw.dest,
      msg_id: msg_id,
      reason: e.to_string(),
    },
  })
}

fn encode(src: &str, dest: &str, body: Body) -> Result<String> {
  let msg = Message {
    src: src.to_string(),
    dest: dest.to_string(),
    body: body,
  };
  Ok(serde_json::to_string(&msg)?)
}

struct NodeState {
  id: PeerId,
  peers: Vec<PeerId>,
  next_msg_id: AtomicU64,
  callbacks: Mutex<HashMap<u64, oneshot::Sender<Payload>>>,
  outbound: UnboundedSender<String>,
}

/// A cluster member speaking newline-delimited JSON.
///
/// The node waits for `init`, answers it, and only then builds the workload
/// [`Service`] with a handle to itself. Every later request is handled on its
/// own task; replies to this node's own RPCs are routed back to the waiting
/// caller by `in_reply_to`.
#[derive(Clone)]
pub struct Node {
  state: Arc<NodeState>,
}
impl Node {
  /// Runs over the process's stdin and stdout until stdin closes.
  pub async fn run<S, F>(factory: F) -> Result<()>
  where
    S: Service,
    F: FnOnce(Arc<dyn Messenger>) -> S + Send,
  {
    Self::run_with(BufReader::new(stdin()), stdout(), factory).await
  }

  pub async fn run_with<R, W, S, F>(
    reader: R,
    writer: W,
    factory: F,
  ) -> Result<()>
  where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
    S: Service,
    F: FnOnce(Arc<dyn Messenger>) -> S + Send,
  {
    let (tx, rx) = unbounded_channel();
    tokio::spawn(write_loop(writer, rx));
    let mut lines = reader.lines();

    let (node, init) = loop {
      let line = match lines.next_line().await? {
        Some(line) => line,
        None => return Ok(()),
      };
      if line.trim().is_empty() {
        continue;
      }
      match decode(&line) {
        Ok(Inbound::Valid(msg)) => {
          if let Payload::Init { node_id, node_ids } = &msg.body.payload {
            let node = Node::new(node_id.clone(), node_ids.clone(), tx.clone());
            break (node, msg);
          }
          let err = Error::NotInitialized;
          reject(&tx, &msg.dest, &msg.src, msg.body.msg_id, &err);
        }
        Ok(Inbound::Malformed {
          src,
          dest,
          msg_id,
          reason,
        }) => reject(&tx, &dest, &src, msg_id, &Error::Malformed(reason)),
        Err(e) => warn!(LOG_LEVEL, "uninitialized", format!("dropped: {}", e)),
      }
    };
    info!(
      LOG_LEVEL,
      node.id(),
      format!("initialized with peers {:?}", node.peers())
    );
    node.reply(&init, Payload::InitOk).await?;
    let messenger: Arc<dyn Messenger> = Arc::new(node.clone());
    let service = Arc::new(factory(messenger));

    while let Some(line) = lines.next_line().await? {
      if line.trim().is_empty() {
        continue;
      }
      match decode(&line) {
        Ok(Inbound::Valid(msg)) => node.route(&service, msg),
        Ok(Inbound::Malformed {
          src,
          dest: _,
          msg_id,
          reason,
        }) => {
          warn!(
            LOG_LEVEL,
            node.id(),
            format!("malformed message from {}: {}", src, reason)
          );
          reject(&tx, node.id(), &src, msg_id, &Error::Malformed(reason));
        }
        Err(e) => {
          warn!(LOG_LEVEL, node.id(), format!("undecodable line: {}", e))
        }
      }
    }
    debug!(LOG_LEVEL, node.id(), "input closed");
    Ok(())
  }

  fn new(
    id: PeerId,
    peers: Vec<PeerId>,
    outbound: UnboundedSender<String>,
  ) -> Node {
    Node {
      state: Arc::new(NodeState {
        id: id,
        peers: peers,
        next_msg_id: AtomicU64::new(1),
        callbacks: Mutex::new(HashMap::new()),
        outbound: outbound,
      }),
    }
  }

  fn next_msg_id(&self) -> u64 {
    self.state.next_msg_id.fetch_add(1, Ordering::Relaxed)
  }

  fn route<S: Service>(&self, service: &Arc<S>, msg: Message) {
    if let Some(id) = msg.body.in_reply_to {
      self.complete(id, msg.body.payload);
      return;
    }
    if let Payload::Init { .. } = msg.body.payload {
      warn!(LOG_LEVEL, self.id(), format!("repeated init from {}", msg.src));
      let node = self.clone();
      tokio::spawn(async move { node.reply(&msg, Payload::InitOk).await });
      return;
    }
    let node = self.clone();
    let service = service.clone();
    tokio::spawn(async move { node.dispatch(service.as_ref(), msg).await });
  }

  fn complete(&self, in_reply_to: u64, payload: Payload) {
    let waiting = self.state.callbacks.lock().remove(&in_reply_to);
    match waiting {
      Some(tx) => {
        let _ = tx.send(payload);
      }
      None => debug!(
        LOG_LEVEL,
        self.id(),
        format!("late {} for {}", payload.kind(), in_reply_to)
      ),
    }
  }

  async fn dispatch<S: Service>(&self, service: &S, msg: Message) {
    let payload = match service.recv(&msg.src, msg.body.payload.clone()).await {
      Ok(payload) => payload,
      Err(e) => {
        debug!(
          LOG_LEVEL,
          self.id(),
          format!("{} from {} failed: {}", msg.body.payload.kind(), msg.src, e)
        );
        Payload::error(&e)
      }
    };
    if msg.body.msg_id.is_none() {
      return;
    }
    if let Err(e) = self.reply(&msg, payload).await {
      error!(
        LOG_LEVEL,
        self.id(),
        format!("could not reply to {}: {}", msg.src, e)
      );
      if let Error::Json(_) = e {
        let _ = self.reply(&msg, Payload::error(&e)).await;
      }
    }
  }
}
#[async_trait]
impl Messenger for Node {
  fn id(&self) -> &str {
    &self.state.id
  }

  fn peers(&self) -> &[PeerId] {
    &self.state.peers
  }

  async fn deliver(&self, dest: &str, mut body: Body) -> Result<()> {
    if body.msg_id.is_none() {
      body.msg_id = Some(self.next_msg_id());
    }
    let line = encode(self.id(), dest, body)?;
    self.state.outbound.send(line).map_err(|_| Error::Closed)
  }

  async fn rpc(
    &self,
    dest: &str,
    payload: Payload,
    timeout: Duration,
  ) -> Result<Payload> {
    let msg_id = self.next_msg_id();
    let (tx, rx) = oneshot::channel();
    self.state.callbacks.lock().insert(msg_id, tx);
    let body = Body {
      msg_id: Some(msg_id),
      in_reply_to: None,
      payload: payload,
    };
    if let Err(e) = self.deliver(dest, body).await {
      self.state.callbacks.lock().remove(&msg_id);
      return Err(e);
    }
    match tokio::time::timeout(timeout, rx).await {
      Ok(Ok(reply)) => reply.into_result(),
      Ok(Err(_)) => Err(Error::Closed),
      Err(_) => {
        self.state.callbacks.lock().remove(&msg_id);
        Err(Error::Timeout(dest.to_string()))
      }
    }
  }
}

fn reject(
  tx: &UnboundedSender<String>,
  src: &str,
  dest: &str,
  msg_id: Option<u64>,
  err: &Error,
) {
  if msg_id.is_none() {
    return;
  }
  let body = Body {
    msg_id: None,
    in_reply_to: msg_id,
    payload: Payload::error(err),
  };
  match encode(src, dest, body) {
    Ok(line) => {
      let _ = tx.send(line);
    }
    Err(e) => error!(LOG_LEVEL, src, format!("could not reject: {}", e)),
  }
}

async fn write_loop<W>(mut writer: W, mut rx: UnboundedReceiver<String>)
where
  W: AsyncWrite + Unpin,
{
  while let Some(mut line) = rx.recv().await {
    line.push('\n');
    let written = async {
      writer.write_all(line.as_bytes()).await?;
      writer.flush().await
    };
    if let Err(e) = written.await {
      error!(LOG_LEVEL, "writer", format!("output closed: {}", e));
      break;
    }
  }
}
