use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

/// Error codes understood by every participant of the wire protocol. Codes
/// below 1000 are reserved by the protocol itself.
#[derive(
  Clone, Copy, Debug, Eq, Hash, PartialEq, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u32)]
pub enum ErrorCode {
  Timeout = 0,
  NodeNotFound = 1,
  NotSupported = 10,
  TemporarilyUnavailable = 11,
  MalformedRequest = 12,
  Crash = 13,
  Abort = 14,
  KeyDoesNotExist = 20,
  KeyAlreadyExists = 21,
  PreconditionFailed = 22,
  TxnConflict = 30,
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("malformed request: {0}")]
  Malformed(String),
  #[error("{0} is not supported by this node")]
  NotSupported(String),
  #[error("node has not been initialized")]
  NotInitialized,
  #[error("rpc to {0} timed out")]
  Timeout(String),
  #[error("transport failure: {0}")]
  Transport(String),
  #[error("key does not exist: {0}")]
  KeyNotFound(String),
  #[error("compare-and-swap conflict: {0}")]
  Conflict(String),
  #[error("remote error {code}: {text}")]
  Remote { code: u32, text: String },
  #[error("unexpected reply: {0}")]
  UnexpectedReply(String),
  #[error("could not encode or decode json: {0}")]
  Json(#[from] serde_json::Error),
  #[error(transparent)]
  Io(#[from] std::io::Error),
  #[error("node is shutting down")]
  Closed,
}
impl Error {
  pub fn code(&self) -> ErrorCode {
    match self {
      Error::Malformed(_) => ErrorCode::MalformedRequest,
      Error::NotSupported(_) => ErrorCode::NotSupported,
      Error::NotInitialized => ErrorCode::TemporarilyUnavailable,
      Error::Timeout(_) => ErrorCode::Timeout,
      Error::Transport(_) => ErrorCode::TemporarilyUnavailable,
      Error::KeyNotFound(_) => ErrorCode::KeyDoesNotExist,
      Error::Conflict(_) => ErrorCode::PreconditionFailed,
      Error::Remote { code, .. } => {
        ErrorCode::try_from(*code).unwrap_or(ErrorCode::Crash)
      }
      Error::UnexpectedReply(_) => ErrorCode::Crash,
      Error::Json(_) => ErrorCode::Crash,
      Error::Io(_) => ErrorCode::Crash,
      Error::Closed => ErrorCode::TemporarilyUnavailable,
    }
  }

  /// Rebuilds an error from an `error` reply, so callers see the same
  /// variant whether the failure happened locally or on a remote node.
  pub fn from_code(code: u32, text: String) -> Error {
    match ErrorCode::try_from(code) {
      Ok(ErrorCode::KeyDoesNotExist) => Error::KeyNotFound(text),
      Ok(ErrorCode::PreconditionFailed) => Error::Conflict(text),
      Ok(ErrorCode::MalformedRequest) => Error::Malformed(text),
      Ok(ErrorCode::NotSupported) => Error::NotSupported(text),
      _ => Error::Remote {
        code: code,
        text: text,
      },
    }
  }

  /// CAS loops retry on these and surface everything else.
  pub fn is_conflict(&self) -> bool {
    matches!(self, Error::Conflict(_) | Error::KeyNotFound(_))
  }
}

pub type Result<T> = std::result::Result<T, Error>;

#[test]
fn test_error_code_round_trip() {
  let conflict = Error::Conflict("expected [1], had [1, 2]".to_string());
  let code: u32 = conflict.code().into();
  assert_eq!(code, 22);
  assert!(Error::from_code(code, conflict.to_string()).is_conflict());

  let missing = Error::from_code(20, "log-7".to_string());
  assert!(matches!(missing, Error::KeyNotFound(_)));
  assert_eq!(missing.code(), ErrorCode::KeyDoesNotExist);

  let unknown = Error::from_code(1234, "custom".to_string());
  assert_eq!(unknown.code(), ErrorCode::Crash);
  assert!(!unknown.is_conflict());
}
