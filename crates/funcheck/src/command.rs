//! Control commands sent to the subject and the replies they must produce.
//!
//! Every request is a MessagePack array whose first field is the command tag.

use std::fmt;

use funcheck_mpipe::{CLOSE_TAG, Value};

use crate::ScenarioError;
use crate::config::AddressFamily;

/// Command tags, the first field of every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum Tag {
    Close = CLOSE_TAG,
    Ping42 = 1,
    Cleanup = 2,
    Dispatch = 3,
    Check = 4,
    Shutdown = 5,
}

impl Tag {
    pub fn from_i64(tag: i64) -> Option<Self> {
        Some(match tag {
            0 => Self::Close,
            1 => Self::Ping42,
            2 => Self::Cleanup,
            3 => Self::Dispatch,
            4 => Self::Check,
            5 => Self::Shutdown,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Close => "close",
            Self::Ping42 => "ping42",
            Self::Cleanup => "cleanup",
            Self::Dispatch => "dispatch",
            Self::Check => "check",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Identity the subject assigns to a dispatched message.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(Vec<u8>);

impl MessageId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Binary(bytes) => Some(Self(bytes.clone())),
            Value::String(s) => Some(Self(s.as_bytes().to_vec())),
            _ => None,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<MessageId> for Value {
    fn from(id: MessageId) -> Self {
        Value::Binary(id.0)
    }
}

/// A request on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Ping42,
    Cleanup,
    Dispatch {
        family: AddressFamily,
        port: u16,
        peer_ready: bool,
    },
    Check,
    Shutdown {
        only_connections: bool,
    },
}

impl Request {
    pub fn tag(&self) -> Tag {
        match self {
            Self::Ping42 => Tag::Ping42,
            Self::Cleanup => Tag::Cleanup,
            Self::Dispatch { .. } => Tag::Dispatch,
            Self::Check => Tag::Check,
            Self::Shutdown { .. } => Tag::Shutdown,
        }
    }

    /// Encode as the field tuple the subject expects.
    ///
    /// Flags go out as integers, the subject reads every field as one.
    pub fn to_value(&self) -> Value {
        let tag = Value::from(self.tag() as i64);
        let fields = match *self {
            Self::Ping42 | Self::Cleanup | Self::Check => vec![tag],
            Self::Dispatch {
                family,
                port,
                peer_ready,
            } => vec![
                tag,
                Value::from(family.raw()),
                Value::from(port),
                Value::from(peer_ready as i64),
            ],
            Self::Shutdown { only_connections } => {
                vec![tag, Value::from(only_connections as i64)]
            }
        };
        Value::Array(fields)
    }
}

/// Reply fields, or an error naming the command whose reply was not an array.
fn fields<'a>(tag: Tag, reply: &'a Value) -> Result<&'a [Value], ScenarioError> {
    reply
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| unexpected(tag, reply, "an array"))
}

fn unexpected(tag: Tag, reply: &Value, expected: &'static str) -> ScenarioError {
    ScenarioError::UnexpectedReply {
        command: tag.name(),
        reply: reply.clone(),
        expected,
    }
}

/// `[42]`.
pub fn expect_42(reply: &Value) -> Result<(), ScenarioError> {
    match fields(Tag::Ping42, reply)? {
        [answer] if answer.as_i64() == Some(42) => Ok(()),
        _ => Err(unexpected(Tag::Ping42, reply, "[42]")),
    }
}

/// `[0]` for commands that answer with a single status.
pub fn expect_success(tag: Tag, reply: &Value) -> Result<(), ScenarioError> {
    match fields(tag, reply)? {
        [status] if status.as_i64() == Some(0) => Ok(()),
        _ => Err(unexpected(tag, reply, "[0]")),
    }
}

/// `[id, 0]` from a dispatch.
pub fn dispatched_id(reply: &Value) -> Result<MessageId, ScenarioError> {
    let expected = "[<message id>, 0]";
    match fields(Tag::Dispatch, reply)? {
        [id, status] if status.as_i64() == Some(0) => MessageId::from_value(id)
            .ok_or_else(|| unexpected(Tag::Dispatch, reply, expected)),
        _ => Err(unexpected(Tag::Dispatch, reply, expected)),
    }
}

/// `[id, ...]` from a check: every message the subject considers closed.
pub fn closed_ids(reply: &Value) -> Result<Vec<MessageId>, ScenarioError> {
    fields(Tag::Check, reply)?
        .iter()
        .map(|id| {
            MessageId::from_value(id)
                .ok_or_else(|| unexpected(Tag::Check, reply, "an array of message ids"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(fields: Vec<Value>) -> Value {
        Value::Array(fields)
    }

    #[test]
    fn test_dispatch_request_fields() {
        let request = Request::Dispatch {
            family: AddressFamily::V4,
            port: 2997,
            peer_ready: true,
        };
        let value = request.to_value();
        let fields = value.as_array().unwrap();
        assert_eq!(fields[0].as_i64(), Some(3));
        assert_eq!(fields[1].as_i64(), Some(libc::AF_INET as i64));
        assert_eq!(fields[2].as_u64(), Some(2997));
        assert_eq!(fields[3].as_i64(), Some(1));
    }

    #[test]
    fn test_single_field_requests() {
        for (request, tag) in [
            (Request::Ping42, 1),
            (Request::Cleanup, 2),
            (Request::Check, 4),
        ] {
            assert_eq!(request.to_value(), array(vec![Value::from(tag)]));
        }
        assert_eq!(
            Request::Shutdown {
                only_connections: false
            }
            .to_value(),
            array(vec![Value::from(5), Value::from(0)])
        );
    }

    #[test]
    fn test_ping_reply() {
        assert!(expect_42(&array(vec![Value::from(42)])).is_ok());
        assert!(expect_42(&array(vec![Value::from(41)])).is_err());
        assert!(expect_42(&Value::from(42)).is_err());
        assert!(expect_42(&array(vec![Value::from(42), Value::from(0)])).is_err());
    }

    #[test]
    fn test_dispatch_reply() {
        let id = vec![0xab; 16];
        let ok = array(vec![Value::Binary(id.clone()), Value::from(0)]);
        assert_eq!(dispatched_id(&ok).unwrap(), MessageId::new(id.clone()));

        let failed = array(vec![Value::Binary(id), Value::from(1)]);
        let err = dispatched_id(&failed).unwrap_err();
        assert_eq!(err.kind(), crate::FailureKind::UnexpectedReply);

        assert!(dispatched_id(&array(vec![Value::Nil, Value::from(0)])).is_err());
    }

    #[test]
    fn test_check_reply() {
        let reply = array(vec![Value::Binary(vec![1]), Value::Binary(vec![2])]);
        assert_eq!(
            closed_ids(&reply).unwrap(),
            vec![MessageId::new([1]), MessageId::new([2])]
        );
        assert!(closed_ids(&array(vec![])).unwrap().is_empty());
        assert!(closed_ids(&array(vec![Value::from(1)])).is_err());
    }

    #[test]
    fn test_message_id_is_hex() {
        assert_eq!(MessageId::new([0x00, 0x0f, 0xa0]).to_string(), "000fa0");
    }

    #[test]
    fn test_tag_round_trip() {
        for tag in 0..=5 {
            assert_eq!(Tag::from_i64(tag).map(|t| t as i64), Some(tag));
        }
        assert_eq!(Tag::from_i64(6), None);
    }
}
