//! Request/response messages built from reserved jobs.
//!
//! A reserved job becomes a [`RequestMessage`] and a [`ResponseMessage`]
//! carrying the same payload and stats. Both lazily build a [`RuleMsg`], the
//! router's generic message, the first time it is read.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::queue::JobStats;

/// Message type label for messages sourced from the job queue.
pub const QUEUE_DATA_MSG_TYPE: &str = "BEANSTALKD_DATA";

/// Header set carried by a message.
pub type Headers = HashMap<String, Vec<String>>;

/// Error attached to a message by a processing stage.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Declared format of [`RuleMsg::data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Json,
    Text,
    Binary,
}

/// Generic message handed through the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMsg {
    /// Unique message id.
    pub id: Uuid,
    /// Creation time (Unix epoch milliseconds).
    pub ts: i64,
    /// Origin label, e.g. [`QUEUE_DATA_MSG_TYPE`].
    pub msg_type: String,
    /// Declared format of `data`.
    pub data_type: DataType,
    /// Structured attributes.
    pub metadata: HashMap<String, String>,
    /// Payload as text.
    pub data: String,
}

impl RuleMsg {
    /// Create a message stamped with a fresh id and the current time.
    pub fn new(
        msg_type: impl Into<String>,
        data_type: DataType,
        metadata: HashMap<String, String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts: chrono::Utc::now().timestamp_millis(),
            msg_type: msg_type.into(),
            data_type,
            metadata,
            data: data.into(),
        }
    }
}

/// Message contract the router works against.
pub trait Message: Send + Sync {
    /// Body bytes as exposed to the router.
    fn body(&self) -> Cow<'_, [u8]>;

    /// Replace the stored payload.
    fn set_body(&mut self, body: Vec<u8>);

    /// Headers; empty unless a stage populated them.
    fn headers(&self) -> &Headers;

    /// Mutable headers.
    fn headers_mut(&mut self) -> &mut Headers;

    /// Origin address. Queue-sourced messages have none.
    fn origin(&self) -> &str {
        ""
    }

    /// Request parameter lookup. Queue-sourced messages have none.
    fn param(&self, _key: &str) -> Option<&str> {
        None
    }

    /// Generic message, built on first access.
    fn msg(&self) -> &RuleMsg;

    /// Replace the generic message.
    fn set_msg(&mut self, msg: RuleMsg);

    /// Status code set by a processing stage.
    fn status_code(&self) -> Option<u16>;

    /// Set the status code.
    fn set_status_code(&mut self, code: u16);

    /// Error set by a processing stage.
    fn error(&self) -> Option<&BoxError>;

    /// Attach an error.
    fn set_error(&mut self, err: BoxError);
}

/// Fields shared by both sides of an exchange.
#[derive(Debug, Default)]
struct Parts {
    headers: Headers,
    body: Vec<u8>,
    stats: JobStats,
    msg: OnceLock<RuleMsg>,
    status_code: Option<u16>,
    err: Option<BoxError>,
}

impl Parts {
    fn new(body: Vec<u8>, stats: JobStats) -> Self {
        Self {
            body,
            stats,
            ..Self::default()
        }
    }

    fn msg_from(&self, data: &[u8]) -> &RuleMsg {
        self.msg.get_or_init(|| {
            RuleMsg::new(
                QUEUE_DATA_MSG_TYPE,
                DataType::Json,
                self.stats.clone(),
                String::from_utf8_lossy(data),
            )
        })
    }
}

macro_rules! impl_message_accessors {
    () => {
        fn set_body(&mut self, body: Vec<u8>) {
            self.parts.body = body;
        }

        fn headers(&self) -> &Headers {
            &self.parts.headers
        }

        fn headers_mut(&mut self) -> &mut Headers {
            &mut self.parts.headers
        }

        fn set_msg(&mut self, msg: RuleMsg) {
            self.parts.msg = OnceLock::from(msg);
        }

        fn status_code(&self) -> Option<u16> {
            self.parts.status_code
        }

        fn set_status_code(&mut self, code: u16) {
            self.parts.status_code = Some(code);
        }

        fn error(&self) -> Option<&BoxError> {
            self.parts.err.as_ref()
        }

        fn set_error(&mut self, err: BoxError) {
            self.parts.err = Some(err);
        }
    };
}

/// Inbound side of an exchange: the job as reserved.
#[derive(Debug)]
pub struct RequestMessage {
    parts: Parts,
}

impl RequestMessage {
    /// Wrap a job payload and its stats.
    pub fn new(body: Vec<u8>, stats: JobStats) -> Self {
        Self {
            parts: Parts::new(body, stats),
        }
    }

    /// Job stats the message was built from.
    pub fn stats(&self) -> &JobStats {
        &self.parts.stats
    }
}

impl Message for RequestMessage {
    fn body(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(&self.parts.body)
    }

    fn msg(&self) -> &RuleMsg {
        self.parts.msg_from(&self.parts.body)
    }

    impl_message_accessors!();
}

/// Outbound side of an exchange.
///
/// Its body reads as the JSON encoding of the stored payload: a JSON string
/// holding the payload bytes in standard base64.
#[derive(Debug)]
pub struct ResponseMessage {
    parts: Parts,
}

impl ResponseMessage {
    /// Wrap a job payload and its stats.
    pub fn new(body: Vec<u8>, stats: JobStats) -> Self {
        Self {
            parts: Parts::new(body, stats),
        }
    }

    /// Job stats the message was built from.
    pub fn stats(&self) -> &JobStats {
        &self.parts.stats
    }

    /// Stored payload, before JSON rendering.
    pub fn raw_body(&self) -> &[u8] {
        &self.parts.body
    }
}

/// JSON encoding of a byte sequence.
pub fn encode_json_bytes(bytes: &[u8]) -> Vec<u8> {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    // A plain string always serializes.
    serde_json::to_vec(&encoded).unwrap_or_default()
}

impl Message for ResponseMessage {
    fn body(&self) -> Cow<'_, [u8]> {
        Cow::Owned(encode_json_bytes(&self.parts.body))
    }

    fn msg(&self) -> &RuleMsg {
        if let Some(msg) = self.parts.msg.get() {
            return msg;
        }
        let rendered = encode_json_bytes(&self.parts.body);
        self.parts.msg_from(&rendered)
    }

    impl_message_accessors!();
}
