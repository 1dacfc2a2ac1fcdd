//! Request and response envelopes.
//!
//! An envelope is the unit that crosses a transport. Requests carry the
//! correlation identity, the type tag used to resolve a handler and the
//! caller's time budget; responses carry the same identity plus an
//! [`Outcome`].
//!
//! Envelopes are immutable once built: fields are private and only the
//! consuming `with_*` builders can change them before the envelope is sent.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CallError, CallResult};
use crate::message::BusMessage;

/// Milliseconds since the unix epoch, as used for `sent_at_ms`.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Identity
// =============================================================================

/// Unique token linking an outbound request to its eventual response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generates a fresh random (UUID v4) id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The semantic family a message belongs to.
///
/// Commands and queries have exactly one handler and produce a response;
/// events fan out to any number of handlers and never answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// State-changing request with a single handler.
    Command,
    /// Read-only request with a single handler.
    Query,
    /// Notification delivered to every registered handler.
    Event,
}

impl MessageKind {
    /// Returns the lowercase name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Query => "query",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Request Envelope
// =============================================================================

/// Time left to a request when it is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// The deadline already passed.
    Expired,
    /// Time left before the deadline.
    Remaining(Duration),
    /// No deadline (events, or a `u64::MAX` timeout).
    Unbounded,
}

/// An inbound or outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    id: CorrelationId,
    type_key: String,
    kind: MessageKind,
    /// JSON-encoded message body.
    payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    callback_address: Option<String>,
    #[serde(default)]
    synchronous: bool,
    sent_at_ms: u64,
    timeout_ms: u64,
}

impl RequestEnvelope {
    /// Creates an envelope stamped with the current time and no deadline.
    pub fn new(
        id: CorrelationId,
        type_key: impl Into<String>,
        kind: MessageKind,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id,
            type_key: type_key.into(),
            kind,
            payload: payload.into(),
            callback_address: None,
            synchronous: false,
            sent_at_ms: epoch_millis(),
            timeout_ms: u64::MAX,
        }
    }

    /// Serializes `message` and wraps it using its registered type tag.
    pub fn for_message<M: BusMessage>(id: CorrelationId, message: &M) -> CallResult<Self> {
        let payload = serde_json::to_string(message)?;
        Ok(Self::new(id, M::TYPE_KEY, M::KIND, payload))
    }

    /// Sets the caller's time budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the caller's time budget in milliseconds.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Sets where the response must be delivered. An empty address means none.
    pub fn with_callback(mut self, address: impl Into<String>) -> Self {
        let address = address.into();
        self.callback_address = (!address.is_empty()).then_some(address);
        self
    }

    /// Marks the envelope as coming from a blocking caller.
    pub fn with_synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    /// Overrides the send timestamp.
    pub fn with_sent_at_ms(mut self, sent_at_ms: u64) -> Self {
        self.sent_at_ms = sent_at_ms;
        self
    }

    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    pub fn type_key(&self) -> &str {
        &self.type_key
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// The remote callback address, if the response travels over a callback channel.
    pub fn callback_address(&self) -> Option<&str> {
        self.callback_address.as_deref()
    }

    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    pub fn sent_at_ms(&self) -> u64 {
        self.sent_at_ms
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Computes the time left as of `now_ms`, where the deadline is `sent_at_ms + timeout_ms`.
    pub fn budget_at(&self, now_ms: u64) -> Budget {
        if self.timeout_ms == u64::MAX {
            return Budget::Unbounded;
        }
        match self.sent_at_ms.checked_add(self.timeout_ms) {
            None => Budget::Unbounded,
            Some(deadline) if deadline <= now_ms => Budget::Expired,
            Some(deadline) => Budget::Remaining(Duration::from_millis(deadline - now_ms)),
        }
    }

    /// Computes the time left as of now.
    pub fn budget(&self) -> Budget {
        self.budget_at(epoch_millis())
    }
}

// =============================================================================
// Response Envelope
// =============================================================================

/// Result of handling a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The handler completed; `result` is the JSON-encoded return value.
    Ok { result: String },
    /// The handler (or payload decoding) failed.
    Failed { reason: String },
}

/// The answer to a [`RequestEnvelope`], keyed by the same correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    id: CorrelationId,
    #[serde(flatten)]
    outcome: Outcome,
}

impl ResponseEnvelope {
    /// Creates a successful response.
    pub fn ok(id: CorrelationId, result: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Ok {
                result: result.into(),
            },
        }
    }

    /// Creates a failure response.
    pub fn failed(id: CorrelationId, reason: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, Outcome::Ok { .. })
    }

    /// Returns the raw JSON result, or the failure as a [`CallError`].
    pub fn into_result(self) -> CallResult<String> {
        match self.outcome {
            Outcome::Ok { result } => Ok(result),
            Outcome::Failed { reason } => Err(CallError::Handler { reason }),
        }
    }

    /// Deserializes the result into `T`.
    pub fn decode<T: DeserializeOwned>(self) -> CallResult<T> {
        let raw = self.into_result()?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> RequestEnvelope {
        RequestEnvelope::new("abc".into(), "orders.Get", MessageKind::Query, "{}")
    }

    #[test]
    fn test_budget_expired_when_deadline_passed() {
        let env = envelope().with_sent_at_ms(1_000).with_timeout_ms(500);
        assert_eq!(env.budget_at(1_500), Budget::Expired);
        assert_eq!(env.budget_at(2_000), Budget::Expired);
    }

    #[test]
    fn test_budget_remaining() {
        let env = envelope().with_sent_at_ms(1_000).with_timeout_ms(500);
        assert_eq!(
            env.budget_at(1_200),
            Budget::Remaining(Duration::from_millis(300))
        );
    }

    #[test]
    fn test_budget_unbounded_for_max_timeout() {
        let env = envelope().with_sent_at_ms(u64::MAX - 5);
        assert_eq!(env.budget_at(0), Budget::Unbounded);
        let env = envelope().with_sent_at_ms(u64::MAX - 5).with_timeout_ms(10);
        assert_eq!(env.budget_at(0), Budget::Unbounded);
    }

    #[test]
    fn test_empty_callback_means_none() {
        let env = envelope().with_callback("");
        assert_eq!(env.callback_address(), None);
        let env = envelope().with_callback("http://a/cb");
        assert_eq!(env.callback_address(), Some("http://a/cb"));
    }

    #[test]
    fn test_response_wire_format() {
        let ok = ResponseEnvelope::ok("abc".into(), "\"DATA\"");
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["status"], "ok");
        assert_eq!(json["result"], "\"DATA\"");

        let failed: ResponseEnvelope =
            serde_json::from_str(r#"{"id":"x","status":"failed","reason":"boom"}"#).unwrap();
        assert!(!failed.is_ok());
        assert!(matches!(
            failed.into_result(),
            Err(CallError::Handler { reason }) if reason == "boom"
        ));
    }

    #[test]
    fn test_request_without_callback_deserializes() {
        let json = r#"{"id":"e1","type_key":"t","kind":"event","payload":"{}","sent_at_ms":1,"timeout_ms":18446744073709551615}"#;
        let env: RequestEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(env.callback_address(), None);
        assert!(!env.is_synchronous());
        assert_eq!(env.budget_at(5), Budget::Unbounded);
    }
}
