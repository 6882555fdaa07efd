//! Immutable message envelopes and their payloads.
//!
//! Every interaction inside a simulation travels as a [`Message`]: a routing
//! envelope around a strongly typed payload. Entities route messages by the
//! exact runtime type of the payload, so a payload type is the unit of
//! dispatch.

use std::any::{Any, TypeId};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{DispatchError, LifecycleError, TickworkError, ValidationError};
use crate::time::SimTime;

/// A value that can travel inside a message.
///
/// Implemented for every `'static + Send + Sync + Debug` type, including
/// `Arc<dyn Payload>` itself. Call `as_any` or `class` through a deref
/// (`(*shared).class()`) when holding a shared payload, and hand shared
/// payloads to constructors as they are: [`share`] unwraps them.
pub trait Payload: Any + Send + Sync + fmt::Debug {
    /// Upcast used for downcasting to the concrete payload type.
    fn as_any(&self) -> &dyn Any;

    /// Short, human-readable type name of the payload.
    fn class(&self) -> &'static str;
}

impl<T: Any + Send + Sync + fmt::Debug> Payload for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn class(&self) -> &'static str {
        short_type_name::<T>()
    }
}

/// Puts `payload` behind an `Arc`.
///
/// A payload that already is an `Arc<dyn Payload>` (as returned by the
/// codec) is passed through rather than wrapped a second time, so routing
/// still sees the concrete type inside.
#[must_use]
pub fn share(payload: impl Payload) -> Arc<dyn Payload> {
    match (&payload as &dyn Any).downcast_ref::<Arc<dyn Payload>>() {
        Some(shared) => Arc::clone(shared),
        None => Arc::new(payload),
    }
}

/// The payload behind `payload`, looking through one `Arc<dyn Payload>`.
pub(crate) fn unshared(payload: &dyn Payload) -> &dyn Payload {
    match payload.as_any().downcast_ref::<Arc<dyn Payload>>() {
        Some(shared) => &**shared,
        None => payload,
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Runtime identity of a payload type, used as a routing key.
#[derive(Debug, Clone, Copy)]
pub struct PayloadType {
    id: TypeId,
    name: &'static str,
}

impl PayloadType {
    /// Identity of `T`.
    #[must_use]
    pub fn of<T: Payload>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: short_type_name::<T>(),
        }
    }

    /// Identity of the concrete type behind `payload`.
    #[must_use]
    pub fn of_payload(payload: &dyn Payload) -> Self {
        let payload = unshared(payload);
        Self {
            id: payload.as_any().type_id(),
            name: payload.class(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> TypeId {
        self.id
    }

    /// Short type name, for logs and failures.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for PayloadType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PayloadType {}

impl std::hash::Hash for PayloadType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// What a message is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Request to act now.
    Action,
    /// Time-stamped effect, delivered once simulation time reaches it.
    Event,
    /// Reply to an action or event.
    Response,
    /// Failure reply carrying a [`Failure`] payload.
    Error,
}

/// An immutable routing envelope.
#[derive(Debug, Clone)]
pub struct Message {
    source: Address,
    destination: Address,
    respond_to: Address,
    sequence: u64,
    scheduled_time: SimTime,
    kind: MessageKind,
    payload: Arc<dyn Payload>,
}

impl Message {
    /// Starts a message.
    #[must_use]
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    #[must_use]
    pub const fn source(&self) -> &Address {
        &self.source
    }

    #[must_use]
    pub const fn destination(&self) -> &Address {
        &self.destination
    }

    /// Where replies go; the source unless set otherwise.
    #[must_use]
    pub const fn respond_to(&self) -> &Address {
        &self.respond_to
    }

    /// Correlation id; replies carry the id of their request.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Simulation time the message is due at.
    #[must_use]
    pub const fn scheduled_time(&self) -> SimTime {
        self.scheduled_time
    }

    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.kind
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.kind == MessageKind::Error
    }

    /// The payload, for inspection or downcasting.
    #[must_use]
    pub fn payload(&self) -> &dyn Payload {
        &*self.payload
    }

    /// Routing key of the payload.
    #[must_use]
    pub fn payload_type(&self) -> PayloadType {
        PayloadType::of_payload(self.payload())
    }

    /// Borrows the payload as `T`, or `None` if it has another type.
    #[must_use]
    pub fn payload_as<T: Payload>(&self) -> Option<&T> {
        self.payload().as_any().downcast_ref::<T>()
    }

    /// Returns a copy of this message redirected to `destination`.
    #[must_use]
    pub fn redirected(&self, destination: Address) -> Self {
        Self {
            destination,
            ..self.clone()
        }
    }

    /// Builds a reply: source and destination are swapped (the reply goes to
    /// `respond_to`) and the sequence id is preserved.
    #[must_use]
    pub fn reply(&self, payload: impl Payload, now: SimTime) -> Self {
        self.reply_with(MessageKind::Response, share(payload), now)
    }

    /// Builds an Error-kind reply carrying `failure`.
    #[must_use]
    pub fn error_reply(&self, failure: Failure, now: SimTime) -> Self {
        self.reply_with(MessageKind::Error, Arc::new(failure), now)
    }

    /// Builds the Error-kind reply for a payload nobody handles.
    #[must_use]
    #[track_caller]
    pub fn unsupported_reply(&self, now: SimTime) -> Self {
        self.error_reply(Failure::unsupported(self.payload().class()), now)
    }

    fn reply_with(&self, kind: MessageKind, payload: Arc<dyn Payload>, now: SimTime) -> Self {
        Self {
            source: self.destination.clone(),
            destination: self.respond_to.clone(),
            respond_to: self.destination.clone(),
            sequence: self.sequence,
            scheduled_time: now,
            kind,
            payload,
        }
    }
}

/// Builder for [`Message`].
///
/// Source, destination and payload are required; `respond_to` defaults to
/// the source.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    source: Option<Address>,
    destination: Option<Address>,
    respond_to: Option<Address>,
    sequence: u64,
    scheduled_time: SimTime,
    kind: Option<MessageKind>,
    payload: Option<Arc<dyn Payload>>,
}

impl MessageBuilder {
    #[must_use]
    pub fn source(mut self, source: Address) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn destination(mut self, destination: Address) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Redirects replies away from the source.
    #[must_use]
    pub fn respond_to(mut self, respond_to: Address) -> Self {
        self.respond_to = Some(respond_to);
        self
    }

    #[must_use]
    pub const fn sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    #[must_use]
    pub const fn scheduled_time(mut self, time: SimTime) -> Self {
        self.scheduled_time = time;
        self
    }

    /// Defaults to [`MessageKind::Action`].
    #[must_use]
    pub const fn kind(mut self, kind: MessageKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Sets the payload. An `Arc<dyn Payload>` is used as is.
    #[must_use]
    pub fn payload(mut self, payload: impl Payload) -> Self {
        self.payload = Some(share(payload));
        self
    }

    /// Sets an already shared payload.
    #[must_use]
    pub fn shared_payload(mut self, payload: Arc<dyn Payload>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Builds the message.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidAddress` if the source or destination
    /// is missing or malformed, and `ValidationError::MissingField` if no
    /// payload was given.
    pub fn build(self) -> Result<Message, ValidationError> {
        let source = self.source.ok_or_else(|| ValidationError::InvalidAddress {
            reason: "message has no source".to_string(),
        })?;
        let destination = self.destination.ok_or_else(|| ValidationError::InvalidAddress {
            reason: "message has no destination".to_string(),
        })?;
        source.validate()?;
        destination.validate()?;
        let payload = self
            .payload
            .ok_or(ValidationError::MissingField { field: "payload" })?;

        Ok(Message {
            respond_to: self.respond_to.unwrap_or_else(|| source.clone()),
            source,
            destination,
            sequence: self.sequence,
            scheduled_time: self.scheduled_time,
            kind: self.kind.unwrap_or(MessageKind::Action),
            payload,
        })
    }
}

/// Category of a [`Failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The recipient does not exist.
    UnknownEntity,
    /// No capability handles the payload.
    UnsupportedPayload,
    /// A capability returned an error.
    CapabilityFailed,
    /// A capability panicked.
    CapabilityPanicked,
    /// The capability was used before initialization.
    NotReady,
}

/// Payload of every Error-kind message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    /// Human-readable cause.
    pub description: String,
    /// Class of the payload that provoked the failure, when known.
    pub class: Option<String>,
    /// Where the failure was detected.
    pub context: String,
}

impl Failure {
    /// A failure for a payload no capability handles.
    #[must_use]
    #[track_caller]
    pub fn unsupported(class: &str) -> Self {
        Self {
            kind: FailureKind::UnsupportedPayload,
            description: format!("no capability handles {class}"),
            class: Some(class.to_string()),
            context: capture_context(),
        }
    }

    /// A failure for a recipient that does not exist.
    #[must_use]
    pub fn unknown_entity(target: &str, class: Option<&str>) -> Self {
        Self {
            kind: FailureKind::UnknownEntity,
            description: format!("unknown entity: {target}"),
            class: class.map(str::to_string),
            context: String::new(),
        }
    }

    /// A failure for a capability that panicked.
    #[must_use]
    pub fn panicked(capability: &str, class: Option<&str>, panic: &str) -> Self {
        Self {
            kind: FailureKind::CapabilityPanicked,
            description: format!("capability '{capability}' panicked: {panic}"),
            class: class.map(str::to_string),
            context: capability.to_string(),
        }
    }

    /// Converts an error raised while processing a payload of `class`.
    #[must_use]
    pub fn from_error(err: &TickworkError, class: Option<&str>) -> Self {
        let (kind, context) = match err {
            TickworkError::Dispatch(DispatchError::UnknownEntity { .. }) => {
                (FailureKind::UnknownEntity, String::new())
            }
            TickworkError::Dispatch(DispatchError::UnsupportedPayload { context, .. }) => {
                (FailureKind::UnsupportedPayload, context.clone())
            }
            TickworkError::Dispatch(DispatchError::CapabilityFailed { capability, .. }) => {
                (FailureKind::CapabilityFailed, capability.clone())
            }
            TickworkError::Lifecycle(LifecycleError::NotReady { capability, .. }) => {
                (FailureKind::NotReady, capability.clone())
            }
            _ => (FailureKind::CapabilityFailed, String::new()),
        };
        Self {
            kind,
            description: err.to_string(),
            class: class.map(str::to_string),
            context,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.description)
    }
}

#[track_caller]
fn capture_context() -> String {
    let location = Location::caller();
    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        format!("{location}\n{backtrace}")
    } else {
        location.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::EntityId;

    #[derive(Debug, PartialEq)]
    struct Ping(u32);

    #[derive(Debug)]
    struct Pong;

    fn ping() -> Message {
        Message::builder()
            .source(Address::client())
            .destination(Address::capability(EntityId::new(10_000), "Echo"))
            .sequence(10_042)
            .scheduled_time(SimTime::from_millis(5))
            .payload(Ping(1))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_addresses() {
        let missing_source = Message::builder()
            .destination(Address::client())
            .payload(Ping(1))
            .build();
        assert!(matches!(missing_source, Err(ValidationError::InvalidAddress { .. })));

        let missing_destination = Message::builder().source(Address::client()).payload(Ping(1)).build();
        assert!(matches!(missing_destination, Err(ValidationError::InvalidAddress { .. })));
    }

    #[test]
    fn test_builder_requires_payload() {
        let result = Message::builder()
            .source(Address::client())
            .destination(Address::client())
            .build();
        assert!(matches!(result, Err(ValidationError::MissingField { field: "payload" })));
    }

    #[test]
    fn test_respond_to_defaults_to_source() {
        let msg = ping();
        assert_eq!(msg.respond_to(), &Address::client());
        assert_eq!(msg.kind(), MessageKind::Action);
    }

    #[test]
    fn test_reply_swaps_addresses_and_keeps_sequence() {
        let msg = ping();
        let reply = msg.reply(Pong, SimTime::from_millis(9));
        assert_eq!(reply.source(), msg.destination());
        assert_eq!(reply.destination(), msg.respond_to());
        assert_eq!(reply.sequence(), 10_042);
        assert_eq!(reply.kind(), MessageKind::Response);
        assert_eq!(reply.scheduled_time(), SimTime::from_millis(9));
        assert!(reply.payload_as::<Pong>().is_some());
    }

    #[test]
    fn test_payload_type_uses_concrete_type() {
        let msg = ping();
        assert_eq!(msg.payload_type(), PayloadType::of::<Ping>());
        assert_ne!(msg.payload_type(), PayloadType::of::<Pong>());
        assert_eq!(msg.payload().class(), "Ping");
        assert_eq!(msg.payload_as::<Ping>(), Some(&Ping(1)));
    }

    #[test]
    fn test_unsupported_reply_names_class() {
        let reply = ping().unsupported_reply(SimTime::from_millis(5));
        assert!(reply.is_error());
        let failure = reply.payload_as::<Failure>().unwrap();
        assert_eq!(failure.kind, FailureKind::UnsupportedPayload);
        assert_eq!(failure.class.as_deref(), Some("Ping"));
        assert!(failure.context.contains("message.rs"));
    }

    #[test]
    fn test_shared_payload_is_not_wrapped_twice() {
        let shared: Arc<dyn Payload> = Arc::new(Ping(7));
        let msg = Message::builder()
            .source(Address::client())
            .destination(Address::client())
            .payload(Arc::clone(&shared))
            .build()
            .unwrap();
        assert_eq!(msg.payload_type(), PayloadType::of::<Ping>());
        assert_eq!(msg.payload().class(), "Ping");
        assert_eq!(msg.payload_as::<Ping>(), Some(&Ping(7)));

        let reply = msg.reply(shared, SimTime::ZERO);
        assert_eq!(reply.payload_as::<Ping>(), Some(&Ping(7)));
    }
}
