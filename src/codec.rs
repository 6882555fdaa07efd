//! JSON encoding of payloads and session traffic.
//!
//! Payload JSON is an object carrying a `class` discriminator next to the
//! payload's own fields. Only registered types can be decoded; the class
//! name picks the concrete Rust type, so a decoded payload dispatches
//! exactly like one built in code.
//!
//! Client submissions use the same convention:
//!
//! ```json
//! { "class": "Command", "recipientPath": "BLUE:Alice",
//!   "content": { "class": "GetEntryRequest", "key": "k" } }
//! { "class": "Event", "recipientPath": "BLUE:Alice", "eventTime": 5000,
//!   "content": { "class": "RemoveEntryRequest", "key": "k" } }
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value as Json};

use crate::blackboard::{
    AddEntryRequest, AddEntryResponse, GetEntryRequest, GetEntryResponse, RemoveEntryRequest,
    RemoveEntryResponse,
};
use crate::error::{CodecError, TickworkResult};
use crate::message::{unshared, Failure, Message, Payload};
use crate::session::{Command, Event, Submission};
use crate::telemetry::TelemetrySample;
use crate::time::SimTime;

/// Name of the discriminator field.
pub const CLASS_FIELD: &str = "class";

type Decoder = Box<dyn Fn(Json) -> Result<Arc<dyn Payload>, serde_json::Error> + Send + Sync>;
type Encoder = Box<dyn Fn(&dyn Any) -> Option<Result<Json, serde_json::Error>> + Send + Sync>;

struct Codec {
    decode: Decoder,
    encode: Encoder,
}

/// Registry of payload types that can cross the JSON boundary.
#[derive(Default)]
pub struct PayloadCodec {
    by_class: HashMap<String, Codec>,
    by_type: HashMap<TypeId, String>,
}

impl PayloadCodec {
    /// A codec that knows no classes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A codec that knows the Blackboard protocol, telemetry samples and
    /// failures, each under its type name.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut codec = Self::new();
        codec.register::<AddEntryRequest>("AddEntryRequest");
        codec.register::<AddEntryResponse>("AddEntryResponse");
        codec.register::<GetEntryRequest>("GetEntryRequest");
        codec.register::<GetEntryResponse>("GetEntryResponse");
        codec.register::<RemoveEntryRequest>("RemoveEntryRequest");
        codec.register::<RemoveEntryResponse>("RemoveEntryResponse");
        codec.register::<TelemetrySample>("TelemetrySample");
        codec.register::<Failure>("Failure");
        codec
    }

    /// Makes `T` decodable under `class`. Registering a class again
    /// replaces the earlier type.
    pub fn register<T>(&mut self, class: impl Into<String>) -> &mut Self
    where
        T: Payload + Serialize + DeserializeOwned,
    {
        let class = class.into();
        let codec = Codec {
            decode: Box::new(|json| {
                let payload: T = serde_json::from_value(json)?;
                Ok(Arc::new(payload) as Arc<dyn Payload>)
            }),
            encode: Box::new(|any| any.downcast_ref::<T>().map(serde_json::to_value)),
        };
        if self.by_class.insert(class.clone(), codec).is_some() {
            self.by_type.retain(|_, c| *c != class);
        }
        self.by_type.insert(TypeId::of::<T>(), class);
        self
    }

    /// Builder-style [`PayloadCodec::register`].
    #[must_use]
    pub fn with<T>(mut self, class: impl Into<String>) -> Self
    where
        T: Payload + Serialize + DeserializeOwned,
    {
        self.register::<T>(class);
        self
    }

    /// True if `class` is registered.
    #[must_use]
    pub fn knows(&self, class: &str) -> bool {
        self.by_class.contains_key(class)
    }

    /// Registered class names, sorted.
    #[must_use]
    pub fn classes(&self) -> Vec<&str> {
        let mut classes: Vec<&str> = self.by_class.keys().map(String::as_str).collect();
        classes.sort_unstable();
        classes
    }

    /// The class `payload` is registered under.
    #[must_use]
    pub fn class_of(&self, payload: &dyn Payload) -> Option<&str> {
        self.by_type
            .get(&unshared(payload).as_any().type_id())
            .map(String::as_str)
    }

    /// Decodes a payload object.
    ///
    /// # Errors
    ///
    /// Returns `MissingClass` without a string `class` field, `UnknownClass`
    /// for an unregistered class, or `Malformed` if the fields do not fit.
    pub fn decode(&self, json: &Json) -> TickworkResult<Arc<dyn Payload>> {
        let class = class_field(json)?;
        let codec = self.by_class.get(class).ok_or_else(|| CodecError::UnknownClass {
            class: class.to_string(),
        })?;
        Ok((codec.decode)(json.clone())?)
    }

    /// Parses and decodes a payload.
    ///
    /// # Errors
    ///
    /// Same as [`PayloadCodec::decode`].
    pub fn decode_str(&self, text: &str) -> TickworkResult<Arc<dyn Payload>> {
        self.decode(&serde_json::from_str(text)?)
    }

    /// Encodes a payload, adding its `class`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownClass` for an unregistered type, or `Malformed` if
    /// the payload does not serialize to a JSON object.
    pub fn encode(&self, payload: &dyn Payload) -> TickworkResult<Json> {
        let payload = unshared(payload);
        let unknown = || CodecError::UnknownClass {
            class: payload.class().to_string(),
        };
        let class = self.class_of(payload).ok_or_else(unknown)?;
        let codec = self.by_class.get(class).ok_or_else(unknown)?;
        let encoded = (codec.encode)(payload.as_any()).ok_or_else(unknown)??;
        let Json::Object(fields) = encoded else {
            return Err(CodecError::Malformed {
                message: format!("{class} does not encode to a JSON object"),
            }
            .into());
        };
        let mut object = Map::with_capacity(fields.len() + 1);
        object.insert(CLASS_FIELD.to_string(), Json::String(class.to_string()));
        object.extend(fields);
        Ok(Json::Object(object))
    }

    /// Decodes a client submission.
    ///
    /// # Errors
    ///
    /// Returns `UnknownClass` unless the class is `Command` or `Event`,
    /// `Malformed` for a missing or mistyped field, and any error from
    /// decoding `content`.
    pub fn decode_submission(&self, json: &Json) -> TickworkResult<Submission> {
        let class = class_field(json)?;
        let recipient_path = json
            .get("recipientPath")
            .and_then(Json::as_str)
            .ok_or_else(|| malformed("recipientPath must be a string"))?
            .to_string();
        let content = json.get("content").ok_or_else(|| malformed("content is required"))?;
        let payload = self.decode(content)?;

        match class {
            "Command" => Ok(Submission::Command(Command::shared(recipient_path, payload))),
            "Event" => {
                let event_time = json
                    .get("eventTime")
                    .and_then(Json::as_i64)
                    .ok_or_else(|| malformed("eventTime must be an integer"))?;
                Ok(Submission::Event(Event::shared(
                    recipient_path,
                    payload,
                    SimTime::from_millis(event_time),
                )))
            }
            other => Err(CodecError::UnknownClass {
                class: other.to_string(),
            }
            .into()),
        }
    }

    /// Parses and decodes a client submission.
    ///
    /// # Errors
    ///
    /// Same as [`PayloadCodec::decode_submission`].
    pub fn decode_submission_str(&self, text: &str) -> TickworkResult<Submission> {
        self.decode_submission(&serde_json::from_str(text)?)
    }

    /// Renders one tick output with its routing envelope.
    ///
    /// # Errors
    ///
    /// Same as [`PayloadCodec::encode`].
    pub fn encode_output(&self, message: &Message) -> TickworkResult<Json> {
        Ok(json!({
            "kind": message.kind(),
            "sequence": message.sequence(),
            "time": message.scheduled_time(),
            "source": message.source(),
            "content": self.encode(message.payload())?,
        }))
    }
}

impl fmt::Debug for PayloadCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadCodec")
            .field("classes", &self.classes())
            .finish()
    }
}

fn class_field(json: &Json) -> Result<&str, CodecError> {
    json.get(CLASS_FIELD)
        .and_then(Json::as_str)
        .ok_or(CodecError::MissingClass)
}

fn malformed(message: &str) -> CodecError {
    CodecError::Malformed {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Address, EntityId};
    use crate::error::TickworkError;
    use crate::message::MessageKind;
    use crate::value::Value;

    #[test]
    fn test_decode_picks_registered_type() {
        let codec = PayloadCodec::with_builtins();
        let payload = codec
            .decode_str(r#"{"class":"AddEntryRequest","key":"k","value":{"type":"int","value":3},"timestamp":1000}"#)
            .unwrap();
        let request = (*payload).as_any().downcast_ref::<AddEntryRequest>().unwrap();
        assert_eq!(request.value, Value::Int(3));
        assert_eq!(request.valid_from, SimTime::from_millis(1000));
        assert_eq!(request.valid_until, SimTime::FOREVER);
    }

    #[test]
    fn test_encode_adds_class() {
        let codec = PayloadCodec::with_builtins();
        let json = codec.encode(&RemoveEntryRequest::new("k")).unwrap();
        assert_eq!(json, json!({"class": "RemoveEntryRequest", "key": "k"}));
    }

    #[test]
    fn test_unknown_and_missing_class() {
        let codec = PayloadCodec::with_builtins();
        let err = codec.decode(&json!({"class": "Nope"})).unwrap_err();
        assert!(matches!(err, TickworkError::Codec(CodecError::UnknownClass { .. })));
        let err = codec.decode(&json!({"key": "k"})).unwrap_err();
        assert!(matches!(err, TickworkError::Codec(CodecError::MissingClass)));
        let err = codec.encode(&42_u32).unwrap_err();
        assert!(matches!(err, TickworkError::Codec(CodecError::UnknownClass { .. })));
    }

    #[test]
    fn test_malformed_fields() {
        let codec = PayloadCodec::with_builtins();
        let err = codec.decode(&json!({"class": "RemoveEntryRequest"})).unwrap_err();
        assert!(matches!(err, TickworkError::Codec(CodecError::Malformed { .. })));
    }

    #[test]
    fn test_decode_submissions() {
        let codec = PayloadCodec::with_builtins();
        let command = codec
            .decode_submission(&json!({
                "class": "Command",
                "recipientPath": "BLUE:Alice",
                "content": {"class": "GetEntryRequest", "key": "k"}
            }))
            .unwrap();
        assert!(matches!(command, Submission::Command(_)));
        assert_eq!(command.recipient_path(), "BLUE:Alice");
        assert!(command.payload().as_any().is::<GetEntryRequest>());

        let event = codec
            .decode_submission(&json!({
                "class": "Event",
                "recipientPath": "BLUE:Alice",
                "eventTime": 5000,
                "content": {"class": "RemoveEntryRequest", "key": "k"}
            }))
            .unwrap();
        let Submission::Event(event) = event else {
            panic!("expected an event");
        };
        assert_eq!(event.event_time, SimTime::from_millis(5000));

        let err = codec
            .decode_submission(&json!({
                "class": "Event",
                "recipientPath": "BLUE:Alice",
                "content": {"class": "RemoveEntryRequest", "key": "k"}
            }))
            .unwrap_err();
        assert!(matches!(err, TickworkError::Codec(CodecError::Malformed { .. })));
    }

    #[test]
    fn test_encode_output_envelope() {
        let codec = PayloadCodec::with_builtins();
        let message = Message::builder()
            .source(Address::capability(EntityId::new(10_000), "Blackboard"))
            .destination(Address::client())
            .sequence(10_001)
            .scheduled_time(SimTime::from_millis(20))
            .kind(MessageKind::Response)
            .payload(AddEntryResponse { entry_count: 2 })
            .build()
            .unwrap();
        let json = codec.encode_output(&message).unwrap();
        assert_eq!(json["kind"], "response");
        assert_eq!(json["sequence"], 10_001);
        assert_eq!(json["time"], 20);
        assert_eq!(json["content"], json!({"class": "AddEntryResponse", "entryCount": 2}));
    }

    #[test]
    fn test_reregistering_moves_class() {
        #[derive(Debug, Serialize, serde::Deserialize)]
        struct Custom {
            key: String,
        }
        let mut codec = PayloadCodec::with_builtins();
        codec.register::<Custom>("RemoveEntryRequest");
        assert!(codec.class_of(&RemoveEntryRequest::new("k")).is_none());
        let decoded = codec.decode(&json!({"class": "RemoveEntryRequest", "key": "k"})).unwrap();
        assert!((*decoded).as_any().is::<Custom>());
    }

    #[test]
    fn test_encode_sees_through_shared_payload() {
        let codec = PayloadCodec::with_builtins();
        let decoded = codec.decode(&json!({"class": "GetEntryRequest", "key": "k"})).unwrap();
        assert_eq!(codec.class_of(&decoded), Some("GetEntryRequest"));
        assert_eq!(
            codec.encode(&decoded).unwrap(),
            json!({"class": "GetEntryRequest", "key": "k"})
        );
    }
}
