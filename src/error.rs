//! Error types for tickwork.
//!
//! Errors are grouped by the phase that raises them: validation of inputs,
//! capability resolution during entity construction, lifecycle misuse,
//! message dispatch inside a tick, and session scheduling. Dispatch errors are
//! usually turned into Error-kind messages at the entity boundary; the others
//! are returned to the caller.

use thiserror::Error;

use crate::time::SimTime;

/// Validation errors raised while constructing framework values.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A window whose start is after its end.
    #[error("Invalid validity window: valid_from ({from}) must not be after valid_until ({until})")]
    InvalidWindow { from: SimTime, until: SimTime },

    /// A name or key that must not be empty.
    #[error("{what} cannot be empty")]
    EmptyName { what: &'static str },

    /// A builder was finished without a required field.
    #[error("Required field '{field}' is missing")]
    MissingField { field: &'static str },

    /// A message or address that cannot be routed.
    #[error("Invalid address: {reason}")]
    InvalidAddress { reason: String },

    /// Text that does not parse as a version.
    #[error("Invalid version '{input}': expected major[.minor[.patch]]")]
    InvalidVersion { input: String },

    /// An entity path with an empty segment.
    #[error("Invalid entity path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
}

/// Errors raised while resolving and wiring capabilities for an entity.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// No registered provider satisfies the spec.
    #[error("No capability satisfies {spec}")]
    CapabilityNotFound { spec: String },

    /// Several providers tie for the highest satisfying version.
    #[error("Capability {spec} is ambiguous between implementations: {candidates:?}")]
    AmbiguousCapability {
        spec: String,
        candidates: Vec<String>,
    },

    /// A requirement chain leads back to itself; `cycle` lists it, closing name included.
    #[error("Circular capability dependency: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    /// A name was resolved once at a version a later spec does not accept.
    #[error("Capability '{name}' already resolved at {resolved}, which does not satisfy {requested}")]
    VersionConflict {
        name: String,
        resolved: String,
        requested: String,
    },

    /// The same provider was registered twice.
    #[error("Provider {name} {version} ({implementation}) is already registered")]
    DuplicateProvider {
        name: String,
        version: String,
        implementation: String,
    },

    /// Two capabilities of one entity declare the same payload type.
    #[error("Payload type {payload} is handled by both '{first}' and '{second}'")]
    DuplicateHandler {
        payload: String,
        first: String,
        second: String,
    },

    /// A capability refused what was injected for one of its slots.
    #[error("Capability '{capability}' rejected collaborator for slot '{slot}': {reason}")]
    InjectionFailed {
        capability: String,
        slot: String,
        reason: String,
    },

    /// A capability refused its settings.
    #[error("Capability '{capability}' rejected its configuration: {reason}")]
    ConfigurationRejected { capability: String, reason: String },
}

/// Lifecycle misuse.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The requested lifecycle step is not allowed from the current state.
    #[error("Capability '{capability}' cannot move from {from} to {to}")]
    IllegalLifecycleTransition {
        capability: String,
        from: String,
        to: String,
    },

    /// The capability was used before `init`.
    #[error("Capability '{capability}' is not ready (state: {state})")]
    NotReady { capability: String, state: String },
}

/// Errors raised while delivering a message inside a tick.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No entity is registered under the target path or id.
    #[error("Unknown entity: {target}")]
    UnknownEntity { target: String },

    /// No capability handles the payload; `context` says where this was detected.
    #[error("Unsupported payload {class} at {context}")]
    UnsupportedPayload { class: String, context: String },

    /// A capability returned an error of its own.
    #[error("Capability '{capability}' failed: {reason}")]
    CapabilityFailed { capability: String, reason: String },
}

/// Errors from the session clock and the asynchronous worker.
#[derive(Debug, Error)]
pub enum SchedulingError {
    /// A tick was requested for a time before the previous tick.
    #[error("Tick at {requested} is before the last tick at {last}")]
    TemporalOrderingViolation { requested: SimTime, last: SimTime },

    /// An asynchronous tick has not been joined yet.
    #[error("A tick is already in progress")]
    TickInProgress,

    /// The session no longer accepts work.
    #[error("Session is closed")]
    SessionClosed,

    /// The worker thread went away.
    #[error("Session worker disconnected")]
    Disconnected,

    /// The worker queue is full.
    #[error("Session queue is full (capacity: {capacity})")]
    QueueFull { capacity: usize },

    /// A join did not finish in time.
    #[error("Timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Every identifier of a block has been handed out.
    #[error("Identifier block '{block}' is exhausted")]
    IdSpaceExhausted { block: &'static str },
}

/// Errors from the JSON payload codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The class is not registered with the codec.
    #[error("Unknown payload class '{class}'")]
    UnknownClass { class: String },

    /// The JSON object has no string `class` field.
    #[error("Missing 'class' discriminator")]
    MissingClass,

    /// The JSON does not fit the registered type, or is not valid JSON at all.
    #[error("Malformed payload: {message}")]
    Malformed { message: String },
}

/// Top-level error type for tickwork.
#[derive(Debug, Error)]
pub enum TickworkError {
    /// Bad input.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Entity construction failed.
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    /// Capability lifecycle misuse.
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// A message could not be handled.
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Session scheduling failed.
    #[error("Scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),

    /// JSON encoding or decoding failed.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Anything else.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<serde_json::Error> for TickworkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(CodecError::Malformed {
            message: err.to_string(),
        })
    }
}

impl TickworkError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a capability failure from any displayable reason.
    #[must_use]
    pub fn capability_failed(capability: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Dispatch(DispatchError::CapabilityFailed {
            capability: capability.into(),
            reason: reason.to_string(),
        })
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this error was raised while resolving capabilities.
    #[must_use]
    pub const fn is_resolution(&self) -> bool {
        matches!(self, Self::Resolution(_))
    }

    /// Returns true if this is a lifecycle error.
    #[must_use]
    pub const fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Lifecycle(_))
    }

    /// Returns true if this is a dispatch error.
    #[must_use]
    pub const fn is_dispatch(&self) -> bool {
        matches!(self, Self::Dispatch(_))
    }

    /// Returns true if this is a scheduling error.
    #[must_use]
    pub const fn is_scheduling(&self) -> bool {
        matches!(self, Self::Scheduling(_))
    }

    /// Returns true if the caller may retry the same call later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Scheduling(
                SchedulingError::TickInProgress
                    | SchedulingError::QueueFull { .. }
                    | SchedulingError::Timeout { .. }
            )
        )
    }
}

/// Result type alias for tickwork operations.
pub type TickworkResult<T> = Result<T, TickworkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_window_message() {
        let err = ValidationError::InvalidWindow {
            from: SimTime::from_millis(10),
            until: SimTime::from_millis(5),
        };
        let msg = format!("{err}");
        assert!(msg.contains("10ms"));
        assert!(msg.contains("5ms"));
    }

    #[test]
    fn test_circular_dependency_names_cycle() {
        let err = ResolutionError::CircularDependency {
            cycle: vec!["A".to_string(), "B".to_string(), "A".to_string()],
        };
        assert_eq!(format!("{err}"), "Circular capability dependency: A -> B -> A");
    }

    #[test]
    fn test_temporal_violation_message() {
        let err = SchedulingError::TemporalOrderingViolation {
            requested: SimTime::from_millis(100),
            last: SimTime::from_millis(200),
        };
        let msg = format!("{err}");
        assert!(msg.contains("100ms"));
        assert!(msg.contains("200ms"));
    }

    #[test]
    fn test_classification() {
        let err: TickworkError = ResolutionError::CapabilityNotFound {
            spec: "Blackboard 1.0.0".to_string(),
        }
        .into();
        assert!(err.is_resolution());
        assert!(!err.is_dispatch());
        assert!(!err.is_retryable());

        let err: TickworkError = SchedulingError::TickInProgress.into();
        assert!(err.is_scheduling());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_serde_error_maps_to_codec() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: TickworkError = parse.into();
        assert!(matches!(err, TickworkError::Codec(CodecError::Malformed { .. })));
    }
}
