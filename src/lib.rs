//! # tickwork - a pluggable discrete-event simulation framework
//!
//! A simulation is a set of named entities. Each entity is a bundle of
//! capability instances, resolved by name and version from a registry of
//! providers, wired to each other, and driven through a shared clock in
//! discrete ticks.
//!
//! ## Core Concepts
//!
//! - **Capability**: a versioned unit of behaviour with a strict lifecycle
//! - **Registry / Resolver**: discover providers and wire their requirements
//! - **Entity**: an addressable bundle of capabilities with typed dispatch
//! - **Message**: an immutable envelope around a strongly typed payload
//! - **Session**: the client surface that submits work and advances time
//! - **Blackboard**: a time-windowed store capabilities share
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use tickwork::blackboard::{AddEntryRequest, GetEntryRequest, GetEntryResponse};
//! use tickwork::{
//!     Blackboard, CapabilitySpec, Command, EntityConfig, Registry, Session, SessionConfig, SimTime,
//!     Value, Version,
//! };
//!
//! let config = EntityConfig::new("BLUE:Alice")?
//!     .capability(CapabilitySpec::at_least(Blackboard::NAME, Version::new(1, 0, 0)));
//! let mut session = Session::start(Arc::new(Registry::with_builtins()), [config], SessionConfig::default())?;
//!
//! let add = AddEntryRequest::new("speed", 12_i64, SimTime::from_millis(0)).until(SimTime::from_millis(500));
//! session.submit(Command::new("BLUE:Alice", add))?;
//! session.tick(SimTime::from_millis(100))?;
//!
//! let seq = session.submit(Command::new("BLUE:Alice", GetEntryRequest::new("speed")))?;
//! let result = session.tick(SimTime::from_millis(200))?;
//! assert_eq!(result.reply_as::<GetEntryResponse>(seq).unwrap().value, Some(Value::Int(12)));
//! # Ok::<(), tickwork::TickworkError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod address;
pub mod error;
pub mod message;
pub mod processing;
pub mod time;
pub mod value;

// Capabilities and entities
pub mod capability;
pub mod entity;

// Built-in capabilities
pub mod blackboard;
pub mod telemetry;

// Client surface
pub mod codec;
pub mod session;

pub use address::{Address, AddressKind, EntityId, IdSource};
pub use blackboard::Blackboard;
pub use capability::{
    Capability, CapabilityConfig, CapabilityRef, CapabilitySpec, Descriptor, LifecycleState, Provider,
    Registry, Requirement, Resolver, Version,
};
pub use codec::PayloadCodec;
pub use entity::{Entity, EntityConfig, EntityHandle, EntityPath};
pub use error::{
    CodecError, DispatchError, LifecycleError, ResolutionError, SchedulingError, TickworkError,
    TickworkResult, ValidationError,
};
pub use message::{Failure, FailureKind, Message, MessageBuilder, MessageKind, Payload, PayloadType};
pub use processing::ProcessingResult;
pub use session::{
    Command, EntityController, Event, Session, SessionConfig, Submission, TickHandle, TickResult,
};
pub use telemetry::{TelemetryAgent, TelemetrySample};
pub use time::{SimTime, ValidityWindow};
pub use value::{Value, ValueKind};
