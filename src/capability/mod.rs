//! Capabilities: versioned, pluggable units of behaviour.
//!
//! A capability is discovered through the [`Registry`], selected and wired by
//! the [`Resolver`], and then driven by its owning entity. Reactive
//! capabilities answer the payload types they declare in
//! [`Capability::handled_payloads`]; time-driven capabilities additionally act
//! once per tick.
//!
//! Collaborators are declared explicitly through
//! [`Capability::requirements`] and handed over through
//! [`Capability::inject`], where the receiving capability downcasts the
//! collaborator to the concrete type its slot expects.

pub mod lifecycle;
pub mod registry;
pub mod resolver;
pub mod spec;

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::entity::EntityHandle;
use crate::error::{DispatchError, ResolutionError, TickworkError, TickworkResult};
use crate::message::{Message, PayloadType};
use crate::processing::ProcessingResult;
use crate::time::SimTime;

pub use lifecycle::LifecycleState;
pub use registry::{Provider, ProviderBuilder, Registry};
pub use resolver::Resolver;
pub use spec::{CapabilitySpec, Version};

/// Context reported when a capability declares a payload but never
/// overrides [`Capability::process`].
pub const DEFAULT_PROCESS_CONTEXT: &str = "capability declares the payload but does not process it";

/// A named collaborator a capability needs before it can be initialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Slot name passed back to [`Capability::inject`].
    pub slot: String,
    /// What the collaborator must provide.
    pub spec: CapabilitySpec,
}

impl Requirement {
    /// A requirement for `spec`, injected under `slot`.
    #[must_use]
    pub fn new(slot: impl Into<String>, spec: CapabilitySpec) -> Self {
        Self {
            slot: slot.into(),
            spec,
        }
    }
}

/// Configuration handed to a capability before initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// Deterministic seed for any randomness the capability uses.
    pub seed: u64,
    /// Capability-specific settings; `Null` when none were given.
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl CapabilityConfig {
    /// A configuration with the given seed and settings.
    #[must_use]
    pub const fn new(seed: u64, settings: serde_json::Value) -> Self {
        Self { seed, settings }
    }

    /// Deserializes the settings, falling back to `T::default()` when none were given.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the settings do not match `T`.
    pub fn settings_or_default<T: DeserializeOwned + Default>(&self) -> TickworkResult<T> {
        if self.settings.is_null() {
            return Ok(T::default());
        }
        Ok(serde_json::from_value(self.settings.clone())?)
    }
}

/// Behaviour every capability implements.
///
/// All methods but `handled_payloads` have defaults, so a capability only
/// overrides the parts of the lifecycle it cares about.
pub trait Capability: Send + 'static {
    /// Collaborators to resolve and inject before configuration.
    fn requirements(&self) -> Vec<Requirement> {
        Vec::new()
    }

    /// Receives the collaborator resolved for `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot is unknown or the collaborator has the
    /// wrong concrete type.
    fn inject(&mut self, slot: &str, collaborator: &CapabilityRef) -> TickworkResult<()> {
        let _ = collaborator;
        Err(TickworkError::internal(format!("no slot named '{slot}'")))
    }

    /// # Errors
    ///
    /// Returns an error if the configuration is unusable.
    fn configure(&mut self, config: &CapabilityConfig) -> TickworkResult<()> {
        let _ = config;
        Ok(())
    }

    /// Called once by the owning entity after every collaborator is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the capability cannot start.
    fn init(&mut self, entity: &EntityHandle) -> TickworkResult<()> {
        let _ = entity;
        Ok(())
    }

    /// Payload types routed to this capability.
    fn handled_payloads(&self) -> Vec<PayloadType>;

    /// Handles one message whose payload type is in `handled_payloads`.
    ///
    /// The default rejects every message as unsupported.
    ///
    /// # Errors
    ///
    /// Any error becomes an Error-kind reply to the message's `respond_to`.
    fn process(&mut self, message: &Message, now: SimTime) -> TickworkResult<ProcessingResult> {
        let _ = now;
        Err(DispatchError::UnsupportedPayload {
            class: message.payload().class().to_string(),
            context: DEFAULT_PROCESS_CONTEXT.to_string(),
        }
        .into())
    }

    /// True if the capability acts on every tick.
    fn is_time_driven(&self) -> bool {
        false
    }

    /// Acts once per tick; only called when `is_time_driven` is true.
    ///
    /// # Errors
    ///
    /// Any error becomes an Error-kind message to the client.
    fn tick(&mut self, now: SimTime) -> TickworkResult<ProcessingResult> {
        let _ = now;
        Ok(ProcessingResult::empty())
    }

    /// Releases resources at session shutdown.
    fn dispose(&mut self) {}
}

/// Static description of a capability implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor {
    /// Capability name requirers ask for.
    pub name: String,
    /// Version the provider implements.
    pub version: Version,
    /// Distinguishes providers of the same name and version.
    pub implementation: String,
    /// Free text for listings.
    pub description: String,
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.name, self.version, self.implementation)
    }
}

struct CapabilityCell {
    descriptor: Descriptor,
    state: Mutex<LifecycleState>,
    dynamic: Arc<Mutex<dyn Capability>>,
    concrete: Arc<dyn Any + Send + Sync>,
}

/// Shared handle to one capability instance.
///
/// Clones refer to the same instance. The instance can be driven through
/// the lifecycle methods here or reached as its concrete type through
/// [`CapabilityRef::downcast`].
#[derive(Clone)]
pub struct CapabilityRef {
    inner: Arc<CapabilityCell>,
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic inside a capability is reported as a failure; the instance stays usable.
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CapabilityRef {
    /// Wraps a freshly created instance in the `Created` state.
    #[must_use]
    pub fn new<T: Capability>(descriptor: Descriptor, capability: T) -> Self {
        let shared = Arc::new(Mutex::new(capability));
        let dynamic: Arc<Mutex<dyn Capability>> = shared.clone();
        let concrete: Arc<dyn Any + Send + Sync> = shared;
        Self {
            inner: Arc::new(CapabilityCell {
                descriptor,
                state: Mutex::new(LifecycleState::Created),
                dynamic,
                concrete,
            }),
        }
    }

    /// What the instance was created from.
    #[must_use]
    pub fn descriptor(&self) -> &Descriptor {
        &self.inner.descriptor
    }

    /// Shorthand for the descriptor's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.descriptor.name
    }

    /// Shorthand for the descriptor's version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.inner.descriptor.version
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *lock(&self.inner.state)
    }

    /// The instance as its concrete type, or `None` if it is not a `T`.
    #[must_use]
    pub fn downcast<T: Capability>(&self) -> Option<Arc<Mutex<T>>> {
        Arc::clone(&self.inner.concrete).downcast::<Mutex<T>>().ok()
    }

    /// Runs `f` against the concrete instance, if it is a `T`.
    pub fn with_typed<T: Capability, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let typed = self.downcast::<T>()?;
        let mut guard = lock(&typed);
        Some(f(&mut guard))
    }

    /// True if both handles refer to the same instance.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// See [`Capability::requirements`].
    #[must_use]
    pub fn requirements(&self) -> Vec<Requirement> {
        lock(&self.inner.dynamic).requirements()
    }

    /// See [`Capability::handled_payloads`].
    #[must_use]
    pub fn handled_payloads(&self) -> Vec<PayloadType> {
        lock(&self.inner.dynamic).handled_payloads()
    }

    /// See [`Capability::is_time_driven`].
    #[must_use]
    pub fn is_time_driven(&self) -> bool {
        lock(&self.inner.dynamic).is_time_driven()
    }

    /// Hands `collaborator` to the instance for `slot`.
    ///
    /// # Errors
    ///
    /// Returns `ResolutionError::InjectionFailed` if the instance rejects it.
    pub fn inject(&self, slot: &str, collaborator: &Self) -> TickworkResult<()> {
        lock(&self.inner.dynamic)
            .inject(slot, collaborator)
            .map_err(|err| {
                ResolutionError::InjectionFailed {
                    capability: self.name().to_string(),
                    slot: slot.to_string(),
                    reason: err.to_string(),
                }
                .into()
            })
    }

    /// Moves the instance to `Configured`.
    ///
    /// # Errors
    ///
    /// Returns `IllegalLifecycleTransition` after `init`, or
    /// `ConfigurationRejected` if the instance rejects `config`.
    pub fn configure(&self, config: &CapabilityConfig) -> TickworkResult<()> {
        let mut state = lock(&self.inner.state);
        let next = state.configure(self.name())?;
        lock(&self.inner.dynamic).configure(config).map_err(|err| {
            TickworkError::from(ResolutionError::ConfigurationRejected {
                capability: self.name().to_string(),
                reason: err.to_string(),
            })
        })?;
        *state = next;
        Ok(())
    }

    /// Moves the instance to `Initialized`; a no-op when already initialized.
    ///
    /// # Errors
    ///
    /// Returns `IllegalLifecycleTransition` if the instance was never
    /// configured, or whatever the instance's own `init` returns.
    pub fn init(&self, entity: &EntityHandle) -> TickworkResult<()> {
        let mut state = lock(&self.inner.state);
        let next = state.init(self.name())?;
        if *state == next {
            return Ok(());
        }
        lock(&self.inner.dynamic).init(entity)?;
        *state = next;
        Ok(())
    }

    /// Moves the instance to `Active`.
    ///
    /// # Errors
    ///
    /// Returns `IllegalLifecycleTransition` unless the instance is initialized.
    pub fn activate(&self) -> TickworkResult<()> {
        let mut state = lock(&self.inner.state);
        *state = state.activate(self.name())?;
        Ok(())
    }

    /// Hands one message to the instance.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` before `init`, or the instance's own error.
    pub fn process(&self, message: &Message, now: SimTime) -> TickworkResult<ProcessingResult> {
        self.state().ensure_ready(self.name())?;
        lock(&self.inner.dynamic).process(message, now)
    }

    /// Lets a time-driven instance act at `now`.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` before `init`, or the instance's own error.
    pub fn tick(&self, now: SimTime) -> TickworkResult<ProcessingResult> {
        self.state().ensure_ready(self.name())?;
        lock(&self.inner.dynamic).tick(now)
    }

    /// Moves the instance to `Disposed`; later calls do nothing.
    pub fn dispose(&self) {
        let mut state = lock(&self.inner.state);
        if *state == LifecycleState::Disposed {
            return;
        }
        lock(&self.inner.dynamic).dispose();
        *state = LifecycleState::Disposed;
    }
}

impl fmt::Debug for CapabilityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRef")
            .field("descriptor", &self.inner.descriptor)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::IdSource;
    use crate::entity::EntityPath;

    #[derive(Debug, Default)]
    struct Counter {
        configured_with: Option<u64>,
        disposed: bool,
    }

    impl Capability for Counter {
        fn configure(&mut self, config: &CapabilityConfig) -> TickworkResult<()> {
            self.configured_with = Some(config.seed);
            Ok(())
        }

        fn handled_payloads(&self) -> Vec<PayloadType> {
            vec![PayloadType::of::<u32>()]
        }

        fn dispose(&mut self) {
            self.disposed = true;
        }
    }

    fn descriptor() -> Descriptor {
        Descriptor {
            name: "Counter".to_string(),
            version: Version::new(1, 0, 0),
            implementation: "test".to_string(),
            description: String::new(),
        }
    }

    fn handle() -> EntityHandle {
        EntityHandle::new(
            crate::address::EntityId::new(10_000),
            EntityPath::parse("A").unwrap(),
            Arc::new(IdSource::default()),
        )
    }

    #[test]
    fn test_lifecycle_through_ref() {
        let cap = CapabilityRef::new(descriptor(), Counter::default());
        assert_eq!(cap.state(), LifecycleState::Created);
        assert!(cap.init(&handle()).is_err());

        cap.configure(&CapabilityConfig::new(7, serde_json::Value::Null)).unwrap();
        cap.init(&handle()).unwrap();
        cap.init(&handle()).unwrap();
        assert_eq!(cap.state(), LifecycleState::Initialized);

        let err = cap
            .configure(&CapabilityConfig::new(8, serde_json::Value::Null))
            .unwrap_err();
        assert!(err.is_lifecycle());

        cap.activate().unwrap();
        cap.dispose();
        assert_eq!(cap.state(), LifecycleState::Disposed);
        assert_eq!(cap.with_typed(|c: &mut Counter| (c.configured_with, c.disposed)), Some((Some(7), true)));
    }

    #[test]
    fn test_process_before_init_is_not_ready() {
        let cap = CapabilityRef::new(descriptor(), Counter::default());
        let msg = Message::builder()
            .source(crate::address::Address::client())
            .destination(crate::address::Address::client())
            .payload(1_u32)
            .build()
            .unwrap();
        let err = cap.process(&msg, SimTime::ZERO).unwrap_err();
        assert!(err.is_lifecycle());
    }

    #[test]
    fn test_declared_but_unprocessed_payload_is_unsupported() {
        let cap = CapabilityRef::new(descriptor(), Counter::default());
        cap.configure(&CapabilityConfig::new(0, serde_json::Value::Null)).unwrap();
        cap.init(&handle()).unwrap();
        let msg = Message::builder()
            .source(crate::address::Address::client())
            .destination(crate::address::Address::client())
            .payload(1_u32)
            .build()
            .unwrap();
        match cap.process(&msg, SimTime::ZERO).unwrap_err() {
            TickworkError::Dispatch(DispatchError::UnsupportedPayload { class, context }) => {
                assert_eq!(class, "u32");
                assert_eq!(context, DEFAULT_PROCESS_CONTEXT);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_downcast_and_identity() {
        let cap = CapabilityRef::new(descriptor(), Counter::default());
        let alias = cap.clone();
        assert!(CapabilityRef::ptr_eq(&cap, &alias));
        assert!(cap.downcast::<Counter>().is_some());

        let other = CapabilityRef::new(descriptor(), Counter::default());
        assert!(!CapabilityRef::ptr_eq(&cap, &other));
    }

    #[test]
    fn test_settings_or_default() {
        #[derive(Debug, Default, Deserialize, PartialEq)]
        struct S {
            keys: Vec<String>,
        }
        let none = CapabilityConfig::new(0, serde_json::Value::Null);
        assert_eq!(none.settings_or_default::<S>().unwrap(), S::default());

        let some = CapabilityConfig::new(0, serde_json::json!({"keys": ["a"]}));
        assert_eq!(some.settings_or_default::<S>().unwrap().keys, vec!["a".to_string()]);

        let bad = CapabilityConfig::new(0, serde_json::json!({"keys": 3}));
        assert!(bad.settings_or_default::<S>().is_err());
    }
}
