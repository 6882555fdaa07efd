//! Time-windowed shared store.
//!
//! The Blackboard lets capabilities that were resolved independently
//! exchange values that are only meaningful for a span of simulation time.
//! It is reachable two ways: directly, by capabilities that require it and
//! hold the injected instance, and through the message protocol in
//! [`messages`].
//!
//! Entries are never swept in the background. An entry whose window has
//! closed is removed the first time it is looked up after closing.

pub mod messages;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::capability::{Capability, Provider, Version};
use crate::error::{TickworkResult, ValidationError};
use crate::message::{Message, PayloadType};
use crate::processing::ProcessingResult;
use crate::time::{SimTime, ValidityWindow};
use crate::value::Value;

pub use messages::{
    AddEntryRequest, AddEntryResponse, GetEntryRequest, GetEntryResponse, RemoveEntryRequest,
    RemoveEntryResponse,
};

/// One stored value and the window in which it is valid.
#[derive(Debug, Clone)]
pub struct BlackboardEntry {
    value: Arc<dyn Any + Send + Sync>,
    window: ValidityWindow,
}

impl BlackboardEntry {
    /// When the entry is valid.
    #[must_use]
    pub const fn window(&self) -> ValidityWindow {
        self.window
    }

    /// The stored value, type-erased.
    #[must_use]
    pub fn value(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.value
    }
}

/// Keyed, time-windowed value store.
///
/// # Examples
///
/// ```
/// use tickwork::{Blackboard, SimTime};
///
/// let mut board = Blackboard::new();
/// board
///     .put("k", "v".to_string(), SimTime::from_millis(1000), SimTime::from_millis(10_000))
///     .unwrap();
///
/// assert!(board.get_as::<String>("k", SimTime::from_millis(500)).is_none());
/// assert_eq!(*board.get_as::<String>("k", SimTime::from_millis(7500)).unwrap(), "v");
/// assert!(board.get("k", SimTime::from_millis(15_000)).is_none());
/// assert_eq!(board.len(), 0);
/// ```
#[derive(Debug, Default)]
pub struct Blackboard {
    entries: HashMap<String, BlackboardEntry>,
}

impl Blackboard {
    /// Capability name the Blackboard is registered under.
    pub const NAME: &'static str = "Blackboard";

    /// Registered version.
    pub const VERSION: Version = Version::new(1, 0, 0);

    /// An empty Blackboard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry entry for the in-memory Blackboard.
    #[must_use]
    pub fn provider() -> Provider {
        Provider::builder(Self::NAME, Self::VERSION)
            .implementation("InMemBlackboard")
            .description("Time-windowed key/value store shared by an entity's capabilities")
            .factory(Self::new)
    }

    /// Stores `value` under `key`, replacing any prior entry and its window.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidWindow` if `valid_from > valid_until`.
    pub fn put<T: Any + Send + Sync>(
        &mut self,
        key: impl Into<String>,
        value: T,
        valid_from: SimTime,
        valid_until: SimTime,
    ) -> Result<(), ValidationError> {
        self.put_shared(key, Arc::new(value), valid_from, valid_until)
    }

    /// Stores `value` from `valid_from` onwards, with no expiry.
    pub fn put_forever<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T, valid_from: SimTime) {
        self.insert(key.into(), Arc::new(value), ValidityWindow::starting_at(valid_from));
    }

    /// Stores an already shared value.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidWindow` if `valid_from > valid_until`.
    pub fn put_shared(
        &mut self,
        key: impl Into<String>,
        value: Arc<dyn Any + Send + Sync>,
        valid_from: SimTime,
        valid_until: SimTime,
    ) -> Result<(), ValidationError> {
        let window = ValidityWindow::new(valid_from, valid_until)?;
        self.insert(key.into(), value, window);
        Ok(())
    }

    fn insert(&mut self, key: String, value: Arc<dyn Any + Send + Sync>, window: ValidityWindow) {
        trace!(key = %key, %window, "blackboard put");
        self.entries.insert(key, BlackboardEntry { value, window });
    }

    /// The value valid for `key` at `at`.
    ///
    /// A lookup after the entry's window has closed removes the entry.
    pub fn get(&mut self, key: &str, at: SimTime) -> Option<Arc<dyn Any + Send + Sync>> {
        let entry = self.entries.get(key)?;
        if entry.window.has_expired(at) {
            trace!(key, %at, "blackboard entry expired");
            self.entries.remove(key);
            return None;
        }
        entry.window.contains(at).then(|| Arc::clone(&entry.value))
    }

    /// Like [`Blackboard::get`], but only if the value is a `T`.
    ///
    /// A type mismatch yields `None`, not an error.
    pub fn get_as<T: Any + Send + Sync>(&mut self, key: &str, at: SimTime) -> Option<Arc<T>> {
        self.get(key, at)?.downcast::<T>().ok()
    }

    /// Removes `key`, returning whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Entries currently held, including ones expired but not yet looked up.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if `key` holds an entry, valid now or not.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn handle_add(&mut self, req: &AddEntryRequest) -> TickworkResult<AddEntryResponse> {
        self.put(req.key.clone(), req.value.clone(), req.valid_from, req.valid_until)?;
        Ok(AddEntryResponse {
            entry_count: self.len(),
        })
    }

    fn handle_get(&mut self, req: &GetEntryRequest, now: SimTime) -> GetEntryResponse {
        let at_time = req.at_time.unwrap_or(now);
        let value = self
            .get_as::<Value>(&req.key, at_time)
            .map(|v| (*v).clone())
            .filter(|v| req.kind.map_or(true, |kind| v.kind() == kind));
        GetEntryResponse {
            key: req.key.clone(),
            at_time,
            value,
        }
    }

    fn handle_remove(&mut self, req: &RemoveEntryRequest) -> RemoveEntryResponse {
        self.remove(&req.key);
        RemoveEntryResponse {
            entry_count: self.len(),
        }
    }
}

impl Capability for Blackboard {
    fn handled_payloads(&self) -> Vec<PayloadType> {
        vec![
            PayloadType::of::<AddEntryRequest>(),
            PayloadType::of::<GetEntryRequest>(),
            PayloadType::of::<RemoveEntryRequest>(),
        ]
    }

    fn process(&mut self, message: &Message, now: SimTime) -> TickworkResult<ProcessingResult> {
        if let Some(req) = message.payload_as::<AddEntryRequest>() {
            let response = self.handle_add(req)?;
            return Ok(ProcessingResult::of(message.reply(response, now)));
        }
        if let Some(req) = message.payload_as::<GetEntryRequest>() {
            let response = self.handle_get(req, now);
            return Ok(ProcessingResult::of(message.reply(response, now)));
        }
        if let Some(req) = message.payload_as::<RemoveEntryRequest>() {
            let response = self.handle_remove(req);
            return Ok(ProcessingResult::of(message.reply(response, now)));
        }
        Ok(ProcessingResult::of(message.unsupported_reply(now)))
    }

    fn dispose(&mut self) {
        self.entries.clear();
    }
}
