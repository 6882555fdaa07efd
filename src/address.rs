//! Routing keys and identifier allocation.
//!
//! An [`Address`] names where a message comes from and where it goes: a
//! capability inside the current entity, another entity (optionally a named
//! capability inside it), or the client outside the simulation. Addresses are
//! local routing keys, not network endpoints.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{SchedulingError, ValidationError};

/// First identifier of the framework-internal block.
pub const SYSTEM_BLOCK_BEGIN: u64 = 0;

/// First identifier of the client block; the system block ends here.
pub const USER_BLOCK_BEGIN: u64 = 10_000;

/// Identifier of an entity within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw identifier.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// One contiguous, monotonically allocated block of identifiers.
///
/// Allocation never wraps: once the block is used up every call fails with
/// `IdSpaceExhausted`.
#[derive(Debug)]
pub struct IdBlock {
    name: &'static str,
    end: u64,
    next: AtomicU64,
}

impl IdBlock {
    /// Creates a block covering `[begin, end)`.
    #[must_use]
    pub const fn new(name: &'static str, begin: u64, end: u64) -> Self {
        Self {
            name,
            end,
            next: AtomicU64::new(begin),
        }
    }

    /// Framework-internal identifiers: `[SYSTEM_BLOCK_BEGIN, USER_BLOCK_BEGIN)`.
    #[must_use]
    pub const fn system() -> Self {
        Self::new("system", SYSTEM_BLOCK_BEGIN, USER_BLOCK_BEGIN)
    }

    /// Client identifiers: `[USER_BLOCK_BEGIN, u64::MAX)`.
    #[must_use]
    pub const fn user() -> Self {
        Self::new("user", USER_BLOCK_BEGIN, u64::MAX)
    }

    /// Allocates the next identifier.
    ///
    /// # Errors
    ///
    /// Returns `SchedulingError::IdSpaceExhausted` once the block is used up.
    pub fn next(&self) -> Result<u64, SchedulingError> {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| (n < self.end).then(|| n + 1))
            .map_err(|_| SchedulingError::IdSpaceExhausted { block: self.name })
    }

    /// Identifiers handed out so far would be below this value.
    #[must_use]
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

/// The pair of identifier blocks owned by one session.
///
/// Framework entities (the controller) draw from the system block.
/// Configured entities and every message sequence number, whether the
/// client or the framework originates the message, draw from the user
/// block, so the two can never collide.
#[derive(Debug)]
pub struct IdSource {
    system: IdBlock,
    user: IdBlock,
}

impl Default for IdSource {
    fn default() -> Self {
        Self {
            system: IdBlock::system(),
            user: IdBlock::user(),
        }
    }
}

impl IdSource {
    /// Allocates a framework-internal identifier.
    ///
    /// # Errors
    ///
    /// Returns `SchedulingError::IdSpaceExhausted` if the system block is used up.
    pub fn next_system(&self) -> Result<u64, SchedulingError> {
        self.system.next()
    }

    /// Allocates a client identifier.
    ///
    /// # Errors
    ///
    /// Returns `SchedulingError::IdSpaceExhausted` if the user block is used up.
    pub fn next_user(&self) -> Result<u64, SchedulingError> {
        self.user.next()
    }

    /// Allocates a message sequence number.
    ///
    /// Shares the user block with [`IdSource::next_user`], which leaves
    /// about 1.8e19 numbers per session.
    ///
    /// # Errors
    ///
    /// Returns `SchedulingError::IdSpaceExhausted` if the user block is used up.
    pub fn next_sequence(&self) -> Result<u64, SchedulingError> {
        self.user.next()
    }
}

/// Which side of an entity boundary an address points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressKind {
    /// A capability inside the entity that is processing the message.
    Internal,
    /// Another entity, or a named capability inside it.
    External,
    /// The client driving the session.
    Client,
}

/// A message source or destination.
///
/// Equality is structural.
///
/// # Examples
///
/// ```
/// use tickwork::{Address, AddressKind, EntityId};
///
/// let a = Address::capability(EntityId::new(10_000), "Blackboard");
/// assert_eq!(a.kind(), AddressKind::External);
/// assert_eq!(a, Address::capability(EntityId::new(10_000), "Blackboard"));
/// assert!(Address::client().is_client());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    entity: Option<EntityId>,
    label: Option<String>,
    kind: AddressKind,
}

impl Address {
    /// A capability of the entity that processes the message.
    #[must_use]
    pub fn internal(label: impl Into<String>) -> Self {
        Self {
            entity: None,
            label: Some(label.into()),
            kind: AddressKind::Internal,
        }
    }

    /// Another entity as a whole.
    #[must_use]
    pub const fn external(entity: EntityId) -> Self {
        Self {
            entity: Some(entity),
            label: None,
            kind: AddressKind::External,
        }
    }

    /// A named capability of a specific entity.
    #[must_use]
    pub fn capability(entity: EntityId, label: impl Into<String>) -> Self {
        Self {
            entity: Some(entity),
            label: Some(label.into()),
            kind: AddressKind::External,
        }
    }

    /// The client outside the simulation.
    #[must_use]
    pub const fn client() -> Self {
        Self {
            entity: None,
            label: None,
            kind: AddressKind::Client,
        }
    }

    /// Which side of an entity boundary this points at.
    #[must_use]
    pub const fn kind(&self) -> AddressKind {
        self.kind
    }

    /// The target entity; `None` for internal and client addresses.
    #[must_use]
    pub const fn entity(&self) -> Option<EntityId> {
        self.entity
    }

    /// Capability label, when the address names one.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    #[must_use]
    pub fn is_client(&self) -> bool {
        self.kind == AddressKind::Client
    }

    /// True if a message sent here stays inside `entity`.
    #[must_use]
    pub fn is_local_to(&self, entity: EntityId) -> bool {
        match self.kind {
            AddressKind::Internal => true,
            AddressKind::External => self.entity == Some(entity),
            AddressKind::Client => false,
        }
    }

    /// Checks the structural rules a routable address must satisfy.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidAddress` for an internal address with
    /// an empty label.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.kind == AddressKind::Internal && self.label.as_deref().map_or(true, str::is_empty) {
            return Err(ValidationError::InvalidAddress {
                reason: "internal address needs a capability label".to_string(),
            });
        }
        if self.kind == AddressKind::External && self.entity.is_none() {
            return Err(ValidationError::InvalidAddress {
                reason: "external address needs an entity".to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.entity, self.label.as_deref()) {
            (AddressKind::Client, _, _) => write!(f, "client"),
            (_, Some(entity), Some(label)) => write!(f, "{entity}/{label}"),
            (_, Some(entity), None) => write!(f, "{entity}"),
            (_, None, Some(label)) => write!(f, "local/{label}"),
            (_, None, None) => write!(f, "local"),
        }
    }
}
