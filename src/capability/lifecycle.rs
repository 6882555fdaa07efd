//! Capability lifecycle state machine.
//!
//! `Created -> Configured -> Initialized -> Active`, with `Disposed` as the
//! terminal state reached at session shutdown. Transitions only move forward.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;

/// Where a capability instance is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Instantiated by its provider.
    Created,
    /// Collaborators injected and settings accepted.
    Configured,
    /// Bound to its entity; may process messages.
    Initialized,
    /// Running inside a session.
    Active,
    /// Released at shutdown. Terminal.
    Disposed,
}

impl LifecycleState {
    /// State after `configure()`. Reconfiguring before `init()` is allowed.
    ///
    /// # Errors
    ///
    /// Returns `IllegalLifecycleTransition` once the instance is initialized.
    pub fn configure(self, capability: &str) -> Result<Self, LifecycleError> {
        match self {
            Self::Created | Self::Configured => Ok(Self::Configured),
            _ => Err(illegal(capability, self, Self::Configured)),
        }
    }

    /// State after `init()`. A second `init()` leaves the state unchanged.
    ///
    /// # Errors
    ///
    /// Returns `IllegalLifecycleTransition` if the instance was never
    /// configured or is already disposed.
    pub fn init(self, capability: &str) -> Result<Self, LifecycleError> {
        match self {
            Self::Configured => Ok(Self::Initialized),
            Self::Initialized | Self::Active => Ok(self),
            Self::Created | Self::Disposed => Err(illegal(capability, self, Self::Initialized)),
        }
    }

    /// State after the owning entity joins a session.
    ///
    /// # Errors
    ///
    /// Returns `IllegalLifecycleTransition` unless the instance is initialized.
    pub fn activate(self, capability: &str) -> Result<Self, LifecycleError> {
        match self {
            Self::Initialized | Self::Active => Ok(Self::Active),
            _ => Err(illegal(capability, self, Self::Active)),
        }
    }

    /// True if `process` and `tick` may be called.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Initialized | Self::Active)
    }

    /// # Errors
    ///
    /// Returns `NotReady` unless the instance is initialized or active.
    pub fn ensure_ready(self, capability: &str) -> Result<(), LifecycleError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(LifecycleError::NotReady {
                capability: capability.to_string(),
                state: self.to_string(),
            })
        }
    }
}

fn illegal(capability: &str, from: LifecycleState, to: LifecycleState) -> LifecycleError {
    LifecycleError::IllegalLifecycleTransition {
        capability: capability.to_string(),
        from: from.to_string(),
        to: to.to_string(),
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Configured => "configured",
            Self::Initialized => "initialized",
            Self::Active => "active",
            Self::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path() {
        let s = LifecycleState::Created;
        let s = s.configure("x").unwrap();
        assert_eq!(s, LifecycleState::Configured);
        let s = s.init("x").unwrap();
        assert_eq!(s, LifecycleState::Initialized);
        let s = s.activate("x").unwrap();
        assert_eq!(s, LifecycleState::Active);
    }

    #[test]
    fn test_init_twice_is_noop() {
        let s = LifecycleState::Configured.init("x").unwrap();
        assert_eq!(s.init("x").unwrap(), LifecycleState::Initialized);
        assert_eq!(LifecycleState::Active.init("x").unwrap(), LifecycleState::Active);
    }

    #[test]
    fn test_configure_after_init_fails() {
        let err = LifecycleState::Initialized.configure("Blackboard").unwrap_err();
        assert!(matches!(err, LifecycleError::IllegalLifecycleTransition { .. }));
        assert!(err.to_string().contains("Blackboard"));
        assert!(LifecycleState::Active.configure("x").is_err());
    }

    #[test]
    fn test_init_requires_configuration() {
        assert!(LifecycleState::Created.init("x").is_err());
        assert!(LifecycleState::Disposed.init("x").is_err());
    }

    #[test]
    fn test_readiness() {
        assert!(LifecycleState::Created.ensure_ready("x").is_err());
        assert!(LifecycleState::Configured.ensure_ready("x").is_err());
        assert!(LifecycleState::Initialized.ensure_ready("x").is_ok());
        assert!(LifecycleState::Active.ensure_ready("x").is_ok());
        assert!(LifecycleState::Disposed.ensure_ready("x").is_err());
    }
}
