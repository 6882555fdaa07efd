//! Capability versions and requirement specifications.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A `major.minor.patch` version triple, ordered lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    /// Incompatible changes.
    pub major: u32,
    /// Backwards-compatible additions.
    pub minor: u32,
    /// Fixes.
    pub patch: u32,
}

impl Version {
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = ValidationError;

    /// Parses `major`, `major.minor` or `major.minor.patch`; missing parts are zero.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidVersion { input: s.to_string() };
        let mut parts = s.trim().split('.');
        let mut next = |required: bool| -> Result<u32, ValidationError> {
            match parts.next() {
                Some(p) => p.parse().map_err(|_| invalid()),
                None if required => Err(invalid()),
                None => Ok(0),
            }
        };
        let version = Self::new(next(true)?, next(false)?, next(false)?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl TryFrom<String> for Version {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

/// What a requester asks of a capability: a name, a version and whether the
/// version must match exactly.
///
/// # Examples
///
/// ```
/// use tickwork::{CapabilitySpec, Version};
///
/// let floor = CapabilitySpec::at_least("Blackboard", Version::new(1, 2, 0));
/// assert!(floor.is_satisfied_by(&Version::new(1, 3, 0)));
/// assert!(!floor.is_satisfied_by(&Version::new(2, 0, 0)));
///
/// let pinned = CapabilitySpec::exactly("Blackboard", Version::new(1, 2, 0));
/// assert!(!pinned.is_satisfied_by(&Version::new(1, 2, 1)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilitySpec {
    /// Capability name.
    pub name: String,
    /// Requested version; a lower bound unless `exact`.
    pub version: Version,
    /// Accept only `version` itself.
    #[serde(default)]
    pub exact: bool,
}

impl CapabilitySpec {
    /// Any version with the same major and an equal or newer `(minor, patch)`.
    #[must_use]
    pub fn at_least(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            exact: false,
        }
    }

    /// Only this exact version.
    #[must_use]
    pub fn exactly(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            exact: true,
        }
    }

    /// True if `candidate` is acceptable.
    ///
    /// An exact spec accepts only its own version. Otherwise the major must
    /// match and `(minor, patch)` must not be older than requested.
    #[must_use]
    pub fn is_satisfied_by(&self, candidate: &Version) -> bool {
        if self.exact {
            return *candidate == self.version;
        }
        candidate.major == self.version.major
            && (candidate.minor, candidate.patch) >= (self.version.minor, self.version.patch)
    }
}

impl fmt::Display for CapabilitySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exact {
            write!(f, "{} ={}", self.name, self.version)
        } else {
            write!(f, "{} >={}", self.name, self.version)
        }
    }
}
