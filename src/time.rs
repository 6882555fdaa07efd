//! Simulation time.
//!
//! Simulation time is a signed count of milliseconds since the start of a
//! run. It is unrelated to the host clock; a [`SimTime`] can be mapped to a
//! wall-clock instant only through an explicit epoch.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A point in simulation time, in milliseconds.
///
/// # Examples
///
/// ```
/// use tickwork::SimTime;
///
/// let t = SimTime::from_millis(1_500);
/// assert!(t > SimTime::ZERO);
/// assert!(t < SimTime::FOREVER);
/// assert_eq!(t.to_string(), "1500ms");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimTime(i64);

impl SimTime {
    /// The earliest representable instant.
    pub const BIG_BANG: Self = Self(i64::MIN);

    /// The latest representable instant; entries valid until `FOREVER` never expire.
    pub const FOREVER: Self = Self(i64::MAX);

    /// Start of a simulation run.
    pub const ZERO: Self = Self(0);

    /// A time `ms` milliseconds after the epoch.
    #[must_use]
    pub const fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Returns this instant shifted by `ms`, saturating at the sentinels.
    #[must_use]
    pub const fn saturating_add(self, ms: i64) -> Self {
        Self(self.0.saturating_add(ms))
    }

    /// Maps this instant onto the wall clock, given the wall-clock instant of `ZERO`.
    ///
    /// Returns `None` for the sentinels and for instants chrono cannot represent.
    #[must_use]
    pub fn to_datetime(self, epoch: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self == Self::BIG_BANG || self == Self::FOREVER {
            return None;
        }
        epoch.checked_add_signed(Duration::milliseconds(self.0))
    }
}

impl From<i64> for SimTime {
    fn from(ms: i64) -> Self {
        Self(ms)
    }
}

impl From<SimTime> for i64 {
    fn from(t: SimTime) -> Self {
        t.0
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::BIG_BANG => write!(f, "-∞"),
            Self::FOREVER => write!(f, "∞"),
            Self(ms) => write!(f, "{ms}ms"),
        }
    }
}

/// An inclusive simulation-time window: `[valid_from, valid_until]`.
///
/// Both ends are inclusive, so a window whose ends are equal is valid at
/// exactly one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidityWindow {
    /// First instant at which the window is open.
    pub valid_from: SimTime,

    /// Last instant at which the window is open.
    pub valid_until: SimTime,
}

impl ValidityWindow {
    /// Creates a window from two instants.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidWindow` if `valid_from > valid_until`.
    pub fn new(valid_from: SimTime, valid_until: SimTime) -> Result<Self, ValidationError> {
        if valid_from > valid_until {
            return Err(ValidationError::InvalidWindow {
                from: valid_from,
                until: valid_until,
            });
        }
        Ok(Self {
            valid_from,
            valid_until,
        })
    }

    /// Creates a window that opens at `valid_from` and never closes.
    #[must_use]
    pub const fn starting_at(valid_from: SimTime) -> Self {
        Self {
            valid_from,
            valid_until: SimTime::FOREVER,
        }
    }

    /// A window open at every instant.
    #[must_use]
    pub const fn always() -> Self {
        Self {
            valid_from: SimTime::BIG_BANG,
            valid_until: SimTime::FOREVER,
        }
    }

    /// True if `t` lies in the window, both ends included.
    #[must_use]
    pub fn contains(&self, t: SimTime) -> bool {
        self.valid_from <= t && t <= self.valid_until
    }

    /// True once `t` is past the end of the window.
    #[must_use]
    pub fn has_expired(&self, t: SimTime) -> bool {
        t > self.valid_until
    }

    /// True if the window never closes.
    #[must_use]
    pub fn is_open_ended(&self) -> bool {
        self.valid_until == SimTime::FOREVER
    }
}

impl fmt::Display for ValidityWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.valid_from, self.valid_until)
    }
}
