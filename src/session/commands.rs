//! Client submissions and tick results.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::message::{share, Failure, Message, Payload};
use crate::time::SimTime;

/// A request/response interaction with one entity, delivered at the next tick.
#[derive(Debug, Clone)]
pub struct Command {
    /// `Side:Name` path of the receiving entity.
    pub recipient_path: String,
    /// What the entity is asked to handle.
    pub payload: Arc<dyn Payload>,
}

impl Command {
    /// A command carrying `payload`; an `Arc<dyn Payload>` is taken as is.
    #[must_use]
    pub fn new(recipient_path: impl Into<String>, payload: impl Payload) -> Self {
        Self::shared(recipient_path, share(payload))
    }

    /// A command carrying an already shared payload, such as one decoded by
    /// [`PayloadCodec`](crate::codec::PayloadCodec).
    #[must_use]
    pub fn shared(recipient_path: impl Into<String>, payload: Arc<dyn Payload>) -> Self {
        Self {
            recipient_path: recipient_path.into(),
            payload,
        }
    }
}

/// A time-stamped effect, delivered once simulation time reaches `event_time`.
#[derive(Debug, Clone)]
pub struct Event {
    /// `Side:Name` path of the receiving entity.
    pub recipient_path: String,
    /// The effect to deliver.
    pub payload: Arc<dyn Payload>,
    /// When the effect takes place; never before the session's current time.
    pub event_time: SimTime,
}

impl Event {
    /// An event carrying `payload`; an `Arc<dyn Payload>` is taken as is.
    #[must_use]
    pub fn new(recipient_path: impl Into<String>, payload: impl Payload, event_time: SimTime) -> Self {
        Self::shared(recipient_path, share(payload), event_time)
    }

    /// An event carrying an already shared payload.
    #[must_use]
    pub fn shared(recipient_path: impl Into<String>, payload: Arc<dyn Payload>, event_time: SimTime) -> Self {
        Self {
            recipient_path: recipient_path.into(),
            payload,
            event_time,
        }
    }
}

/// Anything a client can submit to a session.
#[derive(Debug, Clone)]
pub enum Submission {
    /// Handled at the next tick.
    Command(Command),
    /// Held until its event time.
    Event(Event),
}

impl Submission {
    /// Path of the receiving entity.
    #[must_use]
    pub fn recipient_path(&self) -> &str {
        match self {
            Self::Command(c) => &c.recipient_path,
            Self::Event(e) => &e.recipient_path,
        }
    }

    /// The submitted payload, behind any sharing.
    #[must_use]
    pub fn payload(&self) -> &dyn Payload {
        match self {
            Self::Command(c) => &*c.payload,
            Self::Event(e) => &*e.payload,
        }
    }
}

impl From<Command> for Submission {
    fn from(c: Command) -> Self {
        Self::Command(c)
    }
}

impl From<Event> for Submission {
    fn from(e: Event) -> Self {
        Self::Event(e)
    }
}

/// Consolidated outcome of one `tick` or `tick_again`.
#[derive(Debug, Clone)]
pub struct TickResult {
    /// Simulation time the round ran at.
    pub time: SimTime,
    /// `time` on the wall clock, relative to the session epoch.
    pub wall_time: Option<DateTime<Utc>>,
    /// Every message that left the simulation, in production order.
    pub outputs: Vec<Message>,
    /// Messages handed from one entity to another; they are processed next round.
    pub forwarded: usize,
    /// Messages addressed to entities that do not exist.
    pub dropped: usize,
    /// Messages still queued in entity mailboxes after the round.
    pub pending: usize,
    /// Earliest time of a held event, if any.
    pub next_event_time: Option<SimTime>,
}

impl TickResult {
    /// Output payloads of type `T`.
    pub fn payloads<T: Payload>(&self) -> impl Iterator<Item = &T> {
        self.outputs.iter().filter_map(Message::payload_as::<T>)
    }

    /// Error outputs, with the sequence id of the request that caused them.
    pub fn failures(&self) -> impl Iterator<Item = (u64, &Failure)> {
        self.outputs
            .iter()
            .filter(|m| m.is_error())
            .filter_map(|m| m.payload_as::<Failure>().map(|f| (m.sequence(), f)))
    }

    /// Outputs correlated with the submission numbered `sequence`.
    pub fn replies_to(&self, sequence: u64) -> impl Iterator<Item = &Message> {
        self.outputs.iter().filter(move |m| m.sequence() == sequence)
    }

    /// The first output of type `T` replying to `sequence`.
    #[must_use]
    pub fn reply_as<T: Payload>(&self, sequence: u64) -> Option<&T> {
        self.replies_to(sequence).find_map(Message::payload_as::<T>)
    }
}

impl fmt::Display for TickResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tick@{}: {} outputs, {} forwarded, {} dropped, {} pending",
            self.time,
            self.outputs.len(),
            self.forwarded,
            self.dropped,
            self.pending
        )
    }
}
