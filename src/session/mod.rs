//! Client-facing sessions.
//!
//! A [`Session`] wraps one [`EntityController`] and exposes the operations
//! a client uses to drive a simulation: submit commands and events, tick,
//! inspect, close. In synchronous mode every operation runs on the calling
//! thread. In asynchronous mode the controller lives on a dedicated worker
//! thread and ticks return a [`TickHandle`].

pub mod commands;
pub mod controller;
mod worker;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::capability::{CapabilityRef, Registry};
use crate::entity::EntityConfig;
use crate::error::{SchedulingError, TickworkResult};
use crate::time::SimTime;

pub use commands::{Command, Event, Submission, TickResult};
pub use controller::{EntityController, EntityControllerBuilder};
pub use worker::TickHandle;

use worker::SessionWorker;

/// Session-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Run the controller on a dedicated worker thread.
    pub asynchronous: bool,
    /// Jobs the worker queue holds before submissions are refused.
    pub queue_capacity: usize,
    /// Wall-clock instant of simulation time zero.
    pub epoch: DateTime<Utc>,
    /// Root seed for every capability seed in the session.
    pub seed: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            asynchronous: false,
            queue_capacity: 1024,
            epoch: DateTime::UNIX_EPOCH,
            seed: 0,
        }
    }
}

impl SessionConfig {
    /// Asynchronous defaults.
    #[must_use]
    pub fn asynchronous() -> Self {
        Self {
            asynchronous: true,
            ..Self::default()
        }
    }

    /// Seeds capability randomness for entities without their own seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

enum State {
    Synchronous(Box<EntityController>),
    Asynchronous(SessionWorker),
    Closed,
}

/// A running simulation.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use tickwork::blackboard::{AddEntryRequest, AddEntryResponse};
/// use tickwork::{Blackboard, CapabilitySpec, Command, EntityConfig, Registry, Session, SessionConfig, SimTime, Version};
///
/// let alice = EntityConfig::new("BLUE:Alice")
///     .unwrap()
///     .capability(CapabilitySpec::at_least(Blackboard::NAME, Version::new(1, 0, 0)));
/// let mut session = Session::start(Arc::new(Registry::with_builtins()), [alice], SessionConfig::default()).unwrap();
///
/// let seq = session
///     .submit(Command::new("BLUE:Alice", AddEntryRequest::new("k", "v", SimTime::ZERO)))
///     .unwrap();
/// let result = session.tick(SimTime::from_millis(10)).unwrap();
/// assert_eq!(result.reply_as::<AddEntryResponse>(seq).unwrap().entry_count, 1);
/// session.close().unwrap();
/// ```
pub struct Session {
    id: Uuid,
    config: SessionConfig,
    state: State,
}

impl Session {
    /// Builds every entity and starts the session.
    ///
    /// # Errors
    ///
    /// Returns the first entity construction error, or an internal error if
    /// the worker thread cannot be spawned.
    pub fn start(
        registry: Arc<Registry>,
        entities: impl IntoIterator<Item = EntityConfig>,
        config: SessionConfig,
    ) -> TickworkResult<Self> {
        let controller = EntityController::builder(registry)
            .entities(entities)
            .seed(config.seed)
            .epoch(config.epoch)
            .build()?;
        Self::new(controller, config)
    }

    /// Starts a session around an already built controller.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the worker thread cannot be spawned.
    pub fn new(controller: EntityController, config: SessionConfig) -> TickworkResult<Self> {
        let id = Uuid::new_v4();
        let state = if config.asynchronous {
            let name = format!("tickwork-session-{}", id.simple());
            State::Asynchronous(SessionWorker::start(controller, name, config.queue_capacity)?)
        } else {
            State::Synchronous(Box::new(controller))
        };
        info!(session = %id, asynchronous = config.asynchronous, "session started");
        Ok(Self { id, config, state })
    }

    /// Identity of this session, for logs.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// True once `close` has run.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Queues a command or event for the next tick and returns its sequence id.
    ///
    /// # Errors
    ///
    /// Returns `SessionClosed` after `close`, `QueueFull` if the worker
    /// queue is full, or `IdSpaceExhausted`.
    pub fn submit(&mut self, submission: impl Into<Submission>) -> TickworkResult<u64> {
        match &mut self.state {
            State::Synchronous(controller) => controller.submit(submission.into()),
            State::Asynchronous(worker) => worker.submit(submission.into()),
            State::Closed => Err(SchedulingError::SessionClosed.into()),
        }
    }

    /// Advances to `time` and runs one round, waiting for it to finish.
    ///
    /// # Errors
    ///
    /// Returns `TemporalOrderingViolation` if `time` is before the last
    /// tick, `TickInProgress` if an asynchronous tick is still running, or
    /// `SessionClosed`.
    pub fn tick(&mut self, time: SimTime) -> TickworkResult<TickResult> {
        match &mut self.state {
            State::Synchronous(controller) => controller.tick(time),
            State::Asynchronous(worker) => worker.tick(Some(time))?.join(),
            State::Closed => Err(SchedulingError::SessionClosed.into()),
        }
    }

    /// Runs another round at the last tick time.
    ///
    /// # Errors
    ///
    /// Same as [`Session::tick`], minus the ordering check.
    pub fn tick_again(&mut self) -> TickworkResult<TickResult> {
        match &mut self.state {
            State::Synchronous(controller) => controller.tick_again(),
            State::Asynchronous(worker) => worker.tick(None)?.join(),
            State::Closed => Err(SchedulingError::SessionClosed.into()),
        }
    }

    /// Starts a tick without waiting for it.
    ///
    /// A synchronous session runs the tick before returning; the handle is
    /// already complete.
    ///
    /// # Errors
    ///
    /// Returns `TickInProgress` if a tick is still running, `QueueFull`, or
    /// `SessionClosed`. Errors of the tick itself surface from the handle.
    pub fn tick_async(&mut self, time: SimTime) -> TickworkResult<TickHandle> {
        match &mut self.state {
            State::Synchronous(controller) => Ok(TickHandle::ready(Some(time), controller.tick(time))),
            State::Asynchronous(worker) => worker.tick(Some(time)),
            State::Closed => Err(SchedulingError::SessionClosed.into()),
        }
    }

    /// Asynchronous [`Session::tick_again`].
    ///
    /// # Errors
    ///
    /// Same as [`Session::tick_async`].
    pub fn tick_again_async(&mut self) -> TickworkResult<TickHandle> {
        match &mut self.state {
            State::Synchronous(controller) => Ok(TickHandle::ready(None, controller.tick_again())),
            State::Asynchronous(worker) => worker.tick(None),
            State::Closed => Err(SchedulingError::SessionClosed.into()),
        }
    }

    /// True while an asynchronous tick is running.
    #[must_use]
    pub fn is_ticking(&self) -> bool {
        match &self.state {
            State::Asynchronous(worker) => worker.is_ticking(),
            State::Synchronous(_) | State::Closed => false,
        }
    }

    /// Runs `f` against the controller between rounds.
    ///
    /// # Errors
    ///
    /// Returns `SessionClosed`, or `QueueFull`/`Disconnected` from the worker.
    pub fn inspect<R, F>(&self, f: F) -> TickworkResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&EntityController) -> R + Send + 'static,
    {
        match &self.state {
            State::Synchronous(controller) => Ok(f(controller)),
            State::Asynchronous(worker) => worker.inspect(f),
            State::Closed => Err(SchedulingError::SessionClosed.into()),
        }
    }

    /// The capability named `name` on the entity at `path`.
    ///
    /// # Errors
    ///
    /// Same as [`Session::inspect`].
    pub fn find_capability(&self, path: &str, name: &str) -> TickworkResult<Option<CapabilityRef>> {
        let (path, name) = (path.to_string(), name.to_string());
        self.inspect(move |controller| controller.find_capability(&path, &name))
    }

    /// Time of the last completed tick.
    ///
    /// # Errors
    ///
    /// Same as [`Session::inspect`].
    pub fn last_tick_time(&self) -> TickworkResult<SimTime> {
        self.inspect(EntityController::last_tick_time)
    }

    /// Stops the session and disposes every capability.
    ///
    /// Queued asynchronous work finishes first. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the worker thread panicked.
    pub fn close(&mut self) -> TickworkResult<()> {
        let mut controller = match std::mem::replace(&mut self.state, State::Closed) {
            State::Closed => return Ok(()),
            State::Synchronous(controller) => *controller,
            State::Asynchronous(worker) => worker.shutdown()?,
        };
        controller.dispose();
        info!(session = %self.id, "session closed");
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.state {
            State::Synchronous(_) => "synchronous",
            State::Asynchronous(_) => "asynchronous",
            State::Closed => "closed",
        };
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("mode", &mode)
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(session = %self.id, error = %err, "session did not close cleanly");
        }
    }
}
