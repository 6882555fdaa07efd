//! Single-worker asynchronous execution.
//!
//! In asynchronous mode the controller moves onto one dedicated thread fed
//! by a bounded queue. Submissions, ticks and inspections run there in
//! queue order, so a session never interleaves two rounds. A tick may be
//! requested while none is in flight; a second request while one is in
//! flight fails fast with `TickInProgress` instead of queueing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::debug;

use crate::error::{SchedulingError, TickworkError, TickworkResult};
use crate::session::commands::{Submission, TickResult};
use crate::session::controller::EntityController;
use crate::time::SimTime;

type Inspection = Box<dyn FnOnce(&EntityController) + Send>;

enum Job {
    Submit {
        submission: Submission,
        reply: Sender<TickworkResult<u64>>,
    },
    /// `None` runs `tick_again`.
    Tick {
        time: Option<SimTime>,
        reply: Sender<TickworkResult<TickResult>>,
    },
    Inspect(Inspection),
}

/// Handle to a tick running (or already run) on a session.
#[derive(Debug)]
pub struct TickHandle {
    time: Option<SimTime>,
    rx: Receiver<TickworkResult<TickResult>>,
}

impl TickHandle {
    /// A handle whose result is already known.
    pub(crate) fn ready(time: Option<SimTime>, result: TickworkResult<TickResult>) -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.send(result);
        Self { time, rx }
    }

    /// Requested time, or `None` for `tick_again`.
    #[must_use]
    pub const fn requested_time(&self) -> Option<SimTime> {
        self.time
    }

    /// Waits for the tick to complete.
    ///
    /// # Errors
    ///
    /// Returns the tick's own error, or `Disconnected` if the worker died.
    pub fn join(self) -> TickworkResult<TickResult> {
        self.rx
            .recv()
            .map_err(|_| TickworkError::from(SchedulingError::Disconnected))?
    }

    /// Waits for the tick to complete, at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the tick is still running after `timeout`, the
    /// tick's own error, or `Disconnected` if the worker died.
    pub fn join_timeout(self, timeout: Duration) -> TickworkResult<TickResult> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => TickworkError::from(SchedulingError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => TickworkError::from(SchedulingError::Disconnected),
        })?
    }
}

/// The dedicated thread owning a controller.
pub(crate) struct SessionWorker {
    tx: Sender<Job>,
    worker: JoinHandle<EntityController>,
    in_flight: Arc<AtomicBool>,
    queue_capacity: usize,
}

impl SessionWorker {
    pub(crate) fn start(
        mut controller: EntityController,
        name: String,
        queue_capacity: usize,
    ) -> TickworkResult<Self> {
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);
        let in_flight = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&in_flight);

        let worker = thread::Builder::new()
            .name(name)
            .spawn(move || {
                // Runs until every sender is gone, then hands the controller back.
                while let Ok(job) = rx.recv() {
                    match job {
                        Job::Submit { submission, reply } => {
                            let _ = reply.send(controller.submit(submission));
                        }
                        Job::Tick { time, reply } => {
                            let result = match time {
                                Some(time) => controller.tick(time),
                                None => controller.tick_again(),
                            };
                            flag.store(false, Ordering::Release);
                            let _ = reply.send(result);
                        }
                        Job::Inspect(inspect) => inspect(&controller),
                    }
                }
                controller
            })
            .map_err(|err| TickworkError::internal(format!("failed to spawn session worker: {err}")))?;

        Ok(Self {
            tx,
            worker,
            in_flight,
            queue_capacity,
        })
    }

    fn try_submit(&self, job: Job) -> TickworkResult<()> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SchedulingError::QueueFull {
                capacity: self.queue_capacity,
            }
            .into()),
            Err(TrySendError::Disconnected(_)) => Err(SchedulingError::Disconnected.into()),
        }
    }

    pub(crate) fn submit(&self, submission: Submission) -> TickworkResult<u64> {
        let (reply, rx) = bounded(1);
        self.try_submit(Job::Submit { submission, reply })?;
        rx.recv().map_err(|_| TickworkError::from(SchedulingError::Disconnected))?
    }

    /// Starts a tick; `None` runs `tick_again`.
    pub(crate) fn tick(&self, time: Option<SimTime>) -> TickworkResult<TickHandle> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SchedulingError::TickInProgress.into());
        }
        let (reply, rx) = bounded(1);
        if let Err(err) = self.try_submit(Job::Tick { time, reply }) {
            self.in_flight.store(false, Ordering::Release);
            return Err(err);
        }
        Ok(TickHandle { time, rx })
    }

    pub(crate) fn is_ticking(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn inspect<R, F>(&self, f: F) -> TickworkResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&EntityController) -> R + Send + 'static,
    {
        let (reply, rx) = bounded(1);
        self.try_submit(Job::Inspect(Box::new(move |controller| {
            let _ = reply.send(f(controller));
        })))?;
        rx.recv().map_err(|_| SchedulingError::Disconnected.into())
    }

    /// Stops accepting work, lets queued jobs finish and returns the controller.
    pub(crate) fn shutdown(self) -> TickworkResult<EntityController> {
        drop(self.tx);
        let controller = self
            .worker
            .join()
            .map_err(|_| TickworkError::internal("session worker panicked"))?;
        debug!("session worker stopped");
        Ok(controller)
    }
}
