//!
//! Uncounted tasks: fire-and-forget jobs that no termination protocol tracks.
//!
//! There is no channel back to the sender, so failures split in two:
//!     * before departure (dead place, serialization, transport) the sender gets
//!       the error from `uncounted_async_at`,
//!     * after departure (decode, execution) the failure is logged at the
//!       receiving place and the task is dropped. Nothing is retried.
//!

use log::{error, trace};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use super::{Job, JobContext, SerializableJob, WireFormat};
use crate::place::Place;
use crate::system::{dispatcher::SendError, executor::WorkerSlot, Runtime};

/// The job substituted for a task that could not be decoded.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default)]
pub struct NoopJob;

impl Job for NoopJob {
    fn run(self: Box<Self>, _ctx: &JobContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Envelope around a job executed without completion tracking.
pub struct UncountedTask {
    job: Box<dyn Job>,
}

impl UncountedTask {
    pub fn new<J: Job>(job: J) -> Self {
        Self { job: Box::new(job) }
    }

    /// Rebuild a task received at place `here`. A frame that fails to decode
    /// becomes a no-op task.
    pub fn decode(here: Place, wire: &WireFormat, bytes: &[u8]) -> Self {
        match wire.decode(bytes) {
            Ok(job) => Self { job },
            Err(e) => {
                error!(
                    "uncounted_task_receive_failed at place {} due to: {}, ignoring",
                    here, e
                );
                Self::new(NoopJob)
            }
        }
    }

    /// Run the job on a pool worker.
    ///
    /// The worker's current task is cleared first. Whatever the job does, errors
    /// and panics included, this returns normally and the worker stays usable.
    pub fn compute(self, runtime: &Runtime, worker: &WorkerSlot) {
        worker.clear();

        let here = runtime.here();
        let ctx = JobContext::new(runtime, Some(worker));
        let job = self.job;

        match panic::catch_unwind(AssertUnwindSafe(|| job.run(&ctx))) {
            Ok(Ok(())) => trace!("uncounted_task_completed at place {}", here),
            Ok(Err(e)) => error!(
                "uncounted_task_uncaught_failure at place {} caused by: {:#}, ignoring",
                here, e
            ),
            Err(cause) => error!(
                "uncounted_task_uncaught_panic at place {} caused by: {}, ignoring",
                here,
                panic_message(cause.as_ref())
            ),
        }
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> &str {
    if let Some(msg) = cause.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = cause.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

/// Spawn `job` at `place` without tracking its completion.
///
/// When `place` is here the task goes to the local worker pool. Errors returned
/// here mean the task never left; once it has left, its outcome is only visible
/// in the receiving place's log.
pub(crate) fn uncounted_async_at<J: SerializableJob>(
    runtime: &Runtime,
    place: Place,
    job: J,
) -> Result<(), SendError> {
    runtime
        .dispatcher()
        .dispatch(place, job, |job| {
            runtime.execute(UncountedTask::new(job));
            Ok(())
        })
        .map_err(|e| {
            if runtime.config().verbose_serialization && !e.is_dead_place() {
                error!(
                    "uncounted_task_spawn_failed at place {} due to: {}",
                    place, e
                );
            }
            e
        })
}
