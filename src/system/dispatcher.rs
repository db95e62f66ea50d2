use log::trace;
use thiserror::Error;

use super::Runtime;
use crate::group::GroupError;
use crate::place::{DeadPlaceError, Place};
use crate::task::{codec::CodecError, JobContext, SerializableJob};

/// Failures visible to the sender of an active message. All of them happen
/// before the message leaves this place.
#[derive(Error, Debug)]
pub enum SendError {
    #[error(transparent)]
    DeadPlace(#[from] DeadPlaceError),
    #[error("serialization failed: {0}")]
    Serialization(#[from] CodecError),
    #[error("transport failed: {0}")]
    Transport(#[from] GroupError),
    /// The job ran inline at this place and failed.
    #[error("local execution failed: {0}")]
    Job(anyhow::Error),
}

impl SendError {
    pub fn is_dead_place(&self) -> bool {
        matches!(self, SendError::DeadPlace(_))
    }

    pub fn dead_place(&self) -> Option<Place> {
        match self {
            SendError::DeadPlace(e) => Some(e.place()),
            _ => None,
        }
    }
}

/// Routes active messages to places. Holds no state of its own.
pub struct Dispatcher<'a> {
    runtime: &'a Runtime,
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(runtime: &'a Runtime) -> Self {
        Self { runtime }
    }

    /// Execute `job` at `place`.
    ///
    /// When `place` is here the job runs inline on the calling thread before
    /// this returns. Otherwise it is encoded and handed to the group; a dead or
    /// unknown place fails without touching the group.
    pub fn send<J: SerializableJob>(&self, place: Place, job: J) -> Result<(), SendError> {
        let runtime = self.runtime;
        self.dispatch(place, job, |job| {
            Box::new(job)
                .run(&JobContext::new(runtime, None))
                .map_err(SendError::Job)
        })
    }

    /// Route `job`: `local` consumes it when `place` is here, otherwise it goes
    /// to the live member bound to `place`.
    pub(crate) fn dispatch<J, F>(&self, place: Place, job: J, local: F) -> Result<(), SendError>
    where
        J: SerializableJob,
        F: FnOnce(J) -> Result<(), SendError>,
    {
        let directory = self.runtime.directory();
        if place == directory.here() {
            return local(job);
        }

        let member = directory.resolve(place).ok_or(DeadPlaceError(place))?;
        let bytes = self.runtime.wire().encode(&job)?;

        trace!(
            "dispatch_to_place: {} member: {} bytes: {}",
            place,
            member,
            bytes.len()
        );
        self.runtime.group().remote_execute(&member, bytes)?;

        Ok(())
    }
}
