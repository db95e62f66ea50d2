pub(crate) mod codec;
pub(crate) mod registry;
pub(crate) mod uncounted;

use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

use crate::place::Place;
use crate::system::{executor::WorkerSlot, Runtime};
use codec::{Codec, CodecError};
use registry::JobRegistry;

/// A unit of work that can be executed at a place.
///
/// Jobs sent to other places must also be serializable and registered, see
/// [`SerializableJob`] and [`JobRegistry`].
pub trait Job: Send + 'static {
    fn run(self: Box<Self>, ctx: &JobContext<'_>) -> anyhow::Result<()>;
}

/// A job that can travel between places.
pub trait SerializableJob: Job + Serialize + DeserializeOwned {}

impl<T> SerializableJob for T where T: Job + Serialize + DeserializeOwned {}

/// What a running job can see of its surroundings.
pub struct JobContext<'a> {
    runtime: &'a Runtime,
    worker: Option<&'a WorkerSlot>,
}

impl<'a> JobContext<'a> {
    pub(crate) fn new(runtime: &'a Runtime, worker: Option<&'a WorkerSlot>) -> Self {
        Self { runtime, worker }
    }

    /// The runtime of the place the job is running at.
    pub fn runtime(&self) -> &'a Runtime {
        self.runtime
    }

    pub fn here(&self) -> Place {
        self.runtime.here()
    }

    /// The slot of the pool worker running the job, `None` when the job runs
    /// inline on the sender's thread.
    pub fn worker(&self) -> Option<&'a WorkerSlot> {
        self.worker
    }
}

/// Codec and job registry of a deployment, fixed at startup.
#[derive(Clone)]
pub struct WireFormat {
    codec: Codec,
    registry: Arc<JobRegistry>,
}

impl WireFormat {
    pub fn new(codec: Codec, registry: JobRegistry) -> Self {
        Self {
            codec,
            registry: Arc::new(registry),
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn encode<J: SerializableJob>(&self, job: &J) -> Result<Vec<u8>, CodecError> {
        self.registry.encode(self.codec, job)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Job>, CodecError> {
        self.registry.decode(self.codec, bytes)
    }
}
