//! locus is the place layer of a task-parallel runtime: a partitioned global
//! address space made of "places", one per process of a group.
//!
//! locus gives every process a stable place id agreed on by the whole group,
//! tracks which places are dead, and delivers active messages (serialized jobs)
//! between places. Membership, replication and the network itself come from a
//! group substrate behind the [`GroupChannel`] trait; [`LocalCluster`] provides
//! one for places living in the same process.
//!
//! ## locus provides:
//! - Place ids assigned in join order, never reused.
//! - Dead place detection from membership events.
//! - Active messages: inline execution for the local place, fail-fast on dead
//!   places, fire-and-forget remote execution otherwise.
//! - Uncounted tasks: no completion tracking, failures after departure are
//!   logged at the receiving place and never reach the sender.
//! - Two wire codecs (json and bincode), chosen per deployment.
//! - Worker pool on futures::executor::ThreadPool (or tokio, feature
//!   "threadpool-tokio") with a per-worker current-task slot.
//! - No global runtime: every place is an explicit [`Runtime`] value, so several
//!   places can run in one process.
//!

#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

// modules of the crate
mod common;
pub mod group;
mod place;
mod system;
mod task;

// public interface of the crate. Use the prelude for glob import.
pub use common::EntityId;
pub use group::{
    local::{LocalCluster, LocalGroup},
    ArrivalHook, GroupChannel, GroupError, GroupEvent, GroupListener, MemberHandle, SharedMap,
    SubscriptionId,
};
pub use place::{DeadPlaceError, Place, PlaceId};
pub use system::{
    directory::{PlaceDelta, PlaceDirectory, PlaceLifecycle},
    dispatcher::{Dispatcher, SendError},
    executor::{TaskHandle, WorkerSlot},
    PlacesChangedHook, Runtime, RuntimeConfig, RuntimeError, RuntimeRef, TypedMap,
    RESILIENT_FINISH_MAP,
};
pub use task::{
    codec::{Codec, CodecError},
    registry::JobRegistry,
    uncounted::{NoopJob, UncountedTask},
    Job, JobContext, SerializableJob, WireFormat,
};

pub mod prelude {
    //! The 'locus' prelude.
    //!
    //!
    //! ```
    //! # #![allow(unused_imports)]
    //! use locus::prelude::*;
    //! ```

    #[doc(hidden)]
    pub use crate::{
        group::{local::LocalCluster, GroupChannel},
        place::Place,
        system::{dispatcher::SendError, Runtime, RuntimeConfig, RuntimeRef},
        task::{codec::Codec, registry::JobRegistry, Job, JobContext},
    };
}

////////////////////////////////////////////////////////////////////////////////

/// Initialize the runtime of one place on top of a group channel.
///
/// `jobs` must list the same job types, in the same order, at every place.
pub fn init_runtime(
    group: std::sync::Arc<dyn GroupChannel>,
    config: RuntimeConfig,
    jobs: JobRegistry,
) -> Result<RuntimeRef, RuntimeError> {
    system::Runtime::create(group, config, jobs)
}
