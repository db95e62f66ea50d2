pub(crate) mod directory;
pub(crate) mod dispatcher;
pub(crate) mod executor;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::{Arc, Weak};
use std::time::Instant;
use thiserror::Error;

use self::{
    directory::{PlaceDirectory, PlaceLifecycle},
    dispatcher::{Dispatcher, SendError},
    executor::{ThreadPoolExecutor, WorkerSlot},
};
use crate::group::{GroupChannel, GroupError, MemberHandle, SharedMap, SubscriptionId};
use crate::place::{Place, PlaceId};
use crate::task::{
    codec::{Codec, CodecError},
    registry::JobRegistry,
    uncounted::{self, UncountedTask},
    SerializableJob, WireFormat,
};

/// Runtime Reference. Cloning only clones the light reference.
pub type RuntimeRef = Arc<Runtime>;
/// Runtime Weak Reference. Upgradable to RuntimeRef.
pub(crate) type RuntimeWeakRef = Weak<Runtime>;

/// Name of the map holding the state of resilient finish.
pub const RESILIENT_FINISH_MAP: &str = "locus:finish";

const ENV_THREADS: &str = "LOCUS_THREADS";
const ENV_SERIALIZATION: &str = "LOCUS_SERIALIZATION";
const ENV_VERBOSE_SERIALIZATION: &str = "LOCUS_VERBOSE_SERIALIZATION";

/// Hook called with the places added and removed by a membership change.
pub type PlacesChangedHook = Arc<dyn Fn(&[Place], &[Place]) + Send + Sync>;

/// Configurations for the runtime creation.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub name: Option<String>,
    pub threadpool_size: Option<usize>,
    pub codec: Codec,
    /// Log failures to spawn uncounted tasks (other than dead places) before
    /// returning them.
    pub verbose_serialization: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            name: None,
            threadpool_size: None,
            codec: Codec::Json,
            verbose_serialization: false,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `LOCUS_THREADS`, `LOCUS_SERIALIZATION` and
    /// `LOCUS_VERBOSE_SERIALIZATION`. Unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(threads) = std::env::var(ENV_THREADS) {
            match threads.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.threadpool_size = Some(n),
                _ => warn!("runtime_config_invalid_{}: {}", ENV_THREADS, threads),
            }
        }

        if let Ok(codec) = std::env::var(ENV_SERIALIZATION) {
            match codec.parse::<Codec>() {
                Ok(codec) => config.codec = codec,
                Err(e) => warn!("runtime_config_invalid_{}: {}", ENV_SERIALIZATION, e),
            }
        }

        if let Ok(verbose) = std::env::var(ENV_VERBOSE_SERIALIZATION) {
            config.verbose_serialization =
                matches!(verbose.trim().to_ascii_lowercase().as_str(), "true" | "1");
        }

        config
    }
}

/// Runtime creation failures.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("group error: {0}")]
    Group(#[from] GroupError),
    #[error("member {0} missing from the historical log after appending itself")]
    MissingFromLog(MemberHandle),
    #[error("worker pool creation failed: {0}")]
    Executor(#[from] std::io::Error),
}

/// The runtime of one place: directory, dispatcher, worker pool and wire format.
///
/// Several runtimes can live in the same process, each bound to its own group
/// channel.
pub struct Runtime {
    config: RuntimeConfig,
    group: Arc<dyn GroupChannel>,
    directory: Arc<PlaceDirectory>,
    executor: ThreadPoolExecutor,
    wire: WireFormat,
    places: RwLock<Vec<Place>>,
    hooks: RwLock<Vec<PlacesChangedHook>>,
    subscription: Mutex<Option<SubscriptionId>>,
    stopped: AtomicBool,
    weak_self: RuntimeWeakRef,
}

impl Runtime {
    /// Internal helper function to create the runtime.
    fn new_cyclic(
        weak_self: RuntimeWeakRef,
        group: Arc<dyn GroupChannel>,
        config: RuntimeConfig,
        wire: WireFormat,
        executor: ThreadPoolExecutor,
        here: Place,
        me: MemberHandle,
    ) -> Self {
        let lifecycle: Weak<dyn PlaceLifecycle> = weak_self.clone();
        let directory = Arc::new(PlaceDirectory::new(here, me, group.clone(), lifecycle));

        Runtime {
            config,
            group,
            directory,
            executor,
            wire,
            places: RwLock::new(Vec::new()),
            hooks: RwLock::new(Vec::new()),
            subscription: Mutex::new(None),
            stopped: AtomicBool::new(false),
            weak_self,
        }
    }

    /// Function to create the runtime: join the place directory, then start
    /// receiving tasks and membership events.
    pub(crate) fn create(
        group: Arc<dyn GroupChannel>,
        config: RuntimeConfig,
        jobs: JobRegistry,
    ) -> Result<RuntimeRef, RuntimeError> {
        let prefix = config.name.clone().unwrap_or_default();
        let executor = ThreadPoolExecutor::new(config.threadpool_size, Some(prefix.as_str()))?;
        let wire = WireFormat::new(config.codec, jobs);
        let (here, me) = PlaceDirectory::join(group.as_ref())?;

        let runtime = Arc::new_cyclic(|w| {
            Runtime::new_cyclic(w.clone(), group, config, wire, executor, here, me)
        });
        runtime.start()?;

        info!(
            "runtime_started_at_place: {} address: {} codec: {}",
            runtime.here(),
            runtime.address(),
            runtime.config.codec
        );
        Ok(runtime)
    }

    fn start(&self) -> Result<(), RuntimeError> {
        let weak_self = self.weak_self.clone();
        self.group.set_arrival_hook(Arc::new(move |bytes: Vec<u8>| {
            match weak_self.upgrade() {
                Some(runtime) => runtime.receive(&bytes),
                None => debug!("runtime_dropped_ignoring_arrival"),
            }
        }))?;

        let id = self.group.subscribe(self.directory.clone());
        *self.subscription.lock() = Some(id);

        Ok(())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The place of this runtime.
    pub fn here(&self) -> Place {
        self.directory.here()
    }

    /// The first place id never assigned so far.
    pub fn max_place(&self) -> PlaceId {
        self.directory.max_place()
    }

    pub fn resolve(&self, place: Place) -> Option<MemberHandle> {
        self.directory.resolve(place)
    }

    pub fn is_dead(&self, place: Place) -> bool {
        self.directory.is_dead(place)
    }

    /// Live places as of the last membership change, in ascending order.
    pub fn places(&self) -> Vec<Place> {
        self.places.read().clone()
    }

    /// Network address of this place.
    pub fn address(&self) -> &str {
        self.directory.member().address()
    }

    pub fn directory(&self) -> &PlaceDirectory {
        &self.directory
    }

    pub fn wire(&self) -> &WireFormat {
        &self.wire
    }

    /// When a member was last seen leaving the group.
    pub fn last_failure(&self) -> Option<Instant> {
        self.directory.last_failure()
    }

    pub(crate) fn group(&self) -> &dyn GroupChannel {
        self.group.as_ref()
    }

    /// Register a hook called on every place lifecycle change.
    ///
    /// Hooks run inside the directory critical section and must not call back
    /// into the directory (resolve, recompute, send...).
    pub fn on_places_changed<F>(&self, hook: F)
    where
        F: Fn(&[Place], &[Place]) + Send + Sync + 'static,
    {
        self.hooks.write().push(Arc::new(hook));
    }

    pub fn dispatcher(&self) -> Dispatcher<'_> {
        Dispatcher::new(self)
    }

    /// Run `job` at `place`, inline when `place` is here.
    pub fn send<J: SerializableJob>(&self, place: Place, job: J) -> Result<(), SendError> {
        self.dispatcher().send(place, job)
    }

    /// Spawn `job` at `place` as an uncounted task.
    pub fn uncounted_async_at<J: SerializableJob>(
        &self,
        place: Place,
        job: J,
    ) -> Result<(), SendError> {
        uncounted::uncounted_async_at(self, place, job)
    }

    /// Submit a unit of work to this place's worker pool.
    pub fn submit_local<F>(&self, work: F)
    where
        F: FnOnce(&WorkerSlot) + Send + 'static,
    {
        self.executor.submit_local(work);
    }

    /// Hand an uncounted task to the worker pool.
    pub(crate) fn execute(&self, task: UncountedTask) {
        let weak_self = self.weak_self.clone();
        self.executor.submit_local(move |worker| match weak_self.upgrade() {
            Some(runtime) => task.compute(&runtime, worker),
            None => debug!("runtime_dropped_before_uncounted_task_ran"),
        });
    }

    /// Arrival hook: decode the task and schedule it.
    fn receive(&self, bytes: &[u8]) {
        let task = UncountedTask::decode(self.here(), &self.wire, bytes);
        self.execute(task);
    }

    pub fn named_map(&self, name: &str) -> Arc<dyn SharedMap> {
        self.group.named_map(name)
    }

    /// A named map with keys and values encoded with the runtime codec.
    pub fn typed_map<K, V>(&self, name: &str) -> TypedMap<K, V>
    where
        K: Serialize + DeserializeOwned,
        V: Serialize + DeserializeOwned,
    {
        TypedMap::new(self.named_map(name), self.wire.codec())
    }

    /// The map backing resilient finish.
    pub fn resilient_finish_map(&self) -> Arc<dyn SharedMap> {
        self.named_map(RESILIENT_FINISH_MAP)
    }

    /// Stop receiving membership events and leave the group. This place
    /// becomes dead for every other place.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, SeqCst) {
            return;
        }

        if let Some(id) = self.subscription.lock().take() {
            self.group.unsubscribe(id);
        }
        self.group.leave();

        info!("runtime_shutdown_at_place: {}", self.here());
    }
}

impl PlaceLifecycle for Runtime {
    fn places_changed(&self, added: &[Place], removed: &[Place]) {
        {
            let mut places = self.places.write();
            places.retain(|place| !removed.contains(place));
            places.extend_from_slice(added);
            places.sort();
            places.dedup();
        }

        let hooks = self.hooks.read().clone();
        for hook in hooks {
            (hook)(added, removed);
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Typed view over a [`SharedMap`].
pub struct TypedMap<K, V> {
    inner: Arc<dyn SharedMap>,
    codec: Codec,
    phantomdata: PhantomData<fn() -> (K, V)>,
}

impl<K, V> TypedMap<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    fn new(inner: Arc<dyn SharedMap>, codec: Codec) -> Self {
        Self {
            inner,
            codec,
            phantomdata: PhantomData,
        }
    }

    pub fn get(&self, key: &K) -> Result<Option<V>, CodecError> {
        let key = self.codec.encode(key)?;
        self.inner
            .get(&key)
            .map(|value| self.codec.decode(&value))
            .transpose()
    }

    pub fn insert(&self, key: &K, value: &V) -> Result<Option<V>, CodecError> {
        let key = self.codec.encode(key)?;
        let value = self.codec.encode(value)?;
        self.inner
            .insert(key, value)
            .map(|old| self.codec.decode(&old))
            .transpose()
    }

    pub fn remove(&self, key: &K) -> Result<Option<V>, CodecError> {
        let key = self.codec.encode(key)?;
        self.inner
            .remove(&key)
            .map(|old| self.codec.decode(&old))
            .transpose()
    }

    pub fn contains_key(&self, key: &K) -> Result<bool, CodecError> {
        let key = self.codec.encode(key)?;
        Ok(self.inner.contains_key(&key))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
