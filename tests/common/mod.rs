#![allow(dead_code)]

use locus::{
    init_runtime, ArrivalHook, GroupChannel, GroupError, GroupListener, JobRegistry,
    LocalCluster, LocalGroup, MemberHandle, RuntimeConfig, RuntimeRef, SharedMap, SubscriptionId,
};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

//==============================================================================
// Log capture
//==============================================================================
pub struct CaptureLogger {
    records: Mutex<Vec<String>>,
}

impl log::Log for CaptureLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        self.records
            .lock()
            .push(format!("{} {}", record.level(), record.args()));
    }

    fn flush(&self) {}
}

static LOGGER: Lazy<CaptureLogger> = Lazy::new(|| CaptureLogger {
    records: Mutex::new(Vec::new()),
});

pub fn init_logger() {
    let _ = log::set_logger(&*LOGGER);
    log::set_max_level(log::LevelFilter::Trace);
}

pub fn logged(pattern: &str) -> bool {
    LOGGER
        .records
        .lock()
        .iter()
        .any(|record| record.contains(pattern))
}

//==============================================================================
// Helpers
//==============================================================================
pub fn wait_until<F: Fn() -> bool>(cond: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

pub fn config(threads: usize) -> RuntimeConfig {
    RuntimeConfig {
        threadpool_size: Some(threads),
        ..RuntimeConfig::default()
    }
}

pub fn start_place(cluster: &LocalCluster, config: RuntimeConfig, jobs: JobRegistry) -> RuntimeRef {
    let group = cluster.join().expect("cluster_join_failed");
    init_runtime(group, config, jobs).expect("runtime_init_failed")
}

//==============================================================================
// CountingGroup: counts the remote executions requested through it. A sticky
// group ignores leave, so its member outlives the runtime built on it.
//==============================================================================
pub struct CountingGroup {
    inner: Arc<LocalGroup>,
    remote_calls: AtomicUsize,
    sticky: bool,
}

impl CountingGroup {
    pub fn join(cluster: &LocalCluster) -> Arc<Self> {
        Self::join_with(cluster, false)
    }

    pub fn join_sticky(cluster: &LocalCluster) -> Arc<Self> {
        Self::join_with(cluster, true)
    }

    fn join_with(cluster: &LocalCluster, sticky: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: cluster.join().expect("cluster_join_failed"),
            remote_calls: AtomicUsize::new(0),
            sticky,
        })
    }

    pub fn member(&self) -> &MemberHandle {
        self.inner.member()
    }

    pub fn remote_calls(&self) -> usize {
        self.remote_calls.load(Ordering::SeqCst)
    }
}

impl GroupChannel for CountingGroup {
    fn append_self(&self) -> Result<MemberHandle, GroupError> {
        self.inner.append_self()
    }

    fn historical_log(&self) -> Vec<MemberHandle> {
        self.inner.historical_log()
    }

    fn subscribe(&self, listener: Arc<dyn GroupListener>) -> SubscriptionId {
        self.inner.subscribe(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.unsubscribe(id)
    }

    fn remote_execute(&self, member: &MemberHandle, bytes: Vec<u8>) -> Result<(), GroupError> {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.remote_execute(member, bytes)
    }

    fn set_arrival_hook(&self, hook: ArrivalHook) -> Result<(), GroupError> {
        self.inner.set_arrival_hook(hook)
    }

    fn named_map(&self, name: &str) -> Arc<dyn SharedMap> {
        self.inner.named_map(name)
    }

    fn leave(&self) {
        if !self.sticky {
            self.inner.leave()
        }
    }
}
