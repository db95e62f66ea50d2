mod common;

use common::*;
use locus::prelude::*;
use locus::{init_runtime, CodecError, SendError};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

static COUNTER: AtomicU32 = AtomicU32::new(0);
static REMOTE_SUM: AtomicU32 = AtomicU32::new(0);
static REMOTE_PLACE: AtomicU32 = AtomicU32::new(u32::MAX);
static REMOTE_ON_WORKER: AtomicU8 = AtomicU8::new(0);
static DEAD_TOUCHED: AtomicU32 = AtomicU32::new(0);
static TALLY: AtomicU32 = AtomicU32::new(0);

thread_local! {
    static RAN_ON_THIS_THREAD: Cell<bool> = Cell::new(false);
}

//==============================================================================
// Jobs
//==============================================================================
#[derive(Serialize, Deserialize)]
struct Increment(u32);
impl Job for Increment {
    fn run(self: Box<Self>, ctx: &JobContext<'_>) -> anyhow::Result<()> {
        assert!(ctx.worker().is_none());
        RAN_ON_THIS_THREAD.with(|ran| ran.set(true));
        COUNTER.fetch_add(self.0, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct RemoteAdd(u32);
impl Job for RemoteAdd {
    fn run(self: Box<Self>, ctx: &JobContext<'_>) -> anyhow::Result<()> {
        REMOTE_PLACE.store(ctx.here().id(), Ordering::SeqCst);
        REMOTE_ON_WORKER.store(if ctx.worker().is_some() { 1 } else { 2 }, Ordering::SeqCst);
        REMOTE_SUM.fetch_add(self.0, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct DeadTouch;
impl Job for DeadTouch {
    fn run(self: Box<Self>, _ctx: &JobContext<'_>) -> anyhow::Result<()> {
        DEAD_TOUCHED.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct Tally(u32);
impl Job for Tally {
    fn run(self: Box<Self>, _ctx: &JobContext<'_>) -> anyhow::Result<()> {
        TALLY.fetch_add(self.0, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct Refuse;
impl Job for Refuse {
    fn run(self: Box<Self>, _ctx: &JobContext<'_>) -> anyhow::Result<()> {
        anyhow::bail!("refused")
    }
}

// json object keys must be strings, so this job can't be encoded with json.
#[derive(Serialize, Deserialize)]
struct Unencodable(BTreeMap<(u32, u32), u32>);
impl Job for Unencodable {
    fn run(self: Box<Self>, _ctx: &JobContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct NotRegistered;
impl Job for NotRegistered {
    fn run(self: Box<Self>, _ctx: &JobContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

fn jobs() -> JobRegistry {
    let mut jobs = JobRegistry::new();
    jobs.register::<Increment>()
        .register::<RemoteAdd>()
        .register::<DeadTouch>()
        .register::<Tally>()
        .register::<Refuse>()
        .register::<Unencodable>();
    jobs
}

//==============================================================================
// Tests
//==============================================================================
#[test]
fn test_local_send_runs_inline() {
    let cluster = LocalCluster::new();
    let group = CountingGroup::join(&cluster);
    let a = init_runtime(group.clone(), config(1), jobs()).expect("runtime_init_failed");
    let _b = start_place(&cluster, config(1), jobs());

    a.send(a.here(), Increment(5)).expect("local_send_failed");

    // incremented before send returned, on this very thread.
    assert_eq!(COUNTER.load(Ordering::SeqCst), 5);
    assert!(RAN_ON_THIS_THREAD.with(|ran| ran.get()));
    assert_eq!(group.remote_calls(), 0, "local_send_touched_the_group");
}

#[test]
fn test_send_to_dead_place_skips_group() {
    let cluster = LocalCluster::new();
    let group = CountingGroup::join(&cluster);
    let a = init_runtime(group.clone(), config(1), jobs()).expect("runtime_init_failed");
    let b = start_place(&cluster, config(1), jobs());
    let dead = b.here();
    b.shutdown();

    for target in [dead, Place::new(100)] {
        let e = a.send(target, DeadTouch).expect_err("send_to_dead_place_succeeded");
        assert!(e.is_dead_place());
        assert_eq!(e.dead_place(), Some(target));
    }

    assert_eq!(group.remote_calls(), 0);
    assert_eq!(DEAD_TOUCHED.load(Ordering::SeqCst), 0);
}

#[test]
fn test_remote_send_runs_at_target() {
    let cluster = LocalCluster::new();
    let a = start_place(&cluster, config(1), jobs());
    let b = start_place(&cluster, config(1), jobs());

    a.send(b.here(), RemoteAdd(7)).expect("remote_send_failed");
    a.send(b.here(), RemoteAdd(3)).expect("remote_send_failed");

    assert!(wait_until(|| REMOTE_SUM.load(Ordering::SeqCst) == 10));
    assert_eq!(REMOTE_PLACE.load(Ordering::SeqCst), b.here().id());
    assert_eq!(REMOTE_ON_WORKER.load(Ordering::SeqCst), 1, "remote_job_not_on_a_worker");
}

#[test]
fn test_local_job_failure_is_returned() {
    let cluster = LocalCluster::new();
    let a = start_place(&cluster, config(1), jobs());

    match a.send(a.here(), Refuse) {
        Err(SendError::Job(e)) => assert_eq!(e.to_string(), "refused"),
        other => panic!("expected_job_error, got: {:?}", other),
    }
}

#[test]
fn test_serialization_failures_are_returned() {
    let cluster = LocalCluster::new();
    let group = CountingGroup::join(&cluster);
    let a = init_runtime(group.clone(), config(1), jobs()).expect("runtime_init_failed");
    let b = start_place(&cluster, config(1), jobs());

    match a.send(b.here(), NotRegistered) {
        Err(SendError::Serialization(CodecError::UnregisteredJob(name))) => {
            assert!(name.ends_with("NotRegistered"))
        }
        other => panic!("expected_unregistered_job_error, got: {:?}", other),
    }

    let mut map = BTreeMap::new();
    map.insert((1, 2), 3);
    match a.send(b.here(), Unencodable(map)) {
        Err(SendError::Serialization(CodecError::Encode(_))) => {}
        other => panic!("expected_encode_error, got: {:?}", other),
    }

    assert_eq!(group.remote_calls(), 0);
}

#[test]
fn test_send_after_shutdown_is_transport_error() {
    let cluster = LocalCluster::new();
    let a = start_place(&cluster, config(1), jobs());
    let b = start_place(&cluster, config(1), jobs());

    // the directory of a stopped place is frozen, b still looks live to it.
    a.shutdown();
    match a.send(b.here(), RemoteAdd(0)) {
        Err(SendError::Transport(_)) => {}
        other => panic!("expected_transport_error, got: {:?}", other),
    }
}

#[test]
fn test_dispatcher_handle() {
    let cluster = LocalCluster::new();
    let a = start_place(&cluster, config(1), jobs());

    let dispatcher = a.dispatcher();
    dispatcher.send(a.here(), Tally(4)).expect("local_send_failed");
    dispatcher.send(a.here(), Tally(6)).expect("local_send_failed");
    assert_eq!(TALLY.load(Ordering::SeqCst), 10);
}
