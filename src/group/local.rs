use dashmap::DashMap;
use log::{debug, trace, warn};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering::SeqCst};
use std::sync::Arc;
use std::thread;

use super::{
    ArrivalHook, GroupChannel, GroupError, GroupEvent, GroupListener, MemberHandle, SharedMap,
    SubscriptionId,
};
use crate::common::{self, EntityId};

const LOCAL_HOST: &str = "127.0.0.1";
const FIRST_PORT: u16 = 5701;

/// An in-process group: every member lives in the current process and remote
/// execution is a queue hop to the target member's inbox thread.
///
/// Membership changes notify listeners on the thread that caused the change.
/// Changes and their notifications are serialized by a cluster-wide event
/// lock, so every listener sees events in the order the membership changed.
#[derive(Clone)]
pub struct LocalCluster(Arc<LocalClusterInner>);

impl LocalCluster {
    pub fn new() -> Self {
        Self(Arc::new(LocalClusterInner {
            events: ReentrantMutex::new(()),
            membership: Mutex::new(Membership::default()),
            inboxes: DashMap::new(),
            listeners: DashMap::new(),
            maps: DashMap::new(),
            subscription_counter: AtomicU64::new(1),
            port_counter: AtomicU16::new(FIRST_PORT),
        }))
    }

    /// Join a new member. The member is live right away but has no place until
    /// it appends itself to the historical log.
    pub fn join(&self) -> Result<Arc<LocalGroup>, GroupError> {
        let port = self.0.port_counter.fetch_add(1, SeqCst);
        let me = MemberHandle::new(
            common::generate_entity_id(),
            format!("{}:{}", LOCAL_HOST, port),
        );

        let hook = Arc::new(OnceCell::new());
        let (tx, rx) = flume::unbounded::<Vec<u8>>();
        spawn_inbox(port, me.clone(), rx, hook.clone())?;
        self.0.inboxes.insert(me.uuid(), tx);

        let _order = self.0.events.lock();
        let members = {
            let mut membership = self.0.membership.lock();
            membership.live.insert(me.clone());
            membership.live.clone()
        };

        debug!("local_member_joined: {}", me);
        self.0.broadcast(GroupEvent::MemberAdded {
            member: me.clone(),
            members,
        });

        Ok(Arc::new(LocalGroup {
            cluster: self.0.clone(),
            me,
            hook,
            subscriptions: Mutex::new(Vec::new()),
            left: AtomicBool::new(false),
        }))
    }

    pub fn live_members(&self) -> HashSet<MemberHandle> {
        self.0.membership.lock().live.clone()
    }

    pub fn historical_log(&self) -> Vec<MemberHandle> {
        self.0.membership.lock().log.clone()
    }
}

impl Default for LocalCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct Membership {
    log: Vec<MemberHandle>,
    live: HashSet<MemberHandle>,
}

struct LocalClusterInner {
    // taken before `membership` and held until listeners are notified.
    events: ReentrantMutex<()>,
    membership: Mutex<Membership>,
    inboxes: DashMap<EntityId, flume::Sender<Vec<u8>>>,
    listeners: DashMap<SubscriptionId, Arc<dyn GroupListener>>,
    maps: DashMap<String, Arc<LocalMap>>,
    subscription_counter: AtomicU64,
    port_counter: AtomicU16,
}

impl LocalClusterInner {
    fn broadcast(&self, event: GroupEvent) {
        // collect first, listeners must not run under a dashmap shard lock.
        let listeners: Vec<Arc<dyn GroupListener>> = self
            .listeners
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for listener in listeners {
            listener.notify(event.clone());
        }
    }
}

fn spawn_inbox(
    port: u16,
    member: MemberHandle,
    rx: flume::Receiver<Vec<u8>>,
    hook: Arc<OnceCell<ArrivalHook>>,
) -> Result<(), GroupError> {
    thread::Builder::new()
        .name(format!("locus_inbox_{}", port))
        .spawn(move || {
            // ends once the member leaves and its sender is dropped.
            for bytes in rx.iter() {
                match hook.get() {
                    Some(hook) => (hook)(bytes),
                    None => warn!("inbox_no_arrival_hook_dropping_bytes_for: {}", member),
                }
            }
            trace!("inbox_closed_for: {}", member);
        })?;

    Ok(())
}

/// A member's channel into a [`LocalCluster`]. Dropping it leaves the group.
pub struct LocalGroup {
    cluster: Arc<LocalClusterInner>,
    me: MemberHandle,
    hook: Arc<OnceCell<ArrivalHook>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    left: AtomicBool,
}

impl LocalGroup {
    pub fn member(&self) -> &MemberHandle {
        &self.me
    }

    pub fn has_left(&self) -> bool {
        self.left.load(SeqCst)
    }
}

impl GroupChannel for LocalGroup {
    fn append_self(&self) -> Result<MemberHandle, GroupError> {
        if self.has_left() {
            return Err(GroupError::Left);
        }

        let _order = self.cluster.events.lock();
        self.cluster.membership.lock().log.push(self.me.clone());

        trace!("local_member_appended: {}", self.me);
        self.cluster.broadcast(GroupEvent::LogAppended {
            member: self.me.clone(),
        });

        Ok(self.me.clone())
    }

    fn historical_log(&self) -> Vec<MemberHandle> {
        self.cluster.membership.lock().log.clone()
    }

    fn subscribe(&self, listener: Arc<dyn GroupListener>) -> SubscriptionId {
        let id = self.cluster.subscription_counter.fetch_add(1, SeqCst);
        let _order = self.cluster.events.lock();
        self.cluster.listeners.insert(id, listener.clone());
        self.subscriptions.lock().push(id);

        let members = self.cluster.membership.lock().live.clone();
        listener.notify(GroupEvent::Snapshot { members });

        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.cluster.listeners.remove(&id);
        self.subscriptions.lock().retain(|sub| *sub != id);
    }

    fn remote_execute(&self, member: &MemberHandle, bytes: Vec<u8>) -> Result<(), GroupError> {
        if self.has_left() {
            return Err(GroupError::Left);
        }

        let inbox = self
            .cluster
            .inboxes
            .get(&member.uuid())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| GroupError::MemberNotLive(member.clone()))?;

        inbox
            .send(bytes)
            .map_err(|_| GroupError::DeliveryFailed(member.clone()))
    }

    fn set_arrival_hook(&self, hook: ArrivalHook) -> Result<(), GroupError> {
        self.hook.set(hook).map_err(|_| GroupError::HookAlreadySet)
    }

    fn named_map(&self, name: &str) -> Arc<dyn SharedMap> {
        let map = self
            .cluster
            .maps
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(LocalMap::default()))
            .value()
            .clone();

        map
    }

    fn leave(&self) {
        if self.left.swap(true, SeqCst) {
            return;
        }

        let _order = self.cluster.events.lock();
        for id in self.subscriptions.lock().drain(..) {
            self.cluster.listeners.remove(&id);
        }
        self.cluster.inboxes.remove(&self.me.uuid());

        let members = {
            let mut membership = self.cluster.membership.lock();
            membership.live.remove(&self.me);
            membership.live.clone()
        };

        debug!("local_member_left: {}", self.me);
        self.cluster.broadcast(GroupEvent::MemberRemoved {
            member: self.me.clone(),
            members,
        });
    }
}

impl Drop for LocalGroup {
    fn drop(&mut self) {
        self.leave();
    }
}

#[derive(Default)]
struct LocalMap(DashMap<Vec<u8>, Vec<u8>>);

impl SharedMap for LocalMap {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.get(key).map(|entry| entry.value().clone())
    }

    fn insert(&self, key: Vec<u8>, value: Vec<u8>) -> Option<Vec<u8>> {
        self.0.insert(key, value)
    }

    fn remove(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.remove(key).map(|(_, value)| value)
    }

    fn contains_key(&self, key: &[u8]) -> bool {
        self.0.contains_key(key)
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}
