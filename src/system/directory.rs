use dashmap::DashMap;
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering::SeqCst};
use std::sync::{Arc, Weak};
use std::time::Instant;

use super::RuntimeError;
use crate::common::EntityId;
use crate::group::{GroupChannel, GroupEvent, GroupListener, MemberHandle};
use crate::place::{Place, PlaceId};

/// Receiver of place lifecycle changes.
///
/// Called from inside the directory critical section: implementations must not
/// call back into the [`PlaceDirectory`] that notified them.
pub trait PlaceLifecycle: Send + Sync {
    fn places_changed(&self, added: &[Place], removed: &[Place]);
}

/// Places that became live or dead during one recompute pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceDelta {
    pub added: Vec<Place>,
    pub removed: Vec<Place>,
}

impl PlaceDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Default)]
struct DirectoryState {
    // None until the first membership snapshot arrives.
    live: Option<HashSet<EntityId>>,
    last_failure: Option<Instant>,
}

/// Maps place ids to live members.
///
/// Place ids are positions in the group's historical log. Every membership or
/// log event rescans the log from position 0 under a single lock; dispatch
/// reads of the place table never take that lock.
pub struct PlaceDirectory {
    here: Place,
    me: MemberHandle,
    group: Arc<dyn GroupChannel>,
    table: DashMap<Place, MemberHandle>,
    max_place: AtomicU32,
    state: Mutex<DirectoryState>,
    lifecycle: Weak<dyn PlaceLifecycle>,
}

impl PlaceDirectory {
    /// Append this process to the historical log and find its place id, which
    /// is the position of its own entry in the log.
    pub(crate) fn join(group: &dyn GroupChannel) -> Result<(Place, MemberHandle), RuntimeError> {
        let me = group.append_self()?;

        let here = (0..)
            .map(Place::new)
            .zip(group.historical_log())
            .find(|(_, member)| member.uuid() == me.uuid())
            .map(|(place, _)| place)
            .ok_or_else(|| RuntimeError::MissingFromLog(me.clone()))?;

        debug!("place_directory_joined_as_place: {} member: {}", here, me);
        Ok((here, me))
    }

    /// A directory for the member `me` bound to `here`. It stays empty until
    /// it is subscribed to the group and gets its first snapshot.
    pub fn new(
        here: Place,
        me: MemberHandle,
        group: Arc<dyn GroupChannel>,
        lifecycle: Weak<dyn PlaceLifecycle>,
    ) -> Self {
        Self {
            here,
            me,
            group,
            table: DashMap::new(),
            max_place: AtomicU32::new(0),
            state: Mutex::new(DirectoryState::default()),
            lifecycle,
        }
    }

    /// The place id of this process.
    pub fn here(&self) -> Place {
        self.here
    }

    /// This process's member handle.
    pub fn member(&self) -> &MemberHandle {
        &self.me
    }

    /// The first place id never assigned so far.
    pub fn max_place(&self) -> PlaceId {
        self.max_place.load(SeqCst)
    }

    /// The live member bound to `place`, `None` if the place is dead or was
    /// never assigned.
    pub fn resolve(&self, place: Place) -> Option<MemberHandle> {
        self.table.get(&place).map(|entry| entry.value().clone())
    }

    /// True for places that existed once and whose member has left.
    pub fn is_dead(&self, place: Place) -> bool {
        place.id() < self.max_place() && !self.table.contains_key(&place)
    }

    /// Live places in ascending order.
    pub fn live_places(&self) -> Vec<Place> {
        let mut places: Vec<Place> = self.table.iter().map(|entry| *entry.key()).collect();
        places.sort();
        places
    }

    /// When this directory last saw a member leave.
    pub fn last_failure(&self) -> Option<Instant> {
        self.state.lock().last_failure
    }

    /// Rescan the historical log against the current live set and notify the
    /// lifecycle receiver of any change. Idempotent.
    pub fn recompute(&self) -> PlaceDelta {
        let state = self.state.lock();
        self.update_places(&state)
    }

    fn update_places(&self, state: &DirectoryState) -> PlaceDelta {
        let live = match &state.live {
            Some(live) => live,
            None => return PlaceDelta::default(),
        };

        let mut delta = PlaceDelta::default();
        let mut scanned = 0;
        for (place, member) in (0..).map(Place::new).zip(self.group.historical_log()) {
            if live.contains(&member.uuid()) {
                if !self.table.contains_key(&place) {
                    delta.added.push(place);
                    self.table.insert(place, member);
                }
            } else if self.table.remove(&place).is_some() {
                delta.removed.push(place);
            }
            scanned = place.id() + 1;
        }
        self.max_place.fetch_max(scanned, SeqCst);

        if !delta.is_empty() {
            debug!(
                "places_changed_at_place: {} added: {:?} removed: {:?}",
                self.here, delta.added, delta.removed
            );
            if let Some(lifecycle) = self.lifecycle.upgrade() {
                lifecycle.places_changed(&delta.added, &delta.removed);
            }
        }

        delta
    }
}

impl GroupListener for PlaceDirectory {
    fn notify(&self, event: GroupEvent) {
        let mut state = self.state.lock();

        match event {
            GroupEvent::Snapshot { members } | GroupEvent::MemberAdded { members, .. } => {
                state.live = Some(members.iter().map(MemberHandle::uuid).collect());
            }
            GroupEvent::MemberRemoved { member, members } => {
                trace!("place_directory_member_removed: {}", member);
                state.last_failure = Some(Instant::now());
                state.live = Some(members.iter().map(MemberHandle::uuid).collect());
            }
            GroupEvent::LogAppended { member } => {
                trace!("place_directory_log_appended: {}", member);
            }
        }

        self.update_places(&state);
    }
}
