//!
//! The group membership substrate that places are built on.
//!
//! `locus` doesn't implement membership, replication or remote execution itself,
//! it only consumes them through the [`GroupChannel`] contract. The substrate must
//! provide:
//!     * an ordered, append-only, replicated log of every member that ever joined
//!       (the position of a member in the log IS its place id),
//!     * membership events (initial snapshot, member added, member removed) and
//!       log-append events,
//!     * a fire-and-forget remote-execution primitive targeting a live member,
//!     * named replicated key-value maps.
//!
//! [`local::LocalCluster`] implements the contract for places living in the same
//! process, which is what the tests and single-host deployments use.
//!

pub mod local;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;

use crate::common::{self, EntityId};

/// Identity and network address of a process that joined the group.
///
/// Two handles are the same member iff their uuids match, the address is only
/// informational.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MemberHandle {
    uuid: EntityId,
    address: String,
}

impl MemberHandle {
    pub fn new(uuid: EntityId, address: impl Into<String>) -> Self {
        Self {
            uuid,
            address: address.into(),
        }
    }

    pub fn uuid(&self) -> EntityId {
        self.uuid
    }

    /// Address in the form "host:port".
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl PartialEq for MemberHandle {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for MemberHandle {}

impl Hash for MemberHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl fmt::Display for MemberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", common::entity_id_str(self.uuid), self.address)
    }
}

/// Notifications delivered to a [`GroupListener`].
///
/// Membership events carry the full set of live members after the change.
#[derive(Debug, Clone)]
pub enum GroupEvent {
    /// Delivered once, synchronously, when the listener subscribes.
    Snapshot { members: HashSet<MemberHandle> },
    MemberAdded {
        member: MemberHandle,
        members: HashSet<MemberHandle>,
    },
    MemberRemoved {
        member: MemberHandle,
        members: HashSet<MemberHandle>,
    },
    /// A member was appended to the historical log.
    LogAppended { member: MemberHandle },
}

/// Receiver of group events. Events may arrive concurrently from several
/// notification threads.
pub trait GroupListener: Send + Sync {
    fn notify(&self, event: GroupEvent);
}

/// Registration id returned by [`GroupChannel::subscribe`].
pub type SubscriptionId = u64;

/// Hook invoked by the substrate for every unit of work arriving at this member.
pub type ArrivalHook = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// A named key-value map replicated by the substrate.
pub trait SharedMap: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn insert(&self, key: Vec<u8>, value: Vec<u8>) -> Option<Vec<u8>>;
    fn remove(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn contains_key(&self, key: &[u8]) -> bool;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Errors reported by the group substrate.
#[derive(Error, Debug)]
pub enum GroupError {
    #[error("member is not live: {0}")]
    MemberNotLive(MemberHandle),
    #[error("this member has left the group")]
    Left,
    #[error("delivery to member {0} failed")]
    DeliveryFailed(MemberHandle),
    #[error("arrival hook already installed")]
    HookAlreadySet,
    #[error("member inbox spawn failed: {0}")]
    Spawn(#[from] std::io::Error),
}

/// The contract `locus` consumes from the group membership substrate.
/// One channel per process (member).
pub trait GroupChannel: Send + Sync {
    /// Append this member to the historical log and return its handle.
    fn append_self(&self) -> Result<MemberHandle, GroupError>;

    /// Every member that ever joined, in join order.
    fn historical_log(&self) -> Vec<MemberHandle>;

    /// Register a listener. The current live set is delivered as a
    /// [`GroupEvent::Snapshot`] before this returns.
    fn subscribe(&self, listener: Arc<dyn GroupListener>) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);

    /// Hand `bytes` to `member` for execution. Returns once the bytes are queued,
    /// never waits for the remote side.
    fn remote_execute(&self, member: &MemberHandle, bytes: Vec<u8>) -> Result<(), GroupError>;

    /// Install the hook receiving the bytes sent to this member.
    fn set_arrival_hook(&self, hook: ArrivalHook) -> Result<(), GroupError>;

    fn named_map(&self, name: &str) -> Arc<dyn SharedMap>;

    /// Leave the group. The member's place becomes dead everywhere.
    fn leave(&self);
}
