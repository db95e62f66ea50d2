use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Raw place identifier.
pub type PlaceId = u32;

/// An addressable execution location.
///
/// Place ids are handed out in join order starting at 0 and are never reused:
/// once the member bound to a place leaves, the place stays dead for good and
/// later members get strictly greater ids.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Place(PlaceId);

impl Place {
    pub const fn new(id: PlaceId) -> Self {
        Self(id)
    }

    pub const fn id(&self) -> PlaceId {
        self.0
    }
}

impl From<PlaceId> for Place {
    fn from(id: PlaceId) -> Self {
        Self(id)
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The target place never existed or its member has left the group.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("dead place: {0}")]
pub struct DeadPlaceError(pub Place);

impl DeadPlaceError {
    pub fn place(&self) -> Place {
        self.0
    }
}
