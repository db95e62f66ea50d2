use serde::{Deserialize, Serialize};
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;

use super::codec::{Codec, CodecError};
use super::{Job, SerializableJob};

/// Wire key of a registered job type, written in front of every job payload.
#[derive(Eq, Hash, PartialEq, Clone, Copy, Debug, Serialize, Deserialize)]
pub(crate) struct TypeKey {
    jid: u16,
}

trait JobDecoder: Send + Sync {
    fn decode(&self, codec: Codec, bytes: &[u8]) -> Result<Box<dyn Job>, CodecError>;
}

struct TypedJobDecoder<J> {
    phantomdata_j: PhantomData<fn() -> J>,
}

impl<J: SerializableJob> TypedJobDecoder<J> {
    fn new() -> Self {
        Self {
            phantomdata_j: PhantomData,
        }
    }
}

impl<J: SerializableJob> JobDecoder for TypedJobDecoder<J> {
    fn decode(&self, codec: Codec, bytes: &[u8]) -> Result<Box<dyn Job>, CodecError> {
        let job = codec.decode::<J>(bytes)?;
        Ok(Box::new(job))
    }
}

/// Registry of the job types that may travel between places.
///
/// Keys are handed out in registration order, so every place has to register
/// the same job types in the same order.
pub struct JobRegistry {
    jid_counter: u16,
    jid_map: HashMap<TypeId, TypeKey>,
    decoders: HashMap<TypeKey, Box<dyn JobDecoder>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jid_counter: 0,
            jid_map: HashMap::new(),
            decoders: HashMap::new(),
        }
    }

    /// Register a job type. Registering the same type twice keeps the first key.
    pub fn register<J: SerializableJob>(&mut self) -> &mut Self {
        let j_t = TypeId::of::<J>();
        if self.jid_map.contains_key(&j_t) {
            return self;
        }

        self.jid_counter += 1;
        let key = TypeKey {
            jid: self.jid_counter,
        };
        self.jid_map.insert(j_t, key);
        self.decoders
            .insert(key, Box::new(TypedJobDecoder::<J>::new()));

        self
    }

    pub fn is_registered<J: SerializableJob>(&self) -> bool {
        self.jid_map.contains_key(&TypeId::of::<J>())
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Encode `job` as a wire frame: the type key followed by the job payload.
    pub(crate) fn encode<J: SerializableJob>(
        &self,
        codec: Codec,
        job: &J,
    ) -> Result<Vec<u8>, CodecError> {
        let key = self
            .jid_map
            .get(&TypeId::of::<J>())
            .ok_or(CodecError::UnregisteredJob(type_name::<J>()))?;

        let mut frame = codec.encode(key)?;
        frame.extend(codec.encode(job)?);

        Ok(frame)
    }

    /// Decode a wire frame produced by [`JobRegistry::encode`].
    pub(crate) fn decode(&self, codec: Codec, frame: &[u8]) -> Result<Box<dyn Job>, CodecError> {
        let (key, read) = codec.decode_prefix::<TypeKey>(frame)?;
        let decoder = self
            .decoders
            .get(&key)
            .ok_or(CodecError::UnknownJobKey(key.jid))?;

        decoder.decode(codec, &frame[read..])
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
