use uuid::Uuid;

/// Entity UUID for the crate.
pub type EntityId = u128;

/// Generate Entity Id.
pub(crate) fn generate_entity_id() -> EntityId {
    Uuid::new_v4().as_u128()
}

/// Render an entity id in the hyphenated uuid form used in logs and addresses.
pub(crate) fn entity_id_str(id: EntityId) -> String {
    Uuid::from_u128(id).to_string()
}
