//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions to encode and decode keys for the primary
//! records and their indexes. Ids are stored big-endian so that prefix scans
//! return children in allocation order, which makes "latest" the last key under
//! a prefix.

use gitspace_core::SpaceId;

use crate::types::GitspaceEntityType;

/// Width of an encoded id.
pub const ID_LEN: usize = 8;

/// Encode a primary record key (just the id bytes).
#[must_use]
pub fn id_key(id: [u8; ID_LEN]) -> Vec<u8> {
    id.to_vec()
}

/// Encode a parent-child index key: `parent_id || child_id`.
///
/// This allows efficient prefix scans for all children of a parent.
#[must_use]
pub fn child_key(parent: [u8; ID_LEN], child: [u8; ID_LEN]) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_LEN * 2);
    key.extend_from_slice(&parent);
    key.extend_from_slice(&child);
    key
}

/// Encode a parent prefix for scanning all children of a parent.
#[must_use]
pub fn parent_prefix(parent: [u8; ID_LEN]) -> Vec<u8> {
    parent.to_vec()
}

/// Extract the child id from a parent-child key.
///
/// Returns `None` if the key is not exactly two ids long.
#[must_use]
pub fn extract_child_id(key: &[u8]) -> Option<[u8; ID_LEN]> {
    if key.len() != ID_LEN * 2 {
        return None;
    }
    key[ID_LEN..].try_into().ok()
}

/// Decode an id stored as an index value.
#[must_use]
pub fn decode_id(value: &[u8]) -> Option<[u8; ID_LEN]> {
    value.try_into().ok()
}

/// Encode a space scoped identifier key: `space_id || identifier`.
#[must_use]
pub fn scoped_identifier_key(space_id: SpaceId, identifier: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_LEN + identifier.len());
    key.extend_from_slice(&space_id.to_be_bytes());
    key.extend_from_slice(identifier.as_bytes());
    key
}

/// Encode a space path key.
#[must_use]
pub fn space_path_key(path: &str) -> Vec<u8> {
    path.trim_matches('/').as_bytes().to_vec()
}

const fn entity_tag(entity_type: GitspaceEntityType) -> u8 {
    match entity_type {
        GitspaceEntityType::GitspaceConfig => 1,
        GitspaceEntityType::GitspaceInstance => 2,
    }
}

/// Encode an entity prefix for scanning all events of an entity.
#[must_use]
pub fn entity_prefix(entity_type: GitspaceEntityType, entity_id: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + ID_LEN);
    key.push(entity_tag(entity_type));
    key.extend_from_slice(&entity_id.to_be_bytes());
    key
}

/// Encode an entity-event index key: `entity_type || entity_id || event_id`.
#[must_use]
pub fn entity_event_key(
    entity_type: GitspaceEntityType,
    entity_id: i64,
    event_id: [u8; ID_LEN],
) -> Vec<u8> {
    let mut key = entity_prefix(entity_type, entity_id);
    key.extend_from_slice(&event_id);
    key
}

/// Extract the event id from an entity-event key.
#[must_use]
pub fn extract_event_id(key: &[u8]) -> Option<[u8; ID_LEN]> {
    key.get(1 + ID_LEN..)?.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitspace_core::{GitspaceConfigId, GitspaceInstanceId};

    #[test]
    fn child_key_roundtrip() {
        let config = GitspaceConfigId::new(3);
        let instance = GitspaceInstanceId::new(77);

        let key = child_key(config.to_be_bytes(), instance.to_be_bytes());
        assert_eq!(key.len(), 16);

        let extracted = extract_child_id(&key).map(GitspaceInstanceId::from_be_bytes);
        assert_eq!(extracted, Some(instance));
    }

    #[test]
    fn children_sort_in_allocation_order() {
        let parent = GitspaceConfigId::new(1).to_be_bytes();
        let older = child_key(parent, GitspaceInstanceId::new(2).to_be_bytes());
        let newer = child_key(parent, GitspaceInstanceId::new(256).to_be_bytes());
        assert!(older < newer);
        assert!(older.starts_with(&parent_prefix(parent)));
        assert!(newer.starts_with(&parent_prefix(parent)));
    }

    #[test]
    fn malformed_child_key_is_rejected() {
        assert!(extract_child_id(&[1, 2, 3]).is_none());
    }

    #[test]
    fn scoped_identifiers_do_not_collide_across_spaces() {
        let a = scoped_identifier_key(SpaceId::new(1), "ws");
        let b = scoped_identifier_key(SpaceId::new(2), "ws");
        assert_ne!(a, b);
    }

    #[test]
    fn space_path_ignores_surrounding_slashes() {
        assert_eq!(space_path_key("/acme/team/"), space_path_key("acme/team"));
    }

    #[test]
    fn entity_event_key_roundtrip() {
        let key = entity_event_key(GitspaceEntityType::GitspaceInstance, 9, [0, 0, 0, 0, 0, 0, 0, 4]);
        assert!(key.starts_with(&entity_prefix(GitspaceEntityType::GitspaceInstance, 9)));
        assert_eq!(extract_event_id(&key), Some([0, 0, 0, 0, 0, 0, 0, 4]));
    }
}
