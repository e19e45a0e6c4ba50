//! Remote-uid to local-node reconciliation.

use std::collections::{BTreeSet, HashMap, hash_map::Entry};

use bodyview_core::{ClientId, ProtocolError, RemoteUid};

use crate::{DispatchError, LocalId, SceneError};

/// Maps `(remote uid, client)` pairs to nodes owned by the local scene.
///
/// Remote uids are only unique per client session, so two clients may both
/// own uid 1; each gets its own entry.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: HashMap<(RemoteUid, ClientId), LocalId>,
}

impl IdentityMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the local node for a new remote uid and record the mapping.
    ///
    /// `factory` only runs when no entry exists for the key.
    ///
    /// # Errors
    /// Returns `DuplicateCreation` if the key is already mapped, or the
    /// factory's scene error.
    pub fn resolve_or_create<F>(
        &mut self,
        uid: RemoteUid,
        client: ClientId,
        factory: F,
    ) -> Result<LocalId, DispatchError>
    where
        F: FnOnce() -> Result<LocalId, SceneError>,
    {
        match self.entries.entry((uid, client)) {
            Entry::Occupied(_) => Err(ProtocolError::DuplicateCreation { uid, client }.into()),
            Entry::Vacant(slot) => {
                let local = factory()?;
                slot.insert(local);
                Ok(local)
            }
        }
    }

    /// Look up the local node for a remote uid.
    ///
    /// # Errors
    /// Returns `UnknownRemoteUid` if no entry exists.
    pub fn resolve(&self, uid: RemoteUid, client: ClientId) -> Result<LocalId, ProtocolError> {
        self.entries
            .get(&(uid, client))
            .copied()
            .ok_or(ProtocolError::UnknownRemoteUid { uid, client })
    }

    /// Forget a mapping. Absent keys are ignored, since removal can race
    /// with disconnect cleanup.
    pub fn remove(&mut self, uid: RemoteUid, client: ClientId) -> Option<LocalId> {
        self.entries.remove(&(uid, client))
    }

    /// Drop every entry owned by `client`, returning what was removed.
    pub fn purge_client(&mut self, client: ClientId) -> Vec<(RemoteUid, LocalId)> {
        let mut purged = Vec::new();
        self.entries.retain(|&(uid, owner), &mut local| {
            if owner == client {
                purged.push((uid, local));
                false
            } else {
                true
            }
        });
        purged.sort_unstable_by_key(|(uid, _)| *uid);
        purged
    }

    /// Remote uids currently mapped for `client`.
    #[must_use]
    pub fn live_uids(&self, client: ClientId) -> BTreeSet<RemoteUid> {
        self.entries
            .keys()
            .filter(|(_, owner)| *owner == client)
            .map(|(uid, _)| *uid)
            .collect()
    }

    /// Clients with at least one mapped node.
    #[must_use]
    pub fn clients(&self) -> BTreeSet<ClientId> {
        self.entries.keys().map(|(_, client)| *client).collect()
    }

    /// Total number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(port: u16) -> ClientId {
        ClientId::new(([127, 0, 0, 1], port).into())
    }

    fn uid(raw: u64) -> RemoteUid {
        RemoteUid::new(raw)
    }

    #[test]
    fn test_create_then_resolve() {
        let mut map = IdentityMap::new();
        let local = map
            .resolve_or_create(uid(1), client(1), || Ok(LocalId::new(10)))
            .unwrap();
        assert_eq!(local, LocalId::new(10));
        assert_eq!(map.resolve(uid(1), client(1)).unwrap(), local);
    }

    #[test]
    fn test_duplicate_creation_skips_factory() {
        let mut map = IdentityMap::new();
        map.resolve_or_create(uid(1), client(1), || Ok(LocalId::new(10)))
            .unwrap();

        let mut called = false;
        let err = map
            .resolve_or_create(uid(1), client(1), || {
                called = true;
                Ok(LocalId::new(11))
            })
            .unwrap_err();

        assert!(!called);
        assert!(matches!(
            err,
            DispatchError::Protocol(ProtocolError::DuplicateCreation { .. })
        ));
        assert_eq!(map.resolve(uid(1), client(1)).unwrap(), LocalId::new(10));
    }

    #[test]
    fn test_failed_factory_leaves_no_entry() {
        let mut map = IdentityMap::new();
        let result = map.resolve_or_create(uid(3), client(1), || {
            Err(SceneError::InvalidParams("no vertices".into()))
        });
        assert!(result.is_err());
        assert!(map.is_empty());
    }

    #[test]
    fn test_unknown_uid() {
        let map = IdentityMap::new();
        assert!(matches!(
            map.resolve(uid(9), client(1)),
            Err(ProtocolError::UnknownRemoteUid { .. })
        ));
    }

    #[test]
    fn test_same_uid_different_clients() {
        let mut map = IdentityMap::new();
        map.resolve_or_create(uid(1), client(1), || Ok(LocalId::new(1)))
            .unwrap();
        map.resolve_or_create(uid(1), client(2), || Ok(LocalId::new(2)))
            .unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map.resolve(uid(1), client(1)).unwrap(), LocalId::new(1));
        assert_eq!(map.resolve(uid(1), client(2)).unwrap(), LocalId::new(2));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut map = IdentityMap::new();
        map.resolve_or_create(uid(1), client(1), || Ok(LocalId::new(1)))
            .unwrap();
        assert_eq!(map.remove(uid(1), client(1)), Some(LocalId::new(1)));
        assert_eq!(map.remove(uid(1), client(1)), None);
    }

    #[test]
    fn test_purge_only_touches_one_client() {
        let mut map = IdentityMap::new();
        for raw in 1..=3 {
            map.resolve_or_create(uid(raw), client(1), || Ok(LocalId::new(raw)))
                .unwrap();
        }
        map.resolve_or_create(uid(1), client(2), || Ok(LocalId::new(100)))
            .unwrap();

        let purged = map.purge_client(client(1));
        assert_eq!(
            purged,
            vec![
                (uid(1), LocalId::new(1)),
                (uid(2), LocalId::new(2)),
                (uid(3), LocalId::new(3)),
            ]
        );
        assert!(map.live_uids(client(1)).is_empty());
        assert_eq!(map.live_uids(client(2)), BTreeSet::from([uid(1)]));
        assert_eq!(map.clients(), BTreeSet::from([client(2)]));
    }
}
