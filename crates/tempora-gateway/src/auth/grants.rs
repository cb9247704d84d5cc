//! Per-resource grant storage for account- and project-scoped resources.
//!
//! Each category has its own sled tree with two key spaces:
//! - `r | resource | principal` -> rank (lookup by pair, members of a resource)
//! - `p | principal | resource` -> rank (resources visible to a principal)
//!
//! Both keys are written in one transaction. Ids are big-endian so a prefix
//! scan returns them in numeric order.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use tempora_core::{PrincipalId, ResourceId};

use super::AuthError;
use super::events::{AssociationBroadcaster, AssociationEvent, AssociationKind};
use super::privilege::{PermissionLevel, ResourceCategory};

const RESOURCE_PREFIX: u8 = b'r';
const PRINCIPAL_PREFIX: u8 = b'p';
const KEY_LEN: usize = 17;

/// Resource categories scoped by per-instance grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantCategory {
    /// Account-scoped resources.
    Account,
    /// Project-scoped resources.
    Project,
}

impl GrantCategory {
    /// Both categories.
    pub const ALL: [Self; 2] = [Self::Account, Self::Project];

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Project => "project",
        }
    }

    /// Global privilege category covering this grant table.
    #[must_use]
    pub const fn resource_category(self) -> ResourceCategory {
        match self {
            Self::Account => ResourceCategory::Account,
            Self::Project => ResourceCategory::Project,
        }
    }

    const fn tree_name(self) -> &'static str {
        match self {
            Self::Account => "grants.account",
            Self::Project => "grants.project",
        }
    }
}

impl fmt::Display for GrantCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantCategory {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "account" | "accounts" => Ok(Self::Account),
            "project" | "projects" => Ok(Self::Project),
            _ => Err(AuthError::UnknownCategory(s.to_string())),
        }
    }
}

/// Outcome of a grant upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantChange {
    /// No grant existed for the pair.
    Created,
    /// The level was replaced.
    Updated {
        /// Level before the change.
        previous: PermissionLevel,
    },
    /// The pair already had this level.
    Unchanged,
}

/// Grant table for one resource category.
#[derive(Clone)]
pub struct ResourceGrantStore {
    category: GrantCategory,
    tree: sled::Tree,
    events: AssociationBroadcaster,
    write_lock: Arc<Mutex<()>>,
}

impl ResourceGrantStore {
    /// Open the grant table for `category` in an existing database.
    ///
    /// # Errors
    ///
    /// Returns error if the tree cannot be opened.
    pub fn open(
        db: &sled::Db,
        category: GrantCategory,
        events: AssociationBroadcaster,
    ) -> Result<Self, AuthError> {
        let tree = db
            .open_tree(category.tree_name())
            .map_err(|e| AuthError::Storage(format!("Failed to open grants tree: {e}")))?;

        Ok(Self {
            category,
            tree,
            events,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Category this store holds grants for.
    #[must_use]
    pub const fn category(&self) -> GrantCategory {
        self.category
    }

    /// Associate a principal with a resource, replacing any existing level.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn grant(
        &self,
        resource: ResourceId,
        principal: PrincipalId,
        level: PermissionLevel,
    ) -> Result<GrantChange, AuthError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let primary = resource_key(resource, principal);
        let index = principal_key(principal, resource);
        let rank = [level.rank()];

        let previous = self
            .tree
            .transaction(|tx| {
                let previous = tx.insert(&primary[..], &rank[..])?;
                tx.insert(&index[..], &rank[..])?;
                Ok::<_, ConflictableTransactionError<()>>(previous)
            })
            .map_err(transaction_error)?;
        self.tree.flush()?;

        let change = match previous.as_deref().map(decode_level).transpose()? {
            None => GrantChange::Created,
            Some(prev) if prev == level => GrantChange::Unchanged,
            Some(prev) => GrantChange::Updated { previous: prev },
        };

        let kind = match change {
            GrantChange::Created => Some(AssociationKind::Created),
            GrantChange::Updated { .. } => Some(AssociationKind::Updated),
            GrantChange::Unchanged => None,
        };
        if let Some(kind) = kind {
            self.events.publish(AssociationEvent::new(
                self.category,
                resource,
                principal,
                Some(level),
                kind,
            ));
        }

        tracing::debug!(
            category = %self.category,
            resource_id = %resource,
            principal_id = %principal,
            %level,
            ?change,
            "Grant applied"
        );

        Ok(change)
    }

    /// Remove an association. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn revoke(&self, resource: ResourceId, principal: PrincipalId) -> Result<bool, AuthError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let primary = resource_key(resource, principal);
        let index = principal_key(principal, resource);

        let previous = self
            .tree
            .transaction(|tx| {
                let previous = tx.remove(&primary[..])?;
                tx.remove(&index[..])?;
                Ok::<_, ConflictableTransactionError<()>>(previous)
            })
            .map_err(transaction_error)?;

        let Some(_) = previous else {
            return Ok(false);
        };
        self.tree.flush()?;

        self.events.publish(AssociationEvent::new(
            self.category,
            resource,
            principal,
            None,
            AssociationKind::Removed,
        ));

        tracing::debug!(
            category = %self.category,
            resource_id = %resource,
            principal_id = %principal,
            "Grant revoked"
        );

        Ok(true)
    }

    /// Level granted to a principal on a resource.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails or the stored rank is corrupt.
    pub fn level_of(
        &self,
        resource: ResourceId,
        principal: PrincipalId,
    ) -> Result<Option<PermissionLevel>, AuthError> {
        self.tree
            .get(resource_key(resource, principal))?
            .as_deref()
            .map(decode_level)
            .transpose()
    }

    /// Every resource a principal holds any grant on.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn resource_ids_visible_to(
        &self,
        principal: PrincipalId,
    ) -> Result<BTreeSet<ResourceId>, AuthError> {
        let mut ids = BTreeSet::new();
        for entry in self.tree.scan_prefix(id_prefix(PRINCIPAL_PREFIX, principal.get())) {
            let (key, _) = entry?;
            ids.insert(ResourceId::new(trailing_id(&key)?));
        }
        Ok(ids)
    }

    /// Every principal associated with a resource, with its level.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn members_of(
        &self,
        resource: ResourceId,
    ) -> Result<Vec<(PrincipalId, PermissionLevel)>, AuthError> {
        let mut members = Vec::new();
        for entry in self.tree.scan_prefix(id_prefix(RESOURCE_PREFIX, resource.get())) {
            let (key, value) = entry?;
            members.push((PrincipalId::new(trailing_id(&key)?), decode_level(&value)?));
        }
        Ok(members)
    }

    /// Delete every grant on a resource (the resource was deleted).
    ///
    /// Returns the number of grants removed.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn revoke_resource(&self, resource: ResourceId) -> Result<usize, AuthError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let principals = self
            .members_of(resource)?
            .into_iter()
            .map(|(principal, _)| principal)
            .collect::<Vec<_>>();
        let pairs = principals
            .iter()
            .map(|principal| (resource, *principal))
            .collect::<Vec<_>>();

        self.remove_pairs(&pairs)
    }

    /// Delete every grant held by a principal.
    ///
    /// Returns the number of grants removed.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn revoke_principal(&self, principal: PrincipalId) -> Result<usize, AuthError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let pairs = self
            .resource_ids_visible_to(principal)?
            .into_iter()
            .map(|resource| (resource, principal))
            .collect::<Vec<_>>();

        self.remove_pairs(&pairs)
    }

    /// Remove pairs in one atomic batch. Caller holds the write lock.
    fn remove_pairs(&self, pairs: &[(ResourceId, PrincipalId)]) -> Result<usize, AuthError> {
        if pairs.is_empty() {
            return Ok(0);
        }

        let mut batch = sled::Batch::default();
        for (resource, principal) in pairs {
            batch.remove(&resource_key(*resource, *principal)[..]);
            batch.remove(&principal_key(*principal, *resource)[..]);
        }
        self.tree.apply_batch(batch)?;
        self.tree.flush()?;

        for (resource, principal) in pairs {
            self.events.publish(AssociationEvent::new(
                self.category,
                *resource,
                *principal,
                None,
                AssociationKind::Removed,
            ));
        }

        Ok(pairs.len())
    }
}

impl fmt::Debug for ResourceGrantStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGrantStore")
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

/// The two grant tables.
#[derive(Debug, Clone)]
pub struct GrantStores {
    /// Account-scoped grants.
    pub account: ResourceGrantStore,
    /// Project-scoped grants.
    pub project: ResourceGrantStore,
}

impl GrantStores {
    /// Open both grant tables in a database, publishing to `events`.
    ///
    /// # Errors
    ///
    /// Returns error if a tree cannot be opened.
    pub fn open(db: &sled::Db, events: &AssociationBroadcaster) -> Result<Self, AuthError> {
        Ok(Self {
            account: ResourceGrantStore::open(db, GrantCategory::Account, events.clone())?,
            project: ResourceGrantStore::open(db, GrantCategory::Project, events.clone())?,
        })
    }

    /// Store for a category.
    #[must_use]
    pub const fn get(&self, category: GrantCategory) -> &ResourceGrantStore {
        match category {
            GrantCategory::Account => &self.account,
            GrantCategory::Project => &self.project,
        }
    }
}

fn id_prefix(tag: u8, id: u64) -> [u8; 9] {
    let mut prefix = [0u8; 9];
    prefix[0] = tag;
    prefix[1..].copy_from_slice(&id.to_be_bytes());
    prefix
}

fn composite_key(tag: u8, first: u64, second: u64) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    key[..9].copy_from_slice(&id_prefix(tag, first));
    key[9..].copy_from_slice(&second.to_be_bytes());
    key
}

fn resource_key(resource: ResourceId, principal: PrincipalId) -> [u8; KEY_LEN] {
    composite_key(RESOURCE_PREFIX, resource.get(), principal.get())
}

fn principal_key(principal: PrincipalId, resource: ResourceId) -> [u8; KEY_LEN] {
    composite_key(PRINCIPAL_PREFIX, principal.get(), resource.get())
}

fn trailing_id(key: &[u8]) -> Result<u64, AuthError> {
    let bytes: [u8; 8] = key
        .get(9..KEY_LEN)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| AuthError::Storage("Corrupt grant key".to_string()))?;
    Ok(u64::from_be_bytes(bytes))
}

fn decode_level(value: &[u8]) -> Result<PermissionLevel, AuthError> {
    value
        .first()
        .copied()
        .and_then(PermissionLevel::from_rank)
        .ok_or_else(|| AuthError::Storage("Corrupt grant level".to_string()))
}

fn transaction_error(e: TransactionError<()>) -> AuthError {
    match e {
        TransactionError::Storage(e) => e.into(),
        TransactionError::Abort(()) => AuthError::Storage("Grant transaction aborted".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn open_stores() -> (TempDir, GrantStores, AssociationBroadcaster) {
        let temp_dir = TempDir::new().unwrap();
        let db = sled::open(temp_dir.path()).unwrap();
        let events = AssociationBroadcaster::new();
        let stores = GrantStores::open(&db, &events).unwrap();
        (temp_dir, stores, events)
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("Project".parse::<GrantCategory>().unwrap(), GrantCategory::Project);
        assert_eq!("accounts".parse::<GrantCategory>().unwrap(), GrantCategory::Account);
        assert!(matches!(
            "post".parse::<GrantCategory>(),
            Err(AuthError::UnknownCategory(_))
        ));
    }

    const R1: ResourceId = ResourceId::new(1);
    const R2: ResourceId = ResourceId::new(2);
    const P: PrincipalId = PrincipalId::new(10);
    const Q: PrincipalId = PrincipalId::new(11);

    #[test]
    fn test_grant_then_visible_then_revoke() {
        let (_dir, stores, _events) = open_stores();
        let projects = &stores.project;

        projects.grant(R1, P, PermissionLevel::Read).unwrap();
        assert!(projects.resource_ids_visible_to(P).unwrap().contains(&R1));

        assert!(projects.revoke(R1, P).unwrap());
        assert!(!projects.resource_ids_visible_to(P).unwrap().contains(&R1));
        assert_eq!(projects.level_of(R1, P).unwrap(), None);
    }

    #[test]
    fn test_grant_upsert_replaces_level() {
        let (_dir, stores, _events) = open_stores();
        let projects = &stores.project;

        assert_eq!(
            projects.grant(R1, P, PermissionLevel::Read).unwrap(),
            GrantChange::Created
        );
        assert_eq!(
            projects.grant(R1, P, PermissionLevel::Write).unwrap(),
            GrantChange::Updated {
                previous: PermissionLevel::Read
            }
        );
        assert_eq!(
            projects.level_of(R1, P).unwrap(),
            Some(PermissionLevel::Write)
        );
        assert_eq!(projects.members_of(R1).unwrap().len(), 1);
    }

    #[test]
    fn test_same_level_grant_is_noop() {
        let (_dir, stores, events) = open_stores();
        let mut rx = events.subscribe();
        let projects = &stores.project;

        projects.grant(R1, P, PermissionLevel::Manage).unwrap();
        assert_eq!(
            projects.grant(R1, P, PermissionLevel::Manage).unwrap(),
            GrantChange::Unchanged
        );

        assert_eq!(rx.try_recv().unwrap().kind, AssociationKind::Created);
        assert!(rx.try_recv().is_err());
        assert_eq!(projects.members_of(R1).unwrap(), vec![(P, PermissionLevel::Manage)]);
    }

    #[test]
    fn test_revoke_absent_is_noop() {
        let (_dir, stores, events) = open_stores();
        let mut rx = events.subscribe();

        assert!(!stores.account.revoke(R1, P).unwrap());
        assert!(!stores.account.revoke(R1, P).unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_categories_are_independent() {
        let (_dir, stores, _events) = open_stores();

        stores.account.grant(R1, P, PermissionLevel::Admin).unwrap();

        assert_eq!(stores.project.level_of(R1, P).unwrap(), None);
        assert!(stores.project.resource_ids_visible_to(P).unwrap().is_empty());
        assert_eq!(
            stores.get(GrantCategory::Account).level_of(R1, P).unwrap(),
            Some(PermissionLevel::Admin)
        );
    }

    #[test]
    fn test_visible_ids_are_sorted_and_scoped() {
        let (_dir, stores, _events) = open_stores();
        let projects = &stores.project;

        projects.grant(R2, P, PermissionLevel::Read).unwrap();
        projects.grant(R1, P, PermissionLevel::Write).unwrap();
        projects.grant(R1, Q, PermissionLevel::Read).unwrap();

        let visible: Vec<_> = projects.resource_ids_visible_to(P).unwrap().into_iter().collect();
        assert_eq!(visible, vec![R1, R2]);

        let visible_q: Vec<_> = projects.resource_ids_visible_to(Q).unwrap().into_iter().collect();
        assert_eq!(visible_q, vec![R1]);
    }

    #[test]
    fn test_events_preserve_order() {
        let (_dir, stores, events) = open_stores();
        let mut rx = events.subscribe();
        let projects = &stores.project;

        projects.grant(R1, P, PermissionLevel::Read).unwrap();
        projects.grant(R1, P, PermissionLevel::Admin).unwrap();
        projects.revoke(R1, P).unwrap();

        let kinds: Vec<_> = (0..3).map(|_| rx.try_recv().unwrap()).collect();
        assert_eq!(kinds[0].kind, AssociationKind::Created);
        assert_eq!(kinds[1].kind, AssociationKind::Updated);
        assert_eq!(kinds[1].level, Some(PermissionLevel::Admin));
        assert_eq!(kinds[2].kind, AssociationKind::Removed);
        assert_eq!(kinds[2].level, None);
        assert!(kinds.iter().all(|e| e.category == GrantCategory::Project));
    }

    #[test]
    fn test_revoke_resource_cascades() {
        let (_dir, stores, _events) = open_stores();
        let projects = &stores.project;

        projects.grant(R1, P, PermissionLevel::Read).unwrap();
        projects.grant(R1, Q, PermissionLevel::Manage).unwrap();
        projects.grant(R2, P, PermissionLevel::Read).unwrap();

        assert_eq!(projects.revoke_resource(R1).unwrap(), 2);
        assert!(projects.members_of(R1).unwrap().is_empty());
        assert!(projects.resource_ids_visible_to(Q).unwrap().is_empty());
        assert_eq!(
            projects.resource_ids_visible_to(P).unwrap().into_iter().collect::<Vec<_>>(),
            vec![R2]
        );
    }

    #[test]
    fn test_revoke_principal() {
        let (_dir, stores, _events) = open_stores();
        let accounts = &stores.account;

        accounts.grant(R1, P, PermissionLevel::Read).unwrap();
        accounts.grant(R2, P, PermissionLevel::Read).unwrap();
        accounts.grant(R2, Q, PermissionLevel::Read).unwrap();

        assert_eq!(accounts.revoke_principal(P).unwrap(), 2);
        assert!(accounts.resource_ids_visible_to(P).unwrap().is_empty());
        assert_eq!(accounts.members_of(R2).unwrap(), vec![(Q, PermissionLevel::Read)]);
        assert_eq!(accounts.revoke_principal(P).unwrap(), 0);
    }

    #[test]
    fn test_concurrent_grants_on_same_pair_last_writer_wins() {
        let (_dir, stores, _events) = open_stores();
        let projects = stores.project.clone();

        let handles: Vec<_> = PermissionLevel::ALL
            .into_iter()
            .map(|level| {
                let store = projects.clone();
                std::thread::spawn(move || store.grant(R1, P, level).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Exactly one grant survives, with both key spaces in agreement
        let members = projects.members_of(R1).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(projects.level_of(R1, P).unwrap(), Some(members[0].1));
        assert_eq!(projects.resource_ids_visible_to(P).unwrap().len(), 1);
    }
}
