//! Principal model, credential storage and secret hashing.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use tempora_core::{PrincipalId, normalize_identifier};

use super::AuthError;
use super::privilege::PrivilegeSet;

const PRINCIPAL_PREFIX: &str = "principal:";
const IDENTIFIER_INDEX: &str = "idx:identifier:";

/// A login principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable id, allocated by the store.
    pub id: PrincipalId,
    /// Normalized login identifier.
    pub identifier: String,
    /// Secret hash (stored in DB, not exposed in public API).
    pub password_hash: String,
    /// Disabled principals cannot log in or refresh.
    pub enabled: bool,
    /// Global privileges.
    pub privileges: PrivilegeSet,
    /// When the principal was created.
    pub created_at: DateTime<Utc>,
    /// When the principal last logged in.
    pub last_login: Option<DateTime<Utc>>,
}

impl Principal {
    /// Create a safe version for API responses (no secret hash).
    #[must_use]
    pub fn to_public(&self) -> PublicPrincipal {
        PublicPrincipal {
            id: self.id,
            identifier: self.identifier.clone(),
            enabled: self.enabled,
            privileges: self.privileges.clone(),
            created_at: self.created_at,
            last_login: self.last_login,
        }
    }
}

/// Public principal representation (for API responses).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicPrincipal {
    /// Stable id.
    pub id: PrincipalId,
    /// Login identifier.
    pub identifier: String,
    /// Whether enabled.
    pub enabled: bool,
    /// Global privileges.
    pub privileges: PrivilegeSet,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// Last login time.
    pub last_login: Option<DateTime<Utc>>,
}

/// Lookup and maintenance of principals.
///
/// Implementations perform blocking I/O; async callers go through
/// `AuthService`, which moves calls onto the blocking pool.
pub trait CredentialStore: Send + Sync {
    /// Find a principal by login identifier (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn lookup(&self, identifier: &str) -> Result<Option<Principal>, AuthError>;

    /// Find a principal by id.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn get(&self, id: PrincipalId) -> Result<Option<Principal>, AuthError>;

    /// Create a principal, allocating its id.
    ///
    /// # Errors
    ///
    /// Returns `PrincipalExists` if the identifier is taken.
    fn create(
        &self,
        identifier: &str,
        password_hash: String,
        privileges: PrivilegeSet,
    ) -> Result<Principal, AuthError>;

    /// Persist changes to an existing principal.
    ///
    /// # Errors
    ///
    /// Returns `PrincipalNotFound` if it does not exist.
    fn update(&self, principal: &Principal) -> Result<(), AuthError>;

    /// Delete a principal. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn delete(&self, id: PrincipalId) -> Result<bool, AuthError>;

    /// All principals in id order.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    fn list(&self) -> Result<Vec<Principal>, AuthError>;

    /// Whether no principal exists.
    fn is_empty(&self) -> bool;
}

/// One-way secret hashing.
pub trait SecretHasher: Send + Sync {
    /// Hash a plaintext secret.
    ///
    /// # Errors
    ///
    /// Returns error if hashing fails.
    fn hash(&self, secret: &str) -> Result<String, AuthError>;

    /// Check a plaintext secret against a stored hash.
    fn verify(&self, secret: &str, hash: &str) -> bool;
}

/// Argon2id secret hasher.
#[derive(Debug, Default, Clone, Copy)]
pub struct Argon2Hasher;

impl SecretHasher for Argon2Hasher {
    fn hash(&self, secret: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);

        Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| AuthError::Config(format!("Secret hashing failed: {e}")))
    }

    fn verify(&self, secret: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            tracing::warn!("Stored secret hash is unreadable");
            return false;
        };

        Argon2::default()
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok()
    }
}

/// Principal store backed by sled.
#[derive(Clone)]
pub struct PrincipalStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl PrincipalStore {
    /// Open the principal table in an existing database.
    ///
    /// # Errors
    ///
    /// Returns error if the tree cannot be opened.
    pub fn open(db: &sled::Db) -> Result<Self, AuthError> {
        let tree = db
            .open_tree("principals")
            .map_err(|e| AuthError::Storage(format!("Failed to open principals tree: {e}")))?;

        Ok(Self {
            db: db.clone(),
            tree,
        })
    }

    /// Number of principals.
    #[must_use]
    pub fn count(&self) -> usize {
        self.tree.scan_prefix(PRINCIPAL_PREFIX).count()
    }
}

impl std::fmt::Debug for PrincipalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrincipalStore")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl CredentialStore for PrincipalStore {
    fn lookup(&self, identifier: &str) -> Result<Option<Principal>, AuthError> {
        // An identifier that cannot be normalized cannot exist
        let Ok(identifier) = normalize_identifier(identifier) else {
            return Ok(None);
        };

        match self.tree.get(index_key(&identifier))? {
            Some(id_bytes) => self.get(decode_id(&id_bytes)?),
            None => Ok(None),
        }
    }

    fn get(&self, id: PrincipalId) -> Result<Option<Principal>, AuthError> {
        self.tree
            .get(principal_key(id))?
            .map(|value| {
                serde_json::from_slice(&value)
                    .map_err(|e| AuthError::Storage(format!("Deserialization error: {e}")))
            })
            .transpose()
    }

    fn create(
        &self,
        identifier: &str,
        password_hash: String,
        privileges: PrivilegeSet,
    ) -> Result<Principal, AuthError> {
        let identifier = normalize_identifier(identifier)?;
        let id = PrincipalId::new(self.db.generate_id()? + 1);

        let principal = Principal {
            id,
            identifier,
            password_hash,
            enabled: true,
            privileges,
            created_at: Utc::now(),
            last_login: None,
        };
        let value = serde_json::to_vec(&principal)
            .map_err(|e| AuthError::Storage(format!("Serialization error: {e}")))?;

        let index = index_key(&principal.identifier);
        let primary = principal_key(id);
        let id_bytes = id.get().to_be_bytes();

        self.tree
            .transaction(|tx| {
                if tx.get(index.as_bytes())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(()));
                }
                tx.insert(index.as_bytes(), &id_bytes[..])?;
                tx.insert(primary.as_bytes(), value.as_slice())?;
                Ok(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(()) => {
                    AuthError::PrincipalExists(principal.identifier.clone())
                }
                TransactionError::Storage(e) => e.into(),
            })?;
        self.tree.flush()?;

        Ok(principal)
    }

    fn update(&self, principal: &Principal) -> Result<(), AuthError> {
        let key = principal_key(principal.id);
        let value = serde_json::to_vec(principal)
            .map_err(|e| AuthError::Storage(format!("Serialization error: {e}")))?;

        self.tree
            .transaction(|tx| {
                if tx.get(key.as_bytes())?.is_none() {
                    return Err(ConflictableTransactionError::Abort(()));
                }
                tx.insert(key.as_bytes(), value.as_slice())?;
                Ok(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(()) => {
                    AuthError::PrincipalNotFound(principal.identifier.clone())
                }
                TransactionError::Storage(e) => e.into(),
            })?;
        self.tree.flush()?;
        Ok(())
    }

    fn delete(&self, id: PrincipalId) -> Result<bool, AuthError> {
        let Some(principal) = self.get(id)? else {
            return Ok(false);
        };

        let mut batch = sled::Batch::default();
        batch.remove(index_key(&principal.identifier).as_bytes());
        batch.remove(principal_key(id).as_bytes());
        self.tree.apply_batch(batch)?;
        self.tree.flush()?;

        Ok(true)
    }

    fn list(&self) -> Result<Vec<Principal>, AuthError> {
        let mut principals = Vec::new();

        for entry in self.tree.scan_prefix(PRINCIPAL_PREFIX) {
            let (_, value) = entry?;
            let principal: Principal = serde_json::from_slice(&value)
                .map_err(|e| AuthError::Storage(format!("Deserialization error: {e}")))?;
            principals.push(principal);
        }

        Ok(principals)
    }

    fn is_empty(&self) -> bool {
        self.tree.scan_prefix(PRINCIPAL_PREFIX).next().is_none()
    }
}

fn principal_key(id: PrincipalId) -> String {
    format!("{PRINCIPAL_PREFIX}{:020}", id.get())
}

fn index_key(identifier: &str) -> String {
    format!("{IDENTIFIER_INDEX}{identifier}")
}

fn decode_id(bytes: &[u8]) -> Result<PrincipalId, AuthError> {
    let bytes: [u8; 8] = bytes
        .try_into()
        .map_err(|_| AuthError::Storage("Corrupt identifier index".to_string()))?;
    Ok(PrincipalId::new(u64::from_be_bytes(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::privilege::{PermissionLevel, Privilege, ResourceCategory};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, PrincipalStore) {
        let temp_dir = TempDir::new().unwrap();
        let db = sled::open(temp_dir.path()).unwrap();
        (temp_dir, PrincipalStore::open(&db).unwrap())
    }

    fn privileges() -> PrivilegeSet {
        [Privilege::new(ResourceCategory::Project, PermissionLevel::Read)]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_hasher_roundtrip() {
        let hasher = Argon2Hasher;
        let hash = hasher.hash("password123").unwrap();
        assert!(hasher.verify("password123", &hash));
        assert!(!hasher.verify("wrongpassword", &hash));
        assert!(!hasher.verify("password123", "not-a-hash"));
    }

    #[test]
    fn test_create_and_lookup() {
        let (_dir, store) = open_store();
        assert!(store.is_empty());

        let created = store
            .create("Alice@Example.com", "hash".to_string(), privileges())
            .unwrap();
        assert_eq!(created.identifier, "alice@example.com");
        assert!(created.enabled);

        assert!(!store.is_empty());
        assert_eq!(store.count(), 1);

        let by_id = store.get(created.id).unwrap().unwrap();
        assert_eq!(by_id, created);

        let by_identifier = store.lookup("  ALICE@example.COM ").unwrap().unwrap();
        assert_eq!(by_identifier.id, created.id);
        assert_eq!(by_identifier.privileges, privileges());
    }

    #[test]
    fn test_lookup_unknown() {
        let (_dir, store) = open_store();
        assert_eq!(store.lookup("nobody").unwrap(), None);
        assert_eq!(store.lookup("").unwrap(), None);
    }

    #[test]
    fn test_duplicate_identifier() {
        let (_dir, store) = open_store();
        store.create("admin", "h1".to_string(), PrivilegeSet::new()).unwrap();

        let result = store.create("ADMIN", "h2".to_string(), PrivilegeSet::new());
        assert!(matches!(result, Err(AuthError::PrincipalExists(_))));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_ids_are_distinct() {
        let (_dir, store) = open_store();
        let a = store.create("a", "h".to_string(), PrivilegeSet::new()).unwrap();
        let b = store.create("b", "h".to_string(), PrivilegeSet::new()).unwrap();
        assert_ne!(a.id, b.id);

        let listed: Vec<_> = store.list().unwrap().into_iter().map(|p| p.identifier).collect();
        assert_eq!(listed, vec!["a", "b"]);
    }

    #[test]
    fn test_update() {
        let (_dir, store) = open_store();
        let mut principal = store.create("bob", "h".to_string(), PrivilegeSet::new()).unwrap();

        principal.enabled = false;
        principal.privileges = privileges();
        store.update(&principal).unwrap();

        let loaded = store.lookup("bob").unwrap().unwrap();
        assert!(!loaded.enabled);
        assert_eq!(loaded.privileges, privileges());
    }

    #[test]
    fn test_update_missing() {
        let (_dir, store) = open_store();
        let mut ghost = store.create("ghost", "h".to_string(), PrivilegeSet::new()).unwrap();
        store.delete(ghost.id).unwrap();

        ghost.enabled = false;
        assert!(matches!(
            store.update(&ghost),
            Err(AuthError::PrincipalNotFound(_))
        ));
        assert_eq!(store.get(ghost.id).unwrap(), None);
    }

    #[test]
    fn test_delete_removes_index() {
        let (_dir, store) = open_store();
        let principal = store.create("carol", "h".to_string(), PrivilegeSet::new()).unwrap();

        assert!(store.delete(principal.id).unwrap());
        assert!(!store.delete(principal.id).unwrap());
        assert_eq!(store.lookup("carol").unwrap(), None);

        // Identifier can be reused
        store.create("carol", "h".to_string(), PrivilegeSet::new()).unwrap();
    }

    #[test]
    fn test_public_view_has_no_hash() {
        let (_dir, store) = open_store();
        let principal = store.create("dave", "secret-hash".to_string(), privileges()).unwrap();

        let json = serde_json::to_string(&principal.to_public()).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(json.contains("dave"));
    }
}
