//! Persisted refresh tokens.
//!
//! One sled tree holds three key spaces, always written together in a batch:
//! - `t:{token}` -> JSON record
//! - `o:{owner}\0{token}` -> empty (revoke every token of an owner)
//! - `x:{expires_millis:020}:{token}` -> owner (range scan for reclamation)

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};

use super::AuthError;

const TOKEN_PREFIX: &str = "t:";
const OWNER_PREFIX: &str = "o:";
const EXPIRY_PREFIX: &str = "x:";

/// Random bytes per token (hex encoded on the wire).
const TOKEN_BYTES: usize = 32;

/// A persisted refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    /// Opaque token value.
    pub token: String,
    /// Login identifier of the owner.
    pub owner: String,
    /// When the token was issued.
    pub created_at: DateTime<Utc>,
    /// When the token stops being accepted.
    pub expires_at: DateTime<Utc>,
}

impl RefreshToken {
    /// Whether the token has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Refresh token store backed by sled.
#[derive(Clone)]
pub struct RefreshTokenStore {
    tree: sled::Tree,
    ttl: TimeDelta,
}

impl RefreshTokenStore {
    /// Open the refresh token table in an existing database.
    ///
    /// # Errors
    ///
    /// Returns error if the tree cannot be opened or the TTL is out of range.
    pub fn open(db: &sled::Db, ttl: Duration) -> Result<Self, AuthError> {
        let tree = db
            .open_tree("refresh_tokens")
            .map_err(|e| AuthError::Storage(format!("Failed to open refresh tree: {e}")))?;
        let ttl = TimeDelta::from_std(ttl)
            .map_err(|_| AuthError::Config("Refresh token TTL out of range".to_string()))?;

        Ok(Self { tree, ttl })
    }

    /// Issue a new token for `owner`.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn issue(&self, owner: &str) -> Result<RefreshToken, AuthError> {
        self.issue_at(owner, Utc::now())
    }

    /// Issue a new token as if the current time were `now`.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn issue_at(&self, owner: &str, now: DateTime<Utc>) -> Result<RefreshToken, AuthError> {
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| AuthError::Config("Refresh token TTL out of range".to_string()))?;

        let record = RefreshToken {
            token: generate_token(),
            owner: owner.to_string(),
            created_at: now,
            expires_at,
        };
        let value = serde_json::to_vec(&record)
            .map_err(|e| AuthError::Storage(format!("Serialization error: {e}")))?;

        let mut batch = sled::Batch::default();
        batch.insert(token_key(&record.token).into_bytes(), value);
        batch.insert(owner_key(owner, &record.token), Vec::new());
        batch.insert(
            expiry_key(expires_at, &record.token).into_bytes(),
            owner.as_bytes(),
        );
        self.tree.apply_batch(batch)?;
        self.tree.flush()?;

        tracing::debug!(owner, expires_at = %expires_at, "Refresh token issued");

        Ok(record)
    }

    /// Look up a token without side effects.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn get(&self, token: &str) -> Result<Option<RefreshToken>, AuthError> {
        self.tree
            .get(token_key(token))?
            .map(|value| {
                serde_json::from_slice(&value)
                    .map_err(|e| AuthError::Storage(format!("Deserialization error: {e}")))
            })
            .transpose()
    }

    /// Validate a presented token.
    ///
    /// # Errors
    ///
    /// Returns `RefreshTokenNotFound` if absent. If present but expired the
    /// row is deleted and `RefreshTokenExpired` is returned.
    pub fn validate(&self, token: &str) -> Result<RefreshToken, AuthError> {
        self.validate_at(token, Utc::now())
    }

    /// Validate a presented token as if the current time were `now`.
    ///
    /// # Errors
    ///
    /// Same as [`RefreshTokenStore::validate`].
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<RefreshToken, AuthError> {
        let record = self.get(token)?.ok_or(AuthError::RefreshTokenNotFound)?;

        if record.is_expired_at(now) {
            self.take(token)?;
            tracing::debug!(owner = %record.owner, "Expired refresh token removed on validate");
            return Err(AuthError::RefreshTokenExpired);
        }

        Ok(record)
    }

    /// Delete a token. Deleting an absent token is not an error.
    ///
    /// Returns whether a token was removed.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn revoke(&self, token: &str) -> Result<bool, AuthError> {
        let Some(record) = self.take(token)? else {
            return Ok(false);
        };
        tracing::debug!(owner = %record.owner, "Refresh token revoked");
        Ok(true)
    }

    /// Delete every token owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn revoke_all(&self, owner: &str) -> Result<usize, AuthError> {
        let prefix = owner_prefix(owner);
        let mut records = Vec::new();

        for entry in self.tree.scan_prefix(&prefix) {
            let (key, _) = entry?;
            let token = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            if let Some(record) = self.get(&token)? {
                records.push(record);
            }
        }

        self.remove_records(&records)?;
        tracing::debug!(owner, removed = records.len(), "Refresh tokens revoked for owner");
        Ok(records.len())
    }

    /// Delete every token with `expires_at < now` in one batch.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, AuthError> {
        let start = EXPIRY_PREFIX.as_bytes().to_vec();
        let end = format!("{EXPIRY_PREFIX}{:020}", millis(now)).into_bytes();

        let mut batch = sled::Batch::default();
        let mut removed = 0usize;

        for entry in self.tree.range(start..end) {
            let (key, owner) = entry?;
            let Some(token) = key
                .get(EXPIRY_PREFIX.len() + 21..)
                .map(|t| String::from_utf8_lossy(t).into_owned())
            else {
                continue;
            };
            let owner = String::from_utf8_lossy(&owner);

            batch.remove(key);
            batch.remove(token_key(&token).into_bytes());
            batch.remove(owner_key(&owner, &token));
            removed += 1;
        }

        if removed > 0 {
            self.tree.apply_batch(batch)?;
            self.tree.flush()?;
        }

        Ok(removed)
    }

    /// Number of stored tokens, expired or not.
    #[must_use]
    pub fn count(&self) -> usize {
        self.tree.scan_prefix(TOKEN_PREFIX).count()
    }

    /// Remove one token and its index entries atomically. Of two concurrent
    /// callers only one gets the record back.
    fn take(&self, token: &str) -> Result<Option<RefreshToken>, AuthError> {
        let key = token_key(token);

        let taken = self
            .tree
            .transaction(|tx| {
                let Some(value) = tx.remove(key.as_bytes())? else {
                    return Ok(None);
                };
                let record: RefreshToken = serde_json::from_slice(&value)
                    .map_err(|e| ConflictableTransactionError::Abort(e.to_string()))?;
                tx.remove(owner_key(&record.owner, &record.token))?;
                tx.remove(expiry_key(record.expires_at, &record.token).into_bytes())?;
                Ok(Some(record))
            })
            .map_err(|e| match e {
                TransactionError::Abort(msg) => {
                    AuthError::Storage(format!("Deserialization error: {msg}"))
                }
                TransactionError::Storage(e) => e.into(),
            })?;

        if taken.is_some() {
            self.tree.flush()?;
        }
        Ok(taken)
    }

    fn remove_records(&self, records: &[RefreshToken]) -> Result<(), AuthError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut batch = sled::Batch::default();
        for record in records {
            batch.remove(token_key(&record.token).into_bytes());
            batch.remove(owner_key(&record.owner, &record.token));
            batch.remove(expiry_key(record.expires_at, &record.token).into_bytes());
        }
        self.tree.apply_batch(batch)?;
        self.tree.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for RefreshTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTokenStore")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn millis(at: DateTime<Utc>) -> u64 {
    u64::try_from(at.timestamp_millis()).unwrap_or(0)
}

fn token_key(token: &str) -> String {
    format!("{TOKEN_PREFIX}{token}")
}

fn owner_prefix(owner: &str) -> Vec<u8> {
    let mut prefix = format!("{OWNER_PREFIX}{owner}").into_bytes();
    prefix.push(0);
    prefix
}

fn owner_key(owner: &str, token: &str) -> Vec<u8> {
    let mut key = owner_prefix(owner);
    key.extend_from_slice(token.as_bytes());
    key
}

fn expiry_key(expires_at: DateTime<Utc>, token: &str) -> String {
    format!("{EXPIRY_PREFIX}{:020}:{token}", millis(expires_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn open_store(ttl: Duration) -> (TempDir, RefreshTokenStore) {
        let temp_dir = TempDir::new().unwrap();
        let db = sled::open(temp_dir.path()).unwrap();
        let store = RefreshTokenStore::open(&db, ttl).unwrap();
        (temp_dir, store)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_issue_and_validate() {
        let (_dir, store) = open_store(Duration::from_secs(3600));
        let issued = store.issue("alice").unwrap();

        assert_eq!(issued.token.len(), TOKEN_BYTES * 2);
        let validated = store.validate(&issued.token).unwrap();
        assert_eq!(validated, issued);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_tokens_are_unique() {
        let (_dir, store) = open_store(Duration::from_secs(60));
        let a = store.issue("alice").unwrap();
        let b = store.issue("alice").unwrap();
        assert_ne!(a.token, b.token);
        assert_eq!(store.count(), 2);
    }

    #[test]
    fn test_unknown_token_not_found() {
        let (_dir, store) = open_store(Duration::from_secs(60));
        assert!(matches!(
            store.validate("nope"),
            Err(AuthError::RefreshTokenNotFound)
        ));
    }

    #[test]
    fn test_expired_token_is_removed_on_validate() {
        let (_dir, store) = open_store(Duration::from_secs(1));
        let now = at(1_700_000_000);
        let issued = store.issue_at("alice", now).unwrap();

        let later = now + TimeDelta::seconds(2);
        assert!(matches!(
            store.validate_at(&issued.token, later),
            Err(AuthError::RefreshTokenExpired)
        ));
        assert_eq!(store.get(&issued.token).unwrap(), None);
        assert_eq!(store.count(), 0);
        assert!(matches!(
            store.validate_at(&issued.token, later),
            Err(AuthError::RefreshTokenNotFound)
        ));
    }

    #[test]
    fn test_token_valid_at_exact_expiry() {
        let (_dir, store) = open_store(Duration::from_secs(10));
        let now = at(1_700_000_000);
        let issued = store.issue_at("alice", now).unwrap();

        assert!(store.validate_at(&issued.token, issued.expires_at).is_ok());
    }

    #[test]
    fn test_revoke_is_idempotent() {
        let (_dir, store) = open_store(Duration::from_secs(60));
        let issued = store.issue("alice").unwrap();

        assert!(store.revoke(&issued.token).unwrap());
        assert!(!store.revoke(&issued.token).unwrap());
        assert!(matches!(
            store.validate(&issued.token),
            Err(AuthError::RefreshTokenNotFound)
        ));
    }

    #[test]
    fn test_revoke_all_only_touches_owner() {
        let (_dir, store) = open_store(Duration::from_secs(60));
        store.issue("alice").unwrap();
        store.issue("alice").unwrap();
        let bob = store.issue("bob").unwrap();
        // Owner prefix must not match a longer identifier
        let alicia = store.issue("alice2").unwrap();

        assert_eq!(store.revoke_all("alice").unwrap(), 2);
        assert_eq!(store.count(), 2);
        assert!(store.validate(&bob.token).is_ok());
        assert!(store.validate(&alicia.token).is_ok());
        assert_eq!(store.revoke_all("alice").unwrap(), 0);
    }

    #[test]
    fn test_delete_expired_leaves_valid_rows() {
        let (_dir, store) = open_store(Duration::from_secs(60));
        let base = at(1_700_000_000);

        for i in 0..3 {
            store.issue_at("old", base + TimeDelta::seconds(i)).unwrap();
        }
        let valid_a = store.issue_at("new", base + TimeDelta::seconds(600)).unwrap();
        let valid_b = store.issue_at("new", base + TimeDelta::seconds(700)).unwrap();

        let now = base + TimeDelta::seconds(300);
        assert_eq!(store.delete_expired(now).unwrap(), 3);
        assert_eq!(store.count(), 2);
        assert!(store.validate_at(&valid_a.token, now).is_ok());
        assert!(store.validate_at(&valid_b.token, now).is_ok());

        // Owner index was cleaned up with the rows
        assert_eq!(store.revoke_all("old").unwrap(), 0);
        assert_eq!(store.delete_expired(now).unwrap(), 0);
    }

    #[test]
    fn test_delete_expired_keeps_token_expiring_now() {
        let (_dir, store) = open_store(Duration::from_secs(60));
        let now = at(1_700_000_000);
        let issued = store.issue_at("alice", now).unwrap();

        assert_eq!(store.delete_expired(issued.expires_at).unwrap(), 0);
        assert_eq!(
            store
                .delete_expired(issued.expires_at + TimeDelta::milliseconds(1))
                .unwrap(),
            1
        );
    }
}
