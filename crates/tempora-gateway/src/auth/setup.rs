//! First-run setup.

use rand::{Rng, RngCore};

use super::AuthError;
use super::pipeline::AuthService;
use super::privilege::{PermissionLevel, Privilege, PrivilegeSet, ResourceCategory};
use super::users::PublicPrincipal;

/// Environment variable naming the seeded admin identifier.
pub const ADMIN_IDENTIFIER_ENV: &str = "TEMPORA_ADMIN_IDENTIFIER";
/// Environment variable holding the seeded admin secret.
pub const ADMIN_SECRET_ENV: &str = "TEMPORA_ADMIN_SECRET";

/// `ADMIN` on every category.
#[must_use]
pub fn admin_privileges() -> PrivilegeSet {
    ResourceCategory::ALL
        .into_iter()
        .map(|category| Privilege::new(category, PermissionLevel::Admin))
        .collect()
}

/// Auto-setup from environment variables.
///
/// Checks for `TEMPORA_ADMIN_IDENTIFIER` and `TEMPORA_ADMIN_SECRET` and
/// creates an admin principal if both are set and no principal exists.
///
/// # Errors
///
/// Returns error if principal creation fails.
pub async fn auto_setup_from_env(auth: &AuthService) -> Result<Option<PublicPrincipal>, AuthError> {
    auto_setup_with(auth, |key| std::env::var(key).ok()).await
}

/// [`auto_setup_from_env`] with a custom variable lookup.
///
/// # Errors
///
/// Returns error if principal creation fails.
pub async fn auto_setup_with<F>(
    auth: &AuthService,
    lookup: F,
) -> Result<Option<PublicPrincipal>, AuthError>
where
    F: Fn(&str) -> Option<String>,
{
    // Only auto-setup if no principals exist
    if !auth.list_principals().await?.is_empty() {
        return Ok(None);
    }

    let Some(identifier) = lookup(ADMIN_IDENTIFIER_ENV).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let Some(secret) = lookup(ADMIN_SECRET_ENV).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    let admin = auth
        .create_principal(&identifier, &secret, admin_privileges())
        .await?;

    tracing::info!(
        identifier = %admin.identifier,
        "Admin principal created from environment variables"
    );

    Ok(Some(admin))
}

/// Generate a secure random secret.
#[must_use]
pub fn generate_password(length: usize) -> String {
    const CHARSET: &[u8] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*";
    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| char::from(CHARSET[rng.gen_range(0..CHARSET.len())]))
        .collect()
}

/// Generate a random 256-bit signing key as hex.
#[must_use]
pub fn generate_hex_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SecretHasher;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tempora_core::AuthConfig;

    struct PlainHasher;

    impl SecretHasher for PlainHasher {
        fn hash(&self, secret: &str) -> Result<String, AuthError> {
            Ok(format!("plain:{secret}"))
        }

        fn verify(&self, secret: &str, hash: &str) -> bool {
            hash.strip_prefix("plain:") == Some(secret)
        }
    }

    fn service() -> (TempDir, AuthService) {
        let temp_dir = TempDir::new().unwrap();
        let db = sled::open(temp_dir.path()).unwrap();
        let config = AuthConfig::builder().jwt_secret(generate_hex_secret()).build();
        let service = AuthService::new(&config, &db)
            .unwrap()
            .with_hasher(Arc::new(PlainHasher));
        (temp_dir, service)
    }

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_seeds_admin_once() {
        let (_dir, service) = service();
        let vars = env(&[
            (ADMIN_IDENTIFIER_ENV, "Admin@Example.com"),
            (ADMIN_SECRET_ENV, "correct-horse"),
        ]);

        let admin = auto_setup_with(&service, |k| vars.get(k).cloned())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(admin.identifier, "admin@example.com");
        assert_eq!(admin.privileges, admin_privileges());

        // Second run is a no-op
        assert!(auto_setup_with(&service, |k| vars.get(k).cloned())
            .await
            .unwrap()
            .is_none());
        assert!(service.login("admin@example.com", "correct-horse").await.is_ok());
    }

    #[tokio::test]
    async fn test_requires_both_variables() {
        let (_dir, service) = service();
        let vars = env(&[(ADMIN_IDENTIFIER_ENV, "admin")]);

        assert!(auto_setup_with(&service, |k| vars.get(k).cloned())
            .await
            .unwrap()
            .is_none());
        assert!(service.list_principals().await.unwrap().is_empty());
    }

    #[test]
    fn test_admin_privileges_cover_every_category() {
        let privileges = admin_privileges();
        assert_eq!(privileges.len(), ResourceCategory::ALL.len());
        assert!(privileges.iter().all(|p| p.level == PermissionLevel::Admin));
    }

    #[test]
    fn test_generate_password() {
        let pwd1 = generate_password(16);
        let pwd2 = generate_password(16);

        assert_eq!(pwd1.len(), 16);
        assert_ne!(pwd1, pwd2);
    }

    #[test]
    fn test_generate_hex_secret() {
        let secret = generate_hex_secret();
        assert_eq!(secret.len(), 64);
        assert_ne!(secret, generate_hex_secret());
        assert!(AuthConfig::builder().jwt_secret(secret).build().validate().is_ok());
    }
}
