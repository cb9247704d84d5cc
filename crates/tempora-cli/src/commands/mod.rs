//! CLI command implementations.

pub mod admin;
pub mod grant;
pub mod serve;
pub mod status;
pub mod tokens;

pub use admin::run_admin;
pub use grant::run_grant;
pub use serve::run_serve;
pub use status::run_status;
pub use tokens::run_tokens;

use std::path::PathBuf;

use anyhow::Context as _;
use tempora_core::Config;
use tempora_gateway::AuthService;
use tempora_gateway::auth::{PrivilegeSet, ResourceCategory, required_level_for, setup};

use crate::ui;

/// Shared state for every command.
pub struct Context {
    /// Loaded configuration.
    pub config: Config,
    /// `--data-dir` override.
    pub data_dir: Option<PathBuf>,
}

impl Context {
    /// Directory holding the sled databases.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| self.config.data_dir())
    }

    /// Open the local store directly.
    ///
    /// sled holds an exclusive lock, so this fails while a gateway is
    /// serving from the same directory.
    pub fn open_service(&self) -> anyhow::Result<AuthService> {
        let data_dir = self.data_dir();
        std::fs::create_dir_all(&data_dir)?;
        tracing::debug!(path = %data_dir.display(), "Opening local store");

        let db = sled::open(data_dir.join("auth")).with_context(|| {
            format!(
                "Failed to open {} (is a gateway running on it?)",
                data_dir.display()
            )
        })?;

        let auth_config = self.config.auth.clone().with_env_overrides();
        AuthService::new(&auth_config, &db).map_err(|e| {
            anyhow::anyhow!(
                "{e}. Set TEMPORA_JWT_SECRET or auth.jwtSecret (see `tempora secret generate`)"
            )
        })
    }
}

/// Parse `category:LEVEL` pairs.
pub fn parse_privileges(items: &[String]) -> anyhow::Result<PrivilegeSet> {
    items
        .iter()
        .map(|item| {
            let (category, level) = item
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("Expected category:LEVEL, got '{item}'"))?;
            let category: ResourceCategory = category.parse()?;
            let level = required_level_for(category, level)?;
            Ok(tempora_gateway::auth::Privilege::new(category, level))
        })
        .collect()
}

/// Print a fresh signing key.
pub fn run_secret_generate() {
    let secret = setup::generate_hex_secret();
    ui::info("Add this to auth.jwtSecret or export it as TEMPORA_JWT_SECRET:");
    println!("{secret}");
}
