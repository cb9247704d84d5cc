//! Principal management commands.

use anyhow::Result;
use tempora_gateway::AuthService;
use tempora_gateway::auth::{PublicPrincipal, setup};

use super::{Context, parse_privileges};
use crate::ui;

/// Admin actions.
pub enum AdminAction {
    /// Create a new principal.
    Create {
        identifier: String,
        secret: Option<String>,
        privileges: Vec<String>,
        admin: bool,
        generate_secret: bool,
    },
    /// List all principals.
    List,
    /// Replace a principal's privileges.
    SetPrivileges {
        identifier: String,
        privileges: Vec<String>,
    },
    /// Reset a principal's secret.
    ResetSecret { identifier: String },
    /// Enable a principal.
    Enable { identifier: String },
    /// Disable a principal.
    Disable { identifier: String },
    /// Delete a principal.
    Delete {
        identifier: String,
        cascade: bool,
        yes: bool,
    },
}

/// Run the admin command against the local store.
///
/// # Errors
///
/// Returns error if the store cannot be opened or the operation fails.
pub async fn run_admin(ctx: &Context, action: AdminAction) -> Result<()> {
    let auth = ctx.open_service()?;

    match action {
        AdminAction::Create {
            identifier,
            secret,
            privileges,
            admin,
            generate_secret,
        } => {
            let privileges = if admin {
                setup::admin_privileges()
            } else {
                parse_privileges(&privileges)?
            };

            let secret = if generate_secret {
                let generated = setup::generate_password(16);
                ui::success(&format!("Generated secret: {generated}"));
                generated
            } else if let Some(secret) = secret {
                secret
            } else {
                ui::prompts::new_secret("Secret")?
            };

            let principal = auth
                .create_principal(&identifier, &secret, privileges)
                .await?;
            ui::success(&format!(
                "Created principal '{}' (id {})",
                principal.identifier, principal.id
            ));
        }
        AdminAction::List => list_principals(&auth).await?,
        AdminAction::SetPrivileges {
            identifier,
            privileges,
        } => {
            let principal = auth
                .set_privileges(&identifier, parse_privileges(&privileges)?)
                .await?;
            ui::success(&format!(
                "Privileges of '{}' set to {}",
                principal.identifier,
                describe(&principal)
            ));
            ui::info("Access tokens already issued keep their old privileges until they expire");
        }
        AdminAction::ResetSecret { identifier } => {
            let secret = setup::generate_password(16);
            auth.reset_secret(&identifier, &secret).await?;
            ui::success(&format!("Secret reset for '{identifier}'"));
            ui::success(&format!("New secret: {secret}"));
        }
        AdminAction::Enable { identifier } => {
            auth.set_enabled(&identifier, true).await?;
            ui::success(&format!("Principal '{identifier}' enabled"));
        }
        AdminAction::Disable { identifier } => {
            auth.set_enabled(&identifier, false).await?;
            ui::success(&format!("Principal '{identifier}' disabled"));
        }
        AdminAction::Delete {
            identifier,
            cascade,
            yes,
        } => {
            if !yes && !ui::prompts::confirm(&format!("Delete principal '{identifier}'?"))? {
                ui::info("Delete cancelled");
                return Ok(());
            }
            let removed = auth.delete_principal(&identifier, cascade).await?;
            ui::success(&format!("Deleted principal '{identifier}'"));
            if cascade {
                ui::kv("Grants removed", &removed.to_string());
            }
        }
    }

    Ok(())
}

async fn list_principals(auth: &AuthService) -> Result<()> {
    let principals = auth.list_principals().await?;

    if principals.is_empty() {
        ui::info("No principals configured.");
        ui::info("Create one with:");
        ui::info("  tempora admin create --identifier admin --admin --generate-secret");
        return Ok(());
    }

    ui::info(&format!("Principals ({}):", principals.len()));
    println!();
    println!(
        "{:<6} {:<28} {:<8} {:<20} PRIVILEGES",
        "ID", "IDENTIFIER", "ENABLED", "LAST LOGIN"
    );
    println!("{}", "-".repeat(90));

    for principal in &principals {
        let enabled = if principal.enabled { "yes" } else { "no" };
        let last_login = principal.last_login.map_or_else(
            || "never".to_string(),
            |t| t.format("%Y-%m-%d %H:%M:%S").to_string(),
        );
        println!(
            "{:<6} {:<28} {:<8} {:<20} {}",
            principal.id.to_string(),
            principal.identifier,
            enabled,
            last_login,
            describe(principal)
        );
    }

    Ok(())
}

fn describe(principal: &PublicPrincipal) -> String {
    if principal.privileges.is_empty() {
        return "-".to_string();
    }
    principal
        .privileges
        .iter()
        .map(|p| format!("{}:{}", p.category, p.level))
        .collect::<Vec<_>>()
        .join(",")
}
