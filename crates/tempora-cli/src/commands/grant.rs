//! Membership commands for accounts and projects.

use anyhow::Result;
use tempora_core::ResourceId;
use tempora_gateway::auth::{GrantCategory, GrantChange, required_level_for};

use super::Context;
use crate::ui;

/// Grant actions.
pub enum GrantAction {
    /// Grant a level on a resource.
    Add {
        category: String,
        resource: u64,
        identifier: String,
        level: String,
    },
    /// Remove a grant.
    Remove {
        category: String,
        resource: u64,
        identifier: String,
    },
    /// List members of a resource.
    Members { category: String, resource: u64 },
}

/// Run the grant command against the local store.
///
/// # Errors
///
/// Returns error if the store cannot be opened or the operation fails.
pub async fn run_grant(ctx: &Context, action: GrantAction) -> Result<()> {
    let auth = ctx.open_service()?;

    match action {
        GrantAction::Add {
            category,
            resource,
            identifier,
            level,
        } => {
            let category: GrantCategory = category.parse()?;
            let level = required_level_for(category.resource_category(), &level)?;
            let principal = auth.get_principal(&identifier).await?;
            let resource = ResourceId::new(resource);

            let message = match auth
                .grant_member(category, resource, principal.id, level)
                .await?
            {
                GrantChange::Created => format!("Granted {level} on {category} {resource}"),
                GrantChange::Updated { previous } => {
                    format!("Changed {category} {resource} from {previous} to {level}")
                }
                GrantChange::Unchanged => format!("Already {level} on {category} {resource}"),
            };
            ui::success(&format!("{}: {message}", principal.identifier));
        }
        GrantAction::Remove {
            category,
            resource,
            identifier,
        } => {
            let category: GrantCategory = category.parse()?;
            let principal = auth.get_principal(&identifier).await?;
            let resource = ResourceId::new(resource);

            if auth.revoke_member(category, resource, principal.id).await? {
                ui::success(&format!(
                    "Removed {} from {category} {resource}",
                    principal.identifier
                ));
            } else {
                ui::warning(&format!(
                    "{} had no grant on {category} {resource}",
                    principal.identifier
                ));
            }
        }
        GrantAction::Members { category, resource } => {
            let category: GrantCategory = category.parse()?;
            let resource = ResourceId::new(resource);
            let members = auth.members(category, resource).await?;

            if members.is_empty() {
                ui::info(&format!("No members on {category} {resource}"));
                return Ok(());
            }

            ui::info(&format!("Members of {category} {resource} ({}):", members.len()));
            println!();
            println!("{:<10} LEVEL", "PRINCIPAL");
            println!("{}", "-".repeat(20));
            for (principal, level) in members {
                println!("{:<10} {level}", principal.to_string());
            }
        }
    }

    Ok(())
}
