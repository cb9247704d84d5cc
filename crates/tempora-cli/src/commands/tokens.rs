//! Refresh token maintenance commands.

use anyhow::Result;

use super::Context;
use crate::ui;

/// Token actions.
pub enum TokenAction {
    /// Delete expired refresh tokens once.
    Reclaim,
    /// Revoke every refresh token of a principal.
    RevokeAll { identifier: String },
}

/// Run the token command against the local store.
///
/// # Errors
///
/// Returns error if the store cannot be opened or the operation fails.
pub async fn run_tokens(ctx: &Context, action: TokenAction) -> Result<()> {
    let auth = ctx.open_service()?;

    match action {
        TokenAction::Reclaim => {
            let removed = auth.reclaim_expired().await?;
            ui::success(&format!("Removed {removed} expired refresh tokens"));
            ui::kv("Remaining", &auth.refresh_tokens().count().to_string());
        }
        TokenAction::RevokeAll { identifier } => {
            let revoked = auth.revoke_all_for(&identifier).await?;
            ui::success(&format!("Revoked {revoked} refresh tokens of '{identifier}'"));
        }
    }

    Ok(())
}
