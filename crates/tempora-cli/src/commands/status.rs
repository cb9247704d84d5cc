//! Status command - probe a running gateway.

use std::time::Duration;

use anyhow::Result;

use super::Context;
use crate::ui::{self, HealthStatus};

/// Check the configured (or given) port for a live gateway.
pub async fn run_status(ctx: &Context, port: Option<u16>) -> Result<()> {
    let port = port.unwrap_or(ctx.config.gateway.port);
    let host = match ctx.config.gateway.bind_address().as_str() {
        "0.0.0.0" => "127.0.0.1".to_string(),
        other => other.to_string(),
    };

    ui::header("Tempora Status");
    println!();

    let client = reqwest::Client::new();
    match client
        .get(format!("http://{host}:{port}/health"))
        .timeout(Duration::from_secs(2))
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => {
            ui::health_check("Gateway", HealthStatus::Ok, Some("running"));
        }
        Ok(resp) => {
            let detail = format!("health check returned {}", resp.status());
            ui::health_check("Gateway", HealthStatus::Error, Some(&detail));
        }
        Err(_) => {
            ui::health_check("Gateway", HealthStatus::Warning, Some("not running"));
            ui::info("  Start with: tempora serve");
        }
    }
    ui::kv("  Address", &format!("{host}:{port}"));

    println!();
    let auth = ctx.config.auth.clone().with_env_overrides();
    match auth.validate() {
        Ok(()) => ui::health_check("Signing key", HealthStatus::Ok, Some("configured")),
        Err(e) => ui::health_check("Signing key", HealthStatus::Error, Some(&e.to_string())),
    }
    ui::kv("  Data", &ctx.data_dir().display().to_string());

    Ok(())
}
