//! Serve command - start the gateway server.

use anyhow::Result;
use tempora_gateway::{Gateway, GatewayConfig};

use super::Context;
use crate::ui;

/// Serve command arguments.
#[derive(Debug, Clone, Default)]
pub struct ServeArgs {
    /// Port to listen on.
    pub port: Option<u16>,
    /// Bind address.
    pub bind: Option<String>,
}

/// Start the gateway and block until Ctrl-C.
pub async fn run_serve(ctx: Context, args: ServeArgs) -> Result<()> {
    let mut gateway_config = GatewayConfig::from_config(&ctx.config);
    gateway_config.data_dir = ctx.data_dir();
    if let Some(port) = args.port {
        gateway_config.port = port;
    }
    if let Some(bind) = args.bind {
        gateway_config.bind_address = bind;
    }

    tracing::debug!(config = ?gateway_config, "Resolved gateway configuration");

    ui::header("Starting Tempora Gateway");
    ui::kv(
        "Address",
        &format!("{}:{}", gateway_config.bind_address, gateway_config.port),
    );
    ui::kv("Data", &gateway_config.data_dir.display().to_string());
    println!();

    let gateway = Gateway::new(gateway_config)?;

    ui::info("Press Ctrl+C to stop");
    println!();

    gateway.run().await?;

    ui::success("Gateway stopped");
    Ok(())
}
