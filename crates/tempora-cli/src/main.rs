//! Tempora CLI - run and administer the Tempora authorization gateway.

mod commands;
mod ui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tempora_core::Config;
use tempora_core::config::LogFormat;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "tempora")]
#[command(about = "Tempora - multi-tenant time tracking gateway")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.tempora/tempora.json)
    #[arg(long, global = true, env = "TEMPORA_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory override
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address
        #[arg(long)]
        bind: Option<String>,
    },

    /// Check whether a gateway is running
    Status {
        /// Port to probe
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Principal management
    Admin {
        #[command(subcommand)]
        action: AdminCommands,
    },

    /// Account and project memberships
    Grant {
        #[command(subcommand)]
        action: GrantCommands,
    },

    /// Refresh token maintenance
    Tokens {
        #[command(subcommand)]
        action: TokenCommands,
    },

    /// Signing key helpers
    Secret {
        #[command(subcommand)]
        action: SecretCommands,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Create a new principal
    Create {
        /// Login identifier
        #[arg(long)]
        identifier: String,

        /// Secret (prompted for when omitted)
        #[arg(long)]
        secret: Option<String>,

        /// Privileges as category:LEVEL, comma separated (e.g. project:WRITE,user:READ)
        #[arg(long, value_delimiter = ',')]
        privileges: Vec<String>,

        /// Grant ADMIN on every category
        #[arg(long, conflicts_with = "privileges")]
        admin: bool,

        /// Generate a random secret
        #[arg(long, conflicts_with = "secret")]
        generate_secret: bool,
    },

    /// List all principals
    List,

    /// Replace a principal's privileges
    SetPrivileges {
        /// Login identifier
        #[arg(long)]
        identifier: String,

        /// Privileges as category:LEVEL, comma separated
        #[arg(long, value_delimiter = ',')]
        privileges: Vec<String>,
    },

    /// Reset a principal's secret to a generated one
    ResetSecret {
        /// Login identifier
        #[arg(long)]
        identifier: String,
    },

    /// Enable a principal
    Enable {
        /// Login identifier
        #[arg(long)]
        identifier: String,
    },

    /// Disable a principal and revoke its sessions
    Disable {
        /// Login identifier
        #[arg(long)]
        identifier: String,
    },

    /// Delete a principal
    Delete {
        /// Login identifier
        #[arg(long)]
        identifier: String,

        /// Remove the principal's account and project grants too
        #[arg(long)]
        cascade: bool,

        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum GrantCommands {
    /// Grant a principal a level on a resource
    Add {
        /// account or project
        category: String,
        /// Resource id
        resource: u64,
        /// Principal identifier
        identifier: String,
        /// READ, MANAGE, WRITE or ADMIN
        level: String,
    },

    /// Remove a principal's grant on a resource
    Remove {
        /// account or project
        category: String,
        /// Resource id
        resource: u64,
        /// Principal identifier
        identifier: String,
    },

    /// List members of a resource
    Members {
        /// account or project
        category: String,
        /// Resource id
        resource: u64,
    },
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Delete expired refresh tokens now
    Reclaim,

    /// Revoke every refresh token of a principal
    RevokeAll {
        /// Login identifier
        #[arg(long)]
        identifier: String,
    },
}

#[derive(Subcommand)]
enum SecretCommands {
    /// Print a new random signing key
    Generate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    init_logging(&config, cli.verbose);

    let ctx = commands::Context {
        config,
        data_dir: cli.data_dir,
    };

    match cli.command {
        Commands::Serve { port, bind } => {
            commands::run_serve(ctx, commands::serve::ServeArgs { port, bind }).await?;
        }

        Commands::Status { port } => {
            commands::run_status(&ctx, port).await?;
        }

        Commands::Admin { action } => {
            let action = match action {
                AdminCommands::Create {
                    identifier,
                    secret,
                    privileges,
                    admin,
                    generate_secret,
                } => commands::admin::AdminAction::Create {
                    identifier,
                    secret,
                    privileges,
                    admin,
                    generate_secret,
                },
                AdminCommands::List => commands::admin::AdminAction::List,
                AdminCommands::SetPrivileges {
                    identifier,
                    privileges,
                } => commands::admin::AdminAction::SetPrivileges {
                    identifier,
                    privileges,
                },
                AdminCommands::ResetSecret { identifier } => {
                    commands::admin::AdminAction::ResetSecret { identifier }
                }
                AdminCommands::Enable { identifier } => {
                    commands::admin::AdminAction::Enable { identifier }
                }
                AdminCommands::Disable { identifier } => {
                    commands::admin::AdminAction::Disable { identifier }
                }
                AdminCommands::Delete {
                    identifier,
                    cascade,
                    yes,
                } => commands::admin::AdminAction::Delete {
                    identifier,
                    cascade,
                    yes,
                },
            };
            commands::run_admin(&ctx, action).await?;
        }

        Commands::Grant { action } => {
            let action = match action {
                GrantCommands::Add {
                    category,
                    resource,
                    identifier,
                    level,
                } => commands::grant::GrantAction::Add {
                    category,
                    resource,
                    identifier,
                    level,
                },
                GrantCommands::Remove {
                    category,
                    resource,
                    identifier,
                } => commands::grant::GrantAction::Remove {
                    category,
                    resource,
                    identifier,
                },
                GrantCommands::Members { category, resource } => {
                    commands::grant::GrantAction::Members { category, resource }
                }
            };
            commands::run_grant(&ctx, action).await?;
        }

        Commands::Tokens { action } => {
            let action = match action {
                TokenCommands::Reclaim => commands::tokens::TokenAction::Reclaim,
                TokenCommands::RevokeAll { identifier } => {
                    commands::tokens::TokenAction::RevokeAll { identifier }
                }
            };
            commands::run_tokens(&ctx, action).await?;
        }

        Commands::Secret {
            action: SecretCommands::Generate,
        } => commands::run_secret_generate(),
    }

    Ok(())
}

fn init_logging(config: &Config, verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose || config.settings.debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    match config.settings.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).init(),
    }
}
