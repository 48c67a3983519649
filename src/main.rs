//! VAT declaration gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────────┐
//!                       │                    VAT GATEWAY                        │
//!                       │                                                       │
//!  Client (mTLS)        │  ┌──────────┐   ┌───────────┐   ┌──────────────┐     │
//!  ─────────────────────┼─▶│ listener │──▶│ middleware│──▶│  forwarding  │     │
//!                       │  │ TLS/TCP  │   │  stack    │   │   handler    │     │
//!                       │  └──────────┘   └───────────┘   └──────┬───────┘     │
//!                       │   correlation, peer auth,              │             │
//!                       │   rate limit, audit                    ▼             │
//!                       │                                 ┌──────────────┐     │
//!                       │                                 │  upstream    │     │
//!                       │                                 │  client      │     │
//!                       │                                 └──────┬───────┘     │
//!                       │          ┌─────────────┐               │             │
//!                       │          │ credential  │◀──────────────┤             │
//!                       │          │ cache       │               ▼             │
//!                       │          └─────────────┘        ┌──────────────┐     │     Skatteverket
//!                       │                                 │ retry +      │─────┼───▶ declaration API
//!                       │                                 │ breaker      │     │
//!                       │                                 └──────────────┘     │
//!                       └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use vat_gateway::config::load_or_default;
use vat_gateway::lifecycle;
use vat_gateway::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "vat-gateway", version, about = "Gateway to the Skatteverket VAT declaration API")]
struct Args {
    /// Configuration file (TOML).
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_or_default(&args.config)?;

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "vat-gateway starting");

    tracing::info!(
        config = %args.config.display(),
        bind_address = %config.listener.bind_address,
        tls = config.listener.tls.is_some(),
        client_auth_required = config.client_auth.required,
        rate_limit_enabled = config.rate_limit.enabled,
        admin_enabled = config.admin.enabled,
        "Configuration loaded"
    );

    if args.check {
        println!("configuration OK");
        return Ok(());
    }

    lifecycle::run(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
