use std::path::PathBuf;
use std::process;

use clap::Parser;
use fedsecrets_web::config::{CliOverrides, ConfigResolver};
use fedsecrets_web::telemetry;
use tracing::{info, warn};

#[derive(Parser)]
#[command(version, about = "Reads secrets across tenants through managed identity federation")]
struct Args {
    /// Override config file path
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override bind address
    #[arg(long)]
    bind: Option<String>,
    /// Override the public base url used for sign-in redirects
    #[arg(long)]
    public_base_url: Option<String>,
    /// Debug-level logs unless RUST_LOG is set
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    if let Err(err) = real_main().await {
        eprintln!("fedsecrets-web exited with error: {err:#}");
        process::exit(1);
    }
}

async fn real_main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init(args.verbose)?;

    let mut resolver = ConfigResolver::new().with_cli_overrides(CliOverrides {
        bind_address: args.bind.clone(),
        public_base_url: args.public_base_url.clone(),
    });
    if let Some(path) = args.config.clone() {
        resolver = resolver.with_config_path(path);
    }
    let resolved = resolver.load()?;

    info!(
        bind = %resolved.config.server.bind_address,
        tenant = %resolved.config.azure_ad.tenant_id,
        sources = ?resolved.provenance,
        "configuration loaded"
    );
    for warning in &resolved.warnings {
        warn!(%warning, "configuration warning");
    }

    fedsecrets_web::run(resolved.config).await
}
