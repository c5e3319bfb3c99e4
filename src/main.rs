//! RCode server entry point

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rcode::cli::{build_state, Args};
use rcode_api::ApiServer;
use rcode_core::Config;

/// Drain window for outstanding operations at shutdown
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(15);

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if let Err(e) = run(args).await {
        error!(error = %e, "startup failed");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = Config::load(Some(&args.config))?;
    args.apply_to(&mut config);
    info!(
        port = config.effective_port(),
        tls = config.tls_enabled,
        model = config.model,
        "starting rcode"
    );

    let shutdown = CancellationToken::new();
    let state = build_state(config, shutdown.clone())?;
    let server = ApiServer::new(state);

    // Ctrl-C (or SIGTERM via the runtime) signals every outstanding
    // operation, then the server drains
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    let serve = server.serve();
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => result?,
        _ = shutdown.cancelled() => {
            // Give in-flight work the grace window before exiting
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, &mut serve).await;
            info!("shutdown complete");
        }
    }

    Ok(())
}
