//! meshplane CLI

use std::io::Write;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use meshplane::cli::{self, Commands};
use meshplane::cluster::InstallContext;
use meshplane::flag::catalog;
use meshplane::values::Values;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the manifest stream
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let mut flags = catalog::install_flags(&Values::new()?)?;
    let matches = cli::command(&flags).get_matches();
    let cli = cli::bind(&matches, &mut flags)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    match &cli.command {
        Commands::Install(args) => {
            if args.crds {
                eprintln!("Rendering meshplane CRDs...");
            }

            let manifest =
                cli::run_install(InstallContext::new(cancel), &cli, args, &flags).await?;
            std::io::stdout().write_all(manifest.as_bytes())?;
            info!(bytes = manifest.len(), "manifests written");

            if args.crds {
                eprintln!(
                    "Next, run `meshplane install | kubectl apply -f -` to install the control plane."
                );
                eprintln!();
            }
        }
    }
    Ok(())
}
