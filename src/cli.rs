//! Command-line surface
//!
//! The fixed arguments are declared with clap's derive API. The install flag
//! catalog is attached to the `install` subcommand at runtime with
//! [`command`], and read back with [`bind`].

use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgMatches, Args, CommandFactory, FromArgMatches, Parser, Subcommand};
use tracing::debug;

use crate::cluster::{InstallContext, KubeCluster};
use crate::flag::options::ValueOptions;
use crate::flag::FlagSet;
use crate::install::{InstallRequest, Installer};
use crate::render::OutputFormat;
use crate::{Error, Result, DEFAULT_NAMESPACE};

/// meshplane - install and configure the meshplane service mesh
#[derive(Parser, Debug)]
#[command(name = "meshplane", version, about, long_about = None)]
pub struct Cli {
    /// Namespace in which meshplane is installed
    #[arg(
        short = 'L',
        long = "meshplane-namespace",
        global = true,
        default_value = DEFAULT_NAMESPACE
    )]
    pub namespace: String,

    /// Path to the kubeconfig file to use for CLI requests
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Name of the kubeconfig context to use
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// meshplane subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Output Kubernetes configs to install meshplane
    ///
    /// Renders the control plane manifests to stdout. Run it once with
    /// --crds first, then without:
    ///
    ///   meshplane install --crds | kubectl apply -f -
    ///   meshplane install | kubectl apply -f -
    Install(InstallArgs),
}

/// Fixed `install` arguments; the settings flags are attached separately
#[derive(Args, Debug, Clone)]
pub struct InstallArgs {
    /// Install the meshplane CRDs
    #[arg(long)]
    pub crds: bool,

    /// Ignore the current Kubernetes cluster when checking for existing
    /// cluster configuration (default false)
    #[arg(long)]
    pub ignore_cluster: bool,

    /// Output format. One of: yaml|json
    #[arg(short = 'o', long, default_value = "yaml")]
    pub output: OutputFormat,

    /// Values-overrides
    #[command(flatten)]
    pub values: ValueOptions,
}

impl InstallArgs {
    /// The install request these arguments describe
    pub fn request(&self, namespace: &str) -> InstallRequest {
        InstallRequest {
            namespace: namespace.to_string(),
            crds: self.crds,
            ignore_cluster: self.ignore_cluster,
            output: self.output,
            value_options: self.values.clone(),
        }
    }
}

/// The full command, with `flags` attached to `install`
pub fn command(flags: &FlagSet) -> clap::Command {
    Cli::command().mut_subcommand("install", |install| flags.augment(install))
}

/// Read the parsed command line back into [`Cli`], recording the given
/// settings flags in `flags`.
pub fn bind(matches: &ArgMatches, flags: &mut FlagSet) -> Result<Cli> {
    let cli = Cli::from_arg_matches(matches).map_err(|e| Error::input(e.to_string()))?;
    if let Some(("install", install)) = matches.subcommand() {
        flags.set_from_matches(install)?;
    }
    Ok(cli)
}

/// Run `install`, returning the manifest stream to print
pub async fn run_install(
    ctx: InstallContext,
    cli: &Cli,
    args: &InstallArgs,
    flags: &FlagSet,
) -> Result<String> {
    let request = args.request(&cli.namespace);

    let mut installer = Installer::new(ctx);
    if !request.ignore_cluster {
        let cluster =
            KubeCluster::connect(cli.kubeconfig.as_deref(), cli.context.as_deref()).await?;
        debug!("connected to cluster");
        installer = installer.with_cluster(Arc::new(cluster));
    }

    installer.run(&request, flags).await
}
