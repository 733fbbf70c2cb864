use anyhow::{Context, Result};
use clap::Parser;
use kube::Client;
use kube::config::{KubeConfigOptions, Kubeconfig};
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

mod args;
mod console;
mod util;

#[tokio::main]
async fn main() -> Result<()> {
    console_common::init();
    let cli = args::Cli::parse();

    let client = build_client(cli.kube_context.as_deref()).await.context("failed to build Kubernetes client")?;

    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        console_common::shutdown::shutdown_signal().await;
        shutdown_clone.cancel();
    });

    #[cfg(feature = "metrics")]
    let metrics = std::sync::Arc::new(util::metrics::ControllerMetrics::new("console"));
    #[cfg(feature = "metrics")]
    {
        let server_shutdown = shutdown.clone();
        tokio::spawn(util::server::run(cli.metrics_port, metrics.clone(), server_shutdown));
    }

    #[cfg(feature = "metrics")]
    console::reconcile::run(client, metrics).await?;
    #[cfg(not(feature = "metrics"))]
    console::reconcile::run(client).await?;

    println!("{}", "🛑 Console operator shut down gracefully.".red());
    Ok(())
}

async fn build_client(context: Option<&str>) -> Result<Client> {
    let options = KubeConfigOptions { context: context.map(str::to_owned), ..Default::default() };
    let config = match Kubeconfig::read() {
        Ok(kubeconfig) => kube::Config::from_custom_kubeconfig(kubeconfig, &options).await?,
        Err(_) => kube::Config::infer().await?,
    };
    Client::try_from(config).context("failed to construct Kubernetes client from config")
}
