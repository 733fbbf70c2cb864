use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "console-operator", about = "Ephemeral console session operator")]
pub struct Cli {
    /// Kubeconfig context to use; defaults to the in-cluster config when
    /// running inside a pod, falling back to `~/.kube/config` otherwise.
    #[arg(long, env = "KUBE_CONTEXT")]
    pub kube_context: Option<String>,

    /// Port the Prometheus `/metrics`, `/healthz`, and `/readyz` endpoints
    /// are served on.
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,
}
