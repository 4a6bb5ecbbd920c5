use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dsched_kubehub::KubeReader;
use dsched_placement::Placer;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "dsched-webhook", version, about = "Capacity-placement mutating admission webhook")]
struct Cli {
    /// Address the HTTPS listener binds to
    #[arg(long = "listen", env = "DSCHED_LISTEN", default_value = "0.0.0.0:8443")]
    listen: SocketAddr,

    /// PEM certificate chain presented to the API server
    #[arg(long = "tls-cert", env = "DSCHED_TLS_CERT", default_value = "/tls/tls.crt")]
    tls_cert: PathBuf,

    /// PEM private key matching --tls-cert
    #[arg(long = "tls-key", env = "DSCHED_TLS_KEY", default_value = "/tls/tls.key")]
    tls_key: PathBuf,

    /// Prometheus exporter listen address (host:port); disabled when unset
    #[arg(long = "metrics-addr", env = "DSCHED_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

fn init_tracing() {
    let env = std::env::var("DSCHED_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics(addr: Option<SocketAddr>) {
    if let Some(sock) = addr {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        match builder.with_http_listener(sock).install() {
            Ok(_) => tracing::info!(addr = %sock, "Prometheus metrics exporter listening"),
            Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable; waiting for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    init_metrics(cli.metrics_addr);

    let client = dsched_kubehub::connect().await?;
    let placer = Placer::new(Arc::new(KubeReader::new(client)));

    let tls = dsched_webhook::tls::load_server_config(&cli.tls_cert, &cli.tls_key)?;
    let listener = TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    info!(addr = %cli.listen, cert = %cli.tls_cert.display(), "webhook server listening");

    dsched_webhook::tls::serve(listener, tls, dsched_webhook::router(placer), shutdown_signal()).await
}
