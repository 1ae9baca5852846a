use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use cert_exporter::cluster::kubernetes::KubeClient;
use cert_exporter::cluster::ResourceClient;
use cert_exporter::config::{Config, Settings};
use cert_exporter::metrics::server::MetricsServer;
use cert_exporter::{metrics, telemetry, Checker, Exporter, ExporterError, SourceKind};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "cert-exporter", version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Kubeconfig path; in-cluster configuration is used when omitted
    #[arg(long)]
    kubeconfig: Option<String>,

    /// Address of the metrics endpoint
    #[arg(long)]
    listen_address: Option<String>,

    /// Time between poll cycles, e.g. 30s or 5m
    #[arg(long)]
    polling_period: Option<String>,

    /// Label selector used when listing resources
    #[arg(short = 'l', long)]
    label_selector: Option<String>,

    /// Namespace to scan, repeatable; all namespaces when omitted
    #[arg(short, long = "namespace")]
    namespaces: Vec<String>,

    /// Source kind to enable (secret, keystore, configmap, certrequest), repeatable
    #[arg(long = "source", value_parser = parse_source_kind)]
    sources: Vec<SourceKind>,

    /// Log format: text or json
    #[arg(long)]
    log_format: Option<String>,

    /// Print an example configuration file and exit
    #[arg(long)]
    generate_config: bool,
}

fn parse_source_kind(value: &str) -> Result<SourceKind, String> {
    SourceKind::ALL
        .into_iter()
        .find(|kind| kind.as_str() == value)
        .ok_or_else(|| {
            format!(
                "unknown source '{}', expected one of secret, keystore, configmap, certrequest",
                value
            )
        })
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.generate_config {
        println!("{}", Config::example_toml());
        exit(0);
    }

    let mut config = Config::default();
    if let Some(path) = &cli.config {
        match Config::from_file(path) {
            Ok(file_config) => config = config.merge_with(file_config),
            Err(e) => {
                eprintln!("Failed to load configuration {}: {}", path.display(), e);
                exit(2);
            }
        }
    }
    config = config.merge_with(Config::from_cli_args(
        cli.kubeconfig,
        cli.listen_address,
        cli.polling_period,
        cli.label_selector,
        (!cli.namespaces.is_empty()).then_some(cli.namespaces),
        cli.log_format,
        (!cli.sources.is_empty()).then_some(cli.sources),
    ));

    let settings = match config.resolve() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            exit(2);
        }
    };

    telemetry::setup_logging(settings.log_format);

    if let Err(e) = run(settings).await {
        error!(error = %e, "cert-exporter failed");
        exit(1);
    }
}

async fn run(settings: Settings) -> Result<(), ExporterError> {
    let registry = metrics::new_registry()?;
    let server = MetricsServer::bind(settings.listen_address, registry.clone()).await?;
    let client: Arc<dyn ResourceClient> =
        Arc::new(KubeClient::connect(settings.kubeconfig.as_deref()).await?);

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();
    for (kind, checker_settings) in settings.checkers {
        let exporter = Exporter::new(kind, &registry)?;
        let checker = Checker::new(kind, checker_settings, client.clone(), exporter);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            checker.run(cancel).await;
            Ok(())
        });
    }
    tasks.spawn(server.serve(cancel.clone()));

    shutdown_signal().await;
    info!("shutting down");
    cancel.cancel();

    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "task failed"),
            Err(e) => error!(error = %e, "task panicked"),
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
