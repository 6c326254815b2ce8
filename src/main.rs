use clap::Parser;
use log::info;

use kpeers::{DiscoveryConfig, DiscoveryMode, DiscoveryStrategy};

/// Runs one discovery cycle against the configured source and prints the
/// peers as JSON; mostly useful to debug a cluster's discovery settings.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// How peers are discovered
    #[arg(long, value_enum, default_value = "api")]
    mode: Mode,
    /// DNS name resolved in dns mode
    #[arg(long)]
    service_dns: Option<String>,
    #[arg(long, default_value_t = 5)]
    service_dns_timeout: u64,
    /// Exact service whose endpoints are the peers
    #[arg(long)]
    service_name: Option<String>,
    #[arg(long)]
    service_label_name: Option<String>,
    #[arg(long)]
    service_label_value: Option<String>,
    #[arg(short = 'n', long)]
    namespace: Option<String>,
    /// Explicit member port; 0 uses the discovered or default port
    #[arg(long, default_value_t = 0)]
    service_port: u16,
    /// Also resolve endpoints failing their readiness probe
    #[arg(long)]
    resolve_not_ready: bool,
    #[arg(long)]
    api_server: Option<String>,
    #[arg(long)]
    api_token: Option<String>,
    /// Path to a CA bundle (PEM) trusted for the API server
    #[arg(long)]
    api_ca_cert: Option<std::path::PathBuf>,
    #[arg(long, default_value_t = 5)]
    api_retries: u32,
    /// Also print the local placement metadata
    #[arg(long)]
    metadata: bool,
    /// Re-resolve every N seconds instead of exiting
    #[arg(long)]
    interval: Option<u64>,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Mode {
    Api,
    Dns,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("RUST_LOG", "info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let api_ca_certificate = match &cli.api_ca_cert {
        Some(path) => Some(tokio::fs::read_to_string(path).await?),
        None => None,
    };

    let config = DiscoveryConfig {
        mode: match cli.mode {
            Mode::Api => DiscoveryMode::Api,
            Mode::Dns => DiscoveryMode::Dns,
        },
        service_dns: cli.service_dns,
        service_dns_timeout_secs: cli.service_dns_timeout,
        service_name: cli.service_name,
        service_label_name: cli.service_label_name,
        service_label_value: cli.service_label_value,
        service_port: cli.service_port,
        namespace: cli.namespace,
        resolve_not_ready_addresses: cli.resolve_not_ready,
        api_server_url: cli.api_server,
        api_token: cli.api_token,
        api_ca_certificate,
        api_retries: cli.api_retries,
    };

    let strategy = DiscoveryStrategy::new(config).await?;
    strategy.start();

    loop {
        let nodes = strategy.discover_nodes().await?;
        info!("discovered {} peer(s)", nodes.len());
        dump_json(&nodes)?;

        if cli.metadata {
            dump_json(&strategy.discover_local_metadata().await)?;
        }

        let Some(secs) = cli.interval else { break };
        tokio::time::sleep(tokio::time::Duration::from_secs(secs)).await;
    }

    strategy.destroy();
    Ok(())
}

fn dump_json<T: serde::Serialize>(v: &T) -> eyre::Result<()> {
    use std::io::Write;
    let mut out = std::io::stdout();
    serde_json::to_writer_pretty(&out, v)?;
    out.write_all(b"\n")?;
    Ok(())
}
