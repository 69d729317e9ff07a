//! printbridge - connects Bambu Lab printers to a print farm control plane
//!
//! Runs the fleet reconciler, or talks to a single printer for diagnostics.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::prelude::{Engine, BASE64_STANDARD};
use clap::{Parser, Subcommand};
use printbridge_device::{Capabilities, DeviceConfig, DeviceSession, SessionHooks};
use printbridge_fleet::{BridgeConfig, HttpControlPlane, MqttSessionFactory, Reconciler};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// How long `snapshot` waits for the printer to report its model.
const MODEL_DETECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Parser)]
#[command(name = "printbridge")]
#[command(about = "Bridge Bambu Lab printers to a print farm control plane", long_about = None)]
struct Cli {
    /// Configuration file (default: printbridge.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Control plane API key, overriding the configuration file
    #[arg(long, global = true, env = "PRINTBRIDGE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge until interrupted
    Run,
    /// Capture one camera image from a printer
    Snapshot {
        /// Printer address
        #[arg(long)]
        host: String,
        /// LAN access code
        #[arg(long)]
        access_code: String,
        /// Printer serial number, needed to detect the model
        #[arg(long, default_value = "")]
        serial: String,
        /// Printer model (e.g. X1C, P1S); detected when omitted
        #[arg(long)]
        model: Option<String>,
        /// Output file
        #[arg(short, long, default_value = "snapshot.jpg")]
        output: PathBuf,
    },
    /// Print the effective configuration and check it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(api_key) = cli.api_key {
        config.control_plane.api_key = api_key;
    }

    match cli.command {
        Some(Commands::Run) | None => run_bridge(config).await?,
        Some(Commands::Snapshot {
            host,
            access_code,
            serial,
            model,
            output,
        }) => {
            let mut device = DeviceConfig::new(host, serial, access_code);
            if let Some(model) = model {
                device = device.with_model_hint(model);
            }
            snapshot(device, config, &output).await?;
        }
        Some(Commands::CheckConfig) => check_config(&config)?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!(
            "printbridge={level},printbridge_device={level},printbridge_fleet={level}"
        ))?,
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<BridgeConfig> {
    let config = match path {
        Some(path) => BridgeConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BridgeConfig::load()?,
    };
    Ok(config)
}

async fn run_bridge(config: BridgeConfig) -> Result<()> {
    config.validate()?;

    info!(control_plane = %config.control_plane.base_url, "printbridge starting");

    let control = Arc::new(HttpControlPlane::new(&config.control_plane)?);
    let factory = Arc::new(MqttSessionFactory::new(Capabilities::new(config.device)));
    let reconciler = Reconciler::new(control, factory, config.fleet);

    reconciler
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
        })
        .await;

    Ok(())
}

async fn snapshot(device: DeviceConfig, config: BridgeConfig, output: &Path) -> Result<()> {
    let session = DeviceSession::connect(device, Capabilities::new(config.device), SessionHooks::noop());

    let deadline = tokio::time::Instant::now() + MODEL_DETECT_TIMEOUT;
    while session.model().is_none() {
        if tokio::time::Instant::now() >= deadline {
            session.finish();
            anyhow::bail!("printer model not detected; pass --model");
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let image = session.current_image().await;
    session.finish();

    let image = image?.context("no camera image available")?;
    let bytes = BASE64_STANDARD.decode(image)?;
    std::fs::write(output, &bytes)
        .with_context(|| format!("writing {}", output.display()))?;

    println!("Saved {} bytes to {}", bytes.len(), output.display());
    Ok(())
}

fn check_config(config: &BridgeConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    config.validate()?;
    println!("Configuration OK");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_snapshot() {
        let cli = Cli::try_parse_from([
            "printbridge",
            "snapshot",
            "--host",
            "10.0.0.5",
            "--access-code",
            "12345678",
            "--model",
            "P1S",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Snapshot {
                host,
                model,
                output,
                ..
            }) => {
                assert_eq!(host, "10.0.0.5");
                assert_eq!(model.as_deref(), Some("P1S"));
                assert_eq!(output, PathBuf::from("snapshot.jpg"));
            }
            _ => panic!("expected snapshot command"),
        }
    }

    #[test]
    fn test_default_command_runs_bridge() {
        let cli = Cli::try_parse_from(["printbridge", "--verbose"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.verbose);
    }
}
