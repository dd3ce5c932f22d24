//! podrelay CLI - forward a local port to a host only reachable from inside a cluster
//!
//! Schedules a short-lived `socat` relay pod, tunnels to it through the API
//! server's port-forward endpoint and removes the pod again on exit.

use anyhow::{Context, Result};
use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use podrelay_lib::{ForwardSpec, Forwarder, ForwarderConfig, PollConfig};
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// podrelay - reach cluster-internal hosts through an ephemeral relay pod
#[derive(Parser, Debug)]
#[command(name = "podrelay")]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
#[command(long_about = r#"
Forward a local port to REMOTE_HOST:REMOTE_PORT as seen from inside the
cluster. A relay pod running socat is created for the session and deleted
when the session ends.

EXAMPLES:
  # Reach a database only visible from the cluster network
  podrelay 10.0.0.5 5432 --local-port 15432

  # Let the OS pick the local port, relay exits on its own after 10 minutes
  podrelay db.internal 5432 --timeout 600

  # Use a specific kube context and namespace
  podrelay redis.cache.svc 6379 --context staging -n tools

ENVIRONMENT VARIABLES:
  PODRELAY_LOCAL_PORT      Local port to listen on (0 = pick one)
  PODRELAY_TIMEOUT         Relay self-termination timeout in seconds
  PODRELAY_NAMESPACE       Namespace for the relay pod
  PODRELAY_CONTEXT         Kubeconfig context
  PODRELAY_KUBECONFIG      Kubeconfig file
  PODRELAY_IMAGE           Relay container image
  PODRELAY_LISTEN_ADDRESS  Local address to bind
  PODRELAY_LOG_LEVEL       Log level
"#)]
struct Args {
    /// Host to connect to from inside the cluster
    remote_host: String,

    /// Port on the remote host
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    remote_port: u16,

    /// Local port to listen on (0 lets the OS choose)
    #[arg(short = 'l', long, env = "PODRELAY_LOCAL_PORT", default_value_t = 0)]
    local_port: u16,

    /// Relay pod exits on its own after this many seconds
    #[arg(short = 't', long, env = "PODRELAY_TIMEOUT", value_name = "SECS")]
    timeout: Option<u64>,

    /// Namespace for the relay pod (defaults to the kube context's namespace)
    #[arg(short = 'n', long, env = "PODRELAY_NAMESPACE")]
    namespace: Option<String>,

    /// Kubeconfig context to use
    #[arg(long, env = "PODRELAY_CONTEXT")]
    context: Option<String>,

    /// Kubeconfig file (defaults to KUBECONFIG or ~/.kube/config)
    #[arg(long, env = "PODRELAY_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Relay container image (must provide socat and timeout)
    #[arg(long, env = "PODRELAY_IMAGE")]
    image: Option<String>,

    /// Local address to bind
    #[arg(long, env = "PODRELAY_LISTEN_ADDRESS")]
    listen_address: Option<IpAddr>,

    /// Seconds between relay pod status checks
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval: Option<u64>,

    /// Seconds to wait for the relay pod to start running
    #[arg(long, value_name = "SECS")]
    max_wait: Option<u64>,

    /// Leave the relay pod behind when the session ends
    #[arg(long)]
    keep_workload: bool,

    /// Configuration file (YAML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "PODRELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Configuration file format. Every field is optional; flags win.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    namespace: Option<String>,
    context: Option<String>,
    kubeconfig: Option<PathBuf>,
    image: Option<String>,
    listen_address: Option<IpAddr>,
    poll: Option<PollConfig>,
    delete_on_exit: Option<bool>,
}

/// Setup logging with the specified log level
fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

/// Read a YAML config file. A blank file means no settings.
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read config file {}", path.display()))?;
    parse_config(&text).with_context(|| format!("Invalid config file {}", path.display()))
}

fn parse_config(text: &str) -> Result<ConfigFile> {
    if text.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    Ok(serde_yaml::from_str(text)?)
}

/// Merge CLI args with config file, giving precedence to CLI args.
/// `context_namespace` is the kubeconfig context's namespace, the last resort.
fn build_forwarder_config(
    args: &Args,
    file: &ConfigFile,
    context_namespace: &str,
) -> ForwarderConfig {
    let defaults = ForwarderConfig::default();

    let mut poll = file.poll.unwrap_or(defaults.poll);
    if let Some(secs) = args.poll_interval {
        poll.interval = Duration::from_secs(secs);
    }
    if let Some(secs) = args.max_wait {
        poll.max_wait = Duration::from_secs(secs);
    }

    let namespace = args
        .namespace
        .clone()
        .or_else(|| file.namespace.clone())
        .unwrap_or_else(|| context_namespace.to_string());

    ForwarderConfig {
        namespace,
        image: args
            .image
            .clone()
            .or_else(|| file.image.clone())
            .unwrap_or(defaults.image),
        listen_address: args
            .listen_address
            .or(file.listen_address)
            .unwrap_or(defaults.listen_address),
        poll,
        delete_on_exit: !args.keep_workload && file.delete_on_exit.unwrap_or(true),
    }
}

fn build_spec(args: &Args) -> ForwardSpec {
    let spec = ForwardSpec::new(args.remote_host.clone(), args.remote_port)
        .with_local_port(args.local_port);
    match args.timeout {
        Some(secs) => spec.with_timeout(Duration::from_secs(secs)),
        None => spec,
    }
}

/// Build a kube client and return it with the context's default namespace
async fn kube_client(
    kubeconfig: Option<&Path>,
    context: Option<String>,
) -> Result<(kube::Client, String)> {
    let options = KubeConfigOptions {
        context,
        ..Default::default()
    };

    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig: {}", path.display()))?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .context("Failed to load kubeconfig")?
        }
        None if options.context.is_some() => kube::Config::from_kubeconfig(&options)
            .await
            .context("Failed to load kubeconfig context")?,
        None => kube::Config::infer()
            .await
            .context("Failed to infer cluster configuration")?,
    };

    let namespace = config.default_namespace.clone();
    let client = kube::Client::try_from(config).context("Failed to create cluster client")?;
    Ok((client, namespace))
}

/// Cancel `cancel` on SIGINT or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                _ = sigint.recv() => info!("Received Ctrl+C, shutting down..."),
            }
            cancel.cancel();
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, shutting down..."),
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
            cancel.cancel();
        });
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level)?;

    // kube's rustls stack needs a process-wide crypto provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    let file = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            load_config_file(path)?
        }
        None => ConfigFile::default(),
    };

    let kubeconfig = args.kubeconfig.clone().or_else(|| file.kubeconfig.clone());
    let context = args.context.clone().or_else(|| file.context.clone());
    let (client, context_namespace) = kube_client(kubeconfig.as_deref(), context).await?;

    let config = build_forwarder_config(&args, &file, &context_namespace);
    let spec = build_spec(&args);

    info!("Namespace: {}", config.namespace);
    info!("Relay image: {}", config.image);
    info!("Target: {}", spec.remote_address());
    if !config.delete_on_exit {
        match spec.timeout {
            Some(limit) => warn!("Relay pod will be kept; it exits on its own after {:?}", limit),
            None => warn!("Relay pod will be kept and has no timeout; delete it by hand"),
        }
    }

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone())?;

    let forwarder = Forwarder::from_client(config, client);
    match forwarder.forward(cancel, spec).await {
        Ok(()) => {
            info!("podrelay stopped");
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            info!("Cancelled before forwarding started");
            Ok(())
        }
        Err(e) => {
            error!("Port forward failed: {}", e);
            Err(e).context("Port forward failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["podrelay", "10.0.0.5", "8080"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults_without_file() {
        let config = build_forwarder_config(&args(&[]), &ConfigFile::default(), "team-a");

        assert_eq!(config.namespace, "team-a");
        assert_eq!(config.image, "alpine/socat");
        assert_eq!(config.poll, PollConfig::default());
        assert!(config.delete_on_exit);
    }

    #[test]
    fn test_flags_override_file() {
        let yaml = "namespace: from-file\n\
                    image: registry.local/socat\n\
                    poll:\n  interval: 5\n  max_wait: 300\n";
        let file: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        let args = args(&["-n", "from-flag", "--poll-interval", "2"]);

        let config = build_forwarder_config(&args, &file, "team-a");

        assert_eq!(config.namespace, "from-flag");
        assert_eq!(config.image, "registry.local/socat");
        assert_eq!(config.poll.interval, Duration::from_secs(2));
        assert_eq!(config.poll.max_wait, Duration::from_secs(300));
    }

    #[test]
    fn test_keep_workload_flag() {
        let config =
            build_forwarder_config(&args(&["--keep-workload"]), &ConfigFile::default(), "default");
        assert!(!config.delete_on_exit);
    }

    #[test]
    fn test_spec_from_args() {
        let spec = build_spec(&args(&["--local-port", "15432", "--timeout", "600"]));

        assert_eq!(spec.remote_host, "10.0.0.5");
        assert_eq!(spec.remote_port, 8080);
        assert_eq!(spec.local_port, 15432);
        assert_eq!(spec.timeout, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_blank_config_file_means_defaults() {
        let file = parse_config("\n  \n").unwrap();
        assert!(file.namespace.is_none());
        assert!(file.poll.is_none());
    }

    #[test]
    fn test_remote_port_zero_is_rejected() {
        assert!(Args::try_parse_from(["podrelay", "10.0.0.5", "0"]).is_err());
    }

    #[test]
    fn test_unknown_config_keys_are_rejected() {
        assert!(serde_yaml::from_str::<ConfigFile>("namespce: typo\n").is_err());
    }
}
