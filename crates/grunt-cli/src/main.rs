mod output;
mod routines;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use grunt_client::{enqueue_routine, HttpTransport, LifecycleClient, RetryPolicy};
use grunt_core::Device;
use grunt_worker::{
    capabilities::register_builtins, CapabilityRegistry, GruntConfig, LoggingConfig, Worker,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "grunt")]
#[command(about = "Worker for a coordinator-backed task queue", long_about = None)]
struct Args {
    /// Configuration file (toml, yaml or json)
    #[arg(short, long, global = true, env = "GRUNT_CONFIG")]
    config: Option<PathBuf>,

    /// Coordinator host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Coordinator port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Log level or filter directive (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pull and run tasks until the runtime budget expires or Ctrl-C
    Work {
        /// Device class to claim tasks for
        #[arg(short, long)]
        device: Option<Device>,

        /// Idle poll interval in seconds
        #[arg(short, long)]
        poll: Option<f64>,

        /// Maximum runtime in seconds
        #[arg(short, long)]
        runtime: Option<f64>,

        /// Worker name prefix; the process id is appended
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Submit a routine declared in <routines-dir>/<routine>.yaml
    Enqueue {
        routine: String,

        #[arg(long, default_value = "routines")]
        routines_dir: PathBuf,
    },

    /// List every task known to the coordinator
    Tasks {
        #[arg(short, long, value_enum, default_value_t = Format::Table)]
        format: Format,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Table,
    Json,
    Yaml,
}

impl Args {
    fn apply(&self, config: &mut GruntConfig) {
        if let Some(host) = &self.host {
            config.coordinator.host = host.clone();
        }
        if let Some(port) = self.port {
            config.coordinator.port = port;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json = true;
        }

        if let Commands::Work {
            device,
            poll,
            runtime,
            name,
        } = &self.command
        {
            if let Some(device) = device {
                config.worker.device = *device;
            }
            if let Some(poll) = poll {
                config.worker.poll_interval_secs = *poll;
            }
            if runtime.is_some() {
                config.worker.runtime_budget_secs = *runtime;
            }
            if let Some(name) = name {
                config.worker.name_prefix = name.clone();
            }
        }
    }
}

fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .with_context(|| format!("Invalid log level '{}'", logging.level))?;

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = GruntConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;
    init_logging(&config.logging)?;

    let coordinator = &config.coordinator;
    let policy = RetryPolicy::new(coordinator.max_retries, coordinator.base_delay());
    let transport = HttpTransport::new(coordinator.base_url(), policy)
        .with_timeout(coordinator.request_timeout());
    let client = LifecycleClient::new(Arc::new(transport));

    let result = run(args.command, &config, client.clone()).await;
    client.shutdown().await;
    result
}

async fn run(
    command: Commands,
    config: &GruntConfig,
    client: LifecycleClient,
) -> anyhow::Result<()> {
    match command {
        Commands::Work { .. } => {
            let registry = CapabilityRegistry::new();
            register_builtins(&registry)?;
            tracing::info!(capabilities = ?registry.names(), "Registered capabilities");

            let worker = Worker::new(client, Arc::new(registry), &config.worker)?;

            println!("GRUNT WORKER");
            println!("Reporting: {}", worker.identity());
            println!("Coordinator: {}", config.coordinator.base_url());
            println!("Assigned to: {}\n", worker.device().as_str().to_uppercase());

            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Received shutdown signal, finishing current task");
                    trigger.cancel();
                }
            });

            let summary = worker.run(shutdown).await;
            println!(
                "Stopped ({:?}): {} completed, {} failed over {} polls",
                summary.stop_reason, summary.completed, summary.failed, summary.iterations
            );
        }

        Commands::Enqueue {
            routine,
            routines_dir,
        } => {
            let tasks = routines::load_routine(&routines_dir, &routine)?;
            let submission = enqueue_routine(&client, &routine, &tasks).await?;

            println!(
                "Routine '{}' enqueued as {} with {} tasks",
                submission.routine(),
                submission.routine_id(),
                submission.len()
            );
            if !submission.is_empty() {
                println!("{}", output::submission_table(&submission));
            }
        }

        Commands::Tasks { format } => {
            let tasks = client.all_tasks().await?;
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&tasks)?),
                Format::Yaml => println!("{}", serde_yaml::to_string(&tasks)?),
                Format::Table => println!("{}", output::tasks_table(&tasks)),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags_override_config() {
        let args = Args::parse_from([
            "grunt",
            "--host",
            "queue.internal",
            "--json-logs",
            "work",
            "--device",
            "gpu",
            "--poll",
            "0.5",
            "--runtime",
            "60",
            "--name",
            "builder",
        ]);

        let mut config = GruntConfig::default();
        args.apply(&mut config);

        assert_eq!(config.coordinator.host, "queue.internal");
        assert_eq!(config.coordinator.port, 8000);
        assert!(config.logging.json);
        assert_eq!(config.worker.device, Device::Gpu);
        assert_eq!(config.worker.poll_interval_secs, 0.5);
        assert_eq!(config.worker.runtime_budget_secs, Some(60.0));
        assert_eq!(config.worker.name_prefix, "builder");
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from(["grunt", "tasks", "--format", "json", "--port", "9000"]);
        let mut config = GruntConfig::default();
        args.apply(&mut config);

        assert_eq!(config.coordinator.port, 9000);
        assert!(matches!(args.command, Commands::Tasks { format: Format::Json }));
    }

    #[test]
    fn test_unknown_device_is_rejected() {
        assert!(Args::try_parse_from(["grunt", "work", "--device", "tpu"]).is_err());
    }

    #[test]
    fn test_enqueue_defaults() {
        let args = Args::parse_from(["grunt", "enqueue", "nightly"]);
        match args.command {
            Commands::Enqueue {
                routine,
                routines_dir,
            } => {
                assert_eq!(routine, "nightly");
                assert_eq!(routines_dir, PathBuf::from("routines"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_clap_definition() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
