//! dfsfleet CLI - compute replica server and streaming request driver.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use dfsfleet::compute::{ExecutionLog, ProcessAdapter};
use dfsfleet::config::{self, Config};
use dfsfleet::dispatch::{FailoverDispatcher, ReplicaSet};
use dfsfleet::generator::{RequestEvent, RequestGenerator, RequestTemplate};
use dfsfleet::pipeline::Pipeline;
use dfsfleet::report::{ConsoleRecorder, CsvRecorder, MultiRecorder};
use dfsfleet::transport::{ComputeServer, TcpTransport};

const DEFAULT_CONFIG: &str = "dfsfleet.toml";

#[derive(Parser)]
#[command(name = "dfsfleet")]
#[command(about = "Fault-tolerant graph-search dispatcher and compute replica", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path (default: ./dfsfleet.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a compute replica
    Serve {
        /// Listen address
        #[arg(short, long)]
        listen: Option<String>,

        /// Search executable (may include arguments)
        #[arg(long)]
        executable: Option<String>,

        /// Run the executable under the parallel launcher
        #[arg(long)]
        distributed: bool,

        /// Parallel processes requested from the launcher
        #[arg(long)]
        np: Option<u32>,

        /// Hard execution timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Maximum concurrent executions
        #[arg(long)]
        max_workers: Option<usize>,

        /// Execution log path
        #[arg(long)]
        log_file: Option<PathBuf>,
    },

    /// Stream requests to the replicas at a fixed rate
    Stream {
        #[command(flatten)]
        dispatch: DispatchArgs,

        /// Requests per second
        #[arg(short, long)]
        rate: Option<f64>,

        /// Run duration in seconds
        #[arg(short, long)]
        duration: Option<u64>,

        /// CSV event log path
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Maximum dispatches in flight (1 = synchronous)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Print statistics every N events
        #[arg(long)]
        report_every: Option<u64>,

        /// Disable the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Dispatch a single request and print the result as JSON
    Call {
        #[command(flatten)]
        dispatch: DispatchArgs,

        /// Request id (selects the first replica probed)
        #[arg(long, default_value_t = 0)]
        request_id: u64,
    },

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        output: PathBuf,
    },
}

/// Overrides shared by the dispatching commands.
#[derive(Args)]
struct DispatchArgs {
    /// Comma-separated replica addresses
    #[arg(long, value_delimiter = ',')]
    replicas: Option<Vec<String>>,

    /// Per-call timeout in seconds
    #[arg(long)]
    per_call_timeout: Option<u64>,

    /// Target vertex
    #[arg(long)]
    target: Option<u64>,

    /// Number of vertices in the graph
    #[arg(long)]
    vertices: Option<u64>,
}

impl DispatchArgs {
    fn apply(self, config: &mut Config) {
        if let Some(replicas) = self.replicas {
            config.dispatch.replicas = replicas;
        }
        if let Some(timeout) = self.per_call_timeout {
            config.dispatch.per_call_timeout_secs = timeout;
        }
        if let Some(target) = self.target {
            config.generator.target_vertex = Some(target);
        }
        if let Some(vertices) = self.vertices {
            config.generator.vertex_count = Some(vertices);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve {
            listen,
            executable,
            distributed,
            np,
            timeout,
            max_workers,
            log_file,
        } => {
            let mut config = resolve_config(cli.config.as_deref())?;
            let compute = &mut config.compute;
            if let Some(listen) = listen {
                compute.listen = listen;
            }
            if let Some(executable) = executable {
                compute.executable = executable;
            }
            if distributed {
                compute.distributed = true;
            }
            if let Some(np) = np {
                compute.parallel_processes = np;
            }
            if let Some(timeout) = timeout {
                compute.timeout_secs = timeout;
            }
            if let Some(max_workers) = max_workers {
                compute.max_workers = max_workers;
            }
            if let Some(log_file) = log_file {
                compute.log_file = Some(log_file);
            }
            serve(config).await
        }
        Commands::Stream {
            dispatch,
            rate,
            duration,
            log_file,
            concurrency,
            report_every,
            no_progress,
        } => {
            let mut config = resolve_config(cli.config.as_deref())?;
            dispatch.apply(&mut config);
            if let Some(rate) = rate {
                config.generator.requests_per_second = rate;
            }
            if let Some(duration) = duration {
                config.generator.duration_secs = duration;
            }
            if let Some(log_file) = log_file {
                config.report.log_file = log_file;
            }
            if let Some(concurrency) = concurrency {
                config.dispatch.max_in_flight = concurrency;
            }
            if report_every.is_some() {
                config.report.report_every = report_every;
            }
            if no_progress {
                config.report.progress = false;
            }
            stream(config).await
        }
        Commands::Call {
            dispatch,
            request_id,
        } => {
            let mut config = resolve_config(cli.config.as_deref())?;
            dispatch.apply(&mut config);
            call(config, request_id).await
        }
        Commands::Validate => validate_config(cli.config.as_deref()),
        Commands::Init { output } => init_config(&output),
    }
}

/// Loads the given file, else `./dfsfleet.toml` if it exists, else defaults.
fn resolve_config(path: Option<&Path>) -> Result<Config> {
    let path = path.map(Path::to_path_buf).or_else(|| {
        let default = PathBuf::from(DEFAULT_CONFIG);
        default.exists().then_some(default)
    });

    let config = config::load_or_default(path.as_deref())?;
    if let Some(path) = &path {
        info!("Loaded configuration from {}", path.display());
    }
    Ok(config)
}

fn shutdown_on_ctrl_c(message: &'static str) -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("{}", message);
            trigger.cancel();
        }
    });
    token
}

async fn serve(config: Config) -> Result<()> {
    config.validate()?;
    let compute = config.compute;

    let mut adapter = ProcessAdapter::new(compute.clone());
    if let Some(path) = &compute.log_file {
        adapter = adapter.with_log(ExecutionLog::open(path)?);
    }

    let server = ComputeServer::bind(&compute.listen, adapter, compute.max_workers).await?;
    let addr = server.local_addr()?;
    info!(
        %addr,
        executable = %compute.executable,
        distributed = compute.distributed,
        parallel_processes = compute.parallel_processes,
        max_workers = compute.max_workers,
        "Compute replica ready"
    );

    server
        .serve(shutdown_on_ctrl_c("Shutting down compute replica"))
        .await
}

async fn stream(config: Config) -> Result<()> {
    config.validate()?;

    let replicas = ReplicaSet::from_addresses(&config.dispatch.replicas)?;
    let rate = config.generator.requests_per_second;

    let mut generator = RequestGenerator::new(
        rate,
        Duration::from_secs(config.generator.duration_secs),
    )
    .with_request_template(RequestTemplate::new(
        config.generator.target_vertex,
        config.generator.vertex_count,
    ));
    if let Some(floor) = config.generator.min_duration_secs {
        generator = generator.with_min_duration(Duration::from_secs(floor));
    }

    println!("Streaming configuration:");
    println!("  Replicas:         {}", config.dispatch.replicas.join(", "));
    println!(
        "  Request rate:     {} requests/s (one every {:.0}ms)",
        rate,
        generator.interval().as_secs_f64() * 1000.0
    );
    println!("  Duration:         {}s", generator.duration().as_secs());
    println!("  Expected events:  ~{}", generator.expected_events());
    println!("  Per-call timeout: {}s", config.dispatch.per_call_timeout_secs);
    println!("  Event log:        {}", config.report.log_file.display());
    println!();

    let csv = CsvRecorder::create(&config.report.log_file)?;
    let console = ConsoleRecorder::new(
        config
            .report
            .progress
            .then(|| generator.expected_events()),
    );
    let recorder = Arc::new(MultiRecorder::new().with_recorder(csv).with_recorder(console));

    let dispatcher = FailoverDispatcher::new(
        replicas,
        TcpTransport::new(),
        Duration::from_secs(config.dispatch.per_call_timeout_secs),
    )
    .with_distributed_hint(config.generator.use_distributed_hint);

    let report_every = config
        .report
        .report_every
        .unwrap_or_else(|| (rate * 2.0).ceil().max(1.0) as u64);

    let pipeline = Pipeline::new(dispatcher, recorder)
        .with_max_in_flight(config.dispatch.max_in_flight)
        .with_report_every(report_every)
        .with_log_file(config.report.log_file.clone());

    let cancel = shutdown_on_ctrl_c("Stream interrupted");
    pipeline.run(&mut generator, &cancel).await;

    // Individual dispatch failures do not fail the run.
    Ok(())
}

async fn call(config: Config, request_id: u64) -> Result<()> {
    let replicas = ReplicaSet::from_addresses(&config.dispatch.replicas)?;
    let dispatcher = FailoverDispatcher::new(
        replicas,
        TcpTransport::new(),
        Duration::from_secs(config.dispatch.per_call_timeout_secs),
    )
    .with_distributed_hint(config.generator.use_distributed_hint);

    let event = RequestEvent::new(request_id)
        .with_request(config.generator.target_vertex, config.generator.vertex_count);
    let result = dispatcher.dispatch(&event).await;

    let json = serde_json::to_string_pretty(&result)?;
    println!("{}", json);

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let loaded = resolve_config(path).and_then(|config| config.validate().map(|_| config));
    match loaded {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("Dispatch:");
            println!("  Replicas: {}", config.dispatch.replicas.join(", "));
            println!("  Per-call timeout: {}s", config.dispatch.per_call_timeout_secs);
            println!("  Max in flight: {}", config.dispatch.max_in_flight);
            println!("Generator:");
            println!("  Rate: {} requests/s", config.generator.requests_per_second);
            println!(
                "  Duration: {}s",
                config.generator.effective_duration_secs()
            );
            println!("Report:");
            println!("  Event log: {}", config.report.log_file.display());
            println!("Compute:");
            println!("  Listen: {}", config.compute.listen);
            println!("  Executable: {}", config.compute.executable);
            if config.compute.distributed {
                println!(
                    "  Launcher: {} -np {}",
                    config.compute.launcher, config.compute.parallel_processes
                );
            }
            println!("  Timeout: {}s", config.compute.timeout_secs);

            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_config(path: &Path) -> Result<()> {
    let config = r#"# dfsfleet configuration file

[dispatch]
replicas = ["localhost:50051", "localhost:50052"]
per_call_timeout_secs = 3
# 1 dispatches each request to completion before generating the next
max_in_flight = 1

[generator]
requests_per_second = 10.0
duration_secs = 60
target_vertex = 42000
vertex_count = 50000
use_distributed_hint = true

[report]
log_file = "streaming_events.csv"
progress = true

[compute]
listen = "0.0.0.0:50051"
executable = "../MPI_DFS.exe"
distributed = false
launcher = "mpirun"
parallel_processes = 4
timeout_secs = 120
max_workers = 10
log_file = "server.log"
"#;

    if path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit manually.",
            path.display()
        );
        std::process::exit(1);
    }

    std::fs::write(path, config)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Created {}", path.display());
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  dfsfleet serve            # on each replica");
    println!("  dfsfleet stream           # on the driver");

    Ok(())
}
