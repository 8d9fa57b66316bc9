use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tunegate::simulate::{
    self, MockBackend, ReweightJobRunner, SimulationOptions, SimulationReport,
};
use tunegate::{metrics, Gateway, GatewayConfig};
use tunegate_inference_log::{EntryKind, InMemoryInferenceLog, InferenceLog, LogFilter};
use tunegate_optimizer::{OptimizationTarget, TriggerPolicy};
use tunegate_variant_registry::{load_routing_config, RegistrySnapshot, VariantStatus};

#[derive(Parser)]
#[command(name = "tunegate")]
#[command(about = "Adaptive inference routing and online learning engine")]
#[command(version)]
struct Cli {
    /// Gateway configuration file (YAML, TOML or JSON)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset; overrides logging.level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable debug mode
    #[arg(short, long)]
    debug: bool,

    /// Output format
    #[arg(short, long, default_value = "human")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a routing file and print its functions
    CheckConfig(CheckConfigArgs),
    /// Run synthetic traffic with feedback through a mock backend
    Simulate(SimulateArgs),
    /// Export logged inferences and feedback in a time range from the cold sink
    Export(ExportArgs),
    /// Print the Prometheus exposition of a freshly built gateway
    Metrics,
}

#[derive(Args)]
struct CheckConfigArgs {
    /// Routing YAML
    routing: PathBuf,
}

#[derive(Args)]
struct SimulateArgs {
    /// Number of requests
    #[arg(long, default_value_t = 1_000)]
    requests: usize,

    /// Seed for traffic, backend answers and the weighted sampler
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Concurrent request workers
    #[arg(long, default_value_t = 8)]
    concurrency: usize,

    /// Function receiving the traffic
    #[arg(long, default_value = "classify_intent")]
    function: String,

    /// Print Prometheus metrics after the run
    #[arg(long)]
    metrics: bool,

    /// Also export everything logged during the run to this file
    #[arg(long, value_name = "FILE")]
    export: Option<PathBuf>,
}

#[derive(Args)]
struct ExportArgs {
    /// Range start (RFC 3339)
    #[arg(long)]
    from: String,

    /// Range end (RFC 3339)
    #[arg(long)]
    to: String,

    /// Output file
    #[arg(long)]
    out: PathBuf,

    /// Cold sink root; defaults to log.cold.root from the configuration
    #[arg(long)]
    root: Option<PathBuf>,

    /// Only export this entry kind
    #[arg(long, value_enum)]
    kind: Option<ExportKind>,

    /// Only export inferences of this function, plus the feedback on them
    #[arg(long)]
    function: Option<String>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum ExportKind {
    Inference,
    Feedback,
}

impl ExportArgs {
    fn filter(&self) -> Option<LogFilter> {
        if self.kind.is_none() && self.function.is_none() {
            return None;
        }
        Some(LogFilter {
            kinds: self.kind.map(|kind| {
                vec![match kind {
                    ExportKind::Inference => EntryKind::Inference,
                    ExportKind::Feedback => EntryKind::Feedback,
                }]
            }),
            function: self.function.clone(),
            ..LogFilter::default()
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config =
        GatewayConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level, cli.debug, config.logging.json)?;

    info!("Starting tunegate v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::CheckConfig(args) => cmd_check_config(args, cli.output),
        Commands::Simulate(args) => cmd_simulate(args, config, cli.output).await,
        Commands::Export(args) => cmd_export(args, config).await,
        Commands::Metrics => cmd_metrics(config).await,
    }
}

fn init_logging(level: &str, debug: bool, json: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

#[derive(Serialize)]
struct FunctionSummary {
    function: String,
    variants: Vec<VariantSummaryRow>,
}

#[derive(Serialize)]
struct VariantSummaryRow {
    name: String,
    backend_ref: String,
    weight: f64,
    share: f64,
    status: VariantStatus,
    retrieval_augmented: bool,
}

fn summarize(snapshot: &RegistrySnapshot) -> Vec<FunctionSummary> {
    snapshot
        .functions
        .iter()
        .map(|(function, variants)| {
            let total = variants.active_weight();
            FunctionSummary {
                function: function.clone(),
                variants: variants
                    .variants
                    .values()
                    .map(|v| VariantSummaryRow {
                        name: v.name.clone(),
                        backend_ref: v.backend_ref.clone(),
                        weight: v.weight,
                        share: if v.is_active() && total > 0.0 {
                            v.weight / total
                        } else {
                            0.0
                        },
                        status: v.status,
                        retrieval_augmented: v.retrieval_augmented,
                    })
                    .collect(),
            }
        })
        .collect()
}

fn cmd_check_config(args: CheckConfigArgs, output: OutputFormat) -> Result<()> {
    let snapshot = load_routing_config(Some(args.routing.as_path()))
        .with_context(|| format!("Failed to load {}", args.routing.display()))?;
    snapshot
        .validate()
        .with_context(|| format!("{} is not a valid routing file", args.routing.display()))?;
    let summary = summarize(&snapshot);
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Human => {
            println!("{} is valid", args.routing.display());
            for function in &summary {
                println!("  {}", function.function);
                for v in &function.variants {
                    println!(
                        "    {:<16} {:<12} weight {:>6.3} ({:>5.1}%) {:?}{}",
                        v.name,
                        v.backend_ref,
                        v.weight,
                        v.share * 100.0,
                        v.status,
                        if v.retrieval_augmented { " +retrieval" } else { "" }
                    );
                }
            }
        }
    }
    Ok(())
}

async fn cmd_simulate(
    args: SimulateArgs,
    mut config: GatewayConfig,
    output: OutputFormat,
) -> Result<()> {
    if config.router.sampler_seed.is_none() {
        config.router.sampler_seed = Some(args.seed);
    }
    let routing = routing_or_demo(&config)?;
    if routing.function(&args.function).is_none() {
        bail!("function {} is not routed", args.function);
    }
    if !config
        .optimizer
        .targets
        .iter()
        .any(|target| target.function == args.function)
    {
        config.optimizer.targets.push(
            OptimizationTarget::new(
                &args.function,
                "intent_accuracy",
                TriggerPolicy::MeanBelow { target: 0.75 },
            )
            .with_min_samples(50),
        );
    }

    let runner = Arc::new(ReweightJobRunner::new());
    let gateway = Arc::new(Gateway::new(config, routing, runner.clone())?);
    runner.attach(gateway.feedback().clone());
    gateway.start();

    let started = Utc::now();
    let options = SimulationOptions {
        function: args.function.clone(),
        requests: args.requests,
        concurrency: args.concurrency,
        seed: args.seed,
        ..SimulationOptions::default()
    };
    let backend = Arc::new(MockBackend::new(args.seed));
    let report = simulate::run(gateway.clone(), backend, options).await?;

    if let Some(path) = &args.export {
        gateway
            .log()
            .export_range_to_file(started, Utc::now(), None, path)
            .await
            .with_context(|| format!("Failed to export to {}", path.display()))?;
        info!(path = %path.display(), "run exported");
    }
    metrics::refresh(&gateway);
    gateway.shutdown().await?;

    print_simulation(&report, output)?;
    if args.metrics {
        print!("{}", metrics::render()?);
    }
    Ok(())
}

fn print_simulation(report: &SimulationReport, output: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = output {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!(
        "requests {}  served {}  failed {}  feedback {}",
        report.requests, report.served, report.failed, report.feedback_applied
    );
    println!("served by variant:");
    for (variant, count) in &report.served_by_variant {
        println!("  {variant:<16} {count}");
    }
    for (metric, summaries) in &report.report.metrics {
        println!("{} / {metric}:", report.report.function);
        for s in summaries {
            println!(
                "  {:<16} n={:<6} mean={:<8} stderr={}",
                s.variant,
                s.count,
                s.mean.map_or("-".to_string(), |m| format!("{m:.3}")),
                s.std_error.map_or("-".to_string(), |e| format!("{e:.3}"))
            );
        }
    }
    println!("optimizer:");
    for state in &report.optimizer {
        println!(
            "  {:<32} {:?} last={} job={}",
            state.key.to_string(),
            state.phase,
            state
                .last_statistic
                .map_or("-".to_string(), |m| format!("{m:.3}")),
            state
                .last_job
                .as_ref()
                .map_or("-".to_string(), |j| j.to_string())
        );
    }
    println!("registry version {}", report.registry_version);
    Ok(())
}

async fn cmd_export(args: ExportArgs, mut config: GatewayConfig) -> Result<()> {
    let filter = args.filter();
    let from = chrono::DateTime::parse_from_rfc3339(&args.from)
        .map_err(|e| anyhow!("invalid --from timestamp: {e}"))?
        .with_timezone(&Utc);
    let to = chrono::DateTime::parse_from_rfc3339(&args.to)
        .map_err(|e| anyhow!("invalid --to timestamp: {e}"))?
        .with_timezone(&Utc);
    if to < from {
        bail!("--to must not be earlier than --from");
    }
    if let Some(root) = args.root {
        config.log.cold.root = root;
    }
    if !config.log.cold.root.exists() {
        bail!("cold sink root {} does not exist", config.log.cold.root.display());
    }
    config.log.cold.enabled = true;

    let log = InMemoryInferenceLog::new(config.log.clone());
    log.export_range_to_file(from, to, filter, &args.out)
        .await
        .with_context(|| format!("Failed to write {}", args.out.display()))?;
    println!("exported {} .. {} to {}", from, to, args.out.display());
    Ok(())
}

/// The configured routing file, or the bundled demo routing when none is set.
fn routing_or_demo(config: &GatewayConfig) -> Result<RegistrySnapshot> {
    match &config.routing_path {
        Some(path) => load_routing_config(Some(path.as_path()))
            .with_context(|| format!("Failed to load {}", path.display())),
        None => Ok(simulate::demo_routing()?),
    }
}

async fn cmd_metrics(config: GatewayConfig) -> Result<()> {
    let routing = routing_or_demo(&config)?;
    let runner = Arc::new(ReweightJobRunner::new());
    let gateway = Gateway::new(config, routing, runner.clone())?;
    runner.attach(gateway.feedback().clone());
    metrics::refresh(&gateway);
    print!("{}", metrics::render()?);
    Ok(())
}
