use std::path::PathBuf;
use std::time::Duration;

use adrules_core::logging;
use clap::{Args, Parser, Subcommand};

mod output;
mod server;

use server::ServeOptions;

#[derive(Parser)]
#[command(name = "adrules")]
#[command(about = "AdRules - campaign automation rule engine", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, env = "ADRULES_LOG_LEVEL", default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the rules API, the dispatcher and the worker pool
    Serve(ServeArgs),
    /// List the rule templates available for instantiation
    Templates {
        /// Directory or file with extra templates (defaults to the built-in set)
        #[arg(long, env = "ADRULES_TEMPLATES")]
        templates: Option<PathBuf>,
    },
    /// Check a rule or template file without saving anything
    Validate {
        /// YAML or JSON file holding a rule draft or a template document
        file: PathBuf,
    },
    /// Show version information
    Version,
}

#[derive(Args)]
struct ServeArgs {
    /// Address the HTTP API binds to
    #[arg(long, env = "ADRULES_HTTP_BIND", default_value = "0.0.0.0:8090")]
    bind: String,
    /// Run against the in-process simulated ad platform
    #[arg(long, default_value_t = false)]
    simulate: bool,
    /// JSON file with entities and snapshots to seed the simulator
    #[arg(long, requires = "simulate")]
    seed: Option<PathBuf>,
    /// Directory or file with extra templates (defaults to the built-in set)
    #[arg(long, env = "ADRULES_TEMPLATES")]
    templates: Option<PathBuf>,
    /// Number of evaluation workers
    #[arg(long, env = "ADRULES_WORKERS")]
    workers: Option<usize>,
    /// Base URL of the ad-platform connector service
    #[arg(long, env = "ADRULES_CONNECTOR_URL")]
    connector_url: Option<String>,
    /// Webhook receiving NOTIFICATION deliveries
    #[arg(long, env = "ADRULES_NOTIFICATION_WEBHOOK")]
    notification_webhook: Option<String>,
    /// Poll period for SCHEDULE rules, in seconds
    #[arg(long, env = "ADRULES_SCHEDULE_INTERVAL_SECS")]
    schedule_interval: Option<u64>,
    /// Fallback poll period for TRIGGER rules, in seconds
    #[arg(long, env = "ADRULES_TRIGGER_INTERVAL_SECS")]
    trigger_interval: Option<u64>,
}

impl ServeArgs {
    fn into_options(self) -> ServeOptions {
        ServeOptions {
            bind: self.bind,
            simulate: self.simulate,
            seed: self.seed,
            templates: self.templates,
            workers: self.workers,
            connector_url: self.connector_url,
            notification_webhook: self.notification_webhook,
            schedule_interval: self.schedule_interval.map(Duration::from_secs),
            trigger_interval: self.trigger_interval.map(Duration::from_secs),
        }
    }
}

fn tracing_init_warning(err: &dyn std::fmt::Display) -> String {
    format!("warning: failed to initialise tracing: {err}")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(err) = logging::init_tracing(Some(&cli.log_level)) {
        eprintln!("{}", tracing_init_warning(&err));
    }

    match cli.command {
        Commands::Serve(args) => server::serve(args.into_options()).await,
        Commands::Templates { templates } => {
            let catalog = output::load_catalog(templates.as_deref())?;
            output::print_templates(&catalog);
            Ok(())
        }
        Commands::Validate { file } => {
            let report = output::validate_file(&file)?;
            output::print_validation(&file, &report);
            if report.is_valid() {
                Ok(())
            } else {
                std::process::exit(1);
            }
        }
        Commands::Version => {
            println!("AdRules v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
