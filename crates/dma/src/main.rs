//! Database Migration Assessment CLI
//!
//! Collects metadata from a source database, checks it against the
//! readiness rules and tests network reachability from the migration target.

// CLI tool - relax pedantic lints for ergonomics
#![allow(clippy::pedantic)]

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use dma::collectors::snapshot::SnapshotCollector;
use dma::prober::{self, NetworkManagementProber};
use dma::report::write_collection;
use dma::session::Diagnostic;
use dma::wizard::{state_message, DialoguerPrompter, ParameterResolver, ProbeArgs, TerminalUi};
use dma::{
    AssessmentConfig, Collection, ConnectionArgs, EngineKind, Evaluator, OutputFormat,
    ProbeOperation, RetryConfig, Session, SessionOutcome,
};

#[derive(Parser)]
#[command(name = "dma")]
#[command(version)]
#[command(
    about = "Assess whether a source database is ready to migrate to a managed cloud database",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect metadata from a source database and save it
    CollectData {
        #[command(flatten)]
        connection: ConnectionFlags,

        #[command(flatten)]
        run: RunFlags,
    },

    /// Assess a source database and print the readiness report
    ReadinessCheck {
        #[command(flatten)]
        connection: ConnectionFlags,

        #[command(flatten)]
        run: RunFlags,

        /// Report format (table, json)
        #[arg(long, value_name = "FORMAT")]
        format: Option<OutputFormat>,

        /// Evaluate a collection document instead of connecting
        #[arg(long, value_name = "FILE")]
        from_collection: Option<PathBuf>,

        /// Evaluate rules in parallel
        #[arg(long)]
        parallel: bool,
    },

    /// Create, rerun or delete a reachability test from the target to the source
    ConnectivityCheck {
        /// Connectivity test id
        #[arg(long)]
        test_id: Option<String>,

        /// GCP project owning the test
        #[arg(long)]
        gcp_project: Option<String>,

        /// IP address of the migration target
        #[arg(long)]
        target_db_ip: Option<String>,

        /// IP address of the source database
        #[arg(long)]
        source_db_ip: Option<String>,

        /// Port of the source database
        #[arg(long)]
        source_db_port: Option<u16>,

        /// Operation (create, rerun, delete)
        #[arg(long, default_value = "create")]
        operation_type: ProbeOperation,

        /// OAuth access token for the network management API
        #[arg(long, env = "DMA_ACCESS_TOKEN", hide_env_values = true)]
        access_token: Option<String>,

        /// Do not ask for confirmation
        #[arg(long)]
        no_prompt: bool,
    },
}

#[derive(Args, Debug, Default)]
struct ConnectionFlags {
    /// Source database type (mysql, postgres, mssql, oracle)
    #[arg(long, value_name = "TYPE")]
    db_type: Option<EngineKind>,

    /// Database username
    #[arg(short, long)]
    username: Option<String>,

    /// Database password
    #[arg(long, env = "DMA_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Database hostname or IP address
    #[arg(short = 'H', long)]
    hostname: Option<String>,

    /// Database port (defaults to the engine's standard port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Database name
    #[arg(short, long)]
    database: Option<String>,

    /// Label for the collection and report files
    #[arg(short = 'i', long)]
    collection_identifier: Option<String>,
}

impl From<ConnectionFlags> for ConnectionArgs {
    fn from(flags: ConnectionFlags) -> Self {
        Self {
            db_type: flags.db_type,
            hostname: flags.hostname,
            port: flags.port,
            database: flags.database,
            username: flags.username,
            password: flags.password,
            collection_identifier: flags.collection_identifier,
        }
    }
}

#[derive(Args, Debug, Default)]
struct RunFlags {
    /// Do not ask for confirmation
    #[arg(long)]
    no_prompt: bool,

    /// Directory for collection, report and diagnostic files
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Deadline for connecting and collecting, in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("{} {e}", "Error:".red().bold());
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", "Error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so a JSON report on stdout stays parseable.
/// `DMA_LOG` overrides the level with a filter directive.
fn init_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_env("DMA_LOG")
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::CollectData { connection, run } => collect_data(config, connection, run).await,
        Commands::ReadinessCheck {
            connection,
            run,
            format,
            from_collection,
            parallel,
        } => {
            readiness_check(
                config,
                connection,
                run,
                format,
                from_collection.as_deref(),
                parallel,
            )
            .await
        }
        Commands::ConnectivityCheck {
            test_id,
            gcp_project,
            target_db_ip,
            source_db_ip,
            source_db_port,
            operation_type,
            access_token,
            no_prompt,
        } => {
            let args = ProbeArgs {
                test_id,
                project: gcp_project,
                target_ip: target_db_ip,
                source_ip: source_db_ip,
                source_port: source_db_port,
                operation: operation_type,
            };
            connectivity_check(config, args, access_token, no_prompt).await
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AssessmentConfig> {
    let Some(path) = path else {
        return Ok(AssessmentConfig::default());
    };
    info!("Loading configuration from {:?}", path);
    AssessmentConfig::from_file(path)
        .with_context(|| format!("cannot load configuration from {}", path.display()))
}

/// Applies command-line overrides and validates the result.
fn apply_run_flags(config: &mut AssessmentConfig, run: &RunFlags) -> anyhow::Result<()> {
    if let Some(dir) = &run.output_dir {
        config.options.output_dir = dir.clone();
    }
    if let Some(timeout) = run.timeout {
        config.options.timeout_secs = timeout;
    }
    config.validate()?;
    Ok(())
}

async fn collect_data(
    mut config: AssessmentConfig,
    connection: ConnectionFlags,
    run: RunFlags,
) -> anyhow::Result<()> {
    apply_run_flags(&mut config, &run)?;
    let ui = TerminalUi::new();
    let prompter = DialoguerPrompter::new();
    let resolver = ParameterResolver::new(&prompter);

    ui.print_header("DATABASE MIGRATION ASSESSMENT · collect data");
    let params =
        resolver.resolve_connection(ConnectionArgs::from(connection).or(&config.connection))?;
    ui.print_connection_preview(&params);
    if !resolver.confirm("Collect metadata from this database?", run.no_prompt)? {
        ui.print_skipped();
        return Ok(());
    }

    let session = Session::for_params(&params)?
        .with_deadline(Duration::from_secs(config.options.timeout_secs));
    let spinner = ui.spinner();
    let mut session = session.on_transition(follow(&spinner));
    let retry = RetryConfig::for_connection(config.options.connect_retries);
    let outcome = session.collect_with_retry(&retry).await;
    spinner.finish_and_clear();

    let output_dir = &config.options.output_dir;
    match outcome {
        SessionOutcome::Done(collection) => {
            let path = write_collection(output_dir, &collection)?;
            ui.print_collection_saved(&collection, &path);
            Ok(())
        }
        SessionOutcome::Failed(diagnostic) => Err(report_failure(&ui, &diagnostic, output_dir)),
    }
}

async fn readiness_check(
    mut config: AssessmentConfig,
    connection: ConnectionFlags,
    run: RunFlags,
    format: Option<OutputFormat>,
    from_collection: Option<&Path>,
    parallel: bool,
) -> anyhow::Result<()> {
    if let Some(format) = format {
        config.options.format = format;
    }
    if parallel {
        config.options.parallel_evaluation = true;
    }
    apply_run_flags(&mut config, &run)?;
    let table = config.options.format == OutputFormat::Table;
    let ui = TerminalUi::new();

    if table {
        ui.print_header("DATABASE MIGRATION ASSESSMENT · readiness check");
    }

    let session = match from_collection {
        Some(path) => {
            let collection = Collection::from_file(path).with_context(|| {
                format!("cannot read collection document {}", path.display())
            })?;
            info!(
                identifier = %collection.collection_identifier,
                engine = %collection.engine,
                "Evaluating collection document offline"
            );
            Session::new(
                collection.collection_identifier.clone(),
                Box::new(SnapshotCollector::from_collection(collection)),
            )
        }
        None => {
            let prompter = DialoguerPrompter::new();
            let resolver = ParameterResolver::new(&prompter);
            let params = resolver
                .resolve_connection(ConnectionArgs::from(connection).or(&config.connection))?;
            if table {
                ui.print_connection_preview(&params);
            }
            if !resolver.confirm("Run the readiness check against this database?", run.no_prompt)? {
                ui.print_skipped();
                return Ok(());
            }
            Session::for_params(&params)?
        }
    };

    let spinner = ui.spinner();
    let mut session = session
        .with_deadline(Duration::from_secs(config.options.timeout_secs))
        .with_evaluator(Evaluator::new().parallel(config.options.parallel_evaluation))
        .on_transition(follow(&spinner));
    let retry = RetryConfig::for_connection(config.options.connect_retries);
    let outcome = session.run_with_retry(&retry).await;
    spinner.finish_and_clear();

    let output_dir = &config.options.output_dir;
    let report = match outcome {
        SessionOutcome::Done(report) => report,
        SessionOutcome::Failed(diagnostic) => {
            return Err(report_failure(&ui, &diagnostic, output_dir));
        }
    };

    let path = report.write_to(output_dir)?;
    match config.options.format {
        OutputFormat::Table => {
            ui.print_report(&report);
            ui.print_report_saved(&path);
        }
        OutputFormat::Json => {
            println!("{}", report.to_json()?);
            info!(path = %path.display(), "Report written");
        }
    }
    Ok(())
}

async fn connectivity_check(
    config: AssessmentConfig,
    args: ProbeArgs,
    access_token: Option<String>,
    no_prompt: bool,
) -> anyhow::Result<()> {
    config.validate()?;
    let ui = TerminalUi::new();
    let prompter = DialoguerPrompter::new();
    let resolver = ParameterResolver::new(&prompter);

    ui.print_header("DATABASE MIGRATION ASSESSMENT · connectivity check");
    let request = resolver.resolve_probe(args)?;
    let token = resolver.resolve_secret(access_token, "access-token", "Access token")?;
    ui.print_probe_preview(&request);
    if !resolver.confirm("Run this connectivity operation?", no_prompt)? {
        ui.print_skipped();
        return Ok(());
    }

    let spinner = ui.spinner();
    spinner.set_message(format!("Running {} for {}", request.operation, request.test_id));
    let prober = NetworkManagementProber::new(&config.prober, token);
    let result = prober::execute(&prober, &request).await;
    spinner.finish_and_clear();

    let result = result?;
    ui.print_probe_result(&result);
    if result.status.is_failure() {
        println!(
            "\n{}",
            "The migration target cannot reach the source database on this path.".yellow()
        );
    }
    Ok(())
}

/// Moves the spinner along with the session state.
fn follow(spinner: &ProgressBar) -> impl Fn(dma::SessionState) + Send + Sync + 'static {
    let spinner = spinner.clone();
    move |state| spinner.set_message(state_message(state))
}

/// Persists and prints a diagnostic, returning the error to exit with.
fn report_failure(ui: &TerminalUi, diagnostic: &Diagnostic, output_dir: &Path) -> anyhow::Error {
    let saved = match diagnostic.write_to(output_dir) {
        Ok(path) => Some(path),
        Err(e) => {
            warn!(error = %e, "Failed to write diagnostic");
            None
        }
    };
    ui.print_diagnostic(diagnostic, saved.as_deref());
    anyhow::anyhow!(
        "{} failed while {} ({})",
        diagnostic.database_identifier,
        diagnostic.failed_in,
        diagnostic.code
    )
}
