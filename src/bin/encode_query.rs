use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use encode_query::app::App;
use encode_query::batch::BatchOptions;
use encode_query::cache::CachedClient;
use encode_query::client::{EncodeClient, EncodeHttpClient};
use encode_query::config::{ConfigLoader, ResolvedConfig};
use encode_query::domain::Dispatch;
use encode_query::download::{CancelToken, DownloadOptions, HttpTransport};
use encode_query::error::EncodeError;
use encode_query::filters::TableFilter;
use encode_query::output::{JsonOutput, StderrProgress, TableFormat, TableOutput};
use encode_query::query::ExperimentQuery;

#[derive(Parser)]
#[command(name = "encode-query")]
#[command(about = "Search the ENCODE portal, flatten experiment files and download them")]
#[command(version, author)]
struct Cli {
    /// Path to a JSON config file (defaults to ./encode-query.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Bypass the on-disk response cache
    #[arg(long, global = true)]
    no_cache: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run an experiment search and print the raw envelope")]
    Experiment(ExperimentArgs),
    #[command(about = "Run an experiment search and print matching accessions")]
    Accessions(ExperimentArgs),
    #[command(about = "Fetch one experiment document")]
    Biosample(BiosampleArgs),
    #[command(about = "List cloud download URLs of one experiment")]
    Urls(UrlsArgs),
    #[command(about = "Fetch and flatten many experiments")]
    Batch(BatchArgs),
    #[command(about = "Download one file")]
    Download(DownloadArgs),
    #[command(about = "Download every cloud file of one experiment")]
    Files(FilesArgs),
}

#[derive(Args, Clone)]
struct ExperimentArgs {
    #[arg(long)]
    cell_line: Option<String>,
    #[arg(long)]
    assembly: Option<String>,
    #[arg(long)]
    target: Option<String>,
    #[arg(long)]
    search_term: Option<String>,
    #[arg(long)]
    organism: Option<String>,
    #[arg(long)]
    file_type: Option<String>,
    #[arg(long, default_value = "released")]
    status: String,
    #[arg(long, default_value = "all")]
    limit: String,
    /// true, false or unset
    #[arg(long, default_value = "unset")]
    perturbed: String,
    #[arg(long)]
    replicated: bool,
    /// Audit error category to exclude (repeatable)
    #[arg(long = "drop-error")]
    drop_errors: Vec<String>,
    /// Raw KEY=VALUE parameter, applied last (repeatable)
    #[arg(long = "param", value_parser = parse_key_value)]
    params: Vec<(String, String)>,
}

#[derive(Args)]
struct BiosampleArgs {
    accession: String,
    /// Print flattened rows instead of the raw document
    #[arg(long)]
    table: bool,
    #[arg(long)]
    tsv: bool,
}

#[derive(Args)]
struct UrlsArgs {
    accession: String,
}

#[derive(Args)]
struct BatchArgs {
    #[arg(required = true)]
    accessions: Vec<String>,
    #[arg(long, value_enum, default_value_t = Dispatch::Parallel)]
    dispatch: Dispatch,
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    organism: Option<String>,
    #[arg(long)]
    assembly: Option<String>,
    #[arg(long)]
    output_type: Option<String>,
    #[arg(long)]
    min_replicates: Option<usize>,
    #[arg(long)]
    tsv: bool,
    /// Print dropped accessions to stderr
    #[arg(long)]
    report_failures: bool,
}

#[derive(Args)]
struct DownloadArgs {
    url: String,
    #[arg(long)]
    path: Option<PathBuf>,
    #[arg(long)]
    block_size: Option<usize>,
    /// Skip when the target file already exists
    #[arg(long)]
    cache: bool,
    #[arg(long)]
    append: bool,
}

#[derive(Args)]
struct FilesArgs {
    accession: String,
    #[arg(long, default_value = ".")]
    dir: PathBuf,
    #[arg(long)]
    block_size: Option<usize>,
    /// Skip files that already exist in the directory
    #[arg(long)]
    cache: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<EncodeError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &EncodeError) -> u8 {
    match error {
        EncodeError::InvalidArgument(_)
        | EncodeError::MissingField(_)
        | EncodeError::EmptyBatch
        | EncodeError::ConfigRead(_)
        | EncodeError::ConfigParse(_) => 2,
        EncodeError::Http(_)
        | EncodeError::Status { .. }
        | EncodeError::Json(_)
        | EncodeError::EmptyResponse(_)
        | EncodeError::DownloadFailed { .. }
        | EncodeError::SizeMismatch { .. } => 3,
        EncodeError::Cancelled(_) => 130,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let app = App::new(
        build_client(&config, cli.no_cache)?,
        HttpTransport::with_user_agent(&config.client.user_agent)?,
    );

    match cli.command {
        Commands::Experiment(args) => {
            let envelope = app.experiment(&experiment_query(args)?)?;
            JsonOutput::print(&envelope).into_diagnostic()
        }
        Commands::Accessions(args) => {
            let accessions = app.accessions(&experiment_query(args)?)?;
            JsonOutput::print(&accessions).into_diagnostic()
        }
        Commands::Biosample(args) => {
            if args.table || args.tsv {
                let table = app.biosample_table(&args.accession)?;
                TableOutput::print(&table, table_format(args.tsv)).into_diagnostic()
            } else {
                let sample = app.biosample(&args.accession)?;
                JsonOutput::print(&sample).into_diagnostic()
            }
        }
        Commands::Urls(args) => {
            let urls = app.download_urls(&args.accession)?;
            JsonOutput::print(&urls).into_diagnostic()
        }
        Commands::Batch(args) => run_batch(&app, args, &config),
        Commands::Download(args) => run_download(&app, args, &config),
        Commands::Files(args) => run_files(&app, args, &config),
    }
}

fn build_client(config: &ResolvedConfig, no_cache: bool) -> miette::Result<Box<dyn EncodeClient>> {
    let http = EncodeHttpClient::with_settings(config.client.clone())?;
    if config.cache_enabled && !no_cache {
        let cache = config.response_cache()?;
        return Ok(Box::new(CachedClient::new(http, cache)));
    }
    Ok(Box::new(http))
}

fn experiment_query(args: ExperimentArgs) -> Result<ExperimentQuery, EncodeError> {
    let mut query = ExperimentQuery::new()
        .status(args.status)
        .limit(args.limit)
        .replicated(args.replicated)
        .drop_errors(args.drop_errors)
        .perturbed(&args.perturbed)?;
    query.cell_line = args.cell_line;
    query.assembly = args.assembly;
    query.target = args.target;
    query.search_term = args.search_term;
    query.organism = args.organism;
    query.file_type = args.file_type;
    for (key, value) in args.params {
        query = query.parameter(key, value);
    }
    Ok(query)
}

fn run_batch(
    app: &App<Box<dyn EncodeClient>, HttpTransport>,
    args: BatchArgs,
    config: &ResolvedConfig,
) -> miette::Result<()> {
    let options = BatchOptions {
        dispatch: args.dispatch,
        workers: args.workers.or(config.workers),
        filter: TableFilter {
            status: args.status,
            organism: args.organism,
            assembly: args.assembly,
            output_type: args.output_type,
            min_replicates: args.min_replicates,
        },
    };
    let outcome = app.fetch_batch_detailed(&args.accessions, &options)?;
    if args.report_failures {
        for failure in &outcome.failures {
            eprintln!("dropped {}: {}", failure.accession, failure.error);
        }
    }
    TableOutput::print(&outcome.table, table_format(args.tsv)).into_diagnostic()
}

fn cancel_on_interrupt() -> miette::Result<CancelToken> {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel()).into_diagnostic()?;
    Ok(cancel)
}

fn run_download(
    app: &App<Box<dyn EncodeClient>, HttpTransport>,
    args: DownloadArgs,
    config: &ResolvedConfig,
) -> miette::Result<()> {
    let cancel = cancel_on_interrupt()?;

    let options = DownloadOptions {
        path: args.path,
        block_size: args.block_size.unwrap_or(config.block_size),
        cache: args.cache,
        append: args.append,
    };
    let outcome = app.download(&args.url, &options, &StderrProgress::new(), &cancel)?;
    JsonOutput::print(&outcome).into_diagnostic()
}

fn run_files(
    app: &App<Box<dyn EncodeClient>, HttpTransport>,
    args: FilesArgs,
    config: &ResolvedConfig,
) -> miette::Result<()> {
    let cancel = cancel_on_interrupt()?;
    let options = DownloadOptions {
        path: None,
        block_size: args.block_size.unwrap_or(config.block_size),
        cache: args.cache,
        append: false,
    };
    let outcomes = app.download_sample(
        &args.accession,
        &args.dir,
        &options,
        &StderrProgress::new(),
        &cancel,
    )?;
    JsonOutput::print(&outcomes).into_diagnostic()
}

fn table_format(tsv: bool) -> TableFormat {
    if tsv { TableFormat::Tsv } else { TableFormat::Json }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))
}
