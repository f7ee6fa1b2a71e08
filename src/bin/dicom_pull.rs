use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use dicom_pull::auth::provider_from_inputs;
use dicom_pull::config::{ConfigLoader, ResolvedConfig};
use dicom_pull::domain::StoreReference;
use dicom_pull::error::DicomError;
use dicom_pull::http::ReqwestFetcher;
use dicom_pull::output::{ConsoleProgress, JsonOutput, OutputMode};
use dicom_pull::progress::{CancelFlag, ProgressSink, run_on_worker};
use dicom_pull::retriever::{DicomRetriever, DownloadReport};
use dicom_pull::store::FsFileSink;

const ACCESS_TOKEN_ENV: &str = "DICOM_PULL_ACCESS_TOKEN";

#[derive(Parser)]
#[command(name = "dicom-pull")]
#[command(about = "Download a DICOM study from a Google Cloud Healthcare DICOM store")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download every instance of a study into OUTPUT/<study>/<series>/<sop>.dcm")]
    Download(DownloadArgs),
    #[command(about = "Parse a DICOM store resource path and print its DICOMweb base URL")]
    Inspect(InspectArgs),
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(long)]
    service_account: Option<PathBuf>,

    #[arg(long, help = "Bearer token to use instead of a service account key")]
    access_token: Option<String>,

    #[arg(long, help = "projects/<p>/locations/<l>/datasets/<d>/dicomStores/<s>")]
    store: Option<String>,

    #[arg(long)]
    study: String,

    #[arg(long, help = "API root to use instead of https://healthcare.googleapis.com/v1")]
    endpoint: Option<String>,

    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long)]
    timeout_secs: Option<u64>,

    #[arg(long)]
    retries: Option<usize>,
}

#[derive(Args)]
struct InspectArgs {
    resource_path: String,

    #[arg(long, help = "API root to use instead of https://healthcare.googleapis.com/v1")]
    endpoint: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<DicomError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &DicomError) -> u8 {
    match error {
        DicomError::InvalidResourcePath(_)
        | DicomError::InvalidStudyId(_)
        | DicomError::MissingParameter(_)
        | DicomError::ConfigRead(_)
        | DicomError::ConfigParse(_) => 2,
        err if err.is_network() => 3,
        DicomError::Authentication(_) | DicomError::CredentialsRead(_) => 4,
        DicomError::Filesystem(_) | DicomError::MalformedMetadata(_) => 5,
        DicomError::Cancelled => 130,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Download(args) => {
            let config = ConfigLoader::resolve(cli.config.as_deref())?;
            run_download(args, config, output_mode)
        }
        Commands::Inspect(args) => run_inspect(args, output_mode),
    }
}

fn run_download(
    args: DownloadArgs,
    config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let DownloadArgs {
        service_account,
        access_token,
        store,
        study,
        endpoint,
        output,
        timeout_secs,
        retries,
    } = args;

    let store: StoreReference = store
        .or(config.dicom_store)
        .ok_or(DicomError::MissingParameter("DICOM store resource path"))?
        .parse()?;
    let store = apply_endpoint(store, endpoint.as_deref());
    let output = output
        .or(config.output)
        .ok_or(DicomError::MissingParameter("output directory"))?;
    let output = Utf8PathBuf::from_path_buf(output).map_err(|path| {
        DicomError::Filesystem(format!("output path is not UTF-8: {}", path.display()))
    })?;

    let access_token = access_token.or_else(|| {
        std::env::var(ACCESS_TOKEN_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
    });
    let tokens = provider_from_inputs(access_token, service_account.or(config.service_account))?;
    let http = ReqwestFetcher::new(
        Duration::from_secs(timeout_secs.unwrap_or(config.timeout_secs)),
        retries.unwrap_or(config.max_retries),
    )?;

    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || {
        if handler_flag.cancel() {
            std::process::exit(130);
        }
        eprintln!("stopping after the current request; press Ctrl-C again to abort");
    })
    .into_diagnostic()?;

    tracing::info!(store = %store, study = study.trim(), output = %output, "starting download");
    let retriever = DicomRetriever::new(store, tokens, http, FsFileSink).with_cancel(cancel);

    match output_mode {
        OutputMode::NonInteractive => {
            let report = download_on_worker(retriever, study, output, &JsonOutput)?;
            JsonOutput::print_report(&report).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let report = download_on_worker(retriever, study, output, &ConsoleProgress::new())?;
            print_download_summary(&report);
        }
    }
    Ok(())
}

fn download_on_worker<T, H>(
    retriever: DicomRetriever<T, H, FsFileSink>,
    study: String,
    output: Utf8PathBuf,
    sink: &dyn ProgressSink,
) -> Result<DownloadReport, DicomError>
where
    T: dicom_pull::auth::TokenProvider + 'static,
    H: dicom_pull::http::HttpFetcher + 'static,
{
    run_on_worker(sink, move |progress| {
        retriever.download(&study, output, progress)
    })
}

fn run_inspect(args: InspectArgs, output_mode: OutputMode) -> miette::Result<()> {
    let store: StoreReference = args.resource_path.parse()?;
    let store = apply_endpoint(store, args.endpoint.as_deref());
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_store(&store).into_diagnostic()?,
        OutputMode::Interactive => {
            println!("project:   {}", store.project_id());
            println!("location:  {}", store.location());
            println!("dataset:   {}", store.dataset());
            println!("datastore: {}", store.datastore());
            println!("base url:  {}", store.base_url());
        }
    }
    Ok(())
}

fn apply_endpoint(store: StoreReference, endpoint: Option<&str>) -> StoreReference {
    match endpoint.map(str::trim).filter(|root| !root.is_empty()) {
        Some(root) => store.with_endpoint(root),
        None => store,
    }
}

fn print_download_summary(report: &DownloadReport) {
    let green = "\x1b[32m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}dicom-pull summary{reset}");
    println!("{green}study {}{reset}", report.study_id);
    println!(
        "{green}{} instances in {} series{reset}",
        report.instances_written, report.series_count
    );
    for series in &report.series {
        println!(
            "{cyan}  {} ({} instances){reset}",
            series.series_instance_uid, series.instances_written
        );
    }
    println!("{green}written to {}{reset}", report.study_dir);
}
