use anyhow::{Context, anyhow, bail};
use clap::{Parser, Subcommand};
use crmsync_e::backend::EmbeddedBackend;
use crmsync_engine::backend::Backend;
use crmsync_engine::cli::{self, BatchOptions, OutputHandlers};
use crmsync_engine::config::{ConfigLoader, CrmSyncConfig};
use crmsync_engine::driver::RemoteDriver;
use crmsync_engine::orchestrator::{Credentials, Orchestrator, Session};
use crmsync_engine::source::{ColumnMapping, FileRecordSource};
use crmsync_h::backend::HeadlessBackend;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "crmsync", version, about = "Push spreadsheet records into a CRM web UI")]
struct Args {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Update every record of a CSV file or workbook
    Run(RunArgs),
    /// Write the default configuration to a file
    InitConfig {
        path: PathBuf,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// CSV file or workbook (.xlsx, .xls, .ods) with a header row
    #[arg(long)]
    records: PathBuf,

    /// Configuration file (defaults to ./crmsync.yaml, then ~/.crmsync/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override a column mapping, e.g. supplier="Supplier Name"
    #[arg(long = "mapping", value_name = "FIELD=COLUMN")]
    mappings: Vec<String>,

    #[arg(long, env = "CRMSYNC_USERNAME", required_unless_present = "no_login")]
    username: Option<String>,

    #[arg(long, env = "CRMSYNC_PASSWORD", hide_env_values = true, required_unless_present = "no_login")]
    password: Option<String>,

    /// Assume the browser is already signed in and on the listing page
    #[arg(long)]
    no_login: bool,

    /// Run the browser without a window
    #[arg(long)]
    headless: bool,

    /// Write the run summary as JSON
    #[arg(long)]
    summary: Option<PathBuf>,

    #[command(subcommand)]
    backend: BackendChoice,
}

#[derive(Subcommand, Clone)]
enum BackendChoice {
    /// Chrome through WebDriver. Spawns chromedriver if no URL is given.
    Embedded {
        /// External WebDriver URL
        #[arg(long)]
        driver_url: Option<String>,
    },
    /// Chromium through the DevTools protocol
    Headless,
    /// WebDriver first, DevTools if that fails
    Auto,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // stdout carries the summary; logs go to stderr
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match args.command {
        Command::InitConfig { path } => {
            ConfigLoader::save_to(&path, &CrmSyncConfig::default())
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Default configuration written to {}", path.display());
            Ok(())
        }
        Command::Run(run_args) => run(run_args).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => ConfigLoader::load_from(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => ConfigLoader::load_default().await?,
    };

    let mut mapping = ColumnMapping::from_config(&config.records);
    for spec in &args.mappings {
        mapping.apply_override(spec)?;
    }
    let source = FileRecordSource::from_path(&args.records, mapping);

    let credentials = if args.no_login {
        None
    } else {
        match (args.username, args.password) {
            (Some(username), Some(password)) => Some(Credentials::new(username, password)),
            _ => bail!("--username and --password are required unless --no-login is set"),
        }
    };

    let mut options = config.browser.launch_options();
    options.headless |= args.headless;
    let driver = build_driver(&args.backend, &config).with_timeouts(config.browser.driver_timeouts());
    let session = Session::acquire(driver, &options).await?;
    let mut orchestrator = Orchestrator::from_config(session, &config)?;
    info!(
        "Browser ready via {}",
        orchestrator.session().driver().backend_name().unwrap_or("?")
    );

    let output = OutputHandlers {
        out: |msg| println!("{}", msg),
        err: |msg| eprintln!("{}", msg),
    };
    let result = cli::run_batch(
        &mut orchestrator,
        &source,
        output,
        BatchOptions {
            credentials,
            summary_path: args.summary,
            handle_ctrl_c: true,
        },
    )
    .await;

    orchestrator.release().await.release().await;

    let summary = result.map_err(|e| anyhow!("{}", e))?;
    if summary.failed() > 0 {
        bail!("{} of {} records failed", summary.failed(), summary.total());
    }
    Ok(())
}

fn build_driver(choice: &BackendChoice, config: &CrmSyncConfig) -> RemoteDriver {
    let embedded = || -> Box<dyn Backend> {
        let url = config.browser.webdriver_url.clone();
        let backend = match url {
            Some(url) => EmbeddedBackend::with_url(url),
            None => EmbeddedBackend::new(),
        };
        Box::new(backend.chromedriver(config.browser.chromedriver_path.clone()))
    };

    match choice {
        BackendChoice::Embedded { driver_url } => match driver_url {
            Some(url) => RemoteDriver::new(Box::new(
                EmbeddedBackend::with_url(url.clone())
                    .chromedriver(config.browser.chromedriver_path.clone()),
            )),
            None => RemoteDriver::new(embedded()),
        },
        BackendChoice::Headless => RemoteDriver::new(Box::new(HeadlessBackend::new())),
        BackendChoice::Auto => {
            RemoteDriver::new(embedded()).with_fallback(Box::new(HeadlessBackend::new()))
        }
    }
}
