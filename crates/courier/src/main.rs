use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use courier_core::batch::BatchRunner;
use courier_core::config::{resolve_config_path, CourierConfig};
use courier_core::frame::rows;
use courier_core::notify::{FileNotifier, Notifier, SmtpNotifier};
use courier_core::reports::{all_reports, find_report};
use courier_core::schedule::local_now;
use courier_redcap::{RecordPlatform, RedcapClient};
use polars::prelude::DataFrame;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Scheduled research-coordination digests", long_about = None)]
struct Cli {
    /// Path to courier.toml (defaults to $COURIER_CONFIG, then ./courier.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log at debug level regardless of RUST_LOG
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every report that is due
    Update(UpdateArgs),
    /// Run one report now, ignoring the schedule
    Report(ReportArgs),
    /// Show records completed between two snapshot files
    Inspect(InspectArgs),
    /// List the known report types
    List,
}

#[derive(Args, Debug, Default)]
struct UpdateArgs {
    /// Restrict the run to these report names (repeatable)
    #[arg(long = "name")]
    names: Vec<String>,
}

#[derive(Args, Debug)]
struct ReportArgs {
    #[arg(long)]
    name: String,
    /// Where snapshots and summaries are written
    #[arg(long, default_value = ".")]
    outdir: PathBuf,
    /// Write digests as HTML files in the output directory instead of mailing
    #[arg(long)]
    no_send: bool,
}

#[derive(Args, Debug)]
struct InspectArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    previous: PathBuf,
    #[arg(long)]
    current: PathBuf,
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Command::Update(args) => handle_update(cli.config, args).await,
        Command::Report(args) => handle_report(cli.config, args).await,
        Command::Inspect(args) => handle_inspect(cli.config, args),
        Command::List => {
            for report in all_reports() {
                println!("{:<10} {}", report.name(), report.description());
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<CourierConfig> {
    let path = resolve_config_path(path);
    CourierConfig::load(&path).with_context(|| format!("failed to load {}", path.display()))
}

fn platform(config: &CourierConfig) -> Result<Arc<dyn RecordPlatform>> {
    let client = RedcapClient::new(config.redcap_settings())
        .context("failed to configure the platform client")?;
    Ok(Arc::new(client))
}

async fn handle_update(config_path: Option<PathBuf>, args: UpdateArgs) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate().context("configuration is incomplete")?;

    let notifier: Arc<dyn Notifier> =
        Arc::new(SmtpNotifier::new(&config.email).context("failed to configure SMTP")?);
    let runner = BatchRunner::new(&config, platform(&config)?, notifier);

    let now = local_now(config.schedule.tz()?);
    let summary = runner.update(&args.names, now).await?;
    info!(
        reports = summary.outcomes.len(),
        recorded = summary.recorded(),
        "update finished"
    );

    let failed: Vec<&str> = summary
        .failures()
        .map(|outcome| outcome.name.as_str())
        .collect();
    if !failed.is_empty() {
        bail!("reports failed: {}", failed.join(", "));
    }
    Ok(())
}

async fn handle_report(config_path: Option<PathBuf>, args: ReportArgs) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate_platform().context("configuration is incomplete")?;

    let notifier: Arc<dyn Notifier> = if args.no_send {
        std::fs::create_dir_all(&args.outdir)
            .with_context(|| format!("failed to create {}", args.outdir.display()))?;
        Arc::new(FileNotifier::new(&args.outdir))
    } else {
        config.validate_email().context("email configuration is incomplete")?;
        Arc::new(SmtpNotifier::new(&config.email).context("failed to configure SMTP")?)
    };
    let runner = BatchRunner::new(&config, platform(&config)?, notifier);

    let now = local_now(config.schedule.tz()?);
    let file = runner.run_report(&args.name, &args.outdir, now).await?;
    println!("{}", file.display());
    Ok(())
}

fn handle_inspect(config_path: Option<PathBuf>, args: InspectArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let report = find_report(&args.name)
        .with_context(|| format!("unknown report {}", args.name))?;
    let settings = config.report(&args.name).cloned().unwrap_or_default();
    let Some(pipeline) = report.pipeline(&settings) else {
        bail!("report {} does not diff snapshots", args.name);
    };

    match pipeline.completions_between(&args.previous, &args.current)? {
        Some(completed) => {
            println!("{} completed", completed.height());
            println!("{}", render_table(&completed));
        }
        None => println!("0 completed"),
    }
    Ok(())
}

fn render_table(df: &DataFrame) -> Table {
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(names.clone());
    for row in rows(df) {
        table.add_row(
            names
                .iter()
                .map(|name| row.get(name).unwrap_or_default())
                .collect::<Vec<_>>(),
        );
    }
    table
}
