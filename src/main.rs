mod calculator;
mod config;
mod error;
mod fetcher;
mod notifier;
mod parser;
mod reading;
mod reporter;

use crate::calculator::{Report, calculate};
use crate::config::{ConfigFile, Settings};
use crate::error::Result;
use crate::fetcher::{HttpFetcher, PageSource};
use crate::notifier::{GithubNotifier, Notifier, NotifyOutcome, notify};
use crate::reading::load_previous;
use crate::reporter::{OutputFormat, render_markdown, render_summary};
use clap::Parser;
use jiff::Timestamp;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Checks a prepaid electricity meter and reports how long the balance will last.
/// Fetches the meter's billing page, compares it with the previous run's reading,
/// writes a summary, and optionally comments on a GitHub issue.
#[derive(Parser, Debug)]
#[command(version, long_about)]
struct PowerMonitor {
    /// Output format of the summary.
    #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
    format: OutputFormat,
    /// Billing page URL, overriding POWER_MONITOR_URL and the config file.
    #[arg(long)]
    url: Option<String>,
    /// Config file (default: POWER_MONITOR_CONFIG or config.yaml).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write the summary to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// A previous run's JSON or CSV output to compare against.
    #[arg(long)]
    previous: Option<PathBuf>,
    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

fn main() -> ExitCode {
    let args = PowerMonitor::parse();
    setup_logging(args.debug);

    match execute(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("power_monitor=debug")
    } else {
        EnvFilter::new("power_monitor=info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();
}

fn execute(args: &PowerMonitor) -> Result<()> {
    let env = config::process_env;
    let file = ConfigFile::load(args.config.as_deref(), &env)?;
    let settings = Settings::resolve(args.url.as_deref(), &file, &env)?;

    let fetcher = HttpFetcher::new();
    let github = GithubNotifier::from_settings(&settings.notify);
    let options = RunOptions {
        format: args.format,
        previous: args.previous.as_deref(),
        output: args.output.as_deref(),
    };
    run(
        &settings,
        &options,
        &fetcher,
        github.as_ref().map(|n| n as &dyn Notifier),
        Timestamp::now(),
        &mut io::stdout().lock(),
    )?;
    Ok(())
}

struct RunOptions<'a> {
    format: OutputFormat,
    previous: Option<&'a Path>,
    output: Option<&'a Path>,
}

/// One pass of fetch, parse, compare, report, notify.
///
/// Nothing is written unless the page was fetched and parsed.
/// Notification problems are logged only.
fn run(
    settings: &Settings,
    options: &RunOptions,
    source: &dyn PageSource,
    notifier: Option<&dyn Notifier>,
    now: Timestamp,
    stdout: &mut dyn Write,
) -> Result<Report> {
    let html = source.fetch(&settings.url)?;
    let reading = parser::parse_page(&html, now)?;
    info!(balance = %reading.balance, "balance read");

    let previous = options.previous.and_then(|path| match load_previous(path) {
        Ok(None) => {
            info!("no previous reading at {}, treating as first run", path.display());
            None
        }
        Ok(previous) => previous,
        Err(e) => {
            warn!("ignoring unreadable previous reading {}: {e}", path.display());
            None
        }
    });

    let report = calculate(reading, previous);
    if let Some(discontinuity) = report.discontinuity {
        warn!("readings not comparable: {}", discontinuity.describe());
    }

    let summary = render_summary(&report, options.format, settings.utc_offset)?;
    match options.output {
        Some(path) => write_file(path, &summary)?,
        None => stdout.write_all(summary.as_bytes())?,
    }
    if let Some(path) = &settings.summary_path {
        append_job_summary(path, &render_markdown(&report, settings.utc_offset))?;
    }

    if let NotifyOutcome::Skipped(reason) = notify(&report, &settings.notify, notifier) {
        info!("notification skipped: {reason}");
    }
    Ok(report)
}

fn write_file(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, text)?;
    info!("wrote summary to {}", path.display());
    Ok(())
}

fn append_job_summary(path: &Path, markdown: &str) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(markdown.as_bytes())?;
    Ok(())
}
