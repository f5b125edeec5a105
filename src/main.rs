use std::fs;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use thiserror::Error;

use handle_avail::batch::{CancelToken, Dispatcher, RunReport};
use handle_avail::check::Checker;
use handle_avail::config::{
    ConfigError, DEFAULT_BASE_URL, DEFAULT_WORKERS, DelayRange, Endpoints, Settings,
};
use handle_avail::export::{self, ExportError, ExportOptions, RunConfig};
use handle_avail::outcome::{CheckOutcome, Classification, Method};
use handle_avail::results::ResultSet;
use handle_avail::secondary::{AmbiguityPolicy, MarkerSet};
use handle_avail::session::{Session, SessionError};
use handle_avail::source::{self, SourceError};

const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(
    name = "handle-avail",
    version,
    about = "Check whether Instagram handles are available",
    after_help = "Each handle is validated locally, then checked against the signup \
                  check endpoint. When that endpoint cannot decide (throttling, \
                  missing token, odd responses), the public profile page is read \
                  instead.\n\n\
                  The profile-page fallback is a heuristic. Ambiguous pages count as \
                  available unless --ambiguous taken is given."
)]
struct Cli {
    /// Handles to check (also reads from stdin)
    names: Vec<String>,

    /// Read handles from a file, one per line; `#` starts a comment
    #[arg(short, long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Generate variations of a base handle
    #[arg(short, long, value_name = "BASE")]
    generate: Option<String>,

    /// Number of variations to generate
    #[arg(short, long, default_value_t = 10)]
    count: usize,

    /// Route requests through a proxy (http, https, socks4 or socks5)
    #[arg(short, long, value_name = "URL")]
    proxy: Option<String>,

    /// Skip the signup check endpoint and only read profile pages
    #[arg(long)]
    no_api: bool,

    /// Concurrent workers
    #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Minimum pause after a decisive answer, in seconds
    #[arg(long, default_value_t = 2.0, value_name = "SECS")]
    min_delay: f64,

    /// Maximum pause after a decisive answer, in seconds
    #[arg(long, default_value_t = 5.0, value_name = "SECS")]
    max_delay: f64,

    /// JSON file overriding the profile-page markers
    #[arg(long, value_name = "PATH")]
    markers: Option<PathBuf>,

    /// How to read a profile page that matches no marker
    #[arg(long, value_enum, default_value_t = Ambiguous::Available)]
    ambiguous: Ambiguous,

    /// Service base URL
    #[arg(long, default_value = DEFAULT_BASE_URL, value_name = "URL")]
    base_url: String,

    /// Directory result files are written to
    #[arg(short, long, default_value = "results", value_name = "DIR")]
    output: PathBuf,

    /// Do not write the CSV file
    #[arg(long)]
    no_csv: bool,

    /// Do not write any result files
    #[arg(long)]
    no_save: bool,

    /// Only print available handles
    #[arg(short, long)]
    available_only: bool,

    /// Log every request and pause
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Print only a final counts line
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Ambiguous {
    Available,
    Taken,
}

impl From<Ambiguous> for AmbiguityPolicy {
    fn from(value: Ambiguous) -> Self {
        match value {
            Ambiguous::Available => Self::AssumeAvailable,
            Ambiguous::Taken => Self::AssumeTaken,
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("no handles provided")]
    NoNames,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("cannot read markers `{path}`: {source}")]
    MarkersRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid markers `{path}`: {source}")]
    MarkersJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Export(#[from] ExportError),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);
    signals::reset_sigpipe();

    if !io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            if matches!(e, CliError::NoNames) {
                eprintln!("usage: handle-avail [OPTIONS] [NAMES...]");
            }
            ExitCode::from(2)
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        LevelFilter::Debug
    } else if cli.quiet {
        LevelFilter::Error
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .parse_default_env()
        .init();
}

fn settings(cli: &Cli) -> Result<Settings, CliError> {
    let mut settings = Settings {
        workers: cli.workers,
        request_delay: DelayRange::from_secs_f64(cli.min_delay, cli.max_delay)?,
        use_primary: !cli.no_api,
        endpoints: Endpoints::new(cli.base_url.as_str()),
        proxy: cli.proxy.clone(),
        ambiguity: cli.ambiguous.into(),
        ..Settings::default()
    };
    if let Some(path) = &cli.markers {
        let json = fs::read_to_string(path).map_err(|source| CliError::MarkersRead {
            path: path.clone(),
            source,
        })?;
        settings.markers = MarkerSet::from_json(&json).map_err(|source| CliError::MarkersJson {
            path: path.clone(),
            source,
        })?;
    }
    settings.validate()?;
    Ok(settings)
}

fn collect_names(cli: &Cli) -> Result<Vec<String>, CliError> {
    let mut names = cli.names.clone();
    if let Some(path) = &cli.file {
        names.extend(source::load_file(path)?);
    }
    if let Some(base) = &cli.generate {
        names.extend(source::generate_variations(base, cli.count, &mut rand::rng())?);
    }
    if !io::stdin().is_terminal() {
        names.extend(source::read_lines(io::stdin().lock())?);
    }
    if names.is_empty() {
        return Err(CliError::NoNames);
    }
    source::dedup_canonical(&mut names);
    Ok(names)
}

fn run(cli: &Cli) -> Result<ExitCode, CliError> {
    let settings = settings(cli)?;
    let names = collect_names(cli)?;

    let session = Arc::new(Session::new(settings.proxy.as_deref())?);
    let checker = Checker::from_settings(session, &settings);
    let cancel = CancelToken::new();
    signals::forward_to(cancel.clone());

    let progress = progress_bar(cli, names.len());
    let mut results = ResultSet::new();
    let report = Dispatcher::new(&checker)
        .with_workers(settings.workers)
        .with_pacing(settings.pacing)
        .with_cancel(cancel)
        .run_with(&names, &mut results, |outcome| {
            progress.suspend(|| print_outcome(cli, outcome));
            progress.set_message(outcome.name.clone());
            progress.inc(1);
        });
    progress.finish_and_clear();

    print_summary(cli, &results, &report);

    if !cli.no_save {
        let config = RunConfig {
            proxy_used: settings.proxy.is_some(),
            max_workers: settings.workers,
            min_delay: settings.request_delay.min().as_secs_f64(),
            max_delay: settings.request_delay.max().as_secs_f64(),
            primary_enabled: settings.use_primary,
        };
        let options = ExportOptions {
            dir: cli.output.clone(),
            csv: !cli.no_csv,
        };
        let written = export::save_results(&results, &config, &options)?;
        if !cli.quiet {
            for path in &written {
                eprintln!("saved {}", path.display());
            }
        }
    }

    if report.interrupted {
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    }
    let stats = results.stats();
    if stats.total > 0 && stats.available == stats.total {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

// Drawn on stderr, so only for interactive, non-quiet runs.
fn progress_bar(cli: &Cli, len: usize) -> ProgressBar {
    if cli.quiet || !io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        bar.set_style(style.progress_chars("█▓▒░ "));
    }
    bar
}

fn print_outcome(cli: &Cli, outcome: &CheckOutcome) {
    let class = outcome.classification();
    if cli.quiet || (cli.available_only && class != Classification::Available) {
        return;
    }
    let label = match (class, outcome.method) {
        (Classification::Available, _) => "available".green(),
        (Classification::Unavailable, _) => "taken".red(),
        (Classification::Error, Method::Validation) => "invalid".yellow(),
        (Classification::Error, _) => "error".magenta(),
    };
    println!("{}\t{label}: {}", outcome.name, outcome.detail);
}

fn print_summary(cli: &Cli, results: &ResultSet, report: &RunReport) {
    let stats = results.stats();
    if cli.quiet {
        println!(
            "total={} available={} taken={} errors={}",
            stats.total, stats.available, stats.unavailable, stats.errors
        );
        return;
    }
    if report.interrupted {
        eprintln!(
            "{} {} handles not checked",
            "interrupted:".yellow().bold(),
            report.skipped
        );
    }
    if cli.available_only {
        return;
    }
    eprintln!();
    eprintln!("{}", "summary".bold());
    eprintln!("  checked      {}", stats.total);
    eprintln!("  available    {}", stats.available.to_string().green());
    eprintln!("  taken        {}", stats.unavailable.to_string().red());
    eprintln!("  errors       {}", stats.errors.to_string().yellow());
    eprintln!("  success rate {:.1}%", stats.success_rate);
}

mod signals {
    use handle_avail::batch::CancelToken;

    use super::EXIT_INTERRUPTED;

    /// Let a closed pipe end the process quietly instead of panicking in
    /// `println!`.
    #[cfg(unix)]
    pub fn reset_sigpipe() {
        // SAFETY: restores the default disposition; no handler runs.
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }
    }

    #[cfg(not(unix))]
    pub fn reset_sigpipe() {}

    /// Cancel `token` on the first Ctrl-C; a second one exits at once.
    pub fn forward_to(token: CancelToken) {
        let installed = ctrlc::set_handler(move || {
            if token.is_cancelled() {
                std::process::exit(i32::from(EXIT_INTERRUPTED));
            }
            log::warn!("interrupted, finishing in-flight checks");
            token.cancel();
        });
        if let Err(e) = installed {
            log::warn!("cannot install Ctrl-C handler: {e}");
        }
    }
}
