//! Writing a finished run to disk.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use log::info;
use serde::Serialize;
use thiserror::Error;

use crate::outcome::{Availability, CheckOutcome};
use crate::results::ResultSet;

/// Failure to write results.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExportError {
    /// A file or directory could not be written.
    #[error("cannot write `{path}`: {source}")]
    Write {
        /// Target path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The summary could not be serialized.
    #[error("cannot serialize summary: {0}")]
    Json(#[from] serde_json::Error),
}

/// Run parameters recorded next to the counts.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    /// Whether a proxy was configured at start.
    pub proxy_used: bool,
    /// Worker count.
    pub max_workers: usize,
    /// Lower bound of the request delay, seconds.
    pub min_delay: f64,
    /// Upper bound of the request delay, seconds.
    pub max_delay: f64,
    /// Whether the structured endpoint was tried.
    pub primary_enabled: bool,
}

#[derive(Debug, Serialize)]
struct Summary<'a> {
    timestamp: DateTime<Utc>,
    total_checked: usize,
    available_count: usize,
    unavailable_count: usize,
    error_count: usize,
    success_rate: f64,
    available_usernames: Vec<&'a str>,
    unavailable_usernames: Vec<&'a str>,
    error_usernames: Vec<&'a str>,
    configuration: &'a RunConfig,
}

/// Which files to produce.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Directory the files go into; created if missing.
    pub dir: PathBuf,
    /// Also write a CSV of every outcome.
    pub csv: bool,
}

/// Write the run into `options.dir` and return the paths written.
///
/// Text lists are only written for non-empty buckets; the JSON summary is
/// always written.
///
/// # Errors
///
/// Returns the first [`ExportError`] hit.
pub fn save_results(
    results: &ResultSet,
    config: &RunConfig,
    options: &ExportOptions,
) -> Result<Vec<PathBuf>, ExportError> {
    fs::create_dir_all(&options.dir).map_err(|source| ExportError::Write {
        path: options.dir.clone(),
        source,
    })?;
    let prefix = format!("handle_check_{}", Local::now().format("%Y%m%d_%H%M%S"));
    let path_for = |suffix: &str| options.dir.join(format!("{prefix}_{suffix}"));
    let mut written = Vec::new();

    for (bucket, title, suffix) in [
        (results.available(), "AVAILABLE USERNAMES", "available.txt"),
        (results.unavailable(), "UNAVAILABLE USERNAMES", "unavailable.txt"),
        (results.errors(), "ERRORS", "errors.txt"),
    ] {
        if bucket.is_empty() {
            continue;
        }
        let path = path_for(suffix);
        write_file(&path, |out| write_list(out, title, bucket))?;
        written.push(path);
    }

    if options.csv && !results.is_empty() {
        let path = path_for("results.csv");
        write_file(&path, |out| write_csv(out, results.iter()))?;
        written.push(path);
    }

    let stats = results.stats();
    let summary = Summary {
        timestamp: Utc::now(),
        total_checked: stats.total,
        available_count: stats.available,
        unavailable_count: stats.unavailable,
        error_count: stats.errors,
        success_rate: stats.success_rate,
        available_usernames: names(results.available()),
        unavailable_usernames: names(results.unavailable()),
        error_usernames: names(results.errors()),
        configuration: config,
    };
    let json = serde_json::to_string_pretty(&summary)?;
    let path = path_for("summary.json");
    write_file(&path, |out| writeln!(out, "{json}"))?;
    written.push(path);

    info!("saved {} result files to {}", written.len(), options.dir.display());
    Ok(written)
}

fn names(bucket: &[CheckOutcome]) -> Vec<&str> {
    bucket.iter().map(|o| o.name.as_str()).collect()
}

fn write_file<F>(path: &Path, body: F) -> Result<(), ExportError>
where
    F: FnOnce(&mut io::BufWriter<fs::File>) -> io::Result<()>,
{
    let wrap = |source| ExportError::Write {
        path: path.to_path_buf(),
        source,
    };
    let file = fs::File::create(path).map_err(wrap)?;
    let mut out = io::BufWriter::new(file);
    body(&mut out).map_err(wrap)?;
    out.flush().map_err(wrap)
}

/// A titled list of `name - detail (method)` lines.
pub fn write_list<W: Write>(out: &mut W, title: &str, outcomes: &[CheckOutcome]) -> io::Result<()> {
    writeln!(out, "{title}")?;
    writeln!(out, "{}", "=".repeat(50))?;
    writeln!(out)?;
    for outcome in outcomes {
        writeln!(out, "{} - {} ({})", outcome.name, outcome.detail, outcome.method)?;
    }
    Ok(())
}

/// One CSV row per outcome with a header line.
pub fn write_csv<'a, W, I>(out: &mut W, outcomes: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a CheckOutcome>,
{
    writeln!(out, "username,available,status,method,timestamp")?;
    for o in outcomes {
        writeln!(
            out,
            "{},{},{},{},{}",
            csv_field(&o.name),
            o.availability == Availability::Available,
            csv_field(&o.detail),
            o.method,
            o.timestamp.to_rfc3339()
        )?;
    }
    Ok(())
}

// RFC 4180: quote when needed, double embedded quotes.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
