// Command-line driver: argument definitions, input validation and the
// per-sample submit -> poll -> render sequence.
//
// Every check that can fail without touching the network runs before the
// transport is even built.

use anyhow::Result;
use clap::parser::ValueSource;
use clap::{CommandFactory, FromArgMatches, Parser};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{fallback_permalink, ApiClient, ApiError, HttpsTransport, Report, Transport};
use crate::config::{self, ConfigStore, FileSettings, GROUP};
use crate::poll::{Clock, PollOutcome, Poller, SystemClock};
use crate::sample::Sample;
use crate::ui::{self, OutputFormat};

/// Most files accepted by one invocation.
pub const MAX_FILES: usize = 4;

/// Submit files to VirusTotal and wait for their scan reports
#[derive(Parser, Debug)]
#[command(name = "vt-submit", version, about, long_about = None)]
pub struct Args {
    /// VirusTotal API key; saved for later runs when given with -k
    #[arg(short = 'k', long = "key", env = "VT_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Set when the key came from the command line rather than the
    /// environment; only such keys are persisted.
    #[arg(skip)]
    pub save_key: bool,

    /// Seconds to wait between report requests
    #[arg(short = 'd', long = "delay", default_value_t = 60)]
    pub delay: u64,

    /// Files to submit, space separated (at most 4)
    #[arg(short = 'f', long = "files", value_name = "FILES")]
    pub files: Option<String>,

    /// How to print finished reports
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Config file holding the saved API key
    #[arg(long, env = "VT_SUBMIT_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Parse `argv`, recording whether `-k` was given explicitly.
    pub fn from_argv<I, T>(argv: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Args::command().try_get_matches_from(argv)?;
        let mut args = Args::from_arg_matches(&matches)?;
        args.save_key = matches.value_source("api_key") == Some(ValueSource::CommandLine);
        Ok(args)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CliError {
    #[error("no arguments given, see --help")]
    NoArguments,
    #[error("no API key configured, pass one with -k")]
    MissingApiKey,
    #[error("no files specified, pass them with -f")]
    NoFiles,
    #[error("too many files: {count} given, at most {} allowed", MAX_FILES)]
    TooManyFiles { count: usize },
    #[error("file(s) not found: {}", join_paths(.0))]
    MissingFiles(Vec<PathBuf>),
    #[error("privacy notice not accepted")]
    ConsentDeclined,
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Split the `-f` value into paths.
pub fn split_files(files: &str) -> Vec<PathBuf> {
    files.split_whitespace().map(PathBuf::from).collect()
}

/// Reject empty, oversized or partly missing file lists.
pub fn check_files(paths: &[PathBuf]) -> Result<(), CliError> {
    if paths.is_empty() {
        return Err(CliError::NoFiles);
    }
    if paths.len() > MAX_FILES {
        return Err(CliError::TooManyFiles { count: paths.len() });
    }
    let missing: Vec<PathBuf> = paths.iter().filter(|p| !p.is_file()).cloned().collect();
    if !missing.is_empty() {
        return Err(CliError::MissingFiles(missing));
    }
    Ok(())
}

/// How processing of one sample ended, short of an API error.
#[derive(Debug)]
pub enum SampleOutcome {
    Completed(Report),
    TimedOut { permalink: String },
}

/// Submit `sample`, then poll for its report keyed by the local digest.
pub fn process_sample<T, C>(
    client: &ApiClient<T>,
    poller: &Poller,
    sample: &Sample,
    clock: &mut C,
) -> Result<SampleOutcome, ApiError>
where
    T: Transport,
    C: Clock + ?Sized,
{
    let submitted = client.scan_sample(sample)?;
    ui::print_submission(sample, submitted.as_ref());
    let permalink = submitted
        .map(|s| s.permalink)
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| fallback_permalink(sample.sha256()));

    let spinner = ui::spinner(format!("Waiting for the report on {}", sample.filename()));
    let outcome = poller.poll(|| client.retrieve_report(sample.sha256()), clock);
    spinner.finish();

    Ok(match outcome? {
        PollOutcome::Ready(report) => SampleOutcome::Completed(report),
        PollOutcome::TimedOut => SampleOutcome::TimedOut { permalink },
    })
}

/// Run one invocation. Returns once every sample has been handled; a
/// failure on one sample does not stop the others.
pub fn run(args: Args) -> Result<()> {
    let config_path = args.config.clone().unwrap_or_else(config::default_path);
    let mut store = ConfigStore::new(FileSettings::open(&config_path, GROUP)?);

    let given_key = args.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty());
    if let (true, Some(key)) = (args.save_key, given_key) {
        store.save_api_key(key)?;
        info!("API key saved to {}", config_path.display());
    }
    let api_key = match given_key {
        Some(key) => key.to_string(),
        None => store.load_api_key(),
    };
    if api_key.is_empty() {
        return Err(CliError::MissingApiKey.into());
    }

    let paths = split_files(args.files.as_deref().unwrap_or_default());
    check_files(&paths)?;

    if !ui::consent_gate(&mut store, ui::prompt_consent)? {
        return Err(CliError::ConsentDeclined.into());
    }

    let transport = HttpsTransport::new()?;
    debug!(addr = %transport.addr(), "using service address");
    let client = ApiClient::new(transport, api_key);
    let poller = Poller::new(Duration::from_secs(args.delay));

    for path in &paths {
        handle_path(&client, &poller, path, args.format);
    }
    Ok(())
}

fn handle_path<T: Transport>(client: &ApiClient<T>, poller: &Poller, path: &Path, format: OutputFormat) {
    let sample = match Sample::load(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Skipping {}: {:#}", path.display(), e);
            return;
        }
    };

    let mut clock = SystemClock::start();
    match process_sample(client, poller, &sample, &mut clock) {
        Ok(SampleOutcome::Completed(report)) => ui::print_report(sample.filename(), &report, format),
        Ok(SampleOutcome::TimedOut { permalink }) => {
            warn!(file = sample.filename(), "no report within {}s", poller.timeout.as_secs());
            eprintln!(
                "No report for {} yet. Check {} later.",
                sample.filename(),
                permalink
            );
        }
        Err(e) => eprintln!("Failed to process {}: {}", sample.filename(), e),
    }
}
