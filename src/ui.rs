// UI layer: the one-time privacy prompt, progress spinner and report
// output. Everything that talks to the terminal lives here; the table
// itself is built as a plain string so it can be tested.

use anyhow::Result;
use clap::ValueEnum;
use crossterm::style::Stylize;
use dialoguer::Input;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;

use crate::api::{EngineResult, Report, ScanResponse};
use crate::config::{ConfigStore, Settings};
use crate::sample::Sample;

pub const PRIVACY_NOTICE: &str = "\
Files submitted for scanning are shared with the VirusTotal community and
with antivirus vendors, and may be downloaded by premium users. Do not
submit documents containing personal or confidential information.";

const AFFIRMATIVE: [&str; 4] = ["y", "yes", "agree", "i agree"];

/// How a finished report is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub fn is_affirmative(answer: &str) -> bool {
    let answer = answer.trim().to_lowercase();
    AFFIRMATIVE.contains(&answer.as_str())
}

/// Read one line of consent from the terminal.
pub fn prompt_consent() -> Result<String> {
    let answer: String = Input::new()
        .with_prompt("Type 'yes' to accept")
        .allow_empty(true)
        .interact_text()?;
    Ok(answer)
}

/// Show the privacy notice unless it was already accepted. Returns whether
/// the user has (now or earlier) accepted it; acceptance is persisted.
pub fn consent_gate<S, F>(store: &mut ConfigStore<S>, ask: F) -> Result<bool>
where
    S: Settings,
    F: FnOnce() -> Result<String>,
{
    if store.has_privacy_waiver() {
        return Ok(true);
    }
    println!("{}\n", PRIVACY_NOTICE);
    if !is_affirmative(&ask()?) {
        return Ok(false);
    }
    store.save_privacy_waiver()?;
    Ok(true)
}

/// Spinner currently on screen, if any. Log output is routed around it.
static ACTIVE_SPINNER: Mutex<Option<ProgressBar>> = Mutex::new(None);

/// A progress spinner that log lines are printed around rather than over.
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    pub fn finish(self) {
        // Drop does the work.
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if let Ok(mut active) = ACTIVE_SPINNER.lock() {
            *active = None;
        }
        self.bar.finish_and_clear();
    }
}

pub fn spinner(msg: String) -> Spinner {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]") {
        bar.set_style(style);
    }
    bar.set_message(msg);
    bar.enable_steady_tick(Duration::from_millis(120));
    if let Ok(mut active) = ACTIVE_SPINNER.lock() {
        *active = Some(bar.clone());
    }
    Spinner { bar }
}

/// Stderr writer for the log subscriber. While a spinner is shown, each
/// write suspends it so the line lands above the spinner instead of
/// through it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogWriter;

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let active = ACTIVE_SPINNER.lock().ok().and_then(|a| a.clone());
        match active {
            Some(bar) => bar.suspend(|| io::stderr().write_all(buf)).map(|()| buf.len()),
            None => io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

/// Print what the scan endpoint told us about a freshly submitted sample.
pub fn print_submission(sample: &Sample, resp: Option<&ScanResponse>) {
    println!("{}", format!("Submitted {}", sample.filename()).bold());
    match resp {
        Some(r) => {
            println!("  {}", r.verbose_msg);
            println!("  MD5:       {}", r.md5);
            println!("  SHA-256:   {}", r.sha256);
            println!("  Permalink: {}", r.permalink);
        }
        None => {
            println!("  No response from the scan endpoint; polling by local digest.");
            println!("  SHA-256:   {}", sample.sha256());
        }
    }
}

pub fn print_report(filename: &str, report: &Report, format: OutputFormat) {
    match format {
        OutputFormat::Text => {
            let ratio = format!("{}/{}", report.positives, report.total);
            let ratio = if report.positives > 0 {
                ratio.red().bold()
            } else {
                ratio.green().bold()
            };
            println!("\nDetection ratio for {}: {}", filename, ratio);
            print!("{}", render_report(report));
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
        }
    }
}

/// Summary lines followed by one row per engine, detections first.
pub fn render_report(report: &Report) -> String {
    let mut out = String::new();
    if !report.scan_date.is_empty() {
        out.push_str(&format!("Scan date: {}\n", report.scan_date));
    }
    if !report.permalink.is_empty() {
        out.push_str(&format!("Permalink: {}\n", report.permalink));
    }
    out.push('\n');
    out.push_str(&render_table(report));
    out
}

fn render_table(report: &Report) -> String {
    let mut engines: Vec<(&String, &EngineResult)> = report.scans.iter().collect();
    // BTreeMap already orders by name; a stable sort keeps that within groups.
    engines.sort_by_key(|(_, r)| !r.detected);

    let header = ["Engine", "Detected", "Version", "Result", "Updated"];
    let rows: Vec<[String; 5]> = engines
        .iter()
        .map(|(name, r)| {
            [
                name.to_string(),
                if r.detected { "yes" } else { "no" }.to_string(),
                r.version.clone().unwrap_or_default(),
                r.result.clone().unwrap_or_else(|| "-".to_string()),
                r.update.clone().unwrap_or_default(),
            ]
        })
        .collect();

    let mut widths = header.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let mut out = format_row(&header, &widths);
    let rule = widths.map(|w| "-".repeat(w));
    out.push_str(&format_row(&rule.each_ref().map(String::as_str), &widths));
    for row in &rows {
        out.push_str(&format_row(&row.each_ref().map(String::as_str), &widths));
    }
    out
}

fn format_row(cells: &[&str; 5], widths: &[usize; 5]) -> String {
    let joined = cells
        .iter()
        .zip(widths)
        .map(|(c, w)| format!("{:<w$}", c, w = *w))
        .collect::<Vec<_>>()
        .join("  ");
    format!("{}\n", joined.trim_end())
}
