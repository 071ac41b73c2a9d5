//! Alert reports
//!
//! A report is a plain-text rendering of an immutable alert snapshot: an
//! identity header, a kind-specific sentence, the data window and one line
//! per sample. Rendering is pure; [`FileReportWriter`] puts the text on disk.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use tracing::debug;

use crate::alert::Alert;
use crate::analyzer::AlertKind;
use crate::error::{ReportError, ReportResult};
use crate::utils::{format_timestamp, format_timestamp_filename, times_match};

/// Identity recovered from a rendered report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportHeader {
    pub node: String,
    pub stat: String,
    pub kind: AlertKind,
    pub first_triggered: DateTime<Utc>,
}

/// File name of the report for `alert`
pub fn report_file_name(alert: &Alert) -> String {
    format!("Alert Report - {}.txt", format_timestamp_filename(&alert.first_triggered))
}

/// Render the report body for `alert`
pub fn render_report(alert: &Alert) -> ReportResult<String> {
    let observed: Vec<(DateTime<Utc>, f64)> = alert
        .data_times
        .iter()
        .zip(&alert.data)
        .filter_map(|(t, v)| t.map(|t| (t, *v)))
        .collect();
    let (Some(first), Some(last)) = (observed.first(), observed.last()) else {
        return Err(ReportError::Empty);
    };

    let mut text = format!(
        "Node - {}\nStat - {}\nKind - {}\nFirst Triggered - {}\n\n",
        alert.node,
        alert.stat,
        alert.kind,
        alert.first_triggered.to_rfc3339_opts(SecondsFormat::Nanos, true),
    );
    text.push_str(&kind_sentence(alert));
    text.push_str("\n\n");

    if alert.deprecated {
        text.push_str("Node corresponding to alert was removed from the cluster.\n\n");
    }

    text.push_str(&format!(
        "Data collected from {} to {}\n\n",
        format_timestamp(&first.0),
        format_timestamp(&last.0),
    ));

    let mut alert_times = alert.alert_times.iter().peekable();
    let mut previous: Option<DateTime<Utc>> = None;
    for (time, value) in &observed {
        match previous {
            None if !times_match(alert.data_start, *time) => {
                text.push_str(&format!("No data recieved from server before {}\n", format_timestamp(time)));
            }
            Some(prev) if !times_match(prev + Duration::seconds(1), *time) => {
                text.push_str(&format!(
                    "No data recieved from server between {} and {}\n",
                    format_timestamp(&prev),
                    format_timestamp(time),
                ));
            }
            _ => {}
        }

        text.push_str(&format!("{} - {:.6}", format_timestamp(time), value));
        if alert_times.next_if(|at| times_match(**at, *time)).is_some() {
            text.push_str(" ALERT");
        }
        text.push('\n');
        previous = Some(*time);
    }

    Ok(text)
}

fn kind_sentence(alert: &Alert) -> String {
    let first = format_timestamp(&alert.first_triggered);
    let last = format_timestamp(&alert.last_triggered);
    let repeated = alert.num_times > 1;

    match alert.kind {
        AlertKind::SuddenChange => {
            let mut text = format!(
                "Stat changed by more than the threshold limit of {:.2}% at {first}. \
                 This change occured over {} second(s).",
                alert.threshold * 100.0,
                alert.window.unwrap_or(0),
            );
            if repeated {
                text.push_str(&format!(
                    "\nSimilar changes occured {} times with the last one occuring at {last}.",
                    alert.num_times
                ));
            }
            text
        }
        AlertKind::AboveThreshold => {
            let mut text = format!("Stat exceeded threshold limit of {:.6} at {first}.", alert.threshold);
            if repeated {
                text.push_str(&format!(
                    "\nSimilarly, the stat exceeded threshold limit {} times with the last one occuring at {last}.",
                    alert.num_times
                ));
            }
            text
        }
        AlertKind::BelowThreshold => {
            let mut text = format!("Stat dropped below threshold limit of {:.6} at {first}.", alert.threshold);
            if repeated {
                text.push_str(&format!(
                    "\nSimilarly, the stat was below the threshold limit {} times with the last one occuring at {last}.",
                    alert.num_times
                ));
            }
            text
        }
    }
}

/// Recover the identity header of a rendered report
pub fn parse_report_header(text: &str) -> Option<ReportHeader> {
    let mut node = None;
    let mut stat = None;
    let mut kind = None;
    let mut first_triggered = None;

    for line in text.lines().take_while(|line| !line.is_empty()) {
        let (key, value) = line.split_once(" - ")?;
        match key {
            "Node" => node = Some(value.to_string()),
            "Stat" => stat = Some(value.to_string()),
            "Kind" => kind = AlertKind::from_label(value),
            "First Triggered" => {
                first_triggered = DateTime::parse_from_rfc3339(value)
                    .ok()
                    .map(|t| t.with_timezone(&Utc))
            }
            _ => {}
        }
    }

    Some(ReportHeader {
        node: node?,
        stat: stat?,
        kind: kind?,
        first_triggered: first_triggered?,
    })
}

/// Destination of retired and manually reported alerts
pub trait ReportWriter: Send + Sync {
    /// Persist a report for `alert`, returning where it went
    fn write(&self, alert: &Alert) -> ReportResult<PathBuf>;
}

/// Writes one text file per alert into a directory
#[derive(Debug, Clone)]
pub struct FileReportWriter {
    dir: PathBuf,
}

impl FileReportWriter {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ReportWriter for FileReportWriter {
    fn write(&self, alert: &Alert) -> ReportResult<PathBuf> {
        let text = render_report(alert)?;
        let path = self.dir.join(report_file_name(alert));
        let failed = |e: std::io::Error| ReportError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        fs::create_dir_all(&self.dir).map_err(failed)?;
        fs::write(&path, text).map_err(failed)?;

        debug!(path = %path.display(), node = %alert.node, stat = %alert.stat, "report written");
        Ok(path)
    }
}
