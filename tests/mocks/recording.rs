//! Sinks that keep what they receive for later assertions

use std::path::PathBuf;
use std::sync::Mutex;

use chronos_engine::alert::Alert;
use chronos_engine::analyzer::{AlertEvent, EventSink};
use chronos_engine::error::ReportResult;
use chronos_engine::report::{render_report, report_file_name, ReportWriter};

/// Report writer that renders reports in memory
#[derive(Debug, Default)]
pub struct RecordingReportWriter {
    reports: Mutex<Vec<(Alert, String)>>,
}

impl RecordingReportWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.reports
            .lock()
            .map(|reports| reports.iter().map(|(alert, _)| alert.clone()).collect())
            .unwrap_or_default()
    }

    pub fn texts(&self) -> Vec<String> {
        self.reports
            .lock()
            .map(|reports| reports.iter().map(|(_, text)| text.clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().map(|reports| reports.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReportWriter for RecordingReportWriter {
    fn write(&self, alert: &Alert) -> ReportResult<PathBuf> {
        let text = render_report(alert)?;
        if let Ok(mut reports) = self.reports.lock() {
            reports.push((alert.clone(), text));
        }
        Ok(PathBuf::from(report_file_name(alert)))
    }
}

/// Event sink that records every alert event
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AlertEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AlertEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: AlertEvent) -> bool {
        match self.events.lock() {
            Ok(mut events) => {
                events.push(event);
                true
            }
            Err(_) => false,
        }
    }
}
