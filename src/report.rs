//! Run report: the ordered log a reconciliation run hands back.
//!
//! Every noteworthy event of an `add`/`update` run lands here as a
//! `(Severity, message)` pair, in the order it happened. The report is
//! append-only; an optional observer channel receives each line as it is
//! appended so a progress UI can stream a long run. Lines are also
//! mirrored to `tracing` at the matching level.

use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

/// Severity of a single report line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One line of a run report.
#[derive(Debug, Clone)]
pub struct ReportLine {
    pub severity: Severity,
    pub message: String,
}

/// Ordered, append-only log produced by one reconciliation run.
#[derive(Debug, Default)]
pub struct RunReport {
    lines: Vec<ReportLine>,
    observer: Option<UnboundedSender<ReportLine>>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an observer that receives every subsequent line.
    ///
    /// A dropped receiver is ignored; the run never blocks on it.
    pub fn with_observer(observer: UnboundedSender<ReportLine>) -> Self {
        Self {
            lines: Vec::new(),
            observer: Some(observer),
        }
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(Severity::Info, message.into());
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.push(Severity::Warning, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(Severity::Error, message.into());
    }

    fn push(&mut self, severity: Severity, message: String) {
        match severity {
            Severity::Info => info!(target: "reconcile", "{}", message),
            Severity::Warning => warn!(target: "reconcile", "{}", message),
            Severity::Error => error!(target: "reconcile", "{}", message),
        }
        let line = ReportLine { severity, message };
        if let Some(observer) = &self.observer {
            let _ = observer.send(line.clone());
        }
        self.lines.push(line);
    }

    /// All lines, in append order.
    pub fn lines(&self) -> &[ReportLine] {
        &self.lines
    }

    /// True if any line was recorded at `Error` severity.
    pub fn has_errors(&self) -> bool {
        self.lines
            .iter()
            .any(|line| line.severity == Severity::Error)
    }
}
