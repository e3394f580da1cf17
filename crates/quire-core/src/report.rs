//! The error reporting sink.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::block::BlockError;

/// A displayable `{ reason, error }` pair surfaced by the safe wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub reason: String,
    pub error: BlockError,
}

impl Report {
    pub fn new(reason: impl Into<String>, error: BlockError) -> Self {
        Self {
            reason: reason.into(),
            error,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.error)
    }
}

type Sink = Arc<dyn Fn(Report) + Send + Sync>;

#[derive(Default)]
struct ReporterInner {
    sink: Option<Sink>,
    lost: Option<Report>,
}

/// Where absorbed block errors go.
///
/// There is no subscriber until a consumer claims the sink, and errors can
/// fire before that (a bad document loads before any UI mounts). Those are
/// buffered as a single *lost* report — latest wins — and flushed to the
/// first subscriber. Every report is also logged, subscriber or not.
#[derive(Clone, Default)]
pub struct Reporter {
    shared: Arc<Mutex<ReporterInner>>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, report: Report) {
        tracing::warn!(reason = %report.reason, error = %report.error, "block error absorbed");
        let sink = {
            let mut inner = self.shared.lock();
            match inner.sink.clone() {
                Some(sink) => Some(sink),
                None => {
                    inner.lost = Some(report.clone());
                    None
                }
            }
        };
        // Deliver outside the lock; the sink may report re-entrantly.
        if let Some(sink) = sink {
            sink(report);
        }
    }

    /// Claims the sink. A buffered lost report is flushed immediately.
    pub fn subscribe(&self, sink: impl Fn(Report) + Send + Sync + 'static) {
        let sink: Sink = Arc::new(sink);
        let lost = {
            let mut inner = self.shared.lock();
            inner.sink = Some(Arc::clone(&sink));
            inner.lost.take()
        };
        if let Some(report) = lost {
            sink(report);
        }
    }
}
