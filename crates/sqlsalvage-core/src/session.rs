//! Background scans driven by message passing.
//!
//! [`ScanService`] is the long-lived scanner instance. Each accepted request
//! runs on its own worker thread, which owns the sending half of a channel
//! and posts [`ScanEvent`]s; the caller holds the receiving half inside a
//! [`ScanHandle`] and tracks the scan through [`ScanState`].
//!
//! ```text
//! ┌──────────────┐  submit   ┌───────────────┐  ScanEvent   ┌────────────┐
//! │  ScanService │ ────────→ │ worker thread │ ───────────→ │ ScanHandle │
//! └──────────────┘           └───────────────┘   channel    └────────────┘
//! ```
//!
//! A service runs at most one scan at a time; submitting while a scan is in
//! flight fails with [`Error::ScanInProgress`].

use crate::error::{Error, Result};
use crate::finding::ScanReport;
use crate::progress::{CancelToken, Progress, ProgressReporter};
use crate::scanner::{ScanOutcome, Scanner, ScannerConfig};
use crossbeam_channel::{Receiver, Sender};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error};

/// Messages posted by a running scan
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// Posted after each chunk
    Progress(Progress),
    /// Terminal: the scan finished
    Complete {
        /// The final report
        report: ScanReport,
    },
    /// Terminal: the source failed
    Error {
        /// Description of the failure
        message: String,
    },
    /// Terminal: the scan was cancelled
    Cancelled {
        /// Findings accumulated before cancellation
        report: ScanReport,
    },
}

impl ScanEvent {
    /// Returns true for events that end a scan
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ScanEvent::Progress(_))
    }
}

/// Lifecycle of one scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanState {
    /// Not started
    #[default]
    Idle,
    /// Chunks are being processed
    Scanning,
    /// Finished normally
    Completed,
    /// Ended by an unrecoverable error
    Failed,
    /// Ended by cancellation
    Cancelled,
}

impl ScanState {
    /// Returns true for states that admit no further transition
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanState::Completed | ScanState::Failed | ScanState::Cancelled
        )
    }

    /// The state after `event`; events after a terminal state are rejected
    pub fn apply(self, event: &ScanEvent) -> Result<ScanState> {
        if self.is_terminal() {
            return Err(Error::internal(format!(
                "scan already ended in state {:?}",
                self
            )));
        }

        Ok(match event {
            ScanEvent::Progress(_) => ScanState::Scanning,
            ScanEvent::Complete { .. } => ScanState::Completed,
            ScanEvent::Error { .. } => ScanState::Failed,
            ScanEvent::Cancelled { .. } => ScanState::Cancelled,
        })
    }
}

/// A source plus the parameters to scan it with
#[derive(Debug)]
pub struct ScanRequest<R> {
    source: R,
    config: ScannerConfig,
    cancel: CancelToken,
}

impl<R: Read + Send + 'static> ScanRequest<R> {
    /// A request with default parameters
    pub fn new(source: R) -> Self {
        Self::with_config(source, ScannerConfig::default())
    }

    /// A request with custom parameters
    pub fn with_config(source: R, config: ScannerConfig) -> Self {
        Self {
            source,
            config,
            cancel: CancelToken::new(),
        }
    }

    /// The token that will cancel this request once submitted
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

/// Forwards progress to the channel and yields once per chunk
struct ChannelReporter {
    tx: Sender<ScanEvent>,
}

impl ProgressReporter for ChannelReporter {
    fn on_progress(&mut self, progress: Progress) {
        // A dropped receiver only means nobody is listening
        let _ = self.tx.send(ScanEvent::Progress(progress));
        std::thread::yield_now();
    }
}

/// Clears the service's busy flag when the worker exits, on every path
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Long-lived scanner instance running one background scan at a time
#[derive(Debug, Clone, Default)]
pub struct ScanService {
    config: ScannerConfig,
    busy: Arc<AtomicBool>,
}

impl ScanService {
    /// A service whose requests default to `config`
    pub fn new(config: ScannerConfig) -> Self {
        Self {
            config,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns true while a scan is running
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Scans `source` with the service's configuration
    pub fn submit<R: Read + Send + 'static>(&self, source: R) -> Result<ScanHandle> {
        self.submit_request(ScanRequest::with_config(source, self.config.clone()))
    }

    /// Starts a scan on a worker thread
    pub fn submit_request<R: Read + Send + 'static>(
        &self,
        request: ScanRequest<R>,
    ) -> Result<ScanHandle> {
        request.config.validate()?;

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::ScanInProgress);
        }
        let guard = BusyGuard(Arc::clone(&self.busy));

        let (tx, rx) = crossbeam_channel::unbounded();
        let ScanRequest {
            source,
            config,
            cancel,
        } = request;
        let token = cancel.clone();

        let worker = std::thread::Builder::new()
            .name("sqlsalvage-scan".to_string())
            .spawn(move || {
                let _guard = guard;
                let scanner = Scanner::with_config(config);
                let mut reporter = ChannelReporter { tx: tx.clone() };

                let event = match scanner.scan(source, &mut reporter, &token) {
                    Ok(ScanOutcome::Completed(report)) => ScanEvent::Complete { report },
                    Ok(ScanOutcome::Cancelled(report)) => ScanEvent::Cancelled { report },
                    Err(e) => {
                        error!("Scan failed: {}", e);
                        ScanEvent::Error {
                            message: e.to_string(),
                        }
                    }
                };
                let _ = tx.send(event);
            })
            .map_err(|e| Error::internal(format!("failed to spawn scan worker: {}", e)))?;

        debug!("Scan worker started");

        Ok(ScanHandle {
            events: rx,
            cancel,
            worker: Some(worker),
            state: ScanState::Scanning,
        })
    }
}

/// The caller's side of a running scan
#[derive(Debug)]
pub struct ScanHandle {
    events: Receiver<ScanEvent>,
    cancel: CancelToken,
    worker: Option<JoinHandle<()>>,
    state: ScanState,
}

impl ScanHandle {
    /// Requests cancellation; honored at the next chunk boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The state reached by the events received so far
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Blocks for the next event; `None` once the scan has ended
    pub fn next_event(&mut self) -> Option<ScanEvent> {
        if self.state.is_terminal() {
            return None;
        }

        match self.events.recv() {
            Ok(event) => {
                // Workers post exactly one terminal event, so this cannot fail
                // while the state is not terminal.
                if let Ok(state) = self.state.apply(&event) {
                    self.state = state;
                }
                if event.is_terminal() {
                    self.join_worker();
                }
                Some(event)
            }
            Err(_) => {
                self.state = ScanState::Failed;
                self.join_worker();
                None
            }
        }
    }

    /// Drains events until the scan ends, calling `on_progress` for each update
    pub fn wait_with<F: FnMut(Progress)>(mut self, mut on_progress: F) -> Result<ScanOutcome> {
        while let Some(event) = self.next_event() {
            match event {
                ScanEvent::Progress(progress) => on_progress(progress),
                ScanEvent::Complete { report } => return Ok(ScanOutcome::Completed(report)),
                ScanEvent::Cancelled { report } => return Ok(ScanOutcome::Cancelled(report)),
                ScanEvent::Error { message } => return Err(Error::ScanFailed(message)),
            }
        }
        Err(Error::WorkerPanicked)
    }

    /// Drains events until the scan ends
    pub fn wait(self) -> Result<ScanOutcome> {
        self.wait_with(|_| {})
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Scan worker panicked");
            }
        }
    }
}
