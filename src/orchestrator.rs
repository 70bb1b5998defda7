//! Request lifecycle: a single background worker drains a FIFO queue of
//! conversion requests, converting through the shared `EngineAdapter` and
//! fanning each document out to the exporter. Callers observe progress on an
//! event channel and may cancel a request until its exports begin.

use crate::{
    engine::{adapter::validate_source, CancelToken, Engine, EngineAdapter, EngineState},
    error::{ConversionError, ExportError, SubmitError},
    export::{ExportFormat, Exporter},
    report::{ExportOutcome, ExportResult, RequestReport, RequestStatus},
    util::now_rfc3339,
};
use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RequestHandle(u64);

impl RequestHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One source file plus the formats to produce and where to put them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    source: PathBuf,
    formats: Vec<ExportFormat>,
    destination: PathBuf,
}

impl ConversionRequest {
    /// Duplicate formats are dropped; an empty format set is refused.
    pub fn new(
        source: impl Into<PathBuf>,
        formats: impl IntoIterator<Item = ExportFormat>,
        destination: impl Into<PathBuf>,
    ) -> Result<Self, SubmitError> {
        let mut unique = Vec::new();
        for f in formats {
            if !unique.contains(&f) {
                unique.push(f);
            }
        }
        if unique.is_empty() {
            return Err(SubmitError::NoFormats);
        }
        Ok(Self {
            source: source.into(),
            formats: unique,
            destination: destination.into(),
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn formats(&self) -> &[ExportFormat] {
        &self.formats
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Output files are named after the source file stem.
    pub fn stem(&self) -> String {
        self.source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Queued,
    Converting,
    Exporting,
    Done,
    Failed,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed | Phase::Cancelled)
    }
}

impl From<RequestStatus> for Phase {
    fn from(status: RequestStatus) -> Self {
        match status {
            RequestStatus::Done => Phase::Done,
            RequestStatus::Failed => Phase::Failed,
            RequestStatus::Cancelled => Phase::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub handle: RequestHandle,
    pub phase: Phase,
    /// 0..=100.
    pub progress: u8,
    pub detail: EventDetail,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventDetail {
    Accepted { source: PathBuf },
    Converting,
    /// The engine is still loading; the request waits behind it.
    EngineLoading,
    Converted { page_count: usize, table_count: usize },
    Exported(ExportResult),
    /// Always the last event for a handle.
    Finished(RequestReport),
}

struct Ticket {
    cancel: CancelToken,
    phase: Mutex<Phase>,
}

impl Ticket {
    fn new() -> Self {
        Self {
            cancel: CancelToken::new(),
            phase: Mutex::new(Phase::Queued),
        }
    }

    /// Moves to `next` unless a cancel landed first. `cancel` flips the flag
    /// under the same lock, so a request is either cancelled or advanced.
    fn advance(&self, next: Phase) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cancel.is_cancelled() {
            return false;
        }
        *phase = next;
        true
    }

    fn request_cancel(&self) -> bool {
        let phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        match *phase {
            Phase::Queued | Phase::Converting => {
                self.cancel.cancel();
                true
            }
            _ => false,
        }
    }
}

type Tickets = Arc<Mutex<HashMap<RequestHandle, Arc<Ticket>>>>;

struct Job {
    handle: RequestHandle,
    request: ConversionRequest,
    ticket: Arc<Ticket>,
}

pub struct Orchestrator<E: Engine> {
    adapter: Arc<EngineAdapter<E>>,
    jobs: Option<Sender<Job>>,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
    tickets: Tickets,
    next_id: AtomicU64,
    worker: Option<JoinHandle<()>>,
}

impl<E: Engine> Orchestrator<E> {
    /// Spawns the worker thread. The engine is not loaded until the first
    /// request reaches it (or someone calls `adapter().ensure_ready()`).
    pub fn start(adapter: Arc<EngineAdapter<E>>, exporter: Exporter) -> Result<Self> {
        let (jobs_tx, jobs_rx) = unbounded::<Job>();
        let (events_tx, events_rx) = unbounded::<Event>();
        let tickets: Tickets = Arc::default();

        let worker = Worker {
            adapter: Arc::clone(&adapter),
            exporter,
            events: events_tx.clone(),
            tickets: Arc::clone(&tickets),
        };
        let handle = std::thread::Builder::new()
            .name("conversion-worker".into())
            .spawn(move || worker.run(jobs_rx))
            .context("spawn conversion worker")?;

        Ok(Self {
            adapter,
            jobs: Some(jobs_tx),
            events_tx,
            events_rx,
            tickets,
            next_id: AtomicU64::new(1),
            worker: Some(handle),
        })
    }

    pub fn adapter(&self) -> &Arc<EngineAdapter<E>> {
        &self.adapter
    }

    /// A receiver for lifecycle events. Every clone competes for the same
    /// events, so hand it to a single consumer.
    ///
    /// The channel is unbounded and the orchestrator holds both ends, so it
    /// never reports disconnection while the orchestrator is alive and events
    /// nobody receives stay buffered. Drain it, or drop the orchestrator; once
    /// the orchestrator is gone the buffered events can still be read and the
    /// receiver then disconnects.
    pub fn events(&self) -> Receiver<Event> {
        self.events_rx.clone()
    }

    /// Validates the source synchronously and queues the request. A source
    /// that cannot be read is refused here and never reaches the engine.
    pub fn submit(&self, request: ConversionRequest) -> Result<RequestHandle, SubmitError> {
        validate_source(request.source(), self.adapter.max_input_file_bytes())?;
        let jobs = self.jobs.as_ref().ok_or(SubmitError::ShutDown)?;

        let handle = RequestHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let ticket = Arc::new(Ticket::new());
        self.lock_tickets().insert(handle, Arc::clone(&ticket));

        // Accepted goes out before the job is visible to the worker.
        let _ = self.events_tx.send(Event {
            handle,
            phase: Phase::Queued,
            progress: 0,
            detail: EventDetail::Accepted {
                source: request.source.clone(),
            },
        });
        info!("queued {handle}: {}", request.source.display());

        if jobs
            .send(Job {
                handle,
                request,
                ticket,
            })
            .is_err()
        {
            self.lock_tickets().remove(&handle);
            return Err(SubmitError::ShutDown);
        }
        Ok(handle)
    }

    /// Submits each request in order; one refusal does not affect the others.
    pub fn submit_batch(
        &self,
        requests: impl IntoIterator<Item = ConversionRequest>,
    ) -> Vec<Result<RequestHandle, SubmitError>> {
        requests.into_iter().map(|r| self.submit(r)).collect()
    }

    /// Requests cancellation. Returns false when the handle is unknown,
    /// already finished, or already exporting.
    pub fn cancel(&self, handle: RequestHandle) -> bool {
        let ticket = self.lock_tickets().get(&handle).cloned();
        let accepted = ticket.is_some_and(|t| t.request_cancel());
        if accepted {
            info!("cancel requested for {handle}");
        } else {
            debug!("cancel ignored for {handle}");
        }
        accepted
    }

    /// Where an unfinished request currently is; `None` once it has finished
    /// or for a handle this orchestrator never issued.
    pub fn phase(&self, handle: RequestHandle) -> Option<Phase> {
        let ticket = self.lock_tickets().get(&handle).cloned()?;
        let phase = *ticket.phase.lock().unwrap_or_else(PoisonError::into_inner);
        Some(phase)
    }

    /// Requests that have been accepted but have not finished.
    pub fn pending(&self) -> usize {
        self.lock_tickets().len()
    }

    /// Stops accepting requests, lets the queue drain, and joins the worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("conversion worker panicked");
            }
        }
    }

    fn lock_tickets(&self) -> std::sync::MutexGuard<'_, HashMap<RequestHandle, Arc<Ticket>>> {
        self.tickets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: Engine> Drop for Orchestrator<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker<E: Engine> {
    adapter: Arc<EngineAdapter<E>>,
    exporter: Exporter,
    events: Sender<Event>,
    tickets: Tickets,
}

impl<E: Engine> Worker<E> {
    fn run(self, jobs: Receiver<Job>) {
        debug!("conversion worker started");
        for job in jobs.iter() {
            let started = now_rfc3339();
            let report = match catch_unwind(AssertUnwindSafe(|| self.process(&job, &started))) {
                Ok(report) => report,
                Err(_) => {
                    error!("{}: worker panicked while processing", job.handle);
                    let mut report = blank_report(&job, RequestStatus::Failed, started);
                    report.error = Some("internal error while processing request".into());
                    report
                }
            };

            // Drop the ticket first so `cancel` is false once Finished is observable.
            self.tickets
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&job.handle);

            match report.status {
                RequestStatus::Done => info!(
                    "{} done: {} file(s), {} failed export(s)",
                    job.handle,
                    report.output_files().count(),
                    report.failed_exports().count()
                ),
                RequestStatus::Failed => warn!(
                    "{} failed: {}",
                    job.handle,
                    report.error.as_deref().unwrap_or("unknown error")
                ),
                RequestStatus::Cancelled => info!("{} cancelled", job.handle),
            }
            self.emit(
                job.handle,
                report.status.into(),
                100,
                EventDetail::Finished(report),
            );
        }
        debug!("conversion worker stopped");
    }

    fn process(&self, job: &Job, started: &str) -> RequestReport {
        let handle = job.handle;
        let request = &job.request;
        let started = started.to_string();

        if !job.ticket.advance(Phase::Converting) {
            return blank_report(job, RequestStatus::Cancelled, started);
        }
        self.emit(handle, Phase::Converting, 10, EventDetail::Converting);
        if self.adapter.state() != EngineState::Ready {
            self.emit(handle, Phase::Converting, 10, EventDetail::EngineLoading);
        }

        let doc = match self.adapter.convert(request.source(), &job.ticket.cancel) {
            Ok(doc) => doc,
            Err(ConversionError::Cancelled) => {
                return blank_report(job, RequestStatus::Cancelled, started);
            }
            Err(err) => {
                let mut report = blank_report(job, RequestStatus::Failed, started);
                report.error = Some(err.to_string());
                report.failure = Some(err);
                return report;
            }
        };
        let (page_count, table_count) = (doc.page_count(), doc.table_count());
        self.emit(
            handle,
            Phase::Converting,
            50,
            EventDetail::Converted {
                page_count,
                table_count,
            },
        );

        if !job.ticket.advance(Phase::Exporting) {
            let mut report = blank_report(job, RequestStatus::Cancelled, started);
            report.page_count = page_count;
            report.table_count = table_count;
            return report;
        }

        let dir = request.destination();
        let stem = request.stem();
        let exports = if let Err(err) = std::fs::create_dir_all(dir) {
            warn!("{handle}: cannot create {}: {err}", dir.display());
            request
                .formats()
                .iter()
                .map(|&format| {
                    let error = ExportError::write(dir, &err);
                    let result = ExportResult {
                        format,
                        destination: format.destination(dir, &stem),
                        outcome: ExportOutcome::Failure {
                            reason: error.to_string(),
                            files: Vec::new(),
                            error,
                        },
                    };
                    self.emit(handle, Phase::Exporting, 100, EventDetail::Exported(result.clone()));
                    result
                })
                .collect()
        } else {
            let total = request.formats().len();
            let finished = AtomicUsize::new(0);
            self.exporter
                .export_all_with(&doc, request.formats(), dir, &stem, |result| {
                    let n = finished.fetch_add(1, Ordering::SeqCst) + 1;
                    let progress = 50 + (50 * n / total) as u8;
                    self.emit(handle, Phase::Exporting, progress, EventDetail::Exported(result.clone()));
                })
        };

        RequestReport {
            page_count,
            table_count,
            exports,
            ..blank_report(job, RequestStatus::Done, started)
        }
    }

    fn emit(&self, handle: RequestHandle, phase: Phase, progress: u8, detail: EventDetail) {
        // The orchestrator owns a receiver for as long as the worker runs.
        let _ = self.events.send(Event {
            handle,
            phase,
            progress: progress.min(100),
            detail,
        });
    }
}

fn blank_report(job: &Job, status: RequestStatus, started: String) -> RequestReport {
    RequestReport {
        handle: job.handle,
        source: job.request.source.clone(),
        status,
        page_count: 0,
        table_count: 0,
        exports: Vec::new(),
        error: None,
        failure: None,
        started,
        finished: now_rfc3339(),
    }
}
