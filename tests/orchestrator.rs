mod common;

use common::{write_pdf, FakeEngine, Gate, Script};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use pdf_extractor::engine::{EngineAdapter, EngineState};
use pdf_extractor::error::{ConversionError, EngineError, SubmitError};
use pdf_extractor::export::{ExportFormat, Exporter};
use pdf_extractor::orchestrator::{
    ConversionRequest, Event, EventDetail, Orchestrator, Phase, RequestHandle,
};
use pdf_extractor::report::{RequestReport, RequestStatus};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(10);

fn start(script: &Script) -> Orchestrator<FakeEngine> {
    let adapter = Arc::new(EngineAdapter::new(FakeEngine::new(script.clone())));
    Orchestrator::start(adapter, Exporter::default()).expect("start orchestrator")
}

fn request(source: &Path, formats: &[ExportFormat], out: &Path) -> ConversionRequest {
    ConversionRequest::new(source, formats.iter().copied(), out).expect("request")
}

/// Collects events until `n` requests have finished.
fn drain(events: &Receiver<Event>, n: usize) -> (Vec<Event>, Vec<RequestReport>) {
    let mut seen = Vec::new();
    let mut reports = Vec::new();
    while reports.len() < n {
        let event = events.recv_timeout(WAIT).expect("event before timeout");
        if let EventDetail::Finished(report) = &event.detail {
            reports.push(report.clone());
        }
        seen.push(event);
    }
    (seen, reports)
}

fn by_handle(reports: Vec<RequestReport>) -> HashMap<RequestHandle, RequestReport> {
    reports.into_iter().map(|r| (r.handle, r)).collect()
}

#[test]
fn request_runs_from_accepted_to_done() {
    let script = Script::default();
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    let pdf = write_pdf(tmp.path(), "doc.pdf");
    let orch = start(&script);
    let events = orch.events();

    let handle = orch
        .submit(request(&pdf, &[ExportFormat::Structured, ExportFormat::Tabular], &out))
        .unwrap();
    let (seen, reports) = drain(&events, 1);

    let report = &reports[0];
    assert_eq!(report.handle, handle);
    assert_eq!(report.status, RequestStatus::Done);
    assert_eq!(report.page_count, 3);
    assert_eq!(report.table_count, 1);
    assert_eq!(report.exports.len(), 2);
    assert!(report.exports.iter().all(|e| e.is_success()));
    assert!(out.join("doc.json").is_file());

    let csv = std::fs::read_to_string(out.join("doc_table_1.csv")).unwrap();
    assert_eq!(csv.lines().count(), 3);

    assert!(matches!(seen[0].detail, EventDetail::Accepted { .. }));
    assert_eq!(seen[0].phase, Phase::Queued);
    assert!(seen.iter().any(|e| matches!(e.detail, EventDetail::EngineLoading)));
    assert!(seen.iter().any(|e| matches!(
        e.detail,
        EventDetail::Converted {
            page_count: 3,
            table_count: 1
        }
    )));
    let exported = seen
        .iter()
        .filter(|e| matches!(e.detail, EventDetail::Exported(_)))
        .count();
    assert_eq!(exported, 2);
    let last = seen.last().unwrap();
    assert_eq!(last.phase, Phase::Done);
    assert_eq!(last.progress, 100);
    assert!(seen.iter().all(|e| e.handle == handle));

    assert_eq!(orch.pending(), 0);
    assert!(!orch.cancel(handle));
    orch.shutdown();
}

#[test]
fn nonexistent_source_is_refused_at_submission() {
    let script = Script::default();
    let tmp = tempfile::tempdir().unwrap();
    let orch = start(&script);
    let events = orch.events();
    let missing = tmp.path().join("nope.pdf");

    let err = orch
        .submit(request(&missing, &[ExportFormat::Structured], tmp.path()))
        .unwrap_err();

    assert!(matches!(
        err,
        SubmitError::Rejected(ConversionError::UnreadableFile { .. })
    ));
    assert!(events.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(script.loads(), 0);
    assert_eq!(orch.adapter().state(), EngineState::Uninitialized);
}

#[test]
fn empty_format_set_is_refused() {
    let err = ConversionRequest::new("a.pdf", Vec::<ExportFormat>::new(), "out").unwrap_err();
    assert_eq!(err, SubmitError::NoFormats);

    let req = ConversionRequest::new(
        "dir/a.pdf",
        [ExportFormat::Markup, ExportFormat::Markup],
        "out",
    )
    .unwrap();
    assert_eq!(req.formats(), &[ExportFormat::Markup]);
    assert_eq!(req.stem(), "a");
}

#[test]
fn a_failing_request_does_not_affect_the_next() {
    let script = Script::default();
    let tmp = tempfile::tempdir().unwrap();
    let broken = write_pdf(tmp.path(), "broken.pdf");
    let good = write_pdf(tmp.path(), "good.pdf");
    let orch = start(&script);
    let events = orch.events();

    let results = orch.submit_batch([
        request(&broken, &[ExportFormat::Structured], tmp.path()),
        request(&good, &[ExportFormat::Structured], tmp.path()),
    ]);
    let handles: Vec<RequestHandle> = results.into_iter().map(Result::unwrap).collect();
    let (_, reports) = drain(&events, 2);

    // Single worker, so requests finish in submission order.
    assert_eq!(reports[0].handle, handles[0]);
    assert_eq!(reports[1].handle, handles[1]);

    assert_eq!(reports[0].status, RequestStatus::Failed);
    assert!(matches!(
        reports[0].failure,
        Some(ConversionError::EngineFailure(_))
    ));
    assert!(reports[0].exports.is_empty());
    assert!(!tmp.path().join("broken.json").exists());

    assert_eq!(reports[1].status, RequestStatus::Done);
    assert!(tmp.path().join("good.json").is_file());
    assert_eq!(script.loads(), 1);
}

#[test]
fn engine_load_failure_is_reported_until_reset() {
    let script = Script::default();
    script.failing_loads.store(1, Ordering::SeqCst);
    let tmp = tempfile::tempdir().unwrap();
    let pdf = write_pdf(tmp.path(), "a.pdf");
    let orch = start(&script);
    let events = orch.events();
    let req = || request(&pdf, &[ExportFormat::Structured], tmp.path());

    orch.submit(req()).unwrap();
    orch.submit(req()).unwrap();
    let (_, reports) = drain(&events, 2);

    let expected = ConversionError::EngineUnavailable(EngineError::Load("layout model missing".into()));
    for report in &reports {
        assert_eq!(report.status, RequestStatus::Failed);
        assert_eq!(report.failure.as_ref(), Some(&expected));
    }
    assert_eq!(script.loads(), 1);

    assert!(orch.adapter().reset());
    orch.submit(req()).unwrap();
    let (_, reports) = drain(&events, 1);
    assert_eq!(reports[0].status, RequestStatus::Done);
    assert_eq!(script.loads(), 2);
}

#[test]
fn cancelling_a_queued_request_skips_it() {
    let (started_tx, started_rx) = unbounded();
    let gate = Gate::default();
    let script = Script {
        gate: Some(gate.clone()),
        started: Some(started_tx),
        ..Script::default()
    };
    let tmp = tempfile::tempdir().unwrap();
    let a = write_pdf(tmp.path(), "a.pdf");
    let b = write_pdf(tmp.path(), "b.pdf");
    let orch = start(&script);
    let events = orch.events();

    let first = orch.submit(request(&a, &[ExportFormat::Structured], tmp.path())).unwrap();
    let second = orch.submit(request(&b, &[ExportFormat::Structured], tmp.path())).unwrap();
    assert_eq!(started_rx.recv_timeout(WAIT).unwrap(), a);

    assert!(orch.cancel(second));
    assert!(orch.cancel(second), "still cancellable until the worker reaches it");
    gate.open();
    let reports = by_handle(drain(&events, 2).1);

    assert_eq!(reports[&first].status, RequestStatus::Done);
    assert_eq!(reports[&second].status, RequestStatus::Cancelled);
    assert!(reports[&second].exports.is_empty());
    assert_eq!(script.converts(), 1);
    assert!(!tmp.path().join("b.json").exists());
    assert!(!orch.cancel(second));
}

#[test]
fn cancelling_during_conversion_skips_exports() {
    let (started_tx, started_rx) = unbounded();
    let gate = Gate::default();
    let script = Script {
        gate: Some(gate.clone()),
        started: Some(started_tx),
        ..Script::default()
    };
    let tmp = tempfile::tempdir().unwrap();
    let a = write_pdf(tmp.path(), "a.pdf");
    let orch = start(&script);
    let events = orch.events();

    let handle = orch.submit(request(&a, &ExportFormat::ALL, tmp.path())).unwrap();
    started_rx.recv_timeout(WAIT).unwrap();
    assert!(orch.cancel(handle));
    gate.open();

    let (seen, reports) = drain(&events, 1);
    assert_eq!(reports[0].status, RequestStatus::Cancelled);
    assert_eq!(seen.last().unwrap().phase, Phase::Cancelled);
    assert!(!seen.iter().any(|e| matches!(e.detail, EventDetail::Exported(_))));
    assert!(!tmp.path().join("a.json").exists());
    assert!(!tmp.path().join("a.md").exists());
}

#[test]
fn unknown_handles_cannot_be_cancelled() {
    let script = Script::default();
    let tmp = tempfile::tempdir().unwrap();
    let pdf = write_pdf(tmp.path(), "a.pdf");
    let orch = start(&script);
    let events = orch.events();

    let handle = orch.submit(request(&pdf, &[ExportFormat::Markup], tmp.path())).unwrap();
    drain(&events, 1);

    assert!(!orch.cancel(handle));
    assert_eq!(orch.pending(), 0);
}

#[test]
fn dropping_the_orchestrator_drains_the_queue() {
    let script = Script {
        load_delay: Duration::from_millis(20),
        ..Script::default()
    };
    let tmp = tempfile::tempdir().unwrap();
    let pdfs: Vec<_> = ["one.pdf", "two.pdf", "three.pdf"]
        .iter()
        .map(|n| write_pdf(tmp.path(), n))
        .collect();
    let orch = start(&script);
    let events = orch.events();

    for pdf in &pdfs {
        orch.submit(request(pdf, &[ExportFormat::Structured], tmp.path())).unwrap();
    }
    drop(orch);

    let finished = events
        .try_iter()
        .filter(|e| matches!(e.detail, EventDetail::Finished(_)))
        .count();
    assert_eq!(finished, 3);
    for stem in ["one", "two", "three"] {
        assert!(tmp.path().join(format!("{stem}.json")).is_file());
    }
    assert!(events.recv().is_err(), "channel disconnects once drained");
}

#[test]
fn events_stay_buffered_until_the_orchestrator_is_dropped() {
    let script = Script::default();
    let tmp = tempfile::tempdir().unwrap();
    let a = write_pdf(tmp.path(), "a.pdf");
    let b = write_pdf(tmp.path(), "b.pdf");
    let orch = start(&script);
    let events = orch.events();

    orch.submit(request(&a, &[ExportFormat::Structured], tmp.path())).unwrap();
    drain(&events, 1);
    // Idle but alive: the channel stays open.
    assert!(matches!(
        events.recv_timeout(Duration::from_millis(50)),
        Err(RecvTimeoutError::Timeout)
    ));

    let second = orch.submit(request(&b, &[ExportFormat::Structured], tmp.path())).unwrap();
    let deadline = Instant::now() + WAIT;
    while orch.phase(second).is_some() {
        assert!(Instant::now() < deadline, "request did not finish");
        std::thread::sleep(Duration::from_millis(5));
    }
    drop(orch);

    let buffered: Vec<Event> = events.try_iter().collect();
    assert!(buffered.iter().all(|e| e.handle == second));
    assert!(matches!(buffered[0].detail, EventDetail::Accepted { .. }));
    assert!(matches!(
        buffered.last().unwrap().detail,
        EventDetail::Finished(_)
    ));
    assert!(matches!(
        events.recv_timeout(Duration::from_millis(50)),
        Err(RecvTimeoutError::Disconnected)
    ));
}

#[cfg(unix)]
#[test]
fn cancel_is_refused_once_exports_have_started() {
    let script = Script::default();
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    std::fs::create_dir(&out).unwrap();
    // A fifo on the temporary name holds the structured export open until read.
    let fifo = out.join("doc.json.part");
    let status = std::process::Command::new("mkfifo")
        .arg(&fifo)
        .status()
        .expect("run mkfifo");
    assert!(status.success());
    let pdf = write_pdf(tmp.path(), "doc.pdf");
    let orch = start(&script);
    let events = orch.events();

    let handle = orch
        .submit(request(&pdf, &[ExportFormat::Structured, ExportFormat::Markup], &out))
        .unwrap();
    let deadline = Instant::now() + WAIT;
    while orch.phase(handle) != Some(Phase::Exporting) {
        assert!(Instant::now() < deadline, "request never reached exporting");
        std::thread::sleep(Duration::from_millis(5));
    }

    assert!(!orch.cancel(handle));
    assert_eq!(orch.phase(handle), Some(Phase::Exporting));

    let json = std::fs::read(&fifo).unwrap();
    assert!(json.starts_with(b"{"));
    let (seen, reports) = drain(&events, 1);

    assert_eq!(reports[0].status, RequestStatus::Done);
    assert_eq!(reports[0].exports.len(), 2);
    assert!(reports[0].exports.iter().all(|e| e.is_success()));
    assert!(out.join("doc.html").is_file());
    assert!(!seen.iter().any(|e| e.phase == Phase::Cancelled));
    assert_eq!(orch.phase(handle), None);
}
