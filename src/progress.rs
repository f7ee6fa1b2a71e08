use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread;

use serde::Serialize;

use crate::error::DicomError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    SetTotal { total: usize },
    AdvanceTo { value: usize },
    Log { line: String },
    Finished { ok: bool, message: String },
}

/// Receives download progress. Calls are fire-and-forget; the retriever never waits on them.
pub trait ProgressSink {
    fn set_total(&self, total: usize);
    fn advance_to(&self, value: usize);
    fn log(&self, line: &str);
    fn finished(&self, ok: bool, message: &str);
}

/// Routes an event to the matching sink method.
pub fn dispatch(sink: &dyn ProgressSink, event: ProgressEvent) {
    match event {
        ProgressEvent::SetTotal { total } => sink.set_total(total),
        ProgressEvent::AdvanceTo { value } => sink.advance_to(value),
        ProgressEvent::Log { line } => sink.log(&line),
        ProgressEvent::Finished { ok, message } => sink.finished(ok, &message),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn set_total(&self, _total: usize) {}
    fn advance_to(&self, _value: usize) {}
    fn log(&self, _line: &str) {}
    fn finished(&self, _ok: bool, _message: &str) {}
}

/// Forwards events over a channel. A dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: Sender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(tx: Sender<ProgressEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

impl ProgressSink for ChannelProgress {
    fn set_total(&self, total: usize) {
        self.send(ProgressEvent::SetTotal { total });
    }

    fn advance_to(&self, value: usize) {
        self.send(ProgressEvent::AdvanceTo { value });
    }

    fn log(&self, line: &str) {
        self.send(ProgressEvent::Log {
            line: line.to_string(),
        });
    }

    fn finished(&self, ok: bool, message: &str) {
        self.send(ProgressEvent::Finished {
            ok,
            message: message.to_string(),
        });
    }
}

/// Shared stop request, checked by the retriever between series and instances.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop. Returns whether a stop had already been requested.
    pub fn cancel(&self) -> bool {
        self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs `job` on a dedicated thread and replays its progress events, in order,
/// into `sink` on the calling thread.
pub fn run_on_worker<F, R>(sink: &dyn ProgressSink, job: F) -> Result<R, DicomError>
where
    F: FnOnce(&dyn ProgressSink) -> Result<R, DicomError> + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let progress = ChannelProgress::new(tx);
        job(&progress)
    });

    // The channel closes once the worker drops its sender.
    for event in rx {
        dispatch(sink, event);
    }

    handle
        .join()
        .map_err(|_| DicomError::WorkerPanicked)?
}
