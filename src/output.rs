use std::cell::Cell;
use std::io::{self, Write};

use serde::Serialize;

use crate::domain::StoreReference;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::retriever::DownloadReport;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

/// Machine-readable output: one JSON object per progress event, then the result.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &DownloadReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_store(store: &StoreReference) -> io::Result<()> {
        Self::print_json(store)
    }

    fn print_event(event: ProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event) {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{line}");
        }
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn set_total(&self, total: usize) {
        Self::print_event(ProgressEvent::SetTotal { total });
    }

    fn advance_to(&self, value: usize) {
        Self::print_event(ProgressEvent::AdvanceTo { value });
    }

    fn log(&self, line: &str) {
        Self::print_event(ProgressEvent::Log {
            line: line.to_string(),
        });
    }

    fn finished(&self, ok: bool, message: &str) {
        Self::print_event(ProgressEvent::Finished {
            ok,
            message: message.to_string(),
        });
    }
}

/// Human progress on stderr.
#[derive(Default)]
pub struct ConsoleProgress {
    total: Cell<usize>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for ConsoleProgress {
    fn set_total(&self, total: usize) {
        self.total.set(total);
        eprintln!("series to download: {total}");
    }

    fn advance_to(&self, value: usize) {
        let total = self.total.get();
        eprintln!("[{}] series {value}/{total}", progress_bar(value, total));
    }

    fn log(&self, line: &str) {
        eprintln!("  {line}");
    }

    fn finished(&self, ok: bool, message: &str) {
        let (color, label) = if ok {
            ("\x1b[32m", "done")
        } else {
            ("\x1b[31m", "failed")
        };
        eprintln!("{color}{label}\x1b[0m: {message}");
    }
}

fn progress_bar(value: usize, total: usize) -> String {
    const WIDTH: usize = 20;
    let filled = if total == 0 {
        WIDTH
    } else {
        (value.min(total) * WIDTH) / total
    };
    format!("{}{}", "#".repeat(filled), "-".repeat(WIDTH - filled))
}
