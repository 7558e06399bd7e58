//! File-backed audit logger.
//!
//! Callers hand entries to an unbounded channel and return immediately. A
//! single writer thread owns the file, so appends are serialized and each line
//! is written with one `write_all` call.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::error::TelemetryError;
use super::events::{EntryKind, LogEntry};

/// How long `shutdown` waits for the writer to drain.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// On-disk line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuditFormat {
    /// `<timestamp> <KIND> <host>:<port> <DECISION> <rule>`
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

enum WriterMsg {
    Entry(LogEntry),
    Shutdown(oneshot::Sender<()>),
}

enum Sink {
    Null,
    Writer(mpsc::UnboundedSender<WriterMsg>),
    Capture(Arc<Mutex<Vec<LogEntry>>>),
}

/// Append-only audit sink shared by every decision point.
pub struct AuditLogger {
    sink: Sink,
}

impl AuditLogger {
    /// Open (or create) the audit file and start the writer thread.
    pub fn open(path: impl AsRef<Path>, format: AuditFormat) -> Result<Self, TelemetryError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| TelemetryError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| TelemetryError::Open {
                path: path.clone(),
                source,
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("audit-writer".to_string())
            .spawn(move || run_writer(file, format, rx, path))
            .map_err(TelemetryError::SpawnWriter)?;

        Ok(Self {
            sink: Sink::Writer(tx),
        })
    }

    /// Create a null audit logger that discards all entries.
    pub fn new_null() -> Self {
        Self { sink: Sink::Null }
    }

    /// Create a logger that keeps entries in memory.
    ///
    /// The returned [`AuditCapture`] reads back what was logged.
    pub fn capture() -> (Self, AuditCapture) {
        let entries = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                sink: Sink::Capture(entries.clone()),
            },
            AuditCapture { entries },
        )
    }

    /// Queue an entry for writing. Never blocks and never fails.
    pub fn log(&self, entry: LogEntry) {
        match &self.sink {
            Sink::Null => {}
            Sink::Writer(tx) => {
                if let Err(mpsc::error::SendError(WriterMsg::Entry(entry))) =
                    tx.send(WriterMsg::Entry(entry))
                {
                    warn!("Audit writer stopped, dropping entry: {}", entry.to_line());
                }
            }
            Sink::Capture(entries) => {
                if let Ok(mut entries) = entries.lock() {
                    entries.push(entry);
                }
            }
        }
    }

    /// Build and queue an entry stamped with the current time.
    pub fn record(
        &self,
        kind: EntryKind,
        host: &str,
        port: u32,
        decision: &str,
        rule: &str,
    ) {
        self.log(LogEntry::new(kind, host, port, decision, rule));
    }

    /// Flush pending entries and stop the writer thread.
    ///
    /// Waits at most a couple of seconds. Entries logged afterwards are
    /// dropped with a warning.
    pub async fn shutdown(&self) {
        let Sink::Writer(tx) = &self.sink else {
            return;
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if tx.send(WriterMsg::Shutdown(ack_tx)).is_err() {
            return;
        }
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, ack_rx).await.is_err() {
            warn!("Audit writer did not drain within {:?}", SHUTDOWN_TIMEOUT);
        }
    }

    /// Check if this is a null logger.
    pub fn is_null(&self) -> bool {
        matches!(self.sink, Sink::Null)
    }
}

/// Read side of [`AuditLogger::capture`].
#[derive(Clone)]
pub struct AuditCapture {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl AuditCapture {
    /// Snapshot of everything logged so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of entries with the given decision string.
    pub fn count_decision(&self, decision: &str) -> usize {
        self.entries()
            .iter()
            .filter(|e| e.decision == decision)
            .count()
    }
}

fn run_writer(
    mut file: File,
    format: AuditFormat,
    mut rx: mpsc::UnboundedReceiver<WriterMsg>,
    path: PathBuf,
) {
    debug!("Audit writer started for {:?}", path);

    while let Some(msg) = rx.blocking_recv() {
        match msg {
            WriterMsg::Entry(entry) => {
                let mut line = match render(&entry, format) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Failed to render audit entry: {}", e);
                        continue;
                    }
                };
                line.push('\n');

                if let Err(e) = file.write_all(line.as_bytes()).and_then(|_| file.flush()) {
                    // Fallback channel: the decision still reaches stderr
                    warn!("Failed to write audit log {:?}: {} | {}", path, e, line.trim_end());
                }
            }
            WriterMsg::Shutdown(ack) => {
                let _ = file.flush();
                let _ = ack.send(());
                break;
            }
        }
    }

    debug!("Audit writer stopped for {:?}", path);
}

fn render(entry: &LogEntry, format: AuditFormat) -> Result<String, TelemetryError> {
    match format {
        AuditFormat::Text => Ok(entry.to_line()),
        AuditFormat::Json => Ok(serde_json::to_string(entry)?),
    }
}
