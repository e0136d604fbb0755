//! Event reporting and the control-plane output transport.
//!
//! Components never write to the transport directly. They hand strings to a
//! [`Reporter`], which pushes them onto an unbounded, order-preserving queue;
//! a separate dispatcher task drains the queue into the transport writer. No
//! producer ever blocks on transport I/O.
//!
//! | Method    | Queued when          | Prefix     | Trace level |
//! |-----------|----------------------|------------|-------------|
//! | `respond` | always               | none       | debug       |
//! | `log`     | logging toggle is on | `[LOG] `   | debug       |
//! | `error`   | always               | `[ERROR] ` | error       |
//!
//! `error` also latches a fault indicator that the display collaborator can
//! poll (the board's red LED).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Cloneable handle for reporting events to the transport.
#[derive(Debug, Clone)]
pub struct Reporter {
    tx: mpsc::UnboundedSender<String>,
    logging: Arc<AtomicBool>,
    fault: Arc<AtomicBool>,
}

/// Create a reporter and the receiving end of its output queue.
pub fn channel(logging_enabled: bool) -> (Reporter, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let reporter = Reporter {
        tx,
        logging: Arc::new(AtomicBool::new(logging_enabled)),
        fault: Arc::new(AtomicBool::new(false)),
    };
    (reporter, rx)
}

impl Reporter {
    fn enqueue(&self, message: String) {
        if self.tx.send(message).is_err() {
            warn!("Output queue closed; message dropped");
        }
    }

    /// Queue a command response.
    pub fn respond(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(%message, "Response queued");
        self.enqueue(message);
    }

    /// Report a routine event. Echoed to the transport only while logging is on.
    pub fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        debug!(event = message, "Logged event");
        if self.logging_enabled() {
            self.enqueue(format!("[LOG] {message}"));
        }
    }

    /// Report a non-fatal error and latch the fault indicator.
    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        error!(%message, "Reported error");
        self.fault.store(true, Ordering::Release);
        self.enqueue(format!("[ERROR] {message}"));
    }

    /// Turn `LOGGING` trace lines on or off.
    pub fn set_logging(&self, enabled: bool) {
        self.logging.store(enabled, Ordering::Release);
    }

    /// Whether `LOGGING` trace lines are emitted.
    pub fn logging_enabled(&self) -> bool {
        self.logging.load(Ordering::Acquire)
    }

    /// Whether an error has been reported since the last `clear_fault`.
    pub fn fault_latched(&self) -> bool {
        self.fault.load(Ordering::Acquire)
    }

    /// Reset the fault latch.
    pub fn clear_fault(&self) {
        self.fault.store(false, Ordering::Release);
    }
}

/// Transport loop: write every queued message to `writer` in order.
///
/// A newline is appended to messages that lack one. Returns when every
/// `Reporter` has been dropped and the queue is empty.
pub async fn dispatch<W>(mut rx: mpsc::UnboundedReceiver<String>, mut writer: W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        writer.write_all(message.as_bytes()).await?;
        if !message.ends_with('\n') {
            writer.write_all(b"\n").await?;
        }
        writer.flush().await?;
    }
    Ok(())
}
