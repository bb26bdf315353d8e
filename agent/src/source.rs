//! Scan event sources.
//!
//! A reader is anything that produces badge identifiers. Keyboard-wedge
//! readers and serial adapters both end up as lines of text, so the only
//! built-in source turns an async line stream into [`ScanEvent`]s.

use crate::now_ms;
use attend_engine::Timestamp;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One badge read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEvent {
    pub identifier: String,
    /// Milliseconds since the Unix epoch
    pub observed_at: Timestamp,
}

impl ScanEvent {
    pub fn new(identifier: impl Into<String>, observed_at: Timestamp) -> Self {
        Self {
            identifier: identifier.into(),
            observed_at,
        }
    }

    /// An event observed now.
    pub fn now(identifier: impl Into<String>) -> Self {
        Self::new(identifier, now_ms())
    }
}

/// Sending half of the scan event queue.
pub type EventSender = mpsc::Sender<ScanEvent>;

/// Read identifiers line by line until EOF, cancellation, or the queue closes.
///
/// Lines are trimmed and blank lines ignored. Returns the number of events
/// sent.
pub fn spawn_line_reader<R>(
    reader: R,
    sender: EventSender,
    cancel: CancellationToken,
) -> JoinHandle<std::io::Result<u64>>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = reader.lines();
        let mut sent = 0u64;

        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                tracing::info!("Reader reached end of input");
                break;
            };

            let identifier = line.trim();
            if identifier.is_empty() {
                continue;
            }

            tracing::debug!(identifier, "Badge read");
            if sender.send(ScanEvent::now(identifier)).await.is_err() {
                tracing::debug!("Event queue closed, reader stopping");
                break;
            }
            sent += 1;
        }

        Ok(sent)
    })
}
