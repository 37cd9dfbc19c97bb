use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

use crate::config::QueuePolicy;
use crate::error::{Error, Result};

/// Bounded hand-off between the raw-line producer and the pipeline
/// consumer. Full-queue behavior is policy-driven; an empty pop after the
/// timeout is a normal outcome, not an error.
pub struct IngestQueue {
    tx: mpsc::Sender<String>,
    dropped: AtomicU64,
}

pub struct IngestReceiver {
    rx: mpsc::Receiver<String>,
}

pub fn ingest_queue(capacity: usize) -> (IngestQueue, IngestReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        IngestQueue {
            tx,
            dropped: AtomicU64::new(0),
        },
        IngestReceiver { rx },
    )
}

impl IngestQueue {
    /// Hand one raw line to the pipeline. `Block` waits for capacity;
    /// `Drop` sheds the line and counts it.
    pub async fn push(&self, line: String, policy: QueuePolicy) -> Result<()> {
        match policy {
            QueuePolicy::Block => self
                .tx
                .send(line)
                .await
                .map_err(|_| Error::QueueClosed),
            QueuePolicy::Drop => match self.tx.try_send(line) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    // Shedding is expected under bursts; log every 1000th.
                    if dropped % 1000 == 1 {
                        tracing::warn!(dropped, "ingest queue full, shedding lines");
                    }
                    Ok(())
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::QueueClosed),
            },
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl IngestReceiver {
    /// Wait up to `timeout` for the next line. `Ok(None)` means the timeout
    /// expired with nothing to do; `Err(QueueClosed)` means every producer
    /// is gone.
    pub async fn pop(&mut self, timeout: Duration) -> Result<Option<String>> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(line)) => Ok(Some(line)),
            Ok(None) => Err(Error::QueueClosed),
            Err(_) => Ok(None),
        }
    }
}

/// Supervise the log source subprocess: spawn it, stream its stdout lines
/// into the queue, and on shutdown kill it and collect its exit status so
/// nothing is left behind as a zombie.
///
/// If the child dies on its own the task logs the failure and parks until
/// shutdown: the pipeline keeps serving whatever it already indexed.
pub async fn run_source_reader(
    command: Vec<String>,
    queue: Arc<IngestQueue>,
    policy: QueuePolicy,
    mut shutdown: watch::Receiver<bool>,
) {
    let Some((program, args)) = command.split_first() else {
        tracing::error!("source command is empty, reader not started");
        return;
    };

    let mut child = match Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            let err = Error::SourceProcessFailure(format!("spawn {program}: {e}"));
            tracing::error!(%err, "log source unavailable, pipeline continues without new data");
            return;
        }
    };

    let stdout = match child.stdout.take() {
        Some(stdout) => stdout,
        None => {
            tracing::error!("log source has no stdout pipe");
            let _ = child.kill().await;
            return;
        }
    };
    let mut lines = BufReader::new(stdout).lines();
    tracing::info!(source = %program, "log capture started");

    let mut captured: u64 = 0;
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.is_empty() {
                            continue;
                        }
                        captured += 1;
                        if captured % 50 == 0 {
                            tracing::debug!(captured, "still capturing");
                        }
                        if queue.push(line, policy).await.is_err() {
                            break; // consumer went away, shut down
                        }
                    }
                    Ok(None) => {
                        let err = Error::SourceProcessFailure("log source closed its output".into());
                        tracing::warn!(%err, "no further lines will arrive");
                        // Degraded mode: wait for shutdown so the child
                        // still gets reaped exactly once, below.
                        while !*shutdown.borrow() {
                            if shutdown.changed().await.is_err() {
                                break;
                            }
                        }
                        break;
                    }
                    Err(e) => {
                        let err = Error::SourceProcessFailure(e.to_string());
                        tracing::warn!(%err, "read error from log source");
                        break;
                    }
                }
            }
        }
    }

    // Terminate and reap. kill() sends the signal and awaits the exit
    // status, so no zombie survives this task.
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "log source already exited");
    }
    match child.wait().await {
        Ok(status) => tracing::info!(%status, "log source reaped"),
        Err(e) => tracing::warn!(error = %e, "failed to collect log source status"),
    }
}
