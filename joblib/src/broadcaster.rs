use crate::errors::{JobError, Result};
use crate::types::{JobId, OutputBlob};
use std::cmp;
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;
use tokio::select;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Number of chunks a subscriber may have queued before delivery to it is deferred.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 128;

const READ_CHUNK_SIZE: usize = 4096;

/// The receiving end of a subscription. Yields output chunks in write order.
pub type OutputReceiver = mpsc::Receiver<Result<OutputBlob>>;

/// An append-only, file-backed output log which any number of subscribers can tail.
///
/// Every subscriber gets its own delivery task and its own cursor into the log, starting from
/// the first byte ever written. Writers never wait on subscribers: a write only pokes each
/// subscriber's single-slot notify channel, and a poke that finds the slot already full is
/// dropped since the subscriber is going to re-read up to the end of the log anyway.
#[derive(Clone)]
pub struct Broadcaster {
    job_id: JobId,
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    /// `None` once the log is closed.
    file: Option<NamedTempFile>,
    len: u64,
    listeners: HashMap<u64, mpsc::Sender<()>>,
    next_listener: u64,
}

/// Outcome of a single read-and-push pass.
enum Flush {
    /// The subscriber has everything written so far.
    Drained,
    /// The subscriber queue filled up before the end of the log was reached.
    Backlogged,
    /// The log was closed or the subscriber went away.
    Finished,
}

impl Broadcaster {
    pub fn new(job_id: JobId) -> io::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(&format!("joblog-{}-", job_id))
            .suffix(".txt")
            .tempfile()?;
        Ok(Self {
            job_id,
            inner: Arc::new(Mutex::new(Inner {
                file: Some(file),
                len: 0,
                listeners: HashMap::new(),
                next_listener: 0,
            })),
        })
    }

    /// Append `buf` to the log and wake up every subscriber.
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.lock();
        let file: &File = inner
            .file
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "output log is closed"))?
            .as_file();
        // `len` is the end of the log, whatever a failed write may have left past it
        file.write_all_at(buf, inner.len)?;
        inner.len += buf.len() as u64;
        for notify in inner.listeners.values() {
            // full means a wake-up is already pending
            let _ = notify.try_send(());
        }
        Ok(buf.len())
    }

    /// Add a subscriber which replays the log from the start and then follows new writes.
    ///
    /// The stream ends when `cancel` fires, the receiver is dropped or the log is closed.
    pub fn subscribe(&self, cancel: CancellationToken) -> OutputReceiver {
        let (output_tx, output_rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let (notify_tx, notify_rx) = mpsc::channel(1);

        let listener_id = {
            let mut inner = self.lock();
            if inner.file.is_none() {
                // closed: hand back a stream that is already over
                return output_rx;
            }
            let id = inner.next_listener;
            inner.next_listener += 1;
            inner.listeners.insert(id, notify_tx);
            id
        };

        let log = self.clone();
        tokio::spawn(async move {
            log.deliver(listener_id, notify_rx, output_tx, cancel).await;
        });
        output_rx
    }

    /// Close the log, ending every subscriber stream and deleting the backing file.
    pub fn close(&self) -> io::Result<()> {
        let file = {
            let mut inner = self.lock();
            // dropping the notify senders ends the delivery tasks
            inner.listeners.clear();
            inner.file.take()
        };
        match file {
            Some(file) => file.close(),
            None => Ok(()),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    async fn deliver(
        self,
        listener_id: u64,
        mut notify_rx: mpsc::Receiver<()>,
        output_tx: mpsc::Sender<Result<OutputBlob>>,
        cancel: CancellationToken,
    ) {
        let mut cursor = 0;
        // anything written before we attached counts as pending
        let mut pending = true;
        loop {
            if pending {
                match self.flush_blocking(&mut cursor, &output_tx).await {
                    Ok(Flush::Drained) => pending = false,
                    Ok(Flush::Backlogged) => {}
                    Ok(Flush::Finished) => break,
                    Err(err) => {
                        warn!(job_id = %self.job_id, error = %err, "failed to read job output log");
                        select! {
                            _ = output_tx.send(Err(JobError::Io(err))) => {}
                            _ = cancel.cancelled() => {}
                        }
                        break;
                    }
                }
            }

            select! {
                _ = cancel.cancelled() => {
                    let _ = output_tx.try_send(Err(JobError::Cancelled));
                    break;
                }
                _ = output_tx.closed() => break,
                signal = notify_rx.recv() => match signal {
                    Some(()) => pending = true,
                    None => break, // log closed
                },
                // the consumer made room, retry from the same cursor
                permit = output_tx.reserve(), if pending => {
                    if permit.is_err() {
                        break;
                    }
                }
            }
        }

        self.lock().listeners.remove(&listener_id);
        debug!(job_id = %self.job_id, listener_id, offset = cursor, "output subscriber finished");
    }

    /// Run a flush pass on the blocking pool, file reads can take a while for a backlogged
    /// subscriber.
    async fn flush_blocking(
        &self,
        cursor: &mut u64,
        output_tx: &mpsc::Sender<Result<OutputBlob>>,
    ) -> io::Result<Flush> {
        let log = self.clone();
        let output_tx = output_tx.clone();
        let start = *cursor;
        let (end, flushed) = tokio::task::spawn_blocking(move || {
            let mut cursor = start;
            let flushed = log.flush(&mut cursor, &output_tx);
            (cursor, flushed)
        })
        .await
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        *cursor = end;
        flushed
    }

    /// Push everything between `cursor` and the end of the log into `output_tx`.
    ///
    /// The cursor only moves past chunks the queue accepted, so nothing is skipped when the
    /// queue is full.
    fn flush(
        &self,
        cursor: &mut u64,
        output_tx: &mpsc::Sender<Result<OutputBlob>>,
    ) -> io::Result<Flush> {
        let inner = self.lock();
        let file = match inner.file.as_ref() {
            Some(file) => file.as_file(),
            None => return Ok(Flush::Finished),
        };

        while *cursor < inner.len {
            let want = cmp::min(READ_CHUNK_SIZE as u64, inner.len - *cursor) as usize;
            let mut buf = vec![0; want];
            let n = file.read_at(&mut buf, *cursor)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "output log shorter than its recorded length",
                ));
            }
            buf.truncate(n);
            match output_tx.try_send(Ok(OutputBlob::from(buf))) {
                Ok(()) => *cursor += n as u64,
                Err(TrySendError::Full(_)) => return Ok(Flush::Backlogged),
                Err(TrySendError::Closed(_)) => return Ok(Flush::Finished),
            }
        }
        Ok(Flush::Drained)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
