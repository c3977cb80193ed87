use crate::broadcaster::{Broadcaster, OutputReceiver};
use crate::errors::{JobError, Result};
use crate::status::{JobStatus, StatusCell, StatusCode};
use crate::types::{Command, JobId};

use bytes::BytesMut;
use futures::future::FutureExt;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{self, Child},
    select,
    sync::oneshot,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

type KillSwitch = Arc<Mutex<Option<oneshot::Sender<()>>>>;

/// One supervised OS process together with its status and its output log.
pub struct Job {
    id: JobId,
    status: Arc<StatusCell>,
    /// Armed while the process is running. Whoever takes the sender first decides how the job
    /// ends: `stop` takes it to kill the process, the exit watcher takes it once the process is
    /// gone.
    kill_tx: KillSwitch,
    log: Broadcaster,
}

impl Job {
    /// Launch `command` with stdout and stderr both going to the job's output log.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(command: Command) -> Result<Self> {
        let id = Uuid::new_v4();
        let log = Broadcaster::new(id)?;
        let status = Arc::new(StatusCell::new(JobStatus::started(command.clone())));

        let spawned = process::Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                status.update(|s| {
                    s.code = StatusCode::Error;
                    s.error = Some(source.to_string());
                });
                if let Err(err) = log.close() {
                    warn!(job_id = %id, error = %err, "failed to remove output log");
                }
                return Err(JobError::Launch { job_id: id, source });
            }
        };
        status.update(|s| s.code = StatusCode::Running);

        if let Some(stdout) = child.stdout.take() {
            pipe_output(id, stdout, log.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            pipe_output(id, stderr, log.clone());
        }

        let (tx, kill_rx) = oneshot::channel();
        let kill_tx = Arc::new(Mutex::new(Some(tx)));
        tokio::spawn(watch_exit(
            id,
            child,
            kill_rx,
            Arc::clone(&kill_tx),
            Arc::clone(&status),
        ));

        Ok(Self {
            id,
            status,
            kill_tx,
            log,
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status.load()
    }

    /// Kill the process if it is still running. A job that already ended is left alone.
    pub fn stop(&self) {
        let mut kill_tx = lock(&self.kill_tx);
        if let Some(tx) = kill_tx.take() {
            self.status.update(|s| s.code = StatusCode::Stopped);
            // the watcher holds the receiver until it takes the lock, so this can't fail
            let _ = tx.send(());
        }
    }

    pub fn subscribe(&self, cancel: CancellationToken) -> OutputReceiver {
        self.log.subscribe(cancel)
    }

    /// Kill the process if needed and close the output log.
    pub fn cleanup(&self) -> io::Result<()> {
        self.stop();
        self.log.close()
    }
}

/// Copy everything the child writes on `reader` into the output log.
fn pipe_output<R>(job_id: JobId, mut reader: R, log: Broadcaster)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(4096);
        loop {
            match reader.read_buf(&mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if let Err(err) = log.write(&buf) {
                        debug!(%job_id, error = %err, "dropping job output");
                        break;
                    }
                    buf.clear();
                }
                Err(err) => {
                    warn!(%job_id, error = %err, "failed to read job output");
                    break;
                }
            }
        }
    });
}

/// Wait for the child to terminate and publish its terminal status.
async fn watch_exit(
    job_id: JobId,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    kill_tx: KillSwitch,
    status: Arc<StatusCell>,
) {
    let mut kill_rx = kill_rx.fuse();
    let exit = loop {
        select! {
            _ = &mut kill_rx => {
                if let Err(err) = child.start_kill() {
                    warn!(%job_id, error = %err, "failed to kill job");
                }
            }
            exit = child.wait() => break exit,
        }
    };

    // disarm stop before publishing so a late stop can't relabel the job
    let mut armed = lock(&kill_tx);
    armed.take();
    status.update(|s| {
        s.code = StatusCode::Exited;
        match &exit {
            Ok(exit_status) => record_exit(s, exit_status),
            Err(err) => s.error = Some(err.to_string()),
        }
    });
    drop(armed);

    match exit {
        Ok(exit_status) => info!(%job_id, %exit_status, "job finished"),
        Err(err) => warn!(%job_id, error = %err, "failed to wait for job"),
    }
}

fn record_exit(status: &mut JobStatus, exit_status: &ExitStatus) {
    match exit_status.code() {
        Some(code) => {
            status.exit_code = code;
            status.exited = true;
        }
        None => {
            status.exit_code = -1;
            status.exited = false;
            status.signal = exit_status.signal();
        }
    }
}

fn lock(kill_tx: &KillSwitch) -> MutexGuard<'_, Option<oneshot::Sender<()>>> {
    kill_tx.lock().unwrap_or_else(PoisonError::into_inner)
}
