//! The thread that owns the SQLite connection.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use super::*;

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// Serial executor for database work. Jobs run one at a time in the order
/// they were submitted; the connection never leaves this thread.
pub(super) struct DbWorker {
    sender: Option<mpsc::Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl DbWorker {
    pub(super) fn spawn(conn: Connection, directory: &Path) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name("ota-store-db".to_string())
            .spawn(move || {
                let mut conn = conn;
                while let Ok(job) = receiver.recv() {
                    job(&mut conn);
                }
                if let Err((_, err)) = conn.close() {
                    warn!(%err, "failed to close update store connection");
                }
                debug!("update store worker stopped");
            })
            .map_err(|source| StoreError::Io {
                path: directory.to_path_buf(),
                source,
            })?;
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Runs `job` on the worker and blocks until it has finished.
    pub(super) fn execute<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(StoreError::WorkerUnavailable)?;
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        sender
            .send(Box::new(move |conn: &mut Connection| {
                // The caller may have given up waiting; nothing to report then.
                let _ = reply_tx.send(job(conn));
            }))
            .map_err(|_| StoreError::WorkerUnavailable)?;
        reply_rx.recv().map_err(|_| StoreError::WorkerUnavailable)?
    }
}

impl Drop for DbWorker {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("update store worker panicked");
            }
        }
    }
}
