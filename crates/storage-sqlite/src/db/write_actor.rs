//! Single writer for the database.
//!
//! SQLite allows one writer at a time. Every mutation is sent to a dedicated
//! thread that owns one pooled connection and runs each job inside an
//! immediate transaction, so writes are serialized and a job either commits
//! completely or not at all.

use diesel::sqlite::SqliteConnection;
use diesel::Connection;
use log::{debug, error};
use tokio::sync::{mpsc, oneshot};

use super::DbPool;
use crate::errors::StorageError;
use questsync_core::errors::Result;

const WRITE_QUEUE_CAPACITY: usize = 256;

type Job = Box<dyn FnOnce(&mut SqliteConnection) + Send + 'static>;

/// Cloneable handle for submitting write jobs.
#[derive(Clone)]
pub struct WriteHandle {
    tx: mpsc::Sender<Job>,
}

impl WriteHandle {
    /// Run `job` on the writer connection inside a transaction.
    ///
    /// An `Err` from the job rolls the transaction back and is returned
    /// unchanged.
    pub async fn exec<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let wrapped: Job = Box::new(move |conn: &mut SqliteConnection| {
            let result = conn
                .immediate_transaction::<T, StorageError, _>(|tx| {
                    job(tx).map_err(StorageError::from)
                })
                .map_err(Into::into);
            let _ = reply_tx.send(result);
        });

        self.tx
            .send(wrapped)
            .await
            .map_err(|_| StorageError::WriterClosed)?;
        reply_rx.await.map_err(|_| StorageError::WriterClosed)?
    }
}

/// Start the writer thread. It exits when every [`WriteHandle`] is dropped.
pub fn spawn_writer(pool: DbPool) -> WriteHandle {
    let (tx, mut rx) = mpsc::channel::<Job>(WRITE_QUEUE_CAPACITY);

    let spawned = std::thread::Builder::new()
        .name("questsync-db-writer".to_string())
        .spawn(move || {
            let mut conn = match pool.get() {
                Ok(conn) => conn,
                Err(err) => {
                    error!("Write actor could not acquire a connection: {}", err);
                    return;
                }
            };
            while let Some(job) = rx.blocking_recv() {
                job(&mut conn);
            }
            debug!("Write actor stopped");
        });
    if let Err(err) = spawned {
        error!("Failed to start write actor: {}", err);
    }

    WriteHandle { tx }
}
