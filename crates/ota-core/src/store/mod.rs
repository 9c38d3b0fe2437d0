//! SQLite-backed store of updates, assets and scoped JSON metadata.
//!
//! A single connection is owned by a dedicated worker thread; every public
//! operation is submitted to it as a job and answered in submission order.

use std::{
    collections::HashSet,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ota_domain::{
    from_unix_millis, unix_millis, Asset, HashType, JsonData, JsonDataKey, Update, UpdateStatus,
};

use crate::error::{chain_reports_corruption, Result, StatementContext, StoreError};

mod assets;
mod json_data;
mod migrations;
mod open;
mod rows;
mod schema;
mod updates;
mod worker;

pub use open::OpenReport;
pub use schema::{database_filename, LATEST_SCHEMA_VERSION};

use migrations::{Migration, MIGRATIONS};
use rows::{in_transaction, AssetRow, UpdateRow};
use schema::{EXPECTED_TABLES, LATEST_SCHEMA};
use worker::DbWorker;

/// Handle to an open update store. Clones share the same worker.
#[derive(Clone)]
pub struct UpdatesStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    directory: PathBuf,
    database_path: PathBuf,
    report: OpenReport,
    worker: DbWorker,
}

impl std::fmt::Debug for UpdatesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdatesStore")
            .field("database_path", &self.inner.database_path)
            .field("report", &self.inner.report)
            .finish_non_exhaustive()
    }
}

impl UpdatesStore {
    /// Opens (creating, migrating or recovering as needed) the store kept in
    /// `directory`. Asset files are resolved relative to the same directory.
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_migrations(directory.into(), MIGRATIONS)
    }

    fn open_with_migrations(directory: PathBuf, migrations: &[Migration]) -> Result<Self> {
        let (conn, report) = open::initialize(&directory, migrations)?;
        let database_path = directory.join(database_filename(LATEST_SCHEMA_VERSION));
        debug!(path = %database_path.display(), ?report, "update store ready");
        let worker = DbWorker::spawn(conn, &directory)?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                directory,
                database_path,
                report,
                worker,
            }),
        })
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    #[must_use]
    pub fn database_path(&self) -> &Path {
        &self.inner.database_path
    }

    /// How the database was obtained when the store was opened.
    #[must_use]
    pub fn open_report(&self) -> &OpenReport {
        &self.inner.report
    }

    /// Location of an asset's file inside the store directory.
    #[must_use]
    pub fn asset_path(&self, asset: &Asset) -> PathBuf {
        self.inner.directory.join(&asset.relative_path)
    }

    pub(crate) fn run<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.worker.execute(job)
    }
}

#[cfg(test)]
mod tests;
