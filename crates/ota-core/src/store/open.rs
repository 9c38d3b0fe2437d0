//! Locating, migrating and (if needed) recreating the database file.

use super::*;

/// How [`UpdatesStore::open`] obtained its database.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum OpenReport {
    /// The latest-version file already existed.
    Existing,
    /// No database was present; a fresh one was created.
    Created,
    /// A legacy file was renamed and migrated forward.
    Migrated { from: u32 },
    /// Migrating a legacy file failed; its contents were discarded.
    RecreatedAfterFailedMigration { from: u32 },
    /// The file was unreadable and was moved aside to `archive`.
    RecreatedAfterCorruption { archive: PathBuf },
    /// The latest-version file held an incomplete schema or one left by an
    /// interrupted migration. It was moved aside to `archive`.
    RecreatedAfterSchemaMismatch { found_version: u32, archive: PathBuf },
}

pub(super) fn initialize(
    directory: &Path,
    migrations: &[Migration],
) -> Result<(Connection, OpenReport)> {
    fs::create_dir_all(directory).map_err(|source| StoreError::Io {
        path: directory.to_path_buf(),
        source,
    })?;
    let latest = directory.join(database_filename(LATEST_SCHEMA_VERSION));
    let opened = if latest.exists() {
        open_latest(&latest)
    } else {
        open_from_legacy(directory, &latest, migrations)
    };
    opened.map_err(|source| StoreError::Open {
        path: directory.to_path_buf(),
        source,
    })
}

fn open_latest(path: &Path) -> anyhow::Result<(Connection, OpenReport)> {
    let inspected = open_connection(path).and_then(|mut conn| {
        let state = inspect_schema(&conn)?;
        if state == SchemaState::Empty {
            install_schema(&mut conn)?;
        }
        Ok((conn, state))
    });
    match inspected {
        Ok((conn, SchemaState::Current | SchemaState::Empty)) => {
            debug!(path = %path.display(), "opened update store");
            Ok((conn, OpenReport::Existing))
        }
        Ok((conn, SchemaState::Stale { found_version, missing })) => {
            drop(conn);
            let archive = archive_database(path)?;
            error!(
                path = %path.display(),
                archive = %archive.display(),
                found_version,
                missing = missing.join(", "),
                "update store schema is incomplete or from an interrupted migration; archived it and starting over"
            );
            let conn = create_fresh(path)?;
            Ok((conn, OpenReport::RecreatedAfterSchemaMismatch {
                found_version,
                archive,
            }))
        }
        Err(err) if chain_reports_corruption(&err) => recreate_after_corruption(path, &err),
        Err(err) => Err(err),
    }
}

fn open_from_legacy(
    directory: &Path,
    latest: &Path,
    migrations: &[Migration],
) -> anyhow::Result<(Connection, OpenReport)> {
    for (index, migration) in migrations.iter().enumerate() {
        let legacy = directory.join(database_filename(migration.from));
        if !legacy.exists() {
            continue;
        }
        fs::rename(&legacy, latest).with_context(|| {
            format!(
                "failed to move {} to {}",
                legacy.display(),
                latest.display()
            )
        })?;
        rename_sidecar(&legacy, latest)?;
        info!(
            from = migration.from,
            to = LATEST_SCHEMA_VERSION,
            "migrating legacy update store"
        );
        return match migrate(latest, &migrations[index..]) {
            Ok(conn) => Ok((conn, OpenReport::Migrated {
                from: migration.from,
            })),
            Err(err) if chain_reports_corruption(&err) => recreate_after_corruption(latest, &err),
            Err(err) => {
                error!(
                    from = migration.from,
                    error = format!("{err:#}"),
                    "update store migration failed; discarding stored updates"
                );
                remove_database_files(latest)?;
                let conn = create_fresh(latest)?;
                Ok((conn, OpenReport::RecreatedAfterFailedMigration {
                    from: migration.from,
                }))
            }
        };
    }

    let conn = create_fresh(latest)?;
    info!(path = %latest.display(), "created update store");
    Ok((conn, OpenReport::Created))
}

fn open_connection(path: &Path) -> anyhow::Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("failed to open update store at {}", path.display()))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys for update store")?;
    Ok(conn)
}

/// What a database file holds, judged by its tables and `user_version`.
#[derive(Debug, PartialEq, Eq)]
enum SchemaState {
    /// No tables at all, e.g. a zero-length file.
    Empty,
    Current,
    /// Tables exist but the file was never stamped with the latest version,
    /// or some tables are missing.
    Stale {
        found_version: u32,
        missing: Vec<&'static str>,
    },
}

fn inspect_schema(conn: &Connection) -> anyhow::Result<SchemaState> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
        .context("failed to read update store schema")?;
    let found = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<HashSet<_>>>()
        .context("failed to read update store schema")?;
    if found.is_empty() {
        return Ok(SchemaState::Empty);
    }
    let found_version: u32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read update store schema version")?;
    let missing: Vec<&'static str> = EXPECTED_TABLES
        .iter()
        .copied()
        .filter(|name| !found.contains(*name))
        .collect();
    if found_version == LATEST_SCHEMA_VERSION && missing.is_empty() {
        Ok(SchemaState::Current)
    } else {
        Ok(SchemaState::Stale {
            found_version,
            missing,
        })
    }
}

/// Creates the latest tables and stamps the version in one transaction.
fn install_schema(conn: &mut Connection) -> anyhow::Result<()> {
    let tx = conn
        .transaction()
        .context("failed to start schema transaction")?;
    tx.execute_batch(LATEST_SCHEMA)
        .context("failed to create update store tables")?;
    tx.pragma_update(None, "user_version", LATEST_SCHEMA_VERSION)
        .context("failed to stamp update store schema version")?;
    tx.commit().context("failed to commit update store schema")?;
    Ok(())
}

fn create_fresh(path: &Path) -> anyhow::Result<Connection> {
    let mut conn = open_connection(path)?;
    install_schema(&mut conn)?;
    Ok(conn)
}

/// Applies `steps` in a single transaction, so an interrupted run leaves the
/// file unstamped rather than half migrated.
fn migrate(path: &Path, steps: &[Migration]) -> anyhow::Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open {} for migration", path.display()))?;
    conn.pragma_update(None, "foreign_keys", "OFF")
        .context("failed to disable foreign keys for migration")?;
    let tx = conn
        .transaction()
        .context("failed to start migration transaction")?;
    for step in steps {
        (step.apply)(&tx)
            .with_context(|| format!("migration v{} -> v{} failed", step.from, step.to))?;
        debug!(from = step.from, to = step.to, "applied update store migration");
    }
    tx.pragma_update(None, "user_version", LATEST_SCHEMA_VERSION)
        .context("failed to stamp update store schema version")?;
    tx.commit()
        .context("failed to commit update store migration")?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys for update store")?;
    match inspect_schema(&conn)? {
        SchemaState::Current => Ok(conn),
        state => Err(anyhow!("migrated update store is not at v{LATEST_SCHEMA_VERSION}: {state:?}")),
    }
}

fn recreate_after_corruption(
    path: &Path,
    cause: &anyhow::Error,
) -> anyhow::Result<(Connection, OpenReport)> {
    let archive = archive_database(path)?;
    error!(
        path = %path.display(),
        archive = %archive.display(),
        error = format!("{cause:#}"),
        "update store is corrupt; archived it and starting over"
    );
    let conn = create_fresh(path)?;
    Ok((conn, OpenReport::RecreatedAfterCorruption { archive }))
}

/// Moves an unusable database aside as `<unix-seconds>-<filename>`, never
/// replacing an earlier archive.
fn archive_database(path: &Path) -> anyhow::Result<PathBuf> {
    let directory = path
        .parent()
        .ok_or_else(|| anyhow!("{} has no parent directory", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("{} has no file name", path.display()))?;
    let mut stamp = OffsetDateTime::now_utc().unix_timestamp();
    let mut archive = directory.join(format!("{stamp}-{filename}"));
    while archive.exists() {
        stamp += 1;
        archive = directory.join(format!("{stamp}-{filename}"));
    }
    fs::rename(path, &archive).with_context(|| {
        format!(
            "failed to archive update store {}",
            path.display()
        )
    })?;
    rename_sidecar(path, &archive)?;
    Ok(archive)
}

/// Rollback journals belong to the file they were written for.
fn rename_sidecar(from: &Path, to: &Path) -> anyhow::Result<()> {
    let journal = journal_path(from);
    if journal.exists() {
        let target = journal_path(to);
        fs::rename(&journal, &target)
            .with_context(|| format!("failed to move journal {}", journal.display()))?;
    }
    Ok(())
}

fn remove_database_files(path: &Path) -> anyhow::Result<()> {
    for candidate in [path.to_path_buf(), journal_path(path)] {
        match fs::remove_file(&candidate) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to remove {}", candidate.display()))
            }
        }
    }
    Ok(())
}

fn journal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push("-journal");
    PathBuf::from(name)
}
