use std::collections::BTreeSet;

use super::*;

impl UpdatesStore {
    /// Inserts a new update row. It is stored with `keep` set.
    ///
    /// Reusing an id or a `(scope_key, commit_time)` pair fails with a
    /// constraint violation.
    pub fn add_update(&self, update: &Update) -> Result<()> {
        let update = update.clone();
        self.run(move |conn| {
            let headers = rows::encode_request_headers(update.request_headers.as_ref())?;
            conn.execute(
                r#"INSERT INTO "updates" ("id", "scope_key", "commit_time", "runtime_version", "manifest", "status", "keep", "last_accessed", "successful_launch_count", "failed_launch_count", "url", "headers")
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?9, ?10, ?11)"#,
                params![
                    update.id,
                    update.scope_key,
                    unix_millis(update.commit_time),
                    update.runtime_version,
                    update.manifest,
                    update.status.as_i64(),
                    unix_millis(update.last_accessed),
                    update.successful_launch_count,
                    update.failed_launch_count,
                    update.url,
                    headers,
                ],
            )
            .during("add_update")?;
            debug!(id = %update.id, scope = %update.scope_key, "stored update");
            Ok(())
        })
    }

    /// Promotes a finished update to `Ready` (development updates keep their
    /// status) and pins it with `keep`.
    pub fn mark_update_finished(&self, id: Uuid) -> Result<Update> {
        self.run(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE updates SET status = CASE WHEN status = ?2 THEN status ELSE ?3 END, keep = 1 WHERE id = ?1",
                    params![
                        id,
                        UpdateStatus::Development.as_i64(),
                        UpdateStatus::Ready.as_i64()
                    ],
                )
                .during("mark_update_finished")?;
            reload(conn, "mark_update_finished", id, changed)
        })
    }

    pub fn mark_update_accessed(&self, id: Uuid) -> Result<Update> {
        self.run(move |conn| {
            let now = unix_millis(OffsetDateTime::now_utc());
            let changed = conn
                .execute(
                    "UPDATE updates SET last_accessed = ?2 WHERE id = ?1",
                    params![id, now],
                )
                .during("mark_update_accessed")?;
            reload(conn, "mark_update_accessed", id, changed)
        })
    }

    pub fn increment_successful_launch_count(&self, id: Uuid) -> Result<Update> {
        self.run(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE updates SET successful_launch_count = successful_launch_count + 1 WHERE id = ?1",
                    params![id],
                )
                .during("increment_successful_launch_count")?;
            reload(conn, "increment_successful_launch_count", id, changed)
        })
    }

    pub fn increment_failed_launch_count(&self, id: Uuid) -> Result<Update> {
        self.run(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE updates SET failed_launch_count = failed_launch_count + 1 WHERE id = ?1",
                    params![id],
                )
                .during("increment_failed_launch_count")?;
            reload(conn, "increment_failed_launch_count", id, changed)
        })
    }

    pub fn set_scope_key(&self, id: Uuid, scope_key: &str) -> Result<Update> {
        let scope_key = scope_key.to_string();
        self.run(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE updates SET scope_key = ?2 WHERE id = ?1",
                    params![id, scope_key],
                )
                .during("set_scope_key")?;
            reload(conn, "set_scope_key", id, changed)
        })
    }

    pub fn set_update_commit_time(&self, id: Uuid, commit_time: OffsetDateTime) -> Result<Update> {
        self.run(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE updates SET commit_time = ?2 WHERE id = ?1",
                    params![id, unix_millis(commit_time)],
                )
                .during("set_update_commit_time")?;
            reload(conn, "set_update_commit_time", id, changed)
        })
    }

    /// Forces every update that references one of `assets` back to
    /// `Pending`. Returns the ids of those updates.
    pub fn mark_missing_assets(&self, assets: &[Asset]) -> Result<Vec<Uuid>> {
        let asset_ids: Vec<i64> = assets.iter().filter_map(|asset| asset.id).collect();
        self.run(move |conn| {
            in_transaction(conn, "mark_missing_assets", |tx| {
                let mut demoted = BTreeSet::new();
                let mut owners = tx
                    .prepare("SELECT DISTINCT update_id FROM updates_assets WHERE asset_id = ?1")
                    .during("mark_missing_assets")?;
                for asset_id in &asset_ids {
                    let ids = owners
                        .query_map(params![asset_id], |row| row.get::<_, Uuid>(0))
                        .during("mark_missing_assets")?
                        .collect::<rusqlite::Result<Vec<_>>>()
                        .during("mark_missing_assets")?;
                    tx.execute(
                        "UPDATE updates SET status = ?1 WHERE id IN (SELECT DISTINCT update_id FROM updates_assets WHERE asset_id = ?2)",
                        params![UpdateStatus::Pending.as_i64(), asset_id],
                    )
                    .during("mark_missing_assets")?;
                    demoted.extend(ids);
                }
                Ok(demoted.into_iter().collect())
            })
        })
    }

    /// Deletes the given updates; their association rows cascade.
    pub fn delete_updates(&self, ids: &[Uuid]) -> Result<usize> {
        let ids = ids.to_vec();
        self.run(move |conn| {
            in_transaction(conn, "delete_updates", |tx| {
                let mut deleted = 0;
                for id in &ids {
                    deleted += tx
                        .execute("DELETE FROM updates WHERE id = ?1", params![id])
                        .during("delete_updates")?;
                }
                Ok(deleted)
            })
        })
    }

    pub fn all_updates(&self) -> Result<Vec<Update>> {
        self.run(|conn| query_updates(conn, "all_updates", "SELECT * FROM updates", []))
    }

    pub fn updates_for_scope(&self, scope_key: &str) -> Result<Vec<Update>> {
        let scope_key = scope_key.to_string();
        self.run(move |conn| {
            query_updates(
                conn,
                "updates_for_scope",
                "SELECT * FROM updates WHERE scope_key = ?1",
                params![scope_key],
            )
        })
    }

    pub fn updates_with_status(&self, status: UpdateStatus) -> Result<Vec<Update>> {
        self.run(move |conn| {
            query_updates(
                conn,
                "updates_with_status",
                "SELECT * FROM updates WHERE status = ?1",
                params![status.as_i64()],
            )
        })
    }

    /// Updates of `scope_key` that may be launched. An update that has
    /// launched successfully at least once stays launchable even after
    /// later failures.
    pub fn launchable_updates(&self, scope_key: &str) -> Result<Vec<Update>> {
        let scope_key = scope_key.to_string();
        self.run(move |conn| {
            let [ready, embedded, development] = UpdateStatus::LAUNCHABLE.map(UpdateStatus::as_i64);
            query_updates(
                conn,
                "launchable_updates",
                "SELECT * FROM updates WHERE scope_key = ?1 AND (successful_launch_count > 0 OR failed_launch_count < 1) AND status IN (?2, ?3, ?4)",
                params![scope_key, ready, embedded, development],
            )
        })
    }

    pub fn update(&self, id: Uuid) -> Result<Option<Update>> {
        self.run(move |conn| load_update(conn, id))
    }

    /// Ids of the five most recent updates (by commit time) that failed to launch.
    pub fn recent_update_ids_with_failed_launch(&self) -> Result<Vec<Uuid>> {
        self.run(|conn| {
            let mut stmt = conn
                .prepare("SELECT id FROM updates WHERE failed_launch_count > 0 ORDER BY commit_time DESC LIMIT 5")
                .during("recent_update_ids_with_failed_launch")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, Uuid>(0))
                .during("recent_update_ids_with_failed_launch")?
                .collect::<rusqlite::Result<Vec<_>>>()
                .during("recent_update_ids_with_failed_launch")?;
            Ok(ids)
        })
    }
}

pub(super) fn load_update(conn: &Connection, id: Uuid) -> Result<Option<Update>> {
    conn.query_row(
        "SELECT * FROM updates WHERE id = ?1",
        params![id],
        UpdateRow::from_row,
    )
    .optional()
    .during("load_update")?
    .map(UpdateRow::into_update)
    .transpose()
}

fn reload(conn: &Connection, operation: &'static str, id: Uuid, changed: usize) -> Result<Update> {
    if changed == 0 {
        return Err(StoreError::UpdateNotFound(id));
    }
    let update = load_update(conn, id)?.ok_or(StoreError::UpdateNotFound(id))?;
    debug!(operation, id = %id, "update row changed");
    Ok(update)
}

pub(super) fn query_updates<P: rusqlite::Params>(
    conn: &Connection,
    operation: &'static str,
    sql: &str,
    params: P,
) -> Result<Vec<Update>> {
    let mut stmt = conn.prepare(sql).during(operation)?;
    let rows = stmt
        .query_map(params, UpdateRow::from_row)
        .during(operation)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .during(operation)?;
    rows.into_iter().map(UpdateRow::into_update).collect()
}
