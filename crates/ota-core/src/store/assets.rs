use super::*;

/// `assets` columns plus whether any update launches the asset.
const SELECT_ASSETS: &str = "SELECT assets.*, EXISTS (SELECT 1 FROM updates WHERE updates.launch_asset_id = assets.id) AS is_launch_asset FROM assets";

impl UpdatesStore {
    /// Registers freshly downloaded assets for `update_id` in one transaction.
    ///
    /// An asset whose file and hash already belong to a stored row is linked
    /// to that row instead of inserted again. A duplicate `key` fails the
    /// whole batch. Returns the assets with their row ids filled in.
    pub fn add_new_assets(&self, assets: &[Asset], update_id: Uuid) -> Result<Vec<Asset>> {
        let assets = assets.to_vec();
        self.run(move |conn| {
            in_transaction(conn, "add_new_assets", |tx| {
                let mut stored = Vec::with_capacity(assets.len());
                for mut asset in assets {
                    let asset_id = match reusable_asset_id(tx, &asset)? {
                        Some(existing) => {
                            debug!(
                                asset_id = existing,
                                path = %asset.relative_path,
                                "linking update to an existing asset row for the same file"
                            );
                            existing
                        }
                        None => insert_asset(tx, &asset)?,
                    };
                    link_asset(tx, update_id, asset_id, asset.is_launch_asset, "add_new_assets")?;
                    asset.id = Some(asset_id);
                    stored.push(asset);
                }
                Ok(stored)
            })
        })
    }

    /// Links an already stored asset with the same key to `update_id`.
    ///
    /// Returns `false`, without writing anything, when the asset has no key
    /// or no row with that key exists.
    pub fn add_existing_asset(&self, asset: &Asset, update_id: Uuid) -> Result<bool> {
        let Some(key) = asset.key.clone() else {
            return Ok(false);
        };
        let is_launch_asset = asset.is_launch_asset;
        self.run(move |conn| {
            in_transaction(conn, "add_existing_asset", |tx| {
                let existing: Option<i64> = tx
                    .query_row(
                        r#"SELECT id FROM assets WHERE "key" = ?1 LIMIT 1"#,
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()
                    .during("add_existing_asset")?;
                let Some(asset_id) = existing else {
                    return Ok(false);
                };
                link_asset(tx, update_id, asset_id, is_launch_asset, "add_existing_asset")?;
                Ok(true)
            })
        })
    }

    /// Rewrites a stored asset row, located by id or else by key.
    pub fn update_asset(&self, asset: &Asset) -> Result<()> {
        let asset = asset.clone();
        self.run(move |conn| write_asset(conn, &asset))
    }

    /// Folds a fresh descriptor into the stored row for the same content.
    ///
    /// Only the URL and extra request headers are refreshed on disk; the
    /// returned asset carries the stored file location and hashes.
    pub fn merge_asset(&self, asset: &Asset, existing: &Asset) -> Result<Asset> {
        let (merged, refreshed) = asset.merged_with(existing);
        if let Some(row) = refreshed {
            self.update_asset(&row)?;
        }
        Ok(merged)
    }

    /// Mark-and-sweep of asset rows.
    ///
    /// Everything is marked, then assets reachable from a kept update are
    /// unmarked, then any asset sharing a file with an unmarked asset is
    /// unmarked too. The remaining rows are deleted and returned so their
    /// files can be removed.
    pub fn delete_unused_assets(&self) -> Result<Vec<Asset>> {
        self.run(|conn| {
            in_transaction(conn, "delete_unused_assets", |tx| {
                tx.execute("UPDATE assets SET marked_for_deletion = 1", [])
                    .during("delete_unused_assets")?;
                tx.execute(
                    "UPDATE assets SET marked_for_deletion = 0 WHERE id IN (SELECT asset_id FROM updates_assets INNER JOIN updates ON updates_assets.update_id = updates.id WHERE updates.keep = 1)",
                    [],
                )
                .during("delete_unused_assets")?;
                tx.execute(
                    "UPDATE assets SET marked_for_deletion = 0 WHERE relative_path IN (SELECT relative_path FROM assets WHERE marked_for_deletion = 0)",
                    [],
                )
                .during("delete_unused_assets")?;
                let doomed = query_assets(
                    tx,
                    "delete_unused_assets",
                    "SELECT assets.*, 0 AS is_launch_asset FROM assets WHERE marked_for_deletion = 1",
                    [],
                )?;
                let deleted = tx
                    .execute("DELETE FROM assets WHERE marked_for_deletion = 1", [])
                    .during("delete_unused_assets")?;
                debug!(deleted, "swept unused assets");
                Ok(doomed)
            })
        })
    }

    pub fn all_assets(&self) -> Result<Vec<Asset>> {
        self.run(|conn| query_assets(conn, "all_assets", SELECT_ASSETS, []))
    }

    /// Assets of one update; only its own launch asset is flagged.
    pub fn assets_for_update(&self, update_id: Uuid) -> Result<Vec<Asset>> {
        self.run(move |conn| {
            query_assets(
                conn,
                "assets_for_update",
                "SELECT assets.*, IFNULL(assets.id = updates.launch_asset_id, 0) AS is_launch_asset FROM assets INNER JOIN updates_assets ON updates_assets.asset_id = assets.id INNER JOIN updates ON updates_assets.update_id = updates.id WHERE updates.id = ?1",
                params![update_id],
            )
        })
    }

    pub fn asset(&self, key: &str) -> Result<Option<Asset>> {
        let key = key.to_string();
        self.run(move |conn| {
            let sql = format!(r#"{SELECT_ASSETS} WHERE "key" = ?1 LIMIT 1"#);
            Ok(query_assets(conn, "asset", &sql, params![key])?.into_iter().next())
        })
    }

    pub fn asset_by_id(&self, id: i64) -> Result<Option<Asset>> {
        self.run(move |conn| {
            let sql = format!("{SELECT_ASSETS} WHERE assets.id = ?1");
            Ok(query_assets(conn, "asset_by_id", &sql, params![id])?.into_iter().next())
        })
    }
}

/// A stored row that already describes this asset's file, if one exists.
///
/// Rows are reused when path and hash match and the keys do not conflict.
/// A keyed asset adopts a matching keyless row.
fn reusable_asset_id(tx: &Transaction<'_>, asset: &Asset) -> Result<Option<i64>> {
    let existing: Option<(i64, Option<String>)> = tx
        .query_row(
            "SELECT id, \"key\" FROM assets WHERE relative_path = ?1 AND hash = ?2 ORDER BY id LIMIT 1",
            params![asset.relative_path, asset.hash],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .during("add_new_assets")?;
    let Some((id, stored_key)) = existing else {
        return Ok(None);
    };
    match (&asset.key, stored_key) {
        (None, _) => Ok(Some(id)),
        (Some(key), Some(stored)) if *key == stored => Ok(Some(id)),
        (Some(key), None) => {
            tx.execute(
                r#"UPDATE assets SET "key" = ?2 WHERE id = ?1"#,
                params![id, key],
            )
            .during("add_new_assets")?;
            Ok(Some(id))
        }
        (Some(_), Some(_)) => Ok(None),
    }
}

fn insert_asset(tx: &Transaction<'_>, asset: &Asset) -> Result<i64> {
    tx.execute(
        r#"INSERT INTO "assets" ("key", "url", "headers", "extra_request_headers", "type", "metadata", "download_time", "relative_path", "hash", "hash_type", "expected_hash", "marked_for_deletion")
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0)"#,
        params![
            asset.key,
            asset.url,
            rows::encode_json_object("headers", asset.headers.as_ref())?,
            rows::encode_json_object("extra_request_headers", asset.extra_request_headers.as_ref())?,
            asset.asset_type,
            rows::encode_json_object("metadata", asset.metadata.as_ref())?,
            unix_millis(asset.download_time),
            asset.relative_path,
            asset.hash,
            asset.hash_type.as_i64(),
            asset.expected_hash,
        ],
    )
    .during("add_new_assets")?;
    Ok(tx.last_insert_rowid())
}

fn link_asset(
    tx: &Transaction<'_>,
    update_id: Uuid,
    asset_id: i64,
    is_launch_asset: bool,
    operation: &'static str,
) -> Result<()> {
    tx.execute(
        "INSERT INTO updates_assets (update_id, asset_id) SELECT ?1, ?2 WHERE NOT EXISTS (SELECT 1 FROM updates_assets WHERE update_id = ?1 AND asset_id = ?2)",
        params![update_id, asset_id],
    )
    .during(operation)?;
    if is_launch_asset {
        tx.execute(
            "UPDATE updates SET launch_asset_id = ?2 WHERE id = ?1",
            params![update_id, asset_id],
        )
        .during(operation)?;
    }
    Ok(())
}

fn write_asset(conn: &Connection, asset: &Asset) -> Result<()> {
    let headers = rows::encode_json_object("headers", asset.headers.as_ref())?;
    let extra = rows::encode_json_object("extra_request_headers", asset.extra_request_headers.as_ref())?;
    let metadata = rows::encode_json_object("metadata", asset.metadata.as_ref())?;
    let (filter, identity): (&str, Box<dyn rusqlite::ToSql>) = match (asset.id, &asset.key) {
        (Some(id), _) => ("id = ?1", Box::new(id)),
        (None, Some(key)) => (r#""key" = ?1"#, Box::new(key.clone())),
        (None, None) => return Err(StoreError::AssetWithoutIdentity),
    };
    let sql = format!(
        r#"UPDATE "assets" SET "headers" = ?2, "extra_request_headers" = ?3, "type" = ?4, "metadata" = ?5, "download_time" = ?6, "relative_path" = ?7, "hash" = ?8, "expected_hash" = ?9, "url" = ?10 WHERE {filter}"#
    );
    conn.execute(
        &sql,
        params![
            identity,
            headers,
            extra,
            asset.asset_type,
            metadata,
            unix_millis(asset.download_time),
            asset.relative_path,
            asset.hash,
            asset.expected_hash,
            asset.url,
        ],
    )
    .during("update_asset")?;
    Ok(())
}

pub(super) fn query_assets<P: rusqlite::Params>(
    conn: &Connection,
    operation: &'static str,
    sql: &str,
    params: P,
) -> Result<Vec<Asset>> {
    let mut stmt = conn.prepare(sql).during(operation)?;
    let rows = stmt
        .query_map(params, AssetRow::from_row)
        .during(operation)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .during(operation)?;
    rows.into_iter().map(AssetRow::into_asset).collect()
}
