//! Row hydration and the shared transaction wrapper.

use std::collections::BTreeMap;

use rusqlite::types::ValueRef;
use serde_json::{Map, Value};

use super::*;

/// Runs `body` inside an immediate transaction. Any error rolls the
/// transaction back explicitly before it is returned.
pub(super) fn in_transaction<T>(
    conn: &mut Connection,
    operation: &'static str,
    body: impl FnOnce(&Transaction<'_>) -> Result<T>,
) -> Result<T> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .during(operation)?;
    match body(&tx) {
        Ok(value) => {
            tx.commit().during(operation)?;
            Ok(value)
        }
        Err(err) => {
            warn!(operation, error = %err, "rolling back update store transaction");
            if let Err(rollback) = tx.rollback() {
                warn!(operation, error = %rollback, "update store rollback failed");
            }
            Err(err)
        }
    }
}

pub(super) struct UpdateRow {
    id: Uuid,
    scope_key: String,
    commit_time: i64,
    runtime_version: String,
    launch_asset_id: Option<i64>,
    manifest: String,
    status: i64,
    keep: bool,
    last_accessed: i64,
    successful_launch_count: i64,
    failed_launch_count: i64,
    url: Option<String>,
    headers: Option<String>,
}

impl UpdateRow {
    pub(super) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            scope_key: row.get("scope_key")?,
            commit_time: row.get("commit_time")?,
            runtime_version: row.get("runtime_version")?,
            launch_asset_id: row.get("launch_asset_id")?,
            manifest: row.get("manifest")?,
            status: row.get("status")?,
            keep: row.get("keep")?,
            last_accessed: row.get("last_accessed")?,
            successful_launch_count: row.get("successful_launch_count")?,
            failed_launch_count: row.get("failed_launch_count")?,
            url: row.get("url")?,
            headers: row.get("headers")?,
        })
    }

    pub(super) fn into_update(self) -> Result<Update> {
        let status = UpdateStatus::from_i64(self.status).ok_or_else(|| invalid_update(
            "status",
            format!("unknown status {}", self.status),
        ))?;
        Ok(Update {
            id: self.id,
            scope_key: self.scope_key,
            commit_time: timestamp("update", "commit_time", self.commit_time)?,
            runtime_version: self.runtime_version,
            manifest: self.manifest,
            launch_asset_id: self.launch_asset_id,
            status,
            keep: self.keep,
            last_accessed: timestamp("update", "last_accessed", self.last_accessed)?,
            successful_launch_count: counter("successful_launch_count", self.successful_launch_count)?,
            failed_launch_count: counter("failed_launch_count", self.failed_launch_count)?,
            url: self.url,
            request_headers: self.headers.as_deref().and_then(decode_request_headers),
        })
    }
}

pub(super) struct AssetRow {
    id: i64,
    key: Option<String>,
    url: Option<String>,
    headers: Option<String>,
    extra_request_headers: Option<String>,
    asset_type: String,
    metadata: Option<String>,
    download_time: i64,
    relative_path: String,
    hash: String,
    hash_type: i64,
    expected_hash: Option<String>,
    is_launch_asset: bool,
}

impl AssetRow {
    /// Expects the `assets` columns plus a computed `is_launch_asset`.
    pub(super) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            key: row.get("key")?,
            url: row.get("url")?,
            headers: row.get("headers")?,
            extra_request_headers: row.get("extra_request_headers")?,
            asset_type: row.get("type")?,
            metadata: row.get("metadata")?,
            download_time: row.get("download_time")?,
            relative_path: row.get("relative_path")?,
            hash: hash_text(row.get_ref("hash")?),
            hash_type: row.get("hash_type")?,
            expected_hash: row.get("expected_hash")?,
            is_launch_asset: row.get("is_launch_asset")?,
        })
    }

    pub(super) fn into_asset(self) -> Result<Asset> {
        let hash_type = HashType::from_i64(self.hash_type).ok_or_else(|| StoreError::InvalidRow {
            entity: "asset",
            column: "hash_type",
            reason: format!("unknown hash type {}", self.hash_type),
        })?;
        Ok(Asset {
            id: Some(self.id),
            key: self.key,
            url: self.url,
            headers: json_object("headers", self.headers)?,
            extra_request_headers: json_object("extra_request_headers", self.extra_request_headers)?,
            asset_type: self.asset_type,
            metadata: json_object("metadata", self.metadata)?,
            download_time: timestamp("asset", "download_time", self.download_time)?,
            relative_path: self.relative_path,
            hash: self.hash,
            hash_type,
            expected_hash: self.expected_hash,
            is_launch_asset: self.is_launch_asset,
        })
    }
}

/// Hashes are written as hex text; rows from older writers may hold raw bytes.
fn hash_text(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Text(text) => String::from_utf8_lossy(text).into_owned(),
        ValueRef::Blob(bytes) => hex::encode(bytes),
        ValueRef::Integer(number) => number.to_string(),
        ValueRef::Real(number) => number.to_string(),
        ValueRef::Null => String::new(),
    }
}

fn timestamp(entity: &'static str, column: &'static str, millis: i64) -> Result<OffsetDateTime> {
    from_unix_millis(millis).ok_or_else(|| StoreError::InvalidRow {
        entity,
        column,
        reason: format!("{millis} is not a representable timestamp"),
    })
}

fn counter(column: &'static str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| invalid_update(column, format!("{value} is out of range")))
}

fn invalid_update(column: &'static str, reason: String) -> StoreError {
    StoreError::InvalidRow {
        entity: "update",
        column,
        reason,
    }
}

fn json_object(column: &'static str, raw: Option<String>) -> Result<Option<Map<String, Value>>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        Ok(Value::Null) => Ok(None),
        Ok(other) => Err(StoreError::InvalidRow {
            entity: "asset",
            column,
            reason: format!("expected a JSON object, found {other}"),
        }),
        Err(source) => Err(StoreError::Json {
            key: column,
            source,
        }),
    }
}

pub(super) fn encode_json_object(
    column: &'static str,
    value: Option<&Map<String, Value>>,
) -> Result<Option<String>> {
    value
        .map(|map| serde_json::to_string(map).map_err(|source| StoreError::Json { key: column, source }))
        .transpose()
}

pub(super) fn encode_request_headers(headers: Option<&BTreeMap<String, String>>) -> Result<Option<String>> {
    headers
        .map(|map| {
            serde_json::to_string(map).map_err(|source| StoreError::Json {
                key: "headers",
                source,
            })
        })
        .transpose()
}

/// Unreadable provenance headers are dropped rather than failing the row.
fn decode_request_headers(raw: &str) -> Option<BTreeMap<String, String>> {
    match serde_json::from_str(raw) {
        Ok(headers) => Some(headers),
        Err(err) => {
            debug!(%err, "ignoring unreadable update request headers");
            None
        }
    }
}
