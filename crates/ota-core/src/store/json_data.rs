use ota_domain::{
    validate_extra_params, BuildData, ExtraParams, ManifestFilters, ServerDefinedHeaders,
};

use super::*;

impl UpdatesStore {
    /// Replaces the value stored for `data.key()` in `scope_key`.
    pub fn set_json_data(&self, data: &JsonData, scope_key: &str) -> Result<()> {
        let data = data.clone();
        let scope_key = scope_key.to_string();
        self.run(move |conn| {
            in_transaction(conn, "set_json_data", |tx| write_json_data(tx, &data, &scope_key))
        })
    }

    /// Most recently written value for `key` in `scope_key`.
    pub fn json_data(&self, key: JsonDataKey, scope_key: &str) -> Result<Option<JsonData>> {
        let scope_key = scope_key.to_string();
        self.run(move |conn| read_json_data(conn, key, &scope_key))
    }

    pub fn manifest_filters(&self, scope_key: &str) -> Result<Option<ManifestFilters>> {
        Ok(match self.json_data(JsonDataKey::ManifestFilters, scope_key)? {
            Some(JsonData::ManifestFilters(filters)) => Some(filters),
            _ => None,
        })
    }

    pub fn set_manifest_filters(&self, filters: ManifestFilters, scope_key: &str) -> Result<()> {
        self.set_json_data(&JsonData::ManifestFilters(filters), scope_key)
    }

    pub fn server_defined_headers(&self, scope_key: &str) -> Result<Option<ServerDefinedHeaders>> {
        Ok(match self.json_data(JsonDataKey::ServerDefinedHeaders, scope_key)? {
            Some(JsonData::ServerDefinedHeaders(headers)) => Some(headers),
            _ => None,
        })
    }

    pub fn set_server_defined_headers(
        &self,
        headers: ServerDefinedHeaders,
        scope_key: &str,
    ) -> Result<()> {
        self.set_json_data(&JsonData::ServerDefinedHeaders(headers), scope_key)
    }

    pub fn static_build_data(&self, scope_key: &str) -> Result<Option<BuildData>> {
        Ok(match self.json_data(JsonDataKey::StaticBuildData, scope_key)? {
            Some(JsonData::StaticBuildData(data)) => Some(data),
            _ => None,
        })
    }

    pub fn set_static_build_data(&self, data: BuildData, scope_key: &str) -> Result<()> {
        self.set_json_data(&JsonData::StaticBuildData(data), scope_key)
    }

    pub fn extra_params(&self, scope_key: &str) -> Result<Option<ExtraParams>> {
        Ok(match self.json_data(JsonDataKey::ExtraParams, scope_key)? {
            Some(JsonData::ExtraParams(params)) => Some(params),
            _ => None,
        })
    }

    /// Sets (or with `None` removes) one extra param for `scope_key`.
    ///
    /// The stored dictionary is read, edited, validated and written back in a
    /// single transaction; invalid keys or values leave it untouched.
    pub fn set_extra_param(&self, key: &str, value: Option<&str>, scope_key: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.map(str::to_string);
        let scope_key = scope_key.to_string();
        self.run(move |conn| {
            in_transaction(conn, "set_extra_param", |tx| {
                let mut params = match read_json_data(tx, JsonDataKey::ExtraParams, &scope_key)? {
                    Some(JsonData::ExtraParams(params)) => params,
                    _ => ExtraParams::default(),
                };
                match value {
                    Some(value) => {
                        params.0.insert(key, value);
                    }
                    None => {
                        params.0.remove(&key);
                    }
                }
                validate_extra_params(&params)
                    .map_err(|err| StoreError::InvalidExtraParams(err.to_string()))?;
                write_json_data(tx, &JsonData::ExtraParams(params), &scope_key)
            })
        })
    }

    /// Persists what a manifest response carried, both entries or neither.
    pub fn set_metadata_from_response(
        &self,
        server_defined_headers: Option<ServerDefinedHeaders>,
        manifest_filters: Option<ManifestFilters>,
        scope_key: &str,
    ) -> Result<()> {
        let scope_key = scope_key.to_string();
        self.run(move |conn| {
            in_transaction(conn, "set_metadata_from_response", |tx| {
                if let Some(headers) = server_defined_headers {
                    write_json_data(tx, &JsonData::ServerDefinedHeaders(headers), &scope_key)?;
                }
                if let Some(filters) = manifest_filters {
                    write_json_data(tx, &JsonData::ManifestFilters(filters), &scope_key)?;
                }
                Ok(())
            })
        })
    }

    /// Removes every entry for `keys`, whatever scope wrote it.
    pub fn delete_json_data_for_all_scopes(&self, keys: &[JsonDataKey]) -> Result<usize> {
        let keys = keys.to_vec();
        self.run(move |conn| {
            in_transaction(conn, "delete_json_data_for_all_scopes", |tx| {
                let mut deleted = 0;
                for key in &keys {
                    deleted += tx
                        .execute("DELETE FROM json_data WHERE \"key\" = ?1", params![key.as_str()])
                        .during("delete_json_data_for_all_scopes")?;
                }
                Ok(deleted)
            })
        })
    }

    /// Forgets everything cached for `scope_key` and records `build_data` as
    /// the scope's new fingerprint, in one transaction.
    ///
    /// Returns the number of updates removed.
    pub fn reset_scope(&self, scope_key: &str, build_data: BuildData) -> Result<usize> {
        let scope_key = scope_key.to_string();
        self.run(move |conn| {
            in_transaction(conn, "reset_scope", |tx| {
                let removed = tx
                    .execute("DELETE FROM updates WHERE scope_key = ?1", params![scope_key])
                    .during("reset_scope")?;
                for key in [
                    JsonDataKey::ManifestFilters,
                    JsonDataKey::ServerDefinedHeaders,
                    JsonDataKey::ExtraParams,
                ] {
                    tx.execute(
                        "DELETE FROM json_data WHERE \"key\" = ?1 AND scope_key = ?2",
                        params![key.as_str(), scope_key],
                    )
                    .during("reset_scope")?;
                }
                write_json_data(tx, &JsonData::StaticBuildData(build_data), &scope_key)?;
                Ok(removed)
            })
        })
    }
}

/// Delete-then-insert of one entry. Runs inside the caller's transaction.
pub(super) fn write_json_data(tx: &Transaction<'_>, data: &JsonData, scope_key: &str) -> Result<()> {
    let key = data.key();
    let value = data.to_json_string().map_err(|source| StoreError::Json {
        key: key.as_str(),
        source,
    })?;
    tx.execute(
        "DELETE FROM json_data WHERE \"key\" = ?1 AND scope_key = ?2",
        params![key.as_str(), scope_key],
    )
    .during("set_json_data")?;
    tx.execute(
        "INSERT INTO json_data (\"key\", value, last_updated, scope_key) VALUES (?1, ?2, ?3, ?4)",
        params![
            key.as_str(),
            value,
            unix_millis(OffsetDateTime::now_utc()),
            scope_key
        ],
    )
    .during("set_json_data")?;
    Ok(())
}

pub(super) fn read_json_data(
    conn: &Connection,
    key: JsonDataKey,
    scope_key: &str,
) -> Result<Option<JsonData>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM json_data WHERE \"key\" = ?1 AND scope_key = ?2 ORDER BY id DESC LIMIT 1",
            params![key.as_str(), scope_key],
            |row| row.get(0),
        )
        .optional()
        .during("json_data")?;
    raw.map(|raw| {
        JsonData::from_json_str(key, &raw).map_err(|source| StoreError::Json {
            key: key.as_str(),
            source,
        })
    })
    .transpose()
}
