//! Scoped JSON metadata kinds kept in the `json_data` table.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::BuildData;

/// Logical key of a `json_data` row. The string form is what lands on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JsonDataKey {
    ManifestFilters,
    ServerDefinedHeaders,
    StaticBuildData,
    ExtraParams,
}

impl JsonDataKey {
    pub const ALL: [Self; 4] = [
        Self::ManifestFilters,
        Self::ServerDefinedHeaders,
        Self::StaticBuildData,
        Self::ExtraParams,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ManifestFilters => "manifestFilters",
            Self::ServerDefinedHeaders => "serverDefinedHeaders",
            Self::StaticBuildData => "staticBuildData",
            Self::ExtraParams => "extraParams",
        }
    }
}

/// Server-supplied filters matched against `manifest.metadata`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestFilters(pub Map<String, Value>);

/// Headers the update server asked the client to echo back.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerDefinedHeaders(pub Map<String, Value>);

/// Client-chosen parameters sent with every manifest request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtraParams(pub BTreeMap<String, String>);

/// One typed `json_data` value. Every kind serializes to a JSON object.
#[derive(Clone, Debug, PartialEq)]
pub enum JsonData {
    ManifestFilters(ManifestFilters),
    ServerDefinedHeaders(ServerDefinedHeaders),
    StaticBuildData(BuildData),
    ExtraParams(ExtraParams),
}

impl JsonData {
    #[must_use]
    pub fn key(&self) -> JsonDataKey {
        match self {
            Self::ManifestFilters(_) => JsonDataKey::ManifestFilters,
            Self::ServerDefinedHeaders(_) => JsonDataKey::ServerDefinedHeaders,
            Self::StaticBuildData(_) => JsonDataKey::StaticBuildData,
            Self::ExtraParams(_) => JsonDataKey::ExtraParams,
        }
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        match self {
            Self::ManifestFilters(value) => serde_json::to_string(value),
            Self::ServerDefinedHeaders(value) => serde_json::to_string(value),
            Self::StaticBuildData(value) => serde_json::to_string(value),
            Self::ExtraParams(value) => serde_json::to_string(value),
        }
    }

    /// Decodes a stored value according to the kind named by `key`.
    pub fn from_json_str(key: JsonDataKey, raw: &str) -> serde_json::Result<Self> {
        Ok(match key {
            JsonDataKey::ManifestFilters => Self::ManifestFilters(serde_json::from_str(raw)?),
            JsonDataKey::ServerDefinedHeaders => {
                Self::ServerDefinedHeaders(serde_json::from_str(raw)?)
            }
            JsonDataKey::StaticBuildData => Self::StaticBuildData(serde_json::from_str(raw)?),
            JsonDataKey::ExtraParams => Self::ExtraParams(serde_json::from_str(raw)?),
        })
    }
}

/// Checks that extra params can be sent as a structured-header dictionary of
/// string items.
pub fn validate_extra_params(params: &ExtraParams) -> Result<()> {
    for (key, value) in &params.0 {
        let mut chars = key.chars();
        match chars.next() {
            Some(first) if first.is_ascii_lowercase() || first == '*' => {}
            _ => bail!("extra param key '{key}' must start with a lowercase letter or '*'"),
        }
        if let Some(bad) = chars.find(|c| {
            !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(*c, '_' | '-' | '.' | '*'))
        }) {
            bail!("extra param key '{key}' contains invalid character {bad:?}");
        }
        if let Some(bad) = value.chars().find(|c| !(' '..='~').contains(c)) {
            bail!("extra param '{key}' value contains non-printable character {bad:?}");
        }
    }
    Ok(())
}
