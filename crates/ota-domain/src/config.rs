use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

const UPDATE_URL_KEY: &str = "updateUrl";
const REQUEST_HEADERS_KEY: &str = "requestHeaders";
const HAS_EMBEDDED_UPDATE_KEY: &str = "hasEmbeddedUpdate";

/// Live update configuration of the host binary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatesConfig {
    pub scope_key: String,
    pub update_url: Option<String>,
    pub request_headers: BTreeMap<String, String>,
    pub has_embedded_update: bool,
}

impl UpdatesConfig {
    #[must_use]
    pub fn new(scope_key: impl Into<String>) -> Self {
        Self {
            scope_key: scope_key.into(),
            update_url: None,
            request_headers: BTreeMap::new(),
            has_embedded_update: true,
        }
    }

    #[must_use]
    pub fn with_update_url(mut self, url: impl Into<String>) -> Self {
        self.update_url = Some(url.into());
        self
    }

    /// Fingerprint of the build-time configuration.
    #[must_use]
    pub fn build_data(&self) -> BuildData {
        let mut map = Map::new();
        if let Some(url) = &self.update_url {
            map.insert(UPDATE_URL_KEY.to_string(), Value::String(url.clone()));
        }
        map.insert(
            REQUEST_HEADERS_KEY.to_string(),
            Value::Object(
                self.request_headers
                    .iter()
                    .map(|(name, value)| (name.clone(), Value::String(value.clone())))
                    .collect(),
            ),
        );
        map.insert(
            HAS_EMBEDDED_UPDATE_KEY.to_string(),
            Value::Bool(self.has_embedded_update),
        );
        BuildData(map)
    }
}

/// Build-data fingerprint as persisted under `staticBuildData`.
///
/// Kept as a raw object so fingerprints written by other builds, possibly
/// carrying keys this build does not know, still compare faithfully.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildData(pub Map<String, Value>);

impl BuildData {
    fn defaults() -> Map<String, Value> {
        let mut defaults = Map::new();
        defaults.insert(UPDATE_URL_KEY.to_string(), Value::Null);
        defaults.insert(REQUEST_HEADERS_KEY.to_string(), json!({}));
        defaults.insert(HAS_EMBEDDED_UPDATE_KEY.to_string(), Value::Bool(true));
        defaults
    }

    /// Missing keys filled in from the default fingerprint.
    #[must_use]
    pub fn with_defaults(&self) -> Map<String, Value> {
        let mut merged = Self::defaults();
        for (key, value) in &self.0 {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Whether two fingerprints describe the same build once defaults apply.
    #[must_use]
    pub fn is_consistent_with(&self, other: &BuildData) -> bool {
        self.with_defaults() == other.with_defaults()
    }
}
