use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Algorithm used for `Asset::hash`. Persisted as an integer in `assets.hash_type`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashType {
    #[default]
    Sha256 = 0,
}

impl HashType {
    #[must_use]
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    #[must_use]
    pub fn from_i64(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(Self::Sha256),
            _ => None,
        }
    }
}

/// A single file belonging to one or more updates.
///
/// `id` is `None` until the asset has been persisted. `is_launch_asset` is
/// derived at read time from the owning update's `launch_asset_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: Option<i64>,
    pub key: Option<String>,
    pub url: Option<String>,
    pub headers: Option<Map<String, Value>>,
    pub extra_request_headers: Option<Map<String, Value>>,
    pub asset_type: String,
    pub metadata: Option<Map<String, Value>>,
    #[serde(with = "time::serde::rfc3339")]
    pub download_time: OffsetDateTime,
    pub relative_path: String,
    pub hash: String,
    pub hash_type: HashType,
    pub expected_hash: Option<String>,
    pub is_launch_asset: bool,
}

impl Asset {
    /// A downloaded asset that has not been registered yet.
    #[must_use]
    pub fn new(
        key: Option<String>,
        asset_type: impl Into<String>,
        relative_path: impl Into<String>,
        hash: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            key,
            url: None,
            headers: None,
            extra_request_headers: None,
            asset_type: asset_type.into(),
            metadata: None,
            download_time: OffsetDateTime::now_utc(),
            relative_path: relative_path.into(),
            hash: hash.into(),
            hash_type: HashType::Sha256,
            expected_hash: None,
            is_launch_asset: false,
        }
    }

    #[must_use]
    pub fn launch(mut self) -> Self {
        self.is_launch_asset = true;
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Combines a freshly described asset with the persisted row that holds
    /// the same content.
    ///
    /// The URL and extra request headers of `self` win when present; file
    /// location, hashes, download time and id always come from `existing`.
    /// Returns the merged descriptor and, when the persisted row needs new
    /// URL or header values, the row to write back.
    #[must_use]
    pub fn merged_with(&self, existing: &Asset) -> (Asset, Option<Asset>) {
        let mut refreshed = existing.clone();
        let mut changed = false;

        if let Some(url) = &self.url {
            if existing.url.as_ref() != Some(url) {
                refreshed.url = Some(url.clone());
                changed = true;
            }
        }
        if let Some(extra) = &self.extra_request_headers {
            if existing.extra_request_headers.as_ref() != Some(extra) {
                refreshed.extra_request_headers = Some(extra.clone());
                changed = true;
            }
        }

        let mut merged = self.clone();
        merged.id = existing.id;
        merged.url = refreshed.url.clone();
        merged.extra_request_headers = refreshed.extra_request_headers.clone();
        merged.relative_path = existing.relative_path.clone();
        merged.hash = existing.hash.clone();
        merged.hash_type = existing.hash_type;
        merged.expected_hash = existing.expected_hash.clone();
        merged.download_time = existing.download_time;

        (merged, changed.then_some(refreshed))
    }
}
