use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::UpdatesConfig;

/// Lifecycle of a stored update. The discriminants are the values persisted
/// in `updates.status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateStatus {
    Ready = 1,
    Pending = 3,
    Embedded = 5,
    Development = 6,
}

impl UpdateStatus {
    pub const LAUNCHABLE: [Self; 3] = [Self::Ready, Self::Embedded, Self::Development];

    #[must_use]
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    #[must_use]
    pub fn from_i64(raw: i64) -> Option<Self> {
        match raw {
            1 => Some(Self::Ready),
            3 => Some(Self::Pending),
            5 => Some(Self::Embedded),
            6 => Some(Self::Development),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Pending => "pending",
            Self::Embedded => "embedded",
            Self::Development => "development",
        }
    }

    #[must_use]
    pub fn is_launchable(self) -> bool {
        Self::LAUNCHABLE.contains(&self)
    }

    /// Status after the update finished downloading or launched.
    /// Development updates are never promoted.
    #[must_use]
    pub fn finished(self) -> Self {
        match self {
            Self::Development => Self::Development,
            _ => Self::Ready,
        }
    }
}

/// A downloaded (or embedded) application bundle as persisted in the store.
///
/// Values handed out by the store are detached snapshots; mutating one does
/// not touch the database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    pub id: Uuid,
    pub scope_key: String,
    #[serde(with = "time::serde::rfc3339")]
    pub commit_time: OffsetDateTime,
    pub runtime_version: String,
    /// Raw manifest JSON, stored and returned without re-serialization.
    pub manifest: String,
    pub launch_asset_id: Option<i64>,
    pub status: UpdateStatus,
    pub keep: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub last_accessed: OffsetDateTime,
    pub successful_launch_count: u32,
    pub failed_launch_count: u32,
    pub url: Option<String>,
    pub request_headers: Option<BTreeMap<String, String>>,
}

impl Update {
    /// A fresh pending update as produced by a manifest download.
    #[must_use]
    pub fn new(
        id: Uuid,
        scope_key: impl Into<String>,
        commit_time: OffsetDateTime,
        runtime_version: impl Into<String>,
        manifest: impl Into<String>,
    ) -> Self {
        Self {
            id,
            scope_key: scope_key.into(),
            commit_time,
            runtime_version: runtime_version.into(),
            manifest: manifest.into(),
            launch_asset_id: None,
            status: UpdateStatus::Pending,
            keep: false,
            last_accessed: OffsetDateTime::now_utc(),
            successful_launch_count: 0,
            failed_launch_count: 0,
            url: None,
            request_headers: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: UpdateStatus) -> Self {
        self.status = status;
        self
    }

    /// Records which server and request headers the update was fetched with.
    #[must_use]
    pub fn with_config(mut self, config: &UpdatesConfig) -> Self {
        self.url = config.update_url.clone();
        self.request_headers = Some(config.request_headers.clone());
        self
    }

    /// Launchable updates have a launchable status and have either launched
    /// successfully at least once or never failed.
    #[must_use]
    pub fn is_launchable(&self) -> bool {
        self.status.is_launchable()
            && (self.successful_launch_count > 0 || self.failed_launch_count < 1)
    }

    /// Parsed manifest. `None` when the stored text is not valid JSON.
    #[must_use]
    pub fn manifest_json(&self) -> Option<Value> {
        serde_json::from_str(&self.manifest).ok()
    }

    /// The `metadata` object embedded in the manifest, if any.
    #[must_use]
    pub fn manifest_metadata(&self) -> Option<serde_json::Map<String, Value>> {
        match self.manifest_json()? {
            Value::Object(mut manifest) => match manifest.remove("metadata")? {
                Value::Object(metadata) => Some(metadata),
                _ => None,
            },
            _ => None,
        }
    }
}
