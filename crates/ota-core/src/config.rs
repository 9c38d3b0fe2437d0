use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use uuid::Uuid;

use ota_domain::UpdatesConfig;

const STORE_DIR: &str = "OTA_STORE_DIR";
const SCOPE_KEY: &str = "OTA_SCOPE_KEY";
const UPDATE_URL: &str = "OTA_UPDATE_URL";
const REQUEST_HEADERS: &str = "OTA_REQUEST_HEADERS";
const HAS_EMBEDDED_UPDATE: &str = "OTA_HAS_EMBEDDED_UPDATE";
const EMBEDDED_UPDATE_ID: &str = "OTA_EMBEDDED_UPDATE_ID";

const DEFAULT_SCOPE_KEY: &str = "default";

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Everything needed to open a store and run the startup checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    pub directory: PathBuf,
    pub updates: UpdatesConfig,
    pub embedded_update_id: Option<Uuid>,
}

impl StoreSettings {
    /// Reads the `OTA_*` variables of the current process.
    ///
    /// # Errors
    /// Returns an error if a variable is malformed or no store directory can
    /// be derived.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> anyhow::Result<Self> {
        let directory = match snapshot.var(STORE_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => default_store_dir()?,
        };
        let update_url = snapshot.var(UPDATE_URL).map(str::to_string);
        let scope_key = snapshot
            .var(SCOPE_KEY)
            .map(str::to_string)
            .or_else(|| update_url.clone())
            .unwrap_or_else(|| DEFAULT_SCOPE_KEY.to_string());
        let request_headers = match snapshot.var(REQUEST_HEADERS) {
            Some(raw) => serde_json::from_str::<BTreeMap<String, String>>(raw)
                .with_context(|| format!("{REQUEST_HEADERS} must be a JSON object of strings"))?,
            None => BTreeMap::new(),
        };
        let has_embedded_update = snapshot.var(HAS_EMBEDDED_UPDATE).is_none_or(|value| {
            !matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            )
        });
        let embedded_update_id = snapshot
            .var(EMBEDDED_UPDATE_ID)
            .map(|raw| {
                Uuid::parse_str(raw.trim())
                    .with_context(|| format!("{EMBEDDED_UPDATE_ID} is not a valid UUID: {raw}"))
            })
            .transpose()?;

        Ok(Self {
            directory,
            updates: UpdatesConfig {
                scope_key,
                update_url,
                request_headers,
                has_embedded_update,
            },
            embedded_update_id,
        })
    }
}

fn default_store_dir() -> anyhow::Result<PathBuf> {
    dirs_next::home_dir()
        .map(|home| home.join(".ota").join("updates"))
        .ok_or_else(|| anyhow!("cannot determine a home directory; set {STORE_DIR}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_values_are_used() -> anyhow::Result<()> {
        let snapshot = EnvSnapshot::testing(&[
            (STORE_DIR, "/var/lib/app/updates"),
            (SCOPE_KEY, "app-scope"),
            (UPDATE_URL, "https://u.example/manifest"),
            (REQUEST_HEADERS, r#"{"expo-channel-name":"beta"}"#),
            (HAS_EMBEDDED_UPDATE, "off"),
            (EMBEDDED_UPDATE_ID, "8c263f9d-e3ff-4888-8496-e3244c788661"),
        ]);
        let settings = StoreSettings::from_snapshot(&snapshot)?;
        assert_eq!(settings.directory, PathBuf::from("/var/lib/app/updates"));
        assert_eq!(settings.updates.scope_key, "app-scope");
        assert_eq!(
            settings.updates.update_url.as_deref(),
            Some("https://u.example/manifest")
        );
        assert_eq!(
            settings.updates.request_headers.get("expo-channel-name").map(String::as_str),
            Some("beta")
        );
        assert!(!settings.updates.has_embedded_update);
        assert_eq!(
            settings.embedded_update_id,
            Some(Uuid::from_u128(0x8c26_3f9d_e3ff_4888_8496_e324_4c78_8661))
        );
        Ok(())
    }

    #[test]
    fn scope_falls_back_to_update_url_then_default() -> anyhow::Result<()> {
        let with_url = EnvSnapshot::testing(&[
            (STORE_DIR, "/tmp/u"),
            (UPDATE_URL, "https://u.example/manifest"),
        ]);
        assert_eq!(
            StoreSettings::from_snapshot(&with_url)?.updates.scope_key,
            "https://u.example/manifest"
        );

        let bare = EnvSnapshot::testing(&[(STORE_DIR, "/tmp/u"), (SCOPE_KEY, "  ")]);
        let settings = StoreSettings::from_snapshot(&bare)?;
        assert_eq!(settings.updates.scope_key, DEFAULT_SCOPE_KEY);
        assert!(settings.updates.has_embedded_update);
        assert!(settings.embedded_update_id.is_none());
        Ok(())
    }

    #[test]
    fn malformed_values_are_errors() {
        let headers = EnvSnapshot::testing(&[(STORE_DIR, "/tmp/u"), (REQUEST_HEADERS, "[1,2]")]);
        let err = StoreSettings::from_snapshot(&headers).expect_err("not an object");
        assert!(err.to_string().contains(REQUEST_HEADERS));

        let id = EnvSnapshot::testing(&[(STORE_DIR, "/tmp/u"), (EMBEDDED_UPDATE_ID, "nope")]);
        let err = StoreSettings::from_snapshot(&id).expect_err("not a uuid");
        assert!(err.to_string().contains(EMBEDDED_UPDATE_ID));
    }
}
