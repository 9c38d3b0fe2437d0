//! Detects a change of build-time update configuration.
//!
//! Updates downloaded under one update URL or header set must not be
//! launched by a binary configured for another, so a changed fingerprint
//! clears the scope before anything is launched.

use serde::Serialize;
use tracing::{debug, info};

use ota_domain::UpdatesConfig;

use crate::error::Result;
use crate::store::UpdatesStore;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum BuildDataCheck {
    /// Nothing was stored for the scope yet; the fingerprint was recorded.
    Recorded,
    /// The stored fingerprint matches the current build.
    Unchanged,
    /// The build changed; the scope's updates and metadata were cleared.
    Reset { removed_updates: usize },
}

pub fn ensure_build_data_is_consistent(
    store: &UpdatesStore,
    config: &UpdatesConfig,
) -> Result<BuildDataCheck> {
    let current = config.build_data();
    let scope = config.scope_key.as_str();
    match store.static_build_data(scope)? {
        None => {
            store.set_static_build_data(current, scope)?;
            debug!(scope, "recorded build data");
            Ok(BuildDataCheck::Recorded)
        }
        Some(stored) if stored.is_consistent_with(&current) => {
            store.set_static_build_data(current, scope)?;
            Ok(BuildDataCheck::Unchanged)
        }
        Some(_) => {
            let removed_updates = store.reset_scope(scope, current)?;
            info!(
                scope,
                removed_updates, "build data changed; cleared stored updates for the scope"
            );
            Ok(BuildDataCheck::Reset { removed_updates })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ota_domain::{BuildData, ManifestFilters, Update};
    use tempfile::tempdir;
    use time::OffsetDateTime;
    use uuid::Uuid;

    const SCOPE: &str = "https://u.example/app";

    fn config(url: &str) -> UpdatesConfig {
        let mut config = UpdatesConfig::new(SCOPE).with_update_url(url);
        config
            .request_headers
            .insert("expo-channel-name".into(), "main".into());
        config
    }

    #[test]
    fn first_run_records_and_second_run_matches() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let store = UpdatesStore::open(temp.path())?;
        let config = config("https://u.example/a");

        assert_eq!(ensure_build_data_is_consistent(&store, &config)?, BuildDataCheck::Recorded);
        assert_eq!(ensure_build_data_is_consistent(&store, &config)?, BuildDataCheck::Unchanged);
        assert_eq!(store.static_build_data(SCOPE)?, Some(config.build_data()));
        Ok(())
    }

    #[test]
    fn changed_url_wipes_the_scope() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let store = UpdatesStore::open(temp.path())?;
        let before = config("https://u.example/a");
        ensure_build_data_is_consistent(&store, &before)?;

        let update = Update::new(Uuid::from_u128(1), SCOPE, OffsetDateTime::now_utc(), "1", "{}");
        store.add_update(&update)?;
        store.set_manifest_filters(ManifestFilters::default(), SCOPE)?;
        store.set_extra_param("channel", Some("beta"), SCOPE)?;

        let after = config("https://u.example/b");
        assert_eq!(
            ensure_build_data_is_consistent(&store, &after)?,
            BuildDataCheck::Reset { removed_updates: 1 }
        );
        assert!(store.all_updates()?.is_empty());
        assert_eq!(store.manifest_filters(SCOPE)?, None);
        assert_eq!(store.extra_params(SCOPE)?, None);
        assert_eq!(store.static_build_data(SCOPE)?, Some(after.build_data()));
        Ok(())
    }

    #[test]
    fn defaults_fill_missing_stored_keys() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let store = UpdatesStore::open(temp.path())?;
        store.set_static_build_data(BuildData::default(), SCOPE)?;

        let plain = UpdatesConfig::new(SCOPE);
        assert_eq!(ensure_build_data_is_consistent(&store, &plain)?, BuildDataCheck::Unchanged);
        Ok(())
    }
}
