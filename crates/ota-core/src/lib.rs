#![deny(clippy::all, warnings)]

pub mod build_data;
pub mod config;
mod error;
mod files;
pub mod integrity;
pub mod reaper;
pub mod startup;
pub mod store;

pub use build_data::{ensure_build_data_is_consistent, BuildDataCheck};
pub use config::StoreSettings;
pub use error::{codes, Result, StoreError};
pub use integrity::{check_integrity, IntegrityReport};
pub use reaper::{reap_unused_updates, ReapSummary};
pub use startup::{prepare, StartupReport};
pub use store::{database_filename, OpenReport, UpdatesStore, LATEST_SCHEMA_VERSION};
