#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod asset;
pub mod config;
pub mod metadata;
pub mod policy;
pub mod timestamp;
pub mod update;

pub use asset::{Asset, HashType};
pub use config::{BuildData, UpdatesConfig};
pub use metadata::{
    validate_extra_params, ExtraParams, JsonData, JsonDataKey, ManifestFilters,
    ServerDefinedHeaders,
};
pub use policy::{
    manifest_matches_filters, DevelopmentClientPolicy, FilterAwarePolicy, ReaperSelectionPolicy,
};
pub use timestamp::{from_unix_millis, unix_millis};
pub use update::{Update, UpdateStatus};
