//! Asset files living next to the database.

use std::{fs, io::ErrorKind, path::Path};

use tracing::warn;

use crate::error::{Result, StoreError};

/// A failed deletion is retried once before it is reported.
const REMOVE_ATTEMPTS: usize = 2;

/// Whether `path` names an existing regular file.
pub(crate) fn asset_file_exists(path: &Path) -> bool {
    path.is_file()
}

/// Removes an asset file. A file that is already gone counts as removed.
pub(crate) fn remove_asset_file(path: &Path) -> Result<()> {
    let mut last_err = None;
    for attempt in 1..=REMOVE_ATTEMPTS {
        match fs::remove_file(path) {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                if attempt < REMOVE_ATTEMPTS {
                    warn!(path = %path.display(), %err, "failed to delete asset file, retrying");
                }
                last_err = Some(err);
            }
        }
    }
    Err(StoreError::Io {
        path: path.to_path_buf(),
        source: last_err.unwrap_or_else(|| ErrorKind::Other.into()),
    })
}
