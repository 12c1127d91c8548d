use crate::BUNDLE_ID;
use std::path::PathBuf;

/// e.g. `/Users/alice/Library/Application Support/dev.firezone.client/data`
pub fn session() -> Option<PathBuf> {
    Some(dirs::data_dir()?.join(BUNDLE_ID).join("data"))
}

/// e.g. `/Users/alice/Library/Caches/dev.firezone.client/logs`
pub fn logs() -> Option<PathBuf> {
    Some(dirs::cache_dir()?.join(BUNDLE_ID).join("logs"))
}
