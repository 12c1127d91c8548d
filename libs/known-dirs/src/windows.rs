use crate::BUNDLE_ID;
use known_folders::{KnownFolder, get_known_folder_path};
use std::path::PathBuf;

/// Returns e.g. `C:/Users/Alice/AppData/Local/dev.firezone.client`
///
/// Per-user, doesn't roam across PCs in the same domain and is writable without elevation.
fn app_local_data_dir() -> Option<PathBuf> {
    Some(get_known_folder_path(KnownFolder::LocalAppData)?.join(BUNDLE_ID))
}

/// e.g. `C:\Users\Alice\AppData\Local\dev.firezone.client\data`
pub fn session() -> Option<PathBuf> {
    Some(app_local_data_dir()?.join("data"))
}

/// e.g. `C:\Users\Alice\AppData\Local\dev.firezone.client\data\logs`
pub fn logs() -> Option<PathBuf> {
    Some(app_local_data_dir()?.join("data").join("logs"))
}
