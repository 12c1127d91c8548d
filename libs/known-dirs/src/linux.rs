use crate::BUNDLE_ID;
use std::path::PathBuf;

/// e.g. `/home/alice/.local/share/dev.firezone.client/data`
///
/// The tunnel store lives here: it is not config the user edits but it must survive reboots
/// and must not be deleted to free up space.
pub fn session() -> Option<PathBuf> {
    Some(dirs::data_local_dir()?.join(BUNDLE_ID).join("data"))
}

/// e.g. `/home/alice/.cache/dev.firezone.client/data/logs`
///
/// Logs are considered cache because it's technically okay if the system deletes them.
pub fn logs() -> Option<PathBuf> {
    Some(dirs::cache_dir()?.join(BUNDLE_ID).join("data").join("logs"))
}
