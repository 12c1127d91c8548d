//! File logger for the tunnel store and its tools.
//!
//! Every process writes to a fresh file named `<base>.<timestamp>.log`; a `latest` link in the
//! same directory always points at the file of the most recent process.
//! Files are never rotated while the process runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{fs, io};

use anyhow::{Context as _, Result};
use time::OffsetDateTime;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::Layer;

pub const TIME_FORMAT: &str = "[year]-[month]-[day]-[hour]-[minute]-[second]";

/// How many lines we will at most buffer in the channel with the background thread that writes to disk.
///
/// The store logs little; this only needs to absorb bursts, e.g. a large resource update.
/// As per docs on [`tracing_appender::non_blocking::DEFAULT_BUFFERED_LINES_LIMIT`], this is a power of 2.
const MAX_BUFFERED_LINES: usize = 1024;

/// Create a new file logger layer.
pub fn layer<T>(
    log_dir: &Path,
    file_base_name: &str,
) -> Result<(Box<dyn Layer<T> + Send + Sync + 'static>, Handle)>
where
    T: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let (file, path) = create_log_file(log_dir, file_base_name)?;

    let (writer, guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(MAX_BUFFERED_LINES)
        .finish(file);

    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .boxed();

    let handle = Handle {
        path,
        _guard: Arc::new(guard),
    };

    Ok((layer, handle))
}

/// A handle to the file logger.
///
/// Houses the [`WorkerGuard`] of the non-blocking appender.
/// Thus, you MUST NOT drop this handle for as long as you want messages to arrive in the log file.
#[must_use]
#[derive(Clone, Debug)]
pub struct Handle {
    path: PathBuf,
    _guard: Arc<WorkerGuard>,
}

impl Handle {
    /// Path of the file this process is logging to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn create_log_file(log_dir: &Path, file_base_name: &str) -> Result<(fs::File, PathBuf)> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log dir `{}`", log_dir.display()))?;

    let format = time::format_description::parse(TIME_FORMAT)
        .context("Failed to parse log file time format")?;
    let date = OffsetDateTime::now_utc()
        .format(&format)
        .context("Failed to format timestamp")?;

    let path = log_dir.join(format!("{file_base_name}.{date}.log"));
    let file = fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file `{}`", path.display()))?;
    set_permissions(&file).context("Failed to set permissions on log file")?;

    if let Err(e) = link_latest(log_dir, &path) {
        tracing::debug!("Failed to create `latest` link to log file: {e}");
    }

    Ok((file, path))
}

fn link_latest(log_dir: &Path, path: &Path) -> io::Result<()> {
    let latest = log_dir.join("latest");
    let _ = fs::remove_file(&latest);

    #[cfg(unix)]
    std::os::unix::fs::symlink(path, latest)?;
    #[cfg(windows)]
    std::os::windows::fs::symlink_file(path, latest)?;

    Ok(())
}

/// user read/write, group read-only, others nothing
#[cfg(unix)]
fn set_permissions(f: &fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    f.set_permissions(fs::Permissions::from_mode(0o640))
}

#[cfg(not(unix))]
#[expect(clippy::unnecessary_wraps)]
fn set_permissions(_: &fs::File) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    use super::*;

    #[test]
    fn writes_events_to_log_file() {
        let dir = tempfile::tempdir().unwrap();

        let (layer, handle) = layer(dir.path(), "tunnelctl").unwrap();
        let path = handle.path().to_path_buf();

        {
            let _guard = tracing_subscriber::registry()
                .with(layer)
                .with(tracing_subscriber::EnvFilter::from("info"))
                .set_default();

            tracing::info!("This is a test");
        }
        drop(handle); // Dropping the guard flushes the background writer.

        let content = fs::read_to_string(path).unwrap();

        assert!(content.contains("This is a test"));
    }

    #[test]
    #[cfg(unix)]
    fn latest_points_to_current_file() {
        let dir = tempfile::tempdir().unwrap();

        let (_layer, handle) = layer::<tracing_subscriber::Registry>(dir.path(), "tunnelctl").unwrap();

        let latest = fs::read_link(dir.path().join("latest")).unwrap();

        assert_eq!(latest, handle.path());
    }
}
