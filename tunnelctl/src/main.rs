//! Inspect and drive a tunnel store on disk.
//!
//! Mostly useful for debugging the network extension: it operates on the same files.

#![cfg_attr(test, allow(clippy::unwrap_used))]

use anyhow::{Context as _, Result};
use clap::Parser;
use serde_json::json;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tunnel_model::{ResourceView, Route, TunnelConfig, TunnelState};
use tunnel_store::{FileStore, Notification, TunnelStore};

/// How often `watch` looks for changes made by other processes.
const RELOAD_INTERVAL: Duration = Duration::from_secs(1);

/// Command-line args for `tunnelctl`
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Directory of the tunnel store. Defaults to the platform's session directory.
    #[arg(long, env = "TUNNEL_STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// File logging directory. Should be a path that's writeable by the current user.
    ///
    /// `watch` logs to the platform's log directory if this is not set.
    #[arg(short, long, env = "LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_filter: String,

    /// Log to stdout as JSON.
    #[arg(long, env = "TUNNELCTL_LOG_JSON", default_value_t = false)]
    log_json: bool,
}

#[derive(clap::Subcommand)]
enum Cmd {
    /// Print the tunnel as JSON
    Show,
    /// Replace the config with the one in a JSON file
    SetConfig { path: PathBuf },
    /// Move the tunnel to another lifecycle state
    SetState { state: TunnelState },
    /// Replace the resources with the ones in a JSON file and reconcile the routes
    SetResources { path: PathBuf },
    /// Add a route, e.g. `10.0.0.0/8` or `fd00::1`
    AddRoute { route: Route },
    RemoveRoute { route: Route },
    /// Print the routes in the format expected by the tunnel engines
    Routes,
    /// Remove everything, like signing out
    Clear,
    /// Print changes as they happen until Ctrl-C
    Watch,
}

#[expect(
    clippy::print_stderr,
    reason = "No logger is active when we are printing this error."
)]
fn main() {
    match try_main() {
        Ok(()) => {}
        Err(e) => {
            eprintln!("{e:#}");

            std::process::exit(1);
        }
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = cli
        .log_dir
        .clone()
        .or_else(|| matches!(cli.command, Cmd::Watch).then(known_dirs::logs).flatten());
    let (layer, _handle) = log_dir
        .as_deref()
        .map(|dir| logging::file::layer(dir, "tunnelctl"))
        .transpose()
        .context("Failed to create log file")?
        .unzip();
    logging::setup_global_subscriber(&cli.log_filter, layer, cli.log_json)
        .context("Failed to set up logging")?;

    let store_dir = match cli.store_dir {
        Some(dir) => dir,
        None => known_dirs::tunnel_store_or_err()?,
    };
    tracing::debug!(store_dir = %store_dir.display(), "Opening tunnel store");

    let store = TunnelStore::open(FileStore::open(&store_dir)?)
        .with_context(|| format!("Failed to open tunnel store at `{}`", store_dir.display()))?;

    match cli.command {
        Cmd::Show => {
            let tunnel = store.get().context("Tunnel is not configured")?;

            print_json(&tunnel)?;
        }
        Cmd::SetConfig { path } => {
            let config = read_json::<TunnelConfig>(&path)?;

            store.set_config(config)?;
        }
        Cmd::SetState { state } => store.set_state(state)?,
        Cmd::SetResources { path } => {
            let resources = read_json::<Vec<ResourceView>>(&path)?;

            store.set_resources(resources)?;
        }
        Cmd::AddRoute { route } => store.add_route(route)?,
        Cmd::RemoveRoute { route } => store.remove_route(route)?,
        Cmd::Routes => {
            let (v4, v6) = store
                .get()
                .context("Tunnel is not configured")?
                .interface_route_lists();

            print_json(&json!({ "ipv4": v4, "ipv6": v6 }))?;
        }
        Cmd::Clear => store.clear()?,
        Cmd::Watch => {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to create tokio runtime")?;

            rt.block_on(watch(&store))?;
        }
    }

    store.flush();

    Ok(())
}

async fn watch(store: &TunnelStore) -> Result<()> {
    let (_, rx) = store.subscribe();
    let mut reload = tokio::time::interval(RELOAD_INTERVAL);

    loop {
        tokio::select! {
            notification = rx.recv_async() => {
                let notification = notification.context("Tunnel store is gone")?;

                print_notification(&notification)?;
            }
            _ = reload.tick() => {
                if let Err(e) = store.reload() {
                    tracing::warn!("Failed to reload tunnel store: {e:#}");
                }
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;

                tracing::debug!("Caught Ctrl-C");

                return Ok(());
            }
        }
    }
}

fn read_json<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let bytes = fs::read(path).with_context(|| format!("Failed to read `{}`", path.display()))?;

    serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse `{}`", path.display()))
}

#[expect(clippy::print_stdout, reason = "Printing is the job of this command.")]
fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);

    Ok(())
}

#[expect(clippy::print_stdout, reason = "Printing is the job of this command.")]
fn print_notification(notification: &Notification) -> Result<()> {
    println!("{}", serde_json::to_string(notification)?);

    Ok(())
}
