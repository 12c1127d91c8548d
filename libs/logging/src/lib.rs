//! Logging setup shared by the store's binaries and tests.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod file;

use anyhow::{Context, Result};
use tracing::subscriber::DefaultGuard;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    filter::ParseError,
    fmt,
    layer::{Layered, SubscriberExt as _},
    reload,
    util::SubscriberInitExt,
};

/// Silences crates whose `debug` output is never what you are after when debugging the store.
///
/// You can still activate them by restating them in your directive, i.e. `atomicwrites=debug`.
const IRRELEVANT_CRATES: &str = "atomicwrites=warn,tempfile=warn";

/// The subscriber that additional layers passed to [`setup_global_subscriber`] are stacked on.
pub type FilteredRegistry = Layered<reload::Layer<EnvFilter, Registry>, Registry>;

/// Registers a global subscriber with stdout logging and `additional_layer`.
///
/// `additional_layer` is typically the file logger from [`file::layer`] (or `None`).
/// One filter applies to all layers; the returned handle swaps it at runtime.
pub fn setup_global_subscriber<L>(
    directives: &str,
    additional_layer: L,
    stdout_json: bool,
) -> Result<FilterReloadHandle>
where
    L: Layer<FilteredRegistry> + Send + Sync,
{
    let (filter, handle) = try_filter(directives).context("Failed to parse directives")?;

    let stdout = match stdout_json {
        true => fmt::layer().json().flatten_event(true).boxed(),
        false => fmt::layer().compact().boxed(),
    };

    let subscriber = Registry::default()
        .with(filter)
        .with(additional_layer)
        .with(stdout);

    tracing::subscriber::set_global_default(subscriber).context("Could not set global default")?;
    LogTracer::init().context("Failed to init LogTracer")?;

    Ok(handle)
}

/// Constructs a reloadable [`EnvFilter`] with some crates already silenced.
pub fn try_filter(
    directives: &str,
) -> Result<(reload::Layer<EnvFilter, Registry>, FilterReloadHandle), ParseError> {
    let (layer, inner) = reload::Layer::new(parse_filter(directives)?);

    Ok((layer, FilterReloadHandle { inner }))
}

fn parse_filter(directives: &str) -> Result<EnvFilter, ParseError> {
    if directives.is_empty() {
        return EnvFilter::try_new(IRRELEVANT_CRATES);
    }

    EnvFilter::try_new(format!("{IRRELEVANT_CRATES},{directives}"))
}

/// Changes the directives of a running subscriber.
#[derive(Clone, Debug)]
pub struct FilterReloadHandle {
    inner: reload::Handle<EnvFilter, Registry>,
}

impl FilterReloadHandle {
    pub fn reload(&self, directives: &str) -> Result<()> {
        let filter = parse_filter(directives).context("Failed to parse new filter")?;

        self.inner
            .reload(filter)
            .context("Failed to reload filter")?;

        tracing::debug!(%directives, "Reloaded log filter");

        Ok(())
    }
}

/// Initialises a logger to be used in tests.
///
/// Only the calling thread logs through it; the store's notification thread does not.
pub fn test(directives: &str) -> DefaultGuard {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(directives)
        .set_default()
}
