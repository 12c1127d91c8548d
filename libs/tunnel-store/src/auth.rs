//! The boundary to the sign-in flow.
//!
//! The platform drives the actual flow (browser launch, capturing the redirect) and reports its
//! outcome through an [`AuthResponder`]. The core awaits that outcome through the matching [`AuthFlow`].
//! Because the responder is consumed when answering, every flow delivers exactly one outcome.

use tokio::sync::oneshot;
use tunnel_model::TunnelConfig;

use crate::{Error, TunnelStore};

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("Sign-in failed: {0}")]
    Failed(String),
    #[error("Sign-in was abandoned")]
    Abandoned,
    #[error("Failed to save tunnel config")]
    Store(#[from] Error),
}

/// The core's end of a sign-in flow.
#[derive(Debug)]
pub struct AuthFlow {
    rx: oneshot::Receiver<Result<TunnelConfig, String>>,
}

/// The platform's end of a sign-in flow.
///
/// Dropping it without answering abandons the flow.
#[derive(Debug)]
pub struct AuthResponder {
    tx: oneshot::Sender<Result<TunnelConfig, String>>,
}

impl AuthFlow {
    pub fn start() -> (AuthFlow, AuthResponder) {
        let (tx, rx) = oneshot::channel();

        (AuthFlow { rx }, AuthResponder { tx })
    }

    /// Waits for the outcome of the flow.
    pub async fn outcome(self) -> Result<TunnelConfig, AuthError> {
        flatten(self.rx.await)
    }

    /// Waits for the outcome and installs the new config in `store`.
    ///
    /// On failure, `store` is left untouched.
    pub async fn complete(self, store: &TunnelStore) -> Result<(), AuthError> {
        let config = self.outcome().await?;

        install(store, config)
    }

    /// Like [`AuthFlow::complete`], for callers outside of an async runtime.
    ///
    /// # Panics
    ///
    /// When called from within an async runtime.
    pub fn complete_blocking(self, store: &TunnelStore) -> Result<(), AuthError> {
        let config = flatten(self.rx.blocking_recv())?;

        install(store, config)
    }
}

impl AuthResponder {
    pub fn succeed(self, config: TunnelConfig) {
        tracing::debug!(account_slug = %config.account_slug, "Sign-in succeeded");

        if self.tx.send(Ok(config)).is_err() {
            tracing::debug!("Nobody is waiting for the sign-in anymore");
        }
    }

    pub fn fail(self, reason: impl Into<String>) {
        let reason = reason.into();

        tracing::debug!(%reason, "Sign-in failed");

        if self.tx.send(Err(reason)).is_err() {
            tracing::debug!("Nobody is waiting for the sign-in anymore");
        }
    }
}

fn flatten(
    outcome: Result<Result<TunnelConfig, String>, oneshot::error::RecvError>,
) -> Result<TunnelConfig, AuthError> {
    match outcome {
        Ok(Ok(config)) => Ok(config),
        Ok(Err(reason)) => Err(AuthError::Failed(reason)),
        Err(_) => Err(AuthError::Abandoned),
    }
}

fn install(store: &TunnelStore, config: TunnelConfig) -> Result<(), AuthError> {
    store.set_config(config)?;

    tracing::info!("Signed in");

    Ok(())
}
