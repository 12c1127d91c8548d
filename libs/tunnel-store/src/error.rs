use tunnel_model::TunnelState;

/// Errors returned by [`TunnelStore`](crate::TunnelStore).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The backing store failed; the in-memory state is unchanged and the operation may be retried.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    /// The requested state change is not part of the tunnel lifecycle; the state is unchanged.
    #[error("Invalid tunnel state transition from `{from}` to `{to}`")]
    InvalidTransition { from: TunnelState, to: TunnelState },
    /// No config has been set yet, i.e. the user needs to sign in.
    #[error("No tunnel config has been set")]
    NotConfigured,
}

impl Error {
    pub fn is_persistence_error(&self) -> bool {
        matches!(self, Error::Persistence(_))
    }
}

/// The backing store failed to read or write a value.
#[derive(thiserror::Error, Debug)]
#[error("{inner:#}")]
pub struct PersistenceError {
    inner: anyhow::Error,
    kind: Kind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Io,
    Corruption,
}

impl PersistenceError {
    /// The storage medium failed, e.g. an I/O fault or a full disk.
    pub fn io(error: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: error.into(),
            kind: Kind::Io,
        }
    }

    /// A value exists but cannot be trusted anymore.
    pub fn corruption(error: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: error.into(),
            kind: Kind::Corruption,
        }
    }

    pub fn is_corruption(&self) -> bool {
        self.kind == Kind::Corruption
    }

    pub(crate) fn context(self, context: &'static str) -> Self {
        Self {
            inner: self.inner.context(context),
            kind: self.kind,
        }
    }
}
