//! The tunnel session state store.
//!
//! [`TunnelStore`] owns the tunnel's config, lifecycle state, resources and routes.
//! It persists every change to a [`KeyValueStore`] before making it visible and notifies
//! [`Listener`]s about each committed change, in commit order.

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod auth;
mod backend;
mod codec;
mod error;
mod key;
mod listeners;
mod reconcile;
mod store;

pub use auth::{AuthError, AuthFlow, AuthResponder};
pub use backend::{Batch, FileStore, KeyValueStore, MemoryStore, Op};
pub use error::{Error, PersistenceError};
pub use key::Key;
pub use listeners::{Change, Listener, ListenerId, Notification};
pub use reconcile::{RouteDelta, RouteReconciler};
pub use store::TunnelStore;

pub use tunnel_model::{
    ResourceView, Route, Tunnel, TunnelConfig, TunnelState, V4RouteList, V6RouteList,
};
