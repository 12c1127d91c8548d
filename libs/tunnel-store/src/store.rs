use anyhow::anyhow;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use tunnel_model::{ResourceView, Route, Tunnel, TunnelConfig, TunnelState};

use crate::backend::{Batch, KeyValueStore};
use crate::listeners::{Change, Listener, ListenerId, ListenerRegistry, Notification};
use crate::reconcile::{RouteDelta, RouteReconciler};
use crate::{Error, Key, PersistenceError, codec};

/// The single source of truth for the tunnel's config, state, resources and routes.
///
/// All values are cached in memory and every mutation is written through to the backing store
/// before the cache changes. Mutations are serialized by one writer lock that readers respect too,
/// hence [`TunnelStore::get`] always returns a consistent snapshot.
///
/// There is exactly one store per running session; share it by reference (or [`Arc`](std::sync::Arc)).
pub struct TunnelStore {
    inner: RwLock<Inner>,
    listeners: ListenerRegistry,
}

struct Inner {
    backend: Box<dyn KeyValueStore>,
    cache: Cache,
    reconciler: RouteReconciler,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Cache {
    config: Option<TunnelConfig>,
    state: TunnelState,
    resources: Vec<ResourceView>,
    routes: BTreeSet<Route>,
}

impl TunnelStore {
    /// Opens the store on top of `backend`, loading all values.
    ///
    /// Fails if any value cannot be read or is corrupt.
    pub fn open(backend: impl KeyValueStore + 'static) -> Result<Self, PersistenceError> {
        let cache = Cache::load(&backend)?;
        let reconciler = RouteReconciler::recover(&cache.resources, &cache.routes);
        let listeners = ListenerRegistry::new()
            .map_err(|e| PersistenceError::io(e).context("Failed to spawn notification thread"))?;

        tracing::debug!(
            configured = cache.config.is_some(),
            state = %cache.state,
            num_resources = cache.resources.len(),
            num_routes = cache.routes.len(),
            "Opened tunnel store"
        );

        Ok(Self {
            inner: RwLock::new(Inner {
                backend: Box::new(backend),
                cache,
                reconciler,
            }),
            listeners,
        })
    }

    /// A snapshot of the whole tunnel, `None` if no config has been set.
    pub fn get(&self) -> Option<Tunnel> {
        let inner = self.inner.read();
        let cache = &inner.cache;

        Some(Tunnel {
            config: cache.config.clone()?,
            state: cache.state,
            resources: cache.resources.clone(),
            routes: cache.routes.clone(),
        })
    }

    pub fn get_config(&self) -> Result<TunnelConfig, Error> {
        self.inner
            .read()
            .cache
            .config
            .clone()
            .ok_or(Error::NotConfigured)
    }

    pub fn get_state(&self) -> TunnelState {
        self.inner.read().cache.state
    }

    pub fn get_resources(&self) -> Vec<ResourceView> {
        self.inner.read().cache.resources.clone()
    }

    pub fn get_routes(&self) -> BTreeSet<Route> {
        self.inner.read().cache.routes.clone()
    }

    /// Replaces the config.
    ///
    /// State, resources and routes stay as they are, unless the tunnel is [`TunnelState::Closed`].
    /// A new config is the only way out of [`TunnelState::Closed`], so in that case the state goes back to [`TunnelState::Down`].
    pub fn set_config(&self, config: TunnelConfig) -> Result<(), Error> {
        let mut inner = self.inner.write();
        let reopen = inner.cache.state.is_terminal();

        let mut batch = Batch::default();
        batch.put(Key::Config, codec::encode(Key::Config, &config)?);
        if reopen {
            batch.put(Key::State, codec::encode(Key::State, &TunnelState::Down)?);
        }
        inner.commit(&batch)?;

        inner.cache.config = Some(config.clone());
        self.listeners.publish(Change::Config(config));

        if reopen {
            inner.cache.state = TunnelState::Down;
            self.listeners.publish(Change::State(TunnelState::Down));
        }

        Ok(())
    }

    pub fn set_state(&self, state: TunnelState) -> Result<(), Error> {
        let mut inner = self.inner.write();
        let current = inner.cache.state;

        if !current.can_transition_to(state) {
            tracing::warn!(from = %current, to = %state, "Rejecting invalid state transition");

            return Err(Error::InvalidTransition {
                from: current,
                to: state,
            });
        }

        if state == TunnelState::Connecting && inner.cache.config.is_none() {
            tracing::warn!("Cannot connect without a config");

            return Err(Error::NotConfigured);
        }

        let mut batch = Batch::default();
        batch.put(Key::State, codec::encode(Key::State, &state)?);
        inner.commit(&batch)?;

        inner.cache.state = state;
        self.listeners.publish(Change::State(state));

        tracing::info!(from = %current, to = %state, "Tunnel state changed");

        Ok(())
    }

    /// Replaces the resource list and reconciles the routes derived from it.
    ///
    /// Resources and routes are written in one batch.
    /// Listeners see the new resources first, followed by one notification per removed and added route.
    pub fn set_resources(&self, resources: Vec<ResourceView>) -> Result<(), Error> {
        let mut inner = self.inner.write();
        let delta = inner.reconciler.plan(&resources, &inner.cache.routes);
        let routes = delta.apply_to(&inner.cache.routes);

        let mut batch = Batch::default();
        batch.put(Key::Resources, codec::encode(Key::Resources, &resources)?);
        if !delta.is_empty() {
            batch.put(Key::Routes, codec::encode(Key::Routes, &routes)?);
        }
        inner.commit(&batch)?;

        inner.reconciler.commit(&delta);
        inner.cache.resources = resources.clone();
        inner.cache.routes = routes;

        self.listeners.publish(Change::Resources(resources));
        self.publish_route_delta(&delta);

        Ok(())
    }

    /// Adds `route` to the active routes.
    ///
    /// Adding a route that is already active does nothing.
    pub fn add_route(&self, route: Route) -> Result<(), Error> {
        let mut inner = self.inner.write();

        if inner.cache.routes.contains(&route) {
            tracing::debug!(%route, "Route is already active");
            return Ok(());
        }

        let mut routes = inner.cache.routes.clone();
        routes.insert(route);

        let mut batch = Batch::default();
        batch.put(Key::Routes, codec::encode(Key::Routes, &routes)?);
        inner.commit(&batch)?;

        inner.cache.routes = routes;
        self.listeners.publish(Change::RouteAdded(route));

        Ok(())
    }

    /// Removes `route` from the active routes.
    ///
    /// Removing a route that isn't active does nothing.
    pub fn remove_route(&self, route: Route) -> Result<(), Error> {
        let mut inner = self.inner.write();

        if !inner.cache.routes.contains(&route) {
            tracing::debug!(%route, "Route is not active");
            return Ok(());
        }

        let mut routes = inner.cache.routes.clone();
        routes.remove(&route);

        let mut batch = Batch::default();
        batch.put(Key::Routes, codec::encode(Key::Routes, &routes)?);
        inner.commit(&batch)?;

        inner.cache.routes = routes;
        inner.reconciler.forget(&route);
        self.listeners.publish(Change::RouteRemoved(route));

        Ok(())
    }

    /// Removes everything at once, e.g. on sign-out.
    pub fn clear(&self) -> Result<(), Error> {
        let mut inner = self.inner.write();

        let mut batch = Batch::default();
        for key in Key::ALL {
            batch.remove(key);
        }
        inner.commit(&batch)?;

        inner.cache = Cache::default();
        inner.reconciler.reset();
        self.listeners.publish(Change::Cleared);

        tracing::info!("Cleared tunnel store");

        Ok(())
    }

    /// Re-reads all values from the backing store, e.g. after another process changed them.
    ///
    /// Listeners are notified about every value that differs from what we had cached.
    /// If reading fails, the cache stays as it is.
    pub fn reload(&self) -> Result<(), Error> {
        let mut inner = self.inner.write();
        let cache = Cache::load(inner.backend.as_ref())?;

        if cache == inner.cache {
            return Ok(());
        }

        let changes = inner.cache.diff(&cache);

        inner.reconciler = RouteReconciler::recover(&cache.resources, &cache.routes);
        inner.cache = cache;

        tracing::debug!(num_changes = changes.len(), "Reloaded tunnel store");

        for change in changes {
            self.listeners.publish(change);
        }

        Ok(())
    }

    /// Registers `listener` for all changes committed from now on.
    pub fn add_listener(&self, listener: impl Listener + 'static) -> ListenerId {
        self.listeners.add(listener)
    }

    /// Unregisters a listener. Returns `false` if it wasn't registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Like [`TunnelStore::add_listener`] but delivers into a channel.
    ///
    /// Dropping the receiver doesn't unregister it, use [`TunnelStore::remove_listener`].
    pub fn subscribe(&self) -> (ListenerId, flume::Receiver<Notification>) {
        self.listeners.subscribe()
    }

    /// Blocks until all changes committed so far have been delivered to the listeners.
    pub fn flush(&self) {
        self.listeners.flush();
    }

    fn publish_route_delta(&self, delta: &RouteDelta) {
        for route in &delta.remove {
            self.listeners.publish(Change::RouteRemoved(*route));
        }
        for route in &delta.add {
            self.listeners.publish(Change::RouteAdded(*route));
        }
    }
}

impl Inner {
    fn commit(&self, batch: &Batch) -> Result<(), Error> {
        if let Err(e) = self.backend.write_batch(batch) {
            tracing::error!(keys = %batch.keys(), "Failed to persist: {e:#}");

            return Err(Error::Persistence(e));
        }

        tracing::debug!(keys = %batch.keys(), "Persisted");

        Ok(())
    }
}

impl Cache {
    fn load(backend: &dyn KeyValueStore) -> Result<Self, PersistenceError> {
        let values = backend
            .read_many(&Key::ALL)
            .map_err(|e| e.context("Failed to read tunnel store"))?;
        let [config, state, resources, routes] =
            <[Option<Vec<u8>>; 4]>::try_from(values).map_err(|values| {
                PersistenceError::io(anyhow!(
                    "Backing store returned {} values for {} keys",
                    values.len(),
                    Key::ALL.len()
                ))
            })?;

        Ok(Self {
            config: decode_optional(Key::Config, config)?,
            state: decode_optional(Key::State, state)?.unwrap_or_default(),
            resources: decode_optional(Key::Resources, resources)?.unwrap_or_default(),
            routes: decode_optional(Key::Routes, routes)?.unwrap_or_default(),
        })
    }

    /// The changes that lead from `self` to `other`, in the order a writer would have produced them.
    fn diff(&self, other: &Cache) -> Vec<Change> {
        if *other == Cache::default() {
            return vec![Change::Cleared];
        }

        // Only `clear` removes the config; later writes show up on top of the cleared store.
        if self.config.is_some() && other.config.is_none() {
            return std::iter::once(Change::Cleared)
                .chain(Cache::default().diff(other))
                .collect();
        }

        let mut changes = Vec::new();

        if let Some(config) = other.config.as_ref().filter(|c| Some(*c) != self.config.as_ref()) {
            changes.push(Change::Config(config.clone()));
        }
        if other.state != self.state {
            changes.push(Change::State(other.state));
        }
        if other.resources != self.resources {
            changes.push(Change::Resources(other.resources.clone()));
        }
        changes.extend(
            self.routes
                .difference(&other.routes)
                .map(|r| Change::RouteRemoved(*r)),
        );
        changes.extend(
            other
                .routes
                .difference(&self.routes)
                .map(|r| Change::RouteAdded(*r)),
        );

        changes
    }
}

fn decode_optional<T>(key: Key, bytes: Option<Vec<u8>>) -> Result<Option<T>, PersistenceError>
where
    T: DeserializeOwned,
{
    bytes.map(|bytes| codec::decode(key, &bytes)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use std::sync::Arc;

    fn config() -> TunnelConfig {
        TunnelConfig {
            api_url: "wss://api.firezone.dev".parse().unwrap(),
            account_slug: "firezone".to_owned(),
            token_ref: "session-token".to_owned(),
            interface: tunnel_model::InterfaceConfig {
                ipv4: "100.64.0.1".parse().unwrap(),
                ipv6: "fd00:2021:1111::1".parse().unwrap(),
                dns_servers: vec!["100.100.111.1".parse().unwrap()],
                search_domain: None,
                mtu: 1280,
            },
        }
    }

    #[test]
    fn diff_of_cleared_cache_is_single_change() {
        let before = Cache {
            config: Some(config()),
            state: TunnelState::Up,
            ..Default::default()
        };

        assert_eq!(before.diff(&Cache::default()), vec![Change::Cleared]);
    }

    #[test]
    fn diff_lists_changed_keys_in_write_order() {
        let before = Cache {
            config: Some(config()),
            routes: ["10.0.0.0/8".parse().unwrap()].into(),
            ..Default::default()
        };
        let after = Cache {
            config: Some(config()),
            state: TunnelState::Connecting,
            routes: ["192.168.0.0/16".parse().unwrap()].into(),
            ..Default::default()
        };

        assert_eq!(
            before.diff(&after),
            vec![
                Change::State(TunnelState::Connecting),
                Change::RouteRemoved("10.0.0.0/8".parse().unwrap()),
                Change::RouteAdded("192.168.0.0/16".parse().unwrap()),
            ]
        );
    }

    #[test]
    fn diff_reports_lost_config_as_cleared() {
        let before = Cache {
            config: Some(config()),
            state: TunnelState::Up,
            routes: ["10.0.0.0/8".parse().unwrap()].into(),
            ..Default::default()
        };
        let after = Cache {
            routes: ["10.0.0.0/8".parse().unwrap()].into(),
            ..Default::default()
        };

        assert_eq!(
            before.diff(&after),
            vec![
                Change::Cleared,
                Change::RouteAdded("10.0.0.0/8".parse().unwrap()),
            ]
        );
    }

    #[test]
    fn failed_state_write_keeps_cached_state() {
        let backend = Arc::new(MemoryStore::new());
        let store = TunnelStore::open(backend.clone()).unwrap();
        store.set_config(config()).unwrap();

        backend.fail_next_writes(1);
        let error = store.set_state(TunnelState::Connecting).unwrap_err();

        assert!(error.is_persistence_error());
        assert_eq!(store.get_state(), TunnelState::Down);
    }

    #[test]
    fn short_read_is_reported() {
        struct Truncating;

        impl KeyValueStore for Truncating {
            fn read(&self, _: Key) -> Result<Option<Vec<u8>>, PersistenceError> {
                Ok(None)
            }

            fn read_many(&self, _: &[Key]) -> Result<Vec<Option<Vec<u8>>>, PersistenceError> {
                Ok(vec![None])
            }

            fn write_batch(&self, _: &Batch) -> Result<(), PersistenceError> {
                Ok(())
            }
        }

        let error = TunnelStore::open(Truncating).err().unwrap();

        assert!(!error.is_corruption());
        assert!(error.to_string().contains("returned 1 values for 4 keys"));
    }
}
