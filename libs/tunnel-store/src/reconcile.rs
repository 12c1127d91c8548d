use std::collections::BTreeSet;
use tunnel_model::{ResourceView, Route};

/// Translates changes of the resource list into the minimal set of route changes.
///
/// The reconciler only ever removes routes it added itself.
/// Routes added by other means ("manual" routes) are never touched, even if a resource requires the same prefix.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RouteReconciler {
    owned: BTreeSet<Route>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RouteDelta {
    pub remove: BTreeSet<Route>,
    pub add: BTreeSet<Route>,
}

impl RouteDelta {
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty()
    }

    /// The route set after applying this delta to `routes`.
    pub fn apply_to(&self, routes: &BTreeSet<Route>) -> BTreeSet<Route> {
        routes
            .difference(&self.remove)
            .chain(&self.add)
            .copied()
            .collect()
    }
}

impl RouteReconciler {
    /// Rebuilds which routes we own from persisted state.
    ///
    /// We don't persist ownership, so any current route that is required by a resource is considered ours.
    pub fn recover(resources: &[ResourceView], routes: &BTreeSet<Route>) -> Self {
        Self {
            owned: required_routes(resources)
                .intersection(routes)
                .copied()
                .collect(),
        }
    }

    pub fn owned(&self) -> &BTreeSet<Route> {
        &self.owned
    }

    /// Computes the route changes necessary for `resources`, given the currently active `routes`.
    pub fn plan(&self, resources: &[ResourceView], routes: &BTreeSet<Route>) -> RouteDelta {
        let required = required_routes(resources);

        let remove = self
            .owned
            .difference(&required)
            .filter(|route| routes.contains(route))
            .copied()
            .collect();
        let add = required.difference(routes).copied().collect();

        RouteDelta { remove, add }
    }

    /// Records that `delta` has been committed.
    pub fn commit(&mut self, delta: &RouteDelta) {
        self.owned.retain(|route| !delta.remove.contains(route));
        self.owned.extend(delta.add.iter().copied());
    }

    /// A route was removed by someone else; we no longer own it.
    pub fn forget(&mut self, route: &Route) {
        self.owned.remove(route);
    }

    pub fn reset(&mut self) {
        self.owned.clear();
    }
}

fn required_routes(resources: &[ResourceView]) -> BTreeSet<Route> {
    resources.iter().flat_map(ResourceView::routes).collect()
}
