//! Value types shared between the tunnel store, its observers and the tunnel engine.
//!
//! Everything in here is an immutable snapshot: the store owns the canonical copies and hands out clones.

#![cfg_attr(test, allow(clippy::unwrap_used))]

#[macro_use]
mod make_id;
mod route;
mod serde_routelist;
mod view;

pub use route::{Route, RouteParseError};
pub use serde_routelist::{V4RouteList, V6RouteList};
pub use view::{
    CidrResourceView, DnsResourceView, InternetResourceView, ResourceStatus, ResourceView,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::Url;

make_id!(
    /// Identifies a resource across resource list updates.
    ResourceId
);
make_id!(SiteId);

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Site {
    pub id: SiteId,
    pub name: String,
}

/// Describes how to establish the tunnel.
///
/// Produced by a successful sign-in and replaced wholesale on re-authentication, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// The portal the tunnel engine connects to.
    pub api_url: Url,
    pub account_slug: String,
    /// Name of the entry in the platform's secure storage that holds the session token.
    ///
    /// The token itself never enters the store.
    pub token_ref: String,
    pub interface: InterfaceConfig,
}

/// Parameters of the TUN interface the OS creates for the tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub ipv4: Ipv4Addr,
    pub ipv6: Ipv6Addr,
    pub dns_servers: Vec<IpAddr>,
    pub search_domain: Option<String>,
    pub mtu: u16,
}

/// Lifecycle state of the tunnel.
///
/// The variant order is the lifecycle order; it only serves to make the states totally ordered.
/// Which transitions are legal is decided by [`TunnelState::can_transition_to`].
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TunnelState {
    #[default]
    Down,
    Connecting,
    Up,
    /// Terminal for the session. Only a new [`TunnelConfig`] leads back to [`TunnelState::Down`].
    Closed,
}

impl TunnelState {
    pub fn can_transition_to(self, next: TunnelState) -> bool {
        use TunnelState::*;

        matches!(
            (self, next),
            (Down, Connecting)
                | (Connecting, Up)
                | (Connecting, Down)
                | (Up, Down)
                | (Up, Closed)
                | (Down, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TunnelState::Closed)
    }
}

/// A consistent snapshot of the whole tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tunnel {
    pub config: TunnelConfig,
    pub state: TunnelState,
    pub resources: Vec<ResourceView>,
    pub routes: BTreeSet<Route>,
}

impl Tunnel {
    /// Splits the routes by IP version in the format expected by the mobile tunnel engines.
    pub fn interface_route_lists(&self) -> (V4RouteList, V6RouteList) {
        serde_routelist::split(&self.routes)
    }
}
