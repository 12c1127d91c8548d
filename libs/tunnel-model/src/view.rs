use ip_network::{IpNetwork, Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};

use crate::{ResourceId, Route, Site};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceStatus {
    Unknown,
    Online,
    Offline,
}

/// A network target the user is authorized to reach through the tunnel.
///
/// The list of these is computed by the portal and always delivered as a whole.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceView {
    Dns(DnsResourceView),
    Cidr(CidrResourceView),
    Internet(InternetResourceView),
}

impl ResourceView {
    pub fn name(&self) -> &str {
        match self {
            ResourceView::Dns(r) => &r.name,
            ResourceView::Cidr(r) => &r.name,
            ResourceView::Internet(r) => &r.name,
        }
    }

    pub fn id(&self) -> ResourceId {
        match self {
            ResourceView::Dns(r) => r.id,
            ResourceView::Cidr(r) => r.id,
            ResourceView::Internet(r) => r.id,
        }
    }

    pub fn is_internet_resource(&self) -> bool {
        matches!(self, ResourceView::Internet(_))
    }

    /// The routes that must be steered through the tunnel for this resource to be reachable.
    ///
    /// DNS resources don't have any: their addresses are only known once the engine resolved them.
    pub fn routes(&self) -> Vec<Route> {
        match self {
            ResourceView::Dns(_) => Vec::new(),
            ResourceView::Cidr(r) => vec![Route::from(r.address)],
            ResourceView::Internet(_) => vec![
                Route::from(IpNetwork::from(Ipv4Network::DEFAULT_ROUTE)),
                Route::from(IpNetwork::from(Ipv6Network::DEFAULT_ROUTE)),
            ],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct DnsResourceView {
    /// Resource's id.
    pub id: ResourceId,
    /// Internal resource's domain name or pattern, e.g. `*.example.com`.
    pub address: String,
    /// Name of the resource.
    ///
    /// Used only for display.
    pub name: String,

    pub address_description: Option<String>,
    pub sites: Vec<Site>,

    pub status: ResourceStatus,
}

/// Description of a resource that maps to a CIDR.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct CidrResourceView {
    /// Resource's id.
    pub id: ResourceId,
    /// CIDR that this resource points to.
    pub address: IpNetwork,
    /// Name of the resource.
    ///
    /// Used only for display.
    pub name: String,

    pub address_description: Option<String>,
    pub sites: Vec<Site>,

    pub status: ResourceStatus,
}

/// Description of an Internet resource
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct InternetResourceView {
    /// Name for display always set to "Internet Resource"
    pub name: String,

    pub id: ResourceId,
    pub sites: Vec<Site>,

    pub status: ResourceStatus,
}

impl PartialOrd for ResourceView {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourceView {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self.is_internet_resource(), other.is_internet_resource()) {
            (true, false) => return std::cmp::Ordering::Less,
            (false, true) => return std::cmp::Ordering::Greater,
            (true, true) | (false, false) => {}
        }

        (self.name(), self.id()).cmp(&(other.name(), other.id()))
    }
}
