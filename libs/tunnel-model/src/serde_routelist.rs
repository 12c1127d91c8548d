use ip_network::IpNetwork;
use serde::Serialize;
use std::collections::BTreeSet;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::Route;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
struct Cidr<T> {
    address: T,
    prefix: u8,
}

/// Serialisation format of the IPv4 routes expected by the Apple and Android tunnel engines.
#[derive(Serialize, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct V4RouteList(Vec<Cidr<Ipv4Addr>>);

/// Serialisation format of the IPv6 routes expected by the Apple and Android tunnel engines.
#[derive(Serialize, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct V6RouteList(Vec<Cidr<Ipv6Addr>>);

impl V4RouteList {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl V6RouteList {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub(crate) fn split(routes: &BTreeSet<Route>) -> (V4RouteList, V6RouteList) {
    let mut v4 = V4RouteList::default();
    let mut v6 = V6RouteList::default();

    for route in routes {
        match route.network() {
            IpNetwork::V4(n) => v4.0.push(Cidr {
                address: n.network_address(),
                prefix: n.netmask(),
            }),
            IpNetwork::V6(n) => v6.0.push(Cidr {
                address: n.network_address(),
                prefix: n.netmask(),
            }),
        }
    }

    (v4, v6)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_by_ip_version() {
        let routes = BTreeSet::from([
            "10.0.0.0/8".parse().unwrap(),
            "fd00::/8".parse().unwrap(),
            "192.168.1.0/24".parse().unwrap(),
        ]);

        let (v4, v6) = split(&routes);

        assert_eq!(v4.len(), 2);
        assert_eq!(v6.len(), 1);
        assert_eq!(
            serde_json::to_string(&v4).unwrap(),
            r#"[{"address":"10.0.0.0","prefix":8},{"address":"192.168.1.0","prefix":24}]"#
        );
        assert_eq!(
            serde_json::to_string(&v6).unwrap(),
            r#"[{"address":"fd00::","prefix":8}]"#
        );
    }
}
