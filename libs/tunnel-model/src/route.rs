use ip_network::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{AddrParseError, IpAddr};
use std::num::ParseIntError;
use std::str::FromStr;

/// A network prefix steered through the tunnel interface.
///
/// Host bits are always zero, i.e. `10.0.0.1/8` and `10.0.0.0/8` are the same route.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Route(IpNetwork);

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RouteParseError {
    #[error("Invalid address: {0}")]
    Address(#[from] AddrParseError),
    #[error("Invalid prefix length: {0}")]
    PrefixLength(#[from] ParseIntError),
    #[error("Prefix length {prefix} is out of range for {address}")]
    PrefixOutOfRange { address: IpAddr, prefix: u8 },
}

impl Route {
    pub fn network(&self) -> IpNetwork {
        self.0
    }

    pub fn is_default_route(&self) -> bool {
        self.0.netmask() == 0
    }
}

impl From<IpNetwork> for Route {
    fn from(value: IpNetwork) -> Self {
        Self(value)
    }
}

impl From<IpAddr> for Route {
    fn from(value: IpAddr) -> Self {
        Self(IpNetwork::from(value))
    }
}

impl From<Route> for IpNetwork {
    fn from(value: Route) -> Self {
        value.0
    }
}

impl FromStr for Route {
    type Err = RouteParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        let Some((address, prefix)) = s.split_once('/') else {
            return Ok(Self::from(s.parse::<IpAddr>()?));
        };

        let address = address.parse::<IpAddr>()?;
        let prefix = prefix.parse::<u8>()?;

        let network = IpNetwork::new_truncate(address, prefix)
            .map_err(|_| RouteParseError::PrefixOutOfRange { address, prefix })?;

        Ok(Self(network))
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0.network_address(), self.0.netmask())
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self, f)
    }
}

impl Serialize for Route {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Route {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error as _;

        let string = String::deserialize(deserializer)?;

        string.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn bare_addresses_are_host_routes() {
        assert_eq!(
            "10.0.0.1".parse::<Route>().unwrap().to_string(),
            "10.0.0.1/32"
        );
        assert_eq!("fd00::1".parse::<Route>().unwrap().to_string(), "fd00::1/128");
    }

    #[test]
    fn host_bits_are_truncated() {
        assert_eq!(
            "10.1.2.3/8".parse::<Route>().unwrap(),
            "10.0.0.0/8".parse::<Route>().unwrap()
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            "not-a-route".parse::<Route>(),
            Err(RouteParseError::Address(_))
        ));
        assert!(matches!(
            "10.0.0.0/abc".parse::<Route>(),
            Err(RouteParseError::PrefixLength(_))
        ));
        assert!(matches!(
            "10.0.0.0/33".parse::<Route>(),
            Err(RouteParseError::PrefixOutOfRange { prefix: 33, .. })
        ));
    }

    #[test]
    fn default_routes() {
        assert!("0.0.0.0/0".parse::<Route>().unwrap().is_default_route());
        assert!("::/0".parse::<Route>().unwrap().is_default_route());
        assert!(!"10.0.0.0/8".parse::<Route>().unwrap().is_default_route());
    }

    #[test]
    fn serializes_as_string() {
        let route = "192.168.0.0/16".parse::<Route>().unwrap();

        assert_eq!(
            serde_json::to_string(&route).unwrap(),
            r#""192.168.0.0/16""#
        );
        assert_eq!(
            serde_json::from_str::<Route>(r#""192.168.0.0/16""#).unwrap(),
            route
        );
    }

    proptest! {
        #[test]
        fn display_is_canonical(addr in any::<std::net::Ipv4Addr>(), prefix in 0u8..=32) {
            let route = format!("{addr}/{prefix}").parse::<Route>().unwrap();
            let reparsed = route.to_string().parse::<Route>().unwrap();

            prop_assert_eq!(route, reparsed);
        }
    }
}
