#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use tunnel_model::{
    CidrResourceView, DnsResourceView, InterfaceConfig, InternetResourceView, ResourceId,
    ResourceStatus, ResourceView, Route,
};
use tunnel_store::{Change, Listener, Notification, TunnelConfig};

pub fn config(account_slug: &str) -> TunnelConfig {
    TunnelConfig {
        api_url: "wss://api.firezone.dev".parse().unwrap(),
        account_slug: account_slug.to_owned(),
        token_ref: format!("{account_slug}-token"),
        interface: InterfaceConfig {
            ipv4: "100.64.0.1".parse().unwrap(),
            ipv6: "fd00:2021:1111::1".parse().unwrap(),
            dns_servers: vec![
                "100.100.111.1".parse().unwrap(),
                "fd00:2021:1111:8000:100:100:111:0".parse().unwrap(),
            ],
            search_domain: Some("corp.example.com".to_owned()),
            mtu: 1280,
        },
    }
}

pub fn cidr(name: &str, address: &str) -> ResourceView {
    ResourceView::Cidr(CidrResourceView {
        id: ResourceId::random(),
        address: address.parse().unwrap(),
        name: name.to_owned(),
        address_description: None,
        sites: vec![],
        status: ResourceStatus::Online,
    })
}

pub fn dns(name: &str, address: &str) -> ResourceView {
    ResourceView::Dns(DnsResourceView {
        id: ResourceId::random(),
        address: address.to_owned(),
        name: name.to_owned(),
        address_description: Some("Internal wiki".to_owned()),
        sites: vec![],
        status: ResourceStatus::Unknown,
    })
}

pub fn internet() -> ResourceView {
    ResourceView::Internet(InternetResourceView {
        name: "Internet".to_owned(),
        id: ResourceId::random(),
        sites: vec![],
        status: ResourceStatus::Online,
    })
}

pub fn route(route: &str) -> Route {
    route.parse().unwrap()
}

/// Records every change it is notified about.
pub fn recorder() -> (Arc<Mutex<Vec<Notification>>>, impl Listener + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));

    let listener = {
        let seen = seen.clone();

        move |n: &Notification| seen.lock().push(n.clone())
    };

    (seen, listener)
}

pub fn changes(notifications: &[Notification]) -> Vec<Change> {
    notifications.iter().map(|n| n.change.clone()).collect()
}
