// Routes module - route values, the synchronized table and kernel access

pub mod kernel;
pub mod lookup;
pub mod table;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

pub use table::{ReconcileReport, RoutingTable};

/// Where traffic matching a route is forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NextHop {
    ip: IpAddr,
}

impl NextHop {
    pub fn new(ip: IpAddr) -> Self {
        NextHop { ip }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }
}

impl From<IpAddr> for NextHop {
    fn from(ip: IpAddr) -> Self {
        NextHop::new(ip)
    }
}

impl fmt::Display for NextHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.ip.fmt(f)
    }
}

/// A destination network and its next hop.
///
/// Equality follows the network's string form, so `10.0.0.7/24` and
/// `10.0.0.0/24` are different routes even though they cover the same block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    network: IpNet,
    next_hop: NextHop,
}

impl Route {
    pub fn new(network: IpNet, next_hop: impl Into<NextHop>) -> Self {
        Route {
            network,
            next_hop: next_hop.into(),
        }
    }

    pub fn network(&self) -> IpNet {
        self.network
    }

    pub fn next_hop(&self) -> NextHop {
        self.next_hop
    }

    /// Same network (by string form) and same next hop
    pub fn is(&self, network: &IpNet, next_hop: IpAddr) -> bool {
        self.network.to_string() == network.to_string() && self.next_hop.ip == next_hop
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.network.contains(addr)
    }
}

/// Whether the kernel has caught up with an in-memory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Synced,
    /// In memory, but the kernel does not have the network yet; retried by reconcile
    PendingSync,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_identity_uses_network_string() {
        let route = Route::new("10.0.0.0/24".parse().unwrap(), "10.0.0.1".parse::<IpAddr>().unwrap());

        assert!(route.is(&"10.0.0.0/24".parse().unwrap(), "10.0.0.1".parse().unwrap()));
        assert!(!route.is(&"10.0.0.0/24".parse().unwrap(), "10.0.0.2".parse().unwrap()));
        // same block, different textual form
        assert!(!route.is(&"10.0.0.7/24".parse().unwrap(), "10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_route_contains() {
        let route = Route::new("192.168.1.0/24".parse().unwrap(), "192.168.1.1".parse::<IpAddr>().unwrap());
        assert!(route.contains(&"192.168.1.100".parse().unwrap()));
        assert!(!route.contains(&"192.168.2.100".parse().unwrap()));
        assert!(!route.contains(&"::1".parse().unwrap()));
    }
}
