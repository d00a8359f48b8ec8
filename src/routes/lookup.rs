// Route lookup: first matching entry wins

use super::{NextHop, Route};
use std::net::IpAddr;

/// Return the next hop of the first route, in table order, whose network
/// contains `dest`.
///
/// This is not longest prefix matching: a /8 added before a /24 shadows it.
pub fn first_match<'a, I>(routes: I, dest: &IpAddr) -> Option<NextHop>
where
    I: IntoIterator<Item = &'a Route>,
{
    routes
        .into_iter()
        .find(|route| route.contains(dest))
        .map(Route::next_hop)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(network: &str, next_hop: &str) -> Route {
        Route::new(network.parse().unwrap(), next_hop.parse::<IpAddr>().unwrap())
    }

    #[test]
    fn test_first_match_wins_over_longer_prefix() {
        let routes = vec![route("10.0.0.0/8", "10.255.0.1"), route("10.1.2.0/24", "10.1.2.1")];
        let dest: IpAddr = "10.1.2.3".parse().unwrap();

        assert_eq!(first_match(&routes, &dest).map(|h| h.ip()), "10.255.0.1".parse().ok());

        let reversed: Vec<Route> = routes.into_iter().rev().collect();
        assert_eq!(first_match(&reversed, &dest).map(|h| h.ip()), "10.1.2.1".parse().ok());
    }

    #[test]
    fn test_no_match() {
        let routes = vec![route("192.168.1.0/24", "192.168.1.1")];
        assert_eq!(first_match(&routes, &"192.168.2.1".parse().unwrap()), None);
        assert_eq!(first_match(&Vec::<Route>::new(), &"192.168.1.1".parse().unwrap()), None);
    }

    #[test]
    fn test_ipv6() {
        let routes = vec![route("fd00:1::/64", "fd00:1::1")];
        let dest: IpAddr = "fd00:1::42".parse().unwrap();
        assert_eq!(first_match(&routes, &dest).map(|h| h.ip()), "fd00:1::1".parse().ok());
    }
}
