// Router facade: owns the routing table for the tunnel interface

use crate::error::RouteResult;
use crate::routes::RoutingTable;
use crate::routes::kernel::Kernel;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Anything that can hand out a routing table
pub trait Gateway {
    fn table(&self) -> &RoutingTable;
}

/// Owns exactly one [`RoutingTable`] for its lifetime.
///
/// The table is cancelled together with the router: once the token passed to
/// [`Router::new`] (or the router itself) is cancelled, adds and deletes fail
/// with `RouteError::Cancelled`.
pub struct Router {
    cancel: CancellationToken,
    routes: RoutingTable,
}

impl Router {
    pub fn new(cancel: CancellationToken, kernel: Arc<dyn Kernel>, interface: impl Into<String>) -> Self {
        let routes = RoutingTable::new(kernel, interface, cancel.child_token());
        Router { cancel, routes }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Remove all routes from the kernel, then cancel the router
    pub fn shutdown(&self) -> RouteResult<()> {
        tracing::info!("Removing routes from {}", self.routes.interface());
        let result = self.routes.flush();
        self.cancel.cancel();
        result
    }
}

impl Gateway for Router {
    fn table(&self) -> &RoutingTable {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RouteError;
    use crate::test_util::FakeKernel;
    use std::net::IpAddr;

    fn count_routes(gateway: &dyn Gateway) -> usize {
        gateway.table().len()
    }

    #[test]
    fn test_table_through_gateway() {
        let kernel = FakeKernel::up();
        let router = Router::new(CancellationToken::new(), kernel.clone(), "radvpn");

        router
            .table()
            .add("10.0.0.0/24".parse().unwrap(), "10.0.0.1".parse().unwrap())
            .unwrap();

        assert_eq!(count_routes(&router), 1);
        assert_eq!(router.table().interface(), "radvpn");
    }

    #[test]
    fn test_shutdown() {
        let kernel = FakeKernel::up();
        let router = Router::new(CancellationToken::new(), kernel.clone(), "radvpn");
        let table = router.table();
        table.add("10.0.0.0/24".parse().unwrap(), "10.0.0.1".parse().unwrap()).unwrap();
        table.add("10.1.0.0/24".parse().unwrap(), "10.1.0.1".parse().unwrap()).unwrap();

        router.shutdown().unwrap();

        assert!(table.is_empty());
        assert!(kernel.installed().is_empty());
        assert!(router.cancellation().is_cancelled());
        assert!(matches!(
            table.add("10.2.0.0/24".parse().unwrap(), "10.2.0.1".parse::<IpAddr>().unwrap()),
            Err(RouteError::Cancelled)
        ));
    }

    #[test]
    fn test_parent_cancellation_reaches_table() {
        let parent = CancellationToken::new();
        let router = Router::new(parent.child_token(), FakeKernel::up(), "radvpn");

        parent.cancel();

        assert!(matches!(
            router
                .table()
                .delete("10.0.0.0/24".parse().unwrap(), "10.0.0.1".parse().unwrap()),
            Err(RouteError::Cancelled)
        ));
    }

    #[test]
    fn test_shutdown_without_interface_keeps_routes_tracked() {
        let kernel = FakeKernel::up();
        let router = Router::new(CancellationToken::new(), kernel.clone(), "radvpn");
        let table = router.table();
        table.add("10.0.0.0/24".parse().unwrap(), "10.0.0.1".parse().unwrap()).unwrap();

        kernel.set_interface_up(false);
        assert!(matches!(router.shutdown(), Err(RouteError::InterfaceNotFound(_))));
        assert!(router.cancellation().is_cancelled());
        assert!(table.is_empty());
        assert_eq!(table.pending(), 1);

        // teardown can be retried after cancellation
        kernel.set_interface_up(true);
        table.flush().unwrap();
        assert_eq!(table.pending(), 0);
        assert!(kernel.installed().is_empty());
    }
}
