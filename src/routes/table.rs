// Routing table mirrored into the kernel for the tunnel interface

use super::kernel::{Interface, Kernel};
use super::lookup::first_match;
use super::{NextHop, Route, SyncState};
use crate::error::{KernelError, KernelOp, RouteError, RouteResult};
use ipnet::IpNet;
use parking_lot::Mutex;
use serde::Serialize;
use std::io::{self, Write};
use std::net::IpAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<Route>,
    /// Networks the kernel may hold on our interface: added successfully,
    /// or removed from memory while the kernel delete has not gone through
    installed: Vec<IpNet>,
}

impl Inner {
    fn has_network(&self, network: &IpNet) -> bool {
        self.entries.iter().any(|r| r.network() == *network)
    }

    fn is_installed(&self, network: &IpNet) -> bool {
        self.installed.contains(network)
    }

    fn mark_installed(&mut self, network: IpNet) {
        if !self.is_installed(&network) {
            self.installed.push(network);
        }
    }

    fn state_of(&self, network: &IpNet) -> SyncState {
        if self.is_installed(network) {
            SyncState::Synced
        } else {
            SyncState::PendingSync
        }
    }

    /// Networks in the table the kernel does not have, in table order
    fn missing(&self) -> Vec<IpNet> {
        let mut networks: Vec<IpNet> = Vec::new();
        for route in &self.entries {
            let network = route.network();
            if !self.is_installed(&network) && !networks.contains(&network) {
                networks.push(network);
            }
        }
        networks
    }

    /// Installed networks no entry uses any more
    fn stale(&self) -> Vec<IpNet> {
        self.installed
            .iter()
            .filter(|n| !self.has_network(n))
            .copied()
            .collect()
    }

    fn pending(&self) -> usize {
        self.entries
            .iter()
            .filter(|r| !self.is_installed(&r.network()))
            .count()
            + self.stale().len()
    }
}

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Pending entries now installed in the kernel
    pub synced: usize,
    /// Stale kernel routes now removed
    pub removed: usize,
    /// Work left for the next pass
    pub outstanding: usize,
}

/// In-memory routes for one interface, kept in sync with the kernel.
///
/// Every operation runs as a single critical section: the duplicate or
/// presence check, the mutation and the kernel call all happen under one
/// lock acquisition. Kernel calls are therefore serialized per table, and
/// the lock is held for at most the kernel backend's timeout.
///
/// The kernel keys routes by network and device, so installation is tracked
/// per network: every next hop for a network shares one kernel route, which
/// is deleted only when the last entry for that network goes away. An entry
/// whose network the kernel lacks is [`SyncState::PendingSync`]; a network
/// the kernel still holds without any entry is a pending removal.
/// [`RoutingTable::reconcile`] retries both.
pub struct RoutingTable {
    inner: Mutex<Inner>,
    kernel: Arc<dyn Kernel>,
    interface: String,
    cancel: CancellationToken,
}

impl RoutingTable {
    pub fn new(kernel: Arc<dyn Kernel>, interface: impl Into<String>, cancel: CancellationToken) -> Self {
        RoutingTable {
            inner: Mutex::new(Inner::default()),
            kernel,
            interface: interface.into(),
            cancel,
        }
    }

    /// Name of the interface routes are installed on
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Add a route to the table and to the kernel.
    ///
    /// `network` must be in canonical form (no host bits set), since that is
    /// all the kernel accepts.
    pub fn add(&self, network: IpNet, next_hop: IpAddr) -> RouteResult<()> {
        self.check_cancelled()?;

        if network.trunc() != network {
            return Err(RouteError::InvalidNetwork {
                network,
                canonical: network.trunc(),
            });
        }

        let mut inner = self.inner.lock();
        if inner.entries.iter().any(|r| r.is(&network, next_hop)) {
            return Err(RouteError::DuplicateRoute { network, next_hop });
        }

        inner.entries.push(Route::new(network, next_hop));
        tracing::debug!("added route {} via {}", network, next_hop);

        match self.install(&network) {
            Ok(()) => {
                inner.mark_installed(network);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("route {} via {} not in kernel: {}", network, next_hop, e);
                Err(e)
            }
        }
    }

    /// Remove a route from the table and from the kernel.
    ///
    /// Entry order is not preserved: the last entry takes the removed one's place.
    pub fn delete(&self, network: IpNet, next_hop: IpAddr) -> RouteResult<()> {
        self.check_cancelled()?;

        let mut inner = self.inner.lock();
        let position = inner
            .entries
            .iter()
            .position(|r| r.is(&network, next_hop))
            .ok_or(RouteError::RouteNotFound { network, next_hop })?;

        inner.entries.swap_remove(position);
        tracing::debug!("deleted route {} via {}", network, next_hop);

        // another next hop still uses the kernel route, or it was never installed
        if inner.has_network(&network) || !inner.is_installed(&network) {
            return Ok(());
        }

        match self.uninstall(&network) {
            Ok(()) => {
                inner.installed.retain(|n| *n != network);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("kernel still holds {}: {}", network, e);
                Err(e)
            }
        }
    }

    /// Next hop of the first entry whose network contains `dest`
    pub fn get(&self, dest: IpAddr) -> Option<NextHop> {
        let inner = self.inner.lock();
        first_match(&inner.entries, &dest)
    }

    /// Write the table as `networkid<TAB>nexthop` followed by one line per entry
    pub fn dump<W: Write>(&self, mut out: W) -> io::Result<()> {
        let rows: Vec<(Route, SyncState)> = {
            let inner = self.inner.lock();
            inner
                .entries
                .iter()
                .map(|r| (r.clone(), inner.state_of(&r.network())))
                .collect()
        };

        writeln!(out, "networkid\tnexthop")?;
        for (route, state) in rows {
            let suffix = match state {
                SyncState::Synced => "",
                SyncState::PendingSync => " (pending)",
            };
            writeln!(out, "{} {}{}", route.network(), route.next_hop(), suffix)?;
        }
        Ok(())
    }

    pub fn dump_stdout(&self) -> io::Result<()> {
        self.dump(io::stdout().lock())
    }

    /// Snapshot of the routes in table order
    pub fn routes(&self) -> Vec<Route> {
        self.inner.lock().entries.clone()
    }

    pub fn state(&self, network: &IpNet, next_hop: IpAddr) -> Option<SyncState> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .find(|r| r.is(network, next_hop))
            .map(|r| inner.state_of(&r.network()))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Number of entries and removals the kernel has not caught up with
    pub fn pending(&self) -> usize {
        self.inner.lock().pending()
    }

    /// Retry the kernel half of failed adds and deletes
    pub fn reconcile(&self) -> ReconcileReport {
        let mut inner = self.inner.lock();
        let mut report = ReconcileReport {
            outstanding: inner.pending(),
            ..Default::default()
        };

        if report.outstanding == 0 || self.cancel.is_cancelled() {
            return report;
        }

        let iface = match self.kernel.resolve_interface(&self.interface) {
            Ok(iface) => iface,
            Err(e) => {
                tracing::warn!("reconcile skipped, cannot resolve {}: {}", self.interface, e);
                return report;
            }
        };

        for network in inner.missing() {
            match self.kernel.route_add(&network, &iface) {
                Ok(()) => {
                    inner.mark_installed(network);
                    report.synced += inner.entries.iter().filter(|r| r.network() == network).count();
                }
                Err(e) => tracing::warn!("reconcile: route add {} failed: {}", network, e),
            }
        }

        for network in inner.stale() {
            match self.kernel.route_del(&network, &iface) {
                Ok(()) => {
                    inner.installed.retain(|n| *n != network);
                    report.removed += 1;
                }
                Err(e) => tracing::warn!("reconcile: route del {} failed: {}", network, e),
            }
        }

        report.outstanding = inner.pending();
        if report.synced > 0 || report.removed > 0 {
            tracing::info!(
                "reconciled {}: {} synced, {} removed, {} outstanding",
                self.interface,
                report.synced,
                report.removed,
                report.outstanding
            );
        }
        report
    }

    /// Empty the table and remove every installed route from the kernel.
    ///
    /// Runs even after cancellation. Keeps going past kernel failures and
    /// returns the first one; networks the kernel could not drop stay tracked
    /// as pending removals.
    pub fn flush(&self) -> RouteResult<()> {
        let mut inner = self.inner.lock();
        inner.entries.clear();

        let networks = inner.installed.clone();
        let Some(first) = networks.first() else {
            return Ok(());
        };
        let iface = self.resolve(first)?;

        let mut first_err = None;
        for network in networks {
            match self.kernel.route_del(&network, &iface) {
                Ok(()) => inner.installed.retain(|n| *n != network),
                Err(source) => {
                    tracing::warn!("flush: route del {} failed: {}", network, source);
                    if first_err.is_none() {
                        first_err = Some(RouteError::KernelSync {
                            op: KernelOp::Delete,
                            network,
                            source,
                        });
                    }
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn check_cancelled(&self) -> RouteResult<()> {
        if self.cancel.is_cancelled() {
            return Err(RouteError::Cancelled);
        }
        Ok(())
    }

    fn resolve(&self, network: &IpNet) -> RouteResult<Interface> {
        self.kernel
            .resolve_interface(&self.interface)
            .map_err(|e| match e {
                KernelError::InterfaceNotFound(name) => RouteError::InterfaceNotFound(name),
                source => RouteError::KernelSync {
                    op: KernelOp::Resolve,
                    network: *network,
                    source,
                },
            })
    }

    fn install(&self, network: &IpNet) -> RouteResult<()> {
        let iface = self.resolve(network)?;
        self.kernel
            .route_add(network, &iface)
            .map_err(|source| RouteError::KernelSync {
                op: KernelOp::Add,
                network: *network,
                source,
            })
    }

    fn uninstall(&self, network: &IpNet) -> RouteResult<()> {
        let iface = self.resolve(network)?;
        self.kernel
            .route_del(network, &iface)
            .map_err(|source| RouteError::KernelSync {
                op: KernelOp::Delete,
                network: *network,
                source,
            })
    }
}
