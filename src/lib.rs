//! In-process mirror of the tunnel's routes, kept in sync with the kernel
//! routing table.
//!
//! A [`Router`] owns one [`RoutingTable`]. Callers reach the table through
//! the [`Gateway`] trait and add, delete, look up or dump routes on it. Every
//! add and delete is written both to memory and to the kernel; see
//! [`RoutingTable`] for what happens when the kernel half fails.

pub mod config;
pub mod error;
pub mod router;
pub mod routes;

#[cfg(test)]
pub(crate) mod test_util;

pub use error::{KernelError, RouteError, RouteResult};
pub use router::{Gateway, Router};
pub use routes::kernel::{Interface, InterfaceWait, IpCommand, Kernel};
pub use routes::{NextHop, ReconcileReport, Route, RoutingTable, SyncState};
