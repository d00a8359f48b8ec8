// Error types for the routing table and the kernel backend

use ipnet::IpNet;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by routing table operations
#[derive(Error, Debug)]
pub enum RouteError {
    #[error("route exists: {network} via {next_hop}")]
    DuplicateRoute { network: IpNet, next_hop: IpAddr },

    #[error("cannot delete route, not found: {network} via {next_hop}")]
    RouteNotFound { network: IpNet, next_hop: IpAddr },

    #[error("network {network} has host bits set, use {canonical}")]
    InvalidNetwork { network: IpNet, canonical: IpNet },

    #[error("interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("kernel {op} failed for {network}: {source}")]
    KernelSync {
        op: KernelOp,
        network: IpNet,
        #[source]
        source: KernelError,
    },

    #[error("router has been cancelled")]
    Cancelled,
}

/// Result type alias using RouteError
pub type RouteResult<T> = Result<T, RouteError>;

impl RouteError {
    /// Whether the caller can expect a later attempt (or a reconcile pass) to succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RouteError::InterfaceNotFound(_) | RouteError::KernelSync { .. }
        )
    }
}

/// Kernel operation that produced a `KernelSync` error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelOp {
    Resolve,
    Add,
    Delete,
}

impl std::fmt::Display for KernelOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            KernelOp::Resolve => "resolve",
            KernelOp::Add => "route add",
            KernelOp::Delete => "route delete",
        };
        f.write_str(s)
    }
}

/// Errors from the kernel routing capability
#[derive(Error, Debug)]
pub enum KernelError {
    #[error("no such interface: {0}")]
    InterfaceNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("command exited with {status}: {stderr}")]
    Command { status: i32, stderr: String },

    #[error("failed to parse output: {0}")]
    Parse(String),
}
