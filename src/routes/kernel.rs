// Kernel routing table access through iproute2

use crate::error::KernelError;
use ipnet::IpNet;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A resolved network interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub index: u32,
}

/// The slice of the OS routing subsystem the table needs.
///
/// Routes are installed per interface: the kernel keys them by destination
/// network and device, never by next hop. Adding an installed route and
/// deleting an absent one both succeed.
pub trait Kernel: Send + Sync {
    fn resolve_interface(&self, name: &str) -> Result<Interface, KernelError>;

    fn route_add(&self, network: &IpNet, interface: &Interface) -> Result<(), KernelError>;

    fn route_del(&self, network: &IpNet, interface: &Interface) -> Result<(), KernelError>;
}

/// `Kernel` backed by the `ip` command
#[derive(Debug, Clone)]
pub struct IpCommand {
    binary: PathBuf,
    timeout: Duration,
}

impl IpCommand {
    pub fn new(timeout: Duration) -> Self {
        IpCommand {
            binary: PathBuf::from("ip"),
            timeout,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    fn ip(&self, args: &[&str]) -> Result<String, KernelError> {
        let mut command = Command::new(&self.binary);
        command.args(args);
        run_command(command, self.timeout)
    }
}

impl Kernel for IpCommand {
    fn resolve_interface(&self, name: &str) -> Result<Interface, KernelError> {
        let stdout = self
            .ip(&["-json", "link", "show", "dev", name])
            .map_err(|e| match e {
                KernelError::Command { ref stderr, .. } if is_missing_device(stderr) => {
                    KernelError::InterfaceNotFound(name.to_string())
                }
                other => other,
            })?;

        parse_link_json(&stdout, name)
    }

    fn route_add(&self, network: &IpNet, interface: &Interface) -> Result<(), KernelError> {
        tracing::debug!("ip route add {} dev {}", network, interface.name);
        let result = self.ip(&["route", "add", &network.to_string(), "dev", &interface.name]);
        tolerate(result, "File exists")
    }

    fn route_del(&self, network: &IpNet, interface: &Interface) -> Result<(), KernelError> {
        tracing::debug!("ip route del {} dev {}", network, interface.name);
        let result = self.ip(&["route", "del", &network.to_string(), "dev", &interface.name]);
        tolerate(result, "No such process")
    }
}

/// Backoff used while waiting for the tunnel interface to be created
#[derive(Debug, Clone)]
pub struct InterfaceWait {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for InterfaceWait {
    fn default() -> Self {
        InterfaceWait {
            attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl InterfaceWait {
    /// Delay before the attempt following `attempt` (zero-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.initial_delay
            .mul_f64(self.multiplier.powi(attempt as i32))
            .min(self.max_delay)
    }

    /// Resolve `name`, backing off while the interface does not exist yet.
    /// Any other failure is returned at once.
    pub async fn resolve(&self, kernel: Arc<dyn Kernel>, name: &str) -> Result<Interface, KernelError> {
        let mut attempt = 0;

        loop {
            let kernel = kernel.clone();
            let owned = name.to_string();
            let result = tokio::task::spawn_blocking(move || kernel.resolve_interface(&owned))
                .await
                .map_err(|e| KernelError::Io(std::io::Error::other(e)))?;

            match result {
                Ok(iface) => {
                    if attempt > 0 {
                        tracing::info!("Interface {} appeared after {} attempt(s)", name, attempt + 1);
                    }
                    return Ok(iface);
                }
                Err(KernelError::InterfaceNotFound(_)) if attempt + 1 < self.attempts => {
                    let delay = self.delay(attempt);
                    attempt += 1;
                    tracing::debug!(
                        "Interface {} not up yet (attempt {}/{}), checking again in {:?}",
                        name,
                        attempt,
                        self.attempts,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct LinkInfo {
    ifindex: u32,
    ifname: String,
}

/// Parse output of `ip -json link show dev <name>`
fn parse_link_json(json_str: &str, name: &str) -> Result<Interface, KernelError> {
    let links: Vec<LinkInfo> = serde_json::from_str(json_str)
        .map_err(|e| KernelError::Parse(format!("ip link JSON: {}", e)))?;

    links
        .into_iter()
        .find(|link| link.ifname == name)
        .map(|link| Interface {
            name: link.ifname,
            index: link.ifindex,
        })
        .ok_or_else(|| KernelError::InterfaceNotFound(name.to_string()))
}

/// Treat a failure whose stderr mentions `already_done` as success
fn tolerate(result: Result<String, KernelError>, already_done: &str) -> Result<(), KernelError> {
    match result {
        Err(KernelError::Command { ref stderr, .. }) if stderr.contains(already_done) => Ok(()),
        other => other.map(|_| ()),
    }
}

fn is_missing_device(stderr: &str) -> bool {
    stderr.contains("does not exist") || stderr.contains("Cannot find device")
}

/// Run a command to completion, killing it once `timeout` elapses
fn run_command(mut command: Command, timeout: Duration) -> Result<String, KernelError> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let deadline = Instant::now() + timeout;
    loop {
        if child.try_wait()?.is_some() {
            break;
        }
        if Instant::now() >= deadline {
            // the child may have exited in between; either way reap it
            let _ = child.kill();
            let _ = child.wait();
            return Err(KernelError::Timeout(timeout));
        }
        thread::sleep(POLL_INTERVAL);
    }

    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(KernelError::Command {
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
