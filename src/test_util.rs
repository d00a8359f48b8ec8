// In-memory kernel used by unit tests

use crate::error::KernelError;
use crate::routes::kernel::{Interface, Kernel};
use ipnet::IpNet;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct FakeState {
    interface_up: bool,
    fail_add: bool,
    fail_del: bool,
    installed: Vec<IpNet>,
    adds: usize,
    dels: usize,
}

/// Records route calls and lets tests break the interface or the kernel
#[derive(Debug, Default)]
pub struct FakeKernel {
    state: Mutex<FakeState>,
}

impl FakeKernel {
    pub fn up() -> Arc<Self> {
        let kernel = FakeKernel::default();
        kernel.set_interface_up(true);
        Arc::new(kernel)
    }

    pub fn down() -> Arc<Self> {
        Arc::new(FakeKernel::default())
    }

    pub fn set_interface_up(&self, up: bool) {
        self.state.lock().interface_up = up;
    }

    pub fn set_fail_add(&self, fail: bool) {
        self.state.lock().fail_add = fail;
    }

    pub fn set_fail_del(&self, fail: bool) {
        self.state.lock().fail_del = fail;
    }

    pub fn installed(&self) -> Vec<IpNet> {
        self.state.lock().installed.clone()
    }

    /// Successful route adds
    pub fn adds(&self) -> usize {
        self.state.lock().adds
    }

    /// Successful route deletes
    pub fn dels(&self) -> usize {
        self.state.lock().dels
    }
}

impl Kernel for FakeKernel {
    fn resolve_interface(&self, name: &str) -> Result<Interface, KernelError> {
        if self.state.lock().interface_up {
            Ok(Interface {
                name: name.to_string(),
                index: 9,
            })
        } else {
            Err(KernelError::InterfaceNotFound(name.to_string()))
        }
    }

    fn route_add(&self, network: &IpNet, _interface: &Interface) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        if state.fail_add {
            return Err(KernelError::Command {
                status: 2,
                stderr: "RTNETLINK answers: Operation not permitted".to_string(),
            });
        }
        if !state.installed.contains(network) {
            state.installed.push(*network);
            state.adds += 1;
        }
        Ok(())
    }

    fn route_del(&self, network: &IpNet, _interface: &Interface) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        if state.fail_del {
            return Err(KernelError::Command {
                status: 2,
                stderr: "RTNETLINK answers: Operation not permitted".to_string(),
            });
        }
        if let Some(pos) = state.installed.iter().position(|n| n == network) {
            state.installed.remove(pos);
            state.dels += 1;
        }
        Ok(())
    }
}
