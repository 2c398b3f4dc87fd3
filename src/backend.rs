// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Multicast routing backend abstraction.
//!
//! Two backends implement the same capability set: the kernel-direct
//! manager (block entries, expiry, upcall-driven installs) and the
//! `smcroutectl` shim (static routes through an external daemon). The
//! kernel-direct backend is the default; the shim exists for hosts where
//! another process already owns the MRT6 socket.

use std::os::unix::io::RawFd;

use nix::sys::select::FdSet;
use nix::sys::time::TimeVal;
#[cfg(test)]
use nix::sys::time::TimeValLike;

use crate::config::{BackendKind, Config};
use crate::ip6::Ip6Address;
use crate::logging::Logger;
use crate::manager::MulticastRoutingManager;
use crate::router_sock::MulticastRouterSock;
use crate::smcroute::SmcRouteManager;
use crate::RoutingError;

/// Capability set shared by the routing backends.
///
/// Drivers call `enable`/`disable` on Backbone Router role transitions
/// (only the primary forwards multicast), `add`/`remove` on Multicast
/// Listener Registration changes, and the fd-set pair from the select loop.
pub trait MulticastRouting {
    fn enable(&mut self) -> Result<(), RoutingError>;
    fn disable(&mut self);
    fn add(&mut self, group: Ip6Address);
    fn remove(&mut self, group: Ip6Address);
    fn update_fd_set(
        &self,
        read_fds: &mut FdSet,
        write_fds: &mut FdSet,
        error_fds: &mut FdSet,
        max_fd: &mut RawFd,
        timeout: &mut TimeVal,
    );
    fn process(&mut self, read_fds: &FdSet, write_fds: &FdSet, error_fds: &FdSet);
}

/// Build the backend selected by the configuration.
pub fn create_backend(config: &Config, logger: &Logger) -> Box<dyn MulticastRouting> {
    match config.backend {
        BackendKind::Kernel => Box::new(MulticastRoutingManager::<MulticastRouterSock>::new(
            config.thread_interface.clone(),
            config.backbone_interface.clone(),
            logger.clone(),
        )),
        BackendKind::Smcroute => Box::new(SmcRouteManager::new(
            config.thread_interface.clone(),
            config.backbone_interface.clone(),
            logger.clone(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{CaptureSink, Severity};
    use std::sync::Arc;

    fn config(backend: BackendKind) -> Config {
        Config {
            thread_interface: "wpan0".to_string(),
            backbone_interface: "eth0".to_string(),
            backend,
            log_level: None,
        }
    }

    fn logger() -> Logger {
        Logger::new(Arc::new(CaptureSink::new()), Severity::Debug)
    }

    #[test]
    fn test_create_backend_starts_disabled() {
        // Building a backend must not touch the kernel or spawn commands;
        // listener bookkeeping works before enable on both.
        for kind in [BackendKind::Kernel, BackendKind::Smcroute] {
            let mut backend = create_backend(&config(kind), &logger());
            backend.add("ff05::1".parse().unwrap());
            backend.remove("ff05::1".parse().unwrap());
            backend.disable();
        }
    }

    #[test]
    fn test_trait_object_fd_set_is_empty_before_enable() {
        let backend = create_backend(&config(BackendKind::Kernel), &logger());

        let mut read_fds = FdSet::new();
        let mut write_fds = FdSet::new();
        let mut error_fds = FdSet::new();
        let mut max_fd: RawFd = -1;
        let mut timeout = TimeVal::seconds(1);
        backend.update_fd_set(
            &mut read_fds,
            &mut write_fds,
            &mut error_fds,
            &mut max_fd,
            &mut timeout,
        );
        assert_eq!(max_fd, -1);
        assert!(read_fds.highest().is_none());
    }
}
