// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SMCRoute-based multicast routing backend.
//!
//! Drives an external `smcrouted` daemon through its `smcroutectl` control
//! utility instead of owning the MRT6 socket. One wildcard route carries
//! Thread-originated traffic outbound for scopes admin-local and wider
//! (the `65520`/0xfff0 scope mask), and one `(*, G)` route per registered
//! listener carries backbone traffic inbound.
//!
//! Compared with the kernel-direct manager this shim installs no block
//! entries and ages nothing; it is a fallback for hosts where another
//! process already owns the multicast routing socket.

use std::process::{Command, Stdio};

use crate::backend::MulticastRouting;
use crate::ip6::Ip6Address;
use crate::logging::{Facility, Logger};
use crate::mroute::ListenerSet;
use crate::RoutingError;

pub struct SmcRouteManager {
    thread_ifname: String,
    backbone_ifname: String,
    listeners: ListenerSet,
    enabled: bool,
    logger: Logger,
}

impl SmcRouteManager {
    pub fn new(
        thread_ifname: impl Into<String>,
        backbone_ifname: impl Into<String>,
        logger: Logger,
    ) -> Self {
        Self {
            thread_ifname: thread_ifname.into(),
            backbone_ifname: backbone_ifname.into(),
            listeners: ListenerSet::new(),
            enabled: false,
            logger,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) -> Result<(), RoutingError> {
        if self.enabled {
            return Ok(());
        }

        self.smcroutectl(&["flush"])?;
        self.smcroutectl(&self.outbound_args("add"))?;
        for group in self.listeners.iter() {
            self.smcroutectl(&self.inbound_args("add", group))?;
        }

        self.enabled = true;
        self.logger
            .info(Facility::Smcroute, "smcroute backend enabled");
        Ok(())
    }

    pub fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        self.enabled = false;

        // Teardown is best effort; each failure is logged and the rest of
        // the routes are still removed.
        if let Err(err) = self.smcroutectl(&["flush"]) {
            self.logger
                .error(Facility::Smcroute, &format!("flush failed: {}", err));
        }
        for group in self.listeners.iter() {
            if let Err(err) = self.smcroutectl(&self.inbound_args("del", group)) {
                self.logger.error(
                    Facility::Smcroute,
                    &format!("remove route for {} failed: {}", group, err),
                );
            }
        }
        if let Err(err) = self.smcroutectl(&self.outbound_args("remove")) {
            self.logger.error(
                Facility::Smcroute,
                &format!("remove outbound route failed: {}", err),
            );
        }

        self.logger
            .info(Facility::Smcroute, "smcroute backend disabled");
    }

    pub fn add(&mut self, group: Ip6Address) {
        self.listeners.add(group);

        if self.enabled {
            let result = self
                .smcroutectl(&["flush"])
                .and_then(|()| self.smcroutectl(&self.inbound_args("add", &group)));
            self.log_route_result("add", &group, result);
        }
    }

    pub fn remove(&mut self, group: Ip6Address) {
        self.listeners.remove(&group);

        if self.enabled {
            let result = self
                .smcroutectl(&["flush"])
                .and_then(|()| self.smcroutectl(&self.inbound_args("del", &group)));
            self.log_route_result("remove", &group, result);
        }
    }

    /// Wildcard route letting Thread traffic of scope admin-local (4) and
    /// wider leave through the backbone interface.
    fn outbound_args(&self, verb: &str) -> Vec<String> {
        vec![
            verb.to_string(),
            self.thread_ifname.clone(),
            "::".to_string(),
            "::".to_string(),
            "65520".to_string(),
            self.backbone_ifname.clone(),
        ]
    }

    /// `(*, G)` route from the backbone into the Thread mesh.
    fn inbound_args(&self, verb: &str, group: &Ip6Address) -> Vec<String> {
        vec![
            verb.to_string(),
            self.backbone_ifname.clone(),
            "::".to_string(),
            group.to_string(),
            self.thread_ifname.clone(),
        ]
    }

    fn smcroutectl<A: AsRef<str>>(&self, args: &[A]) -> Result<(), RoutingError> {
        let mut command = Command::new("smcroutectl");
        for arg in args {
            command.arg(arg.as_ref());
        }
        let status = command
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|err| RoutingError::Backend(format!("smcroutectl: {}", err)))?;

        if status.success() {
            Ok(())
        } else {
            Err(RoutingError::Backend(format!(
                "smcroutectl exited with {}",
                status
            )))
        }
    }

    fn log_route_result(&self, what: &str, group: &Ip6Address, result: Result<(), RoutingError>) {
        match result {
            Ok(()) => self.logger.info(
                Facility::Smcroute,
                &format!("{} route for {}", what, group),
            ),
            Err(err) => self.logger.error(
                Facility::Smcroute,
                &format!("{} route for {} failed: {}", what, group, err),
            ),
        }
    }
}

impl MulticastRouting for SmcRouteManager {
    fn enable(&mut self) -> Result<(), RoutingError> {
        SmcRouteManager::enable(self)
    }

    fn disable(&mut self) {
        SmcRouteManager::disable(self)
    }

    fn add(&mut self, group: Ip6Address) {
        SmcRouteManager::add(self, group)
    }

    fn remove(&mut self, group: Ip6Address) {
        SmcRouteManager::remove(self, group)
    }

    fn update_fd_set(
        &self,
        _read_fds: &mut nix::sys::select::FdSet,
        _write_fds: &mut nix::sys::select::FdSet,
        _error_fds: &mut nix::sys::select::FdSet,
        _max_fd: &mut std::os::unix::io::RawFd,
        _timeout: &mut nix::sys::time::TimeVal,
    ) {
        // No file descriptors of our own; smcrouted owns the socket.
    }

    fn process(
        &mut self,
        _read_fds: &nix::sys::select::FdSet,
        _write_fds: &nix::sys::select::FdSet,
        _error_fds: &nix::sys::select::FdSet,
    ) {
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{CaptureSink, Severity};
    use std::sync::Arc;

    fn manager() -> SmcRouteManager {
        let logger = Logger::new(Arc::new(CaptureSink::new()), Severity::Debug);
        SmcRouteManager::new("wpan0", "eth0", logger)
    }

    #[test]
    fn test_listener_bookkeeping_while_disabled() {
        let mut mgr = manager();
        assert!(!mgr.is_enabled());

        mgr.add("ff05::1".parse().unwrap());
        mgr.add("ff04::2".parse().unwrap());
        assert_eq!(mgr.listeners.len(), 2);

        mgr.remove("ff05::1".parse().unwrap());
        assert_eq!(mgr.listeners.len(), 1);

        // Disable before enable is a no-op.
        mgr.disable();
        assert!(!mgr.is_enabled());
    }

    #[test]
    fn test_outbound_route_arguments() {
        let mgr = manager();
        assert_eq!(
            mgr.outbound_args("add"),
            vec!["add", "wpan0", "::", "::", "65520", "eth0"]
        );
        assert_eq!(
            mgr.outbound_args("remove"),
            vec!["remove", "wpan0", "::", "::", "65520", "eth0"]
        );
    }

    #[test]
    fn test_inbound_route_arguments() {
        let mgr = manager();
        let group: Ip6Address = "ff05::abcd".parse().unwrap();
        assert_eq!(
            mgr.inbound_args("add", &group),
            vec!["add", "eth0", "::", "ff05::abcd", "wpan0"]
        );
        assert_eq!(
            mgr.inbound_args("del", &group),
            vec!["del", "eth0", "::", "ff05::abcd", "wpan0"]
        );
    }
}
