// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Kernel-direct multicast routing manager.
//!
//! While enabled, the manager owns the kernel's MRT6 routing socket and
//! mirrors the kernel's Multicast Forwarding Cache in memory. Forwarding
//! decisions are made lazily: the kernel raises a `NOCACHE` upcall for the
//! first packet of each `(src, group)` flow, the policy layer picks the
//! output interface (or none, for a block entry), and the resulting MFC
//! entry is installed on both sides. Listener registrations arriving from
//! the Thread side rewrite or retire the affected backbone-ingress entries.
//!
//! Routes are aged opportunistically: every upcall-driven install first
//! sweeps the cache and retires entries that have moved no traffic for
//! [`MFC_EXPIRE_TIMEOUT`].

use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use nix::sys::select::FdSet;
use nix::sys::time::TimeVal;

use crate::backend::MulticastRouting;
use crate::ip6::Ip6Address;
use crate::logging::{Facility, Logger, Severity};
use crate::mroute::{
    ListenerSet, MifIndex, MulticastForwardingCache, MulticastRoute, MulticastRouteInfo,
};
use crate::policy;
use crate::router_sock::{DeleteOutcome, MulticastRouterSock, RouterSocket};
use crate::RoutingError;

/// How long a route may carry no traffic before it is retired.
pub const MFC_EXPIRE_TIMEOUT: Duration = Duration::from_secs(300);

/// Multicast routing manager backed by the kernel MRT6 interface.
///
/// Single-threaded: the owner drives it through [`update_fd_set`] and
/// [`process`] from a select loop, and feeds it listener events in between.
///
/// [`update_fd_set`]: MulticastRoutingManager::update_fd_set
/// [`process`]: MulticastRoutingManager::process
pub struct MulticastRoutingManager<S: RouterSocket = MulticastRouterSock> {
    thread_ifname: String,
    backbone_ifname: String,
    listeners: ListenerSet,
    mfc: MulticastForwardingCache,
    sock: Option<S>,
    logger: Logger,
}

impl<S: RouterSocket> MulticastRoutingManager<S> {
    pub fn new(
        thread_ifname: impl Into<String>,
        backbone_ifname: impl Into<String>,
        logger: Logger,
    ) -> Self {
        Self {
            thread_ifname: thread_ifname.into(),
            backbone_ifname: backbone_ifname.into(),
            listeners: ListenerSet::new(),
            mfc: MulticastForwardingCache::new(),
            sock: None,
            logger,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sock.is_some()
    }

    pub fn listeners(&self) -> &ListenerSet {
        &self.listeners
    }

    pub fn mfc_entries(&self) -> impl Iterator<Item = (&MulticastRoute, &MulticastRouteInfo)> {
        self.mfc.iter()
    }

    /// Open the routing socket and register both MIFs. No-op when already
    /// enabled; on failure the manager stays disabled and nothing is left
    /// behind in the kernel.
    pub fn enable(&mut self) -> Result<(), RoutingError> {
        if self.is_enabled() {
            return Ok(());
        }

        match S::open(&self.thread_ifname, &self.backbone_ifname) {
            Ok(sock) => {
                self.sock = Some(sock);
                self.logger.info(
                    Facility::MulticastRouting,
                    &format!(
                        "enabled: Thread={} Backbone={}",
                        self.thread_ifname, self.backbone_ifname
                    ),
                );
                Ok(())
            }
            Err(err) => {
                self.logger.error(
                    Facility::MulticastRouting,
                    &format!("enable failed: {}", err),
                );
                Err(err)
            }
        }
    }

    /// Close the routing socket and forget all forwarding state. The kernel
    /// drops its MFC and MIFs together with the socket. Safe to call twice.
    pub fn disable(&mut self) {
        if self.sock.take().is_none() {
            return;
        }
        self.mfc.clear();
        self.logger.info(Facility::MulticastRouting, "disabled");
    }

    /// Register a Thread listener for `group` and unblock any backbone
    /// routes that were installed as block entries for it.
    pub fn add(&mut self, group: Ip6Address) {
        self.listeners.add(group);

        if self.is_enabled() {
            self.unblock_inbound(&group);
        }

        self.logger.info(
            Facility::MulticastRouting,
            &format!("listener added: {}", group),
        );
    }

    /// Unregister the Thread listener for `group` and retire its
    /// backbone-ingress routes. Routes for other groups and Thread-ingress
    /// routes are untouched.
    pub fn remove(&mut self, group: Ip6Address) {
        self.listeners.remove(&group);

        if self.is_enabled() {
            self.remove_inbound(&group);
        }

        self.logger.info(
            Facility::MulticastRouting,
            &format!("listener removed: {}", group),
        );
    }

    /// Register the routing socket with the caller's select set.
    pub fn update_fd_set(
        &self,
        read_fds: &mut FdSet,
        _write_fds: &mut FdSet,
        _error_fds: &mut FdSet,
        max_fd: &mut RawFd,
        _timeout: &mut TimeVal,
    ) {
        let Some(sock) = self.sock.as_ref() else {
            return;
        };
        read_fds.insert(sock.raw_fd());
        *max_fd = (*max_fd).max(sock.raw_fd());
    }

    /// Handle one routing-socket message if the socket is readable.
    /// Upcall failures are logged and swallowed; the loop keeps running.
    pub fn process(&mut self, read_fds: &FdSet, _write_fds: &FdSet, _error_fds: &FdSet) {
        let Some(fd) = self.sock.as_ref().map(RouterSocket::raw_fd) else {
            return;
        };
        if !read_fds.contains(fd) {
            return;
        }

        if let Err(err) = self.process_router_messages() {
            self.logger.warning(
                Facility::MulticastRouting,
                &format!("multicast router message failed: {}", err),
            );
        }
    }

    fn process_router_messages(&mut self) -> Result<(), RoutingError> {
        let Some(sock) = self.sock.as_mut() else {
            return Ok(());
        };
        let Some(upcall) = sock.recv_upcall()? else {
            return Ok(());
        };

        self.add_forwarding_cache(upcall.src, upcall.group, upcall.iif)
    }

    /// Install the MFC entry for a cache miss, expiring stale routes first.
    fn add_forwarding_cache(
        &mut self,
        src: Ip6Address,
        group: Ip6Address,
        iif: MifIndex,
    ) -> Result<(), RoutingError> {
        let oif = policy::forward_mif(iif, &group, &self.listeners)?;

        self.expire_forwarding_cache();

        let Some(sock) = self.sock.as_ref() else {
            return Ok(());
        };
        sock.install_mfc(&src, &group, iif, oif)?;
        self.mfc
            .insert(MulticastRoute::new(src, group), MulticastRouteInfo::new(iif, oif));

        self.logger.info(
            Facility::MulticastRouting,
            &format!(
                "add dynamic route {} => {}, MIF={}, ForwardMIF={}",
                src, group, iif, oif
            ),
        );
        Ok(())
    }

    /// Rewrite block entries for `group` into forwarding entries after a
    /// listener registration.
    fn unblock_inbound(&mut self, group: &Ip6Address) {
        let Some(sock) = self.sock.as_ref() else {
            return;
        };
        let logger = &self.logger;

        for (route, info) in self.mfc.iter_mut() {
            if info.iif != MifIndex::Backbone
                || info.oif == MifIndex::Thread
                || route.group != *group
            {
                continue;
            }

            match sock.install_mfc(&route.src, &route.group, MifIndex::Backbone, MifIndex::Thread)
            {
                Ok(()) => {
                    *info = MulticastRouteInfo::new(MifIndex::Backbone, MifIndex::Thread);
                    logger.info(
                        Facility::MulticastRouting,
                        &format!("unblock inbound route {} => {}", route.src, route.group),
                    );
                }
                Err(err) => {
                    logger.error(
                        Facility::MulticastRouting,
                        &format!(
                            "unblock inbound route {} => {} failed: {}",
                            route.src, route.group, err
                        ),
                    );
                }
            }
        }
    }

    /// Delete the backbone-ingress entries for `group` after a listener
    /// removal.
    fn remove_inbound(&mut self, group: &Ip6Address) {
        let Some(sock) = self.sock.as_ref() else {
            return;
        };
        let logger = &self.logger;

        self.mfc.retain(|route, info| {
            if info.iif != MifIndex::Backbone || route.group != *group {
                return true;
            }

            match sock.delete_mfc(&route.src, &route.group, info.iif) {
                Ok(DeleteOutcome::Deleted) => {
                    logger.info(
                        Facility::MulticastRouting,
                        &format!("remove inbound route {} => {}", route.src, route.group),
                    );
                    false
                }
                Ok(DeleteOutcome::NotFound) => {
                    logger.debug(
                        Facility::MulticastRouting,
                        &format!(
                            "remove inbound route {} => {}: no kernel entry",
                            route.src, route.group
                        ),
                    );
                    false
                }
                Err(err) => {
                    logger.error(
                        Facility::MulticastRouting,
                        &format!(
                            "remove inbound route {} => {} failed: {}",
                            route.src, route.group, err
                        ),
                    );
                    true
                }
            }
        });
    }

    /// Retire routes that have moved no traffic for [`MFC_EXPIRE_TIMEOUT`].
    ///
    /// A stale route is probed through the kernel counters first; any packet
    /// movement since the last probe refreshes it instead. A failed counter
    /// query keeps the route for the next pass.
    fn expire_forwarding_cache(&mut self) {
        let now = Instant::now();
        let Some(sock) = self.sock.as_ref() else {
            return;
        };
        let logger = &self.logger;

        self.mfc.retain(|route, info| {
            // Strictly older than the timeout; an entry exactly at the
            // boundary is left alone.
            if now.duration_since(info.last_use) <= MFC_EXPIRE_TIMEOUT {
                return true;
            }

            match sock.query_counters(&route.src, &route.group) {
                Ok(counters) => {
                    logger.debug(
                        Facility::MulticastRouting,
                        &format!(
                            "counters {} => {}: bytecnt={}, pktcnt={}, wrong_if={}",
                            route.src,
                            route.group,
                            counters.bytecnt,
                            counters.pktcnt,
                            counters.wrong_if
                        ),
                    );

                    let valid = counters.pktcnt.wrapping_sub(counters.wrong_if);
                    if valid != info.valid_pkt_cnt {
                        // The raw packet count is kept, so later passes
                        // compare the wrong-if-adjusted count against it.
                        info.valid_pkt_cnt = counters.pktcnt;
                        info.last_use = now;
                        return true;
                    }
                }
                Err(err) => {
                    logger.warning(
                        Facility::MulticastRouting,
                        &format!(
                            "query counters {} => {} failed: {}",
                            route.src, route.group, err
                        ),
                    );
                    return true;
                }
            }

            match sock.delete_mfc(&route.src, &route.group, info.iif) {
                Ok(DeleteOutcome::Deleted) => {
                    logger.info(
                        Facility::MulticastRouting,
                        &format!("expire route {} => {}", route.src, route.group),
                    );
                    false
                }
                Ok(DeleteOutcome::NotFound) => {
                    logger.debug(
                        Facility::MulticastRouting,
                        &format!(
                            "expire route {} => {}: no kernel entry",
                            route.src, route.group
                        ),
                    );
                    false
                }
                Err(err) => {
                    logger.error(
                        Facility::MulticastRouting,
                        &format!("expire route {} => {} failed: {}", route.src, route.group, err),
                    );
                    true
                }
            }
        });

        self.dump_forwarding_cache();
    }

    fn dump_forwarding_cache(&self) {
        if self.logger.threshold() < Severity::Debug {
            return;
        }

        self.logger.debug(
            Facility::MulticastRouting,
            &format!(
                "==================== MFC {} entries ====================",
                self.mfc.len()
            ),
        );
        for (route, info) in &self.mfc {
            self.logger.debug(
                Facility::MulticastRouting,
                &format!("{} {} => {} {}", info.iif, route.src, route.group, info.oif),
            );
        }
        self.logger.debug(
            Facility::MulticastRouting,
            "========================================================",
        );
    }
}

impl<S: RouterSocket> MulticastRouting for MulticastRoutingManager<S> {
    fn enable(&mut self) -> Result<(), RoutingError> {
        MulticastRoutingManager::enable(self)
    }

    fn disable(&mut self) {
        MulticastRoutingManager::disable(self)
    }

    fn add(&mut self, group: Ip6Address) {
        MulticastRoutingManager::add(self, group)
    }

    fn remove(&mut self, group: Ip6Address) {
        MulticastRoutingManager::remove(self, group)
    }

    fn update_fd_set(
        &self,
        read_fds: &mut FdSet,
        write_fds: &mut FdSet,
        error_fds: &mut FdSet,
        max_fd: &mut RawFd,
        timeout: &mut TimeVal,
    ) {
        MulticastRoutingManager::update_fd_set(self, read_fds, write_fds, error_fds, max_fd, timeout)
    }

    fn process(&mut self, read_fds: &FdSet, write_fds: &FdSet, error_fds: &FdSet) {
        MulticastRoutingManager::process(self, read_fds, write_fds, error_fds)
    }
}
