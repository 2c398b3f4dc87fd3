// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end routing manager scenarios against a scripted kernel.
//!
//! The manager is driven exclusively through its public interface: enable,
//! listener add/remove, and `process()` fed from a select-style fd set. The
//! kernel side is a lab double implementing `RouterSocket` that records
//! every MFC operation.

use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::sync::{Mutex, MutexGuard, OnceLock};

use nix::sys::select::FdSet;

use bbmrd::logging::{CaptureSink, Logger, Severity};
use bbmrd::router_sock::{DeleteOutcome, RouterSocket, SgCounters, Upcall};
use bbmrd::{Ip6Address, MifIndex, MulticastRoutingManager, RoutingError};

const LAB_FD: RawFd = 57;

#[derive(Default)]
struct LabKernel {
    upcalls: VecDeque<Upcall>,
    installs: Vec<(Ip6Address, Ip6Address, MifIndex, MifIndex)>,
    deletes: Vec<(Ip6Address, Ip6Address, MifIndex)>,
}

fn lab() -> &'static Mutex<LabKernel> {
    static LAB: OnceLock<Mutex<LabKernel>> = OnceLock::new();
    LAB.get_or_init(Mutex::default)
}

/// Serializes tests sharing the lab kernel and resets its state.
fn lab_session() -> MutexGuard<'static, ()> {
    static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
    let guard = GUARD
        .get_or_init(Mutex::default)
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    *lab().lock().unwrap() = LabKernel::default();
    guard
}

struct LabRouterSock;

impl RouterSocket for LabRouterSock {
    fn open(_thread_ifname: &str, _backbone_ifname: &str) -> Result<Self, RoutingError> {
        Ok(LabRouterSock)
    }

    fn install_mfc(
        &self,
        src: &Ip6Address,
        group: &Ip6Address,
        iif: MifIndex,
        oif: MifIndex,
    ) -> Result<(), RoutingError> {
        lab().lock().unwrap().installs.push((*src, *group, iif, oif));
        Ok(())
    }

    fn delete_mfc(
        &self,
        src: &Ip6Address,
        group: &Ip6Address,
        iif: MifIndex,
    ) -> Result<DeleteOutcome, RoutingError> {
        lab().lock().unwrap().deletes.push((*src, *group, iif));
        Ok(DeleteOutcome::Deleted)
    }

    fn query_counters(
        &self,
        _src: &Ip6Address,
        _group: &Ip6Address,
    ) -> Result<SgCounters, RoutingError> {
        Ok(SgCounters::default())
    }

    fn recv_upcall(&mut self) -> Result<Option<Upcall>, RoutingError> {
        Ok(lab().lock().unwrap().upcalls.pop_front())
    }

    fn raw_fd(&self) -> RawFd {
        LAB_FD
    }
}

fn addr(s: &str) -> Ip6Address {
    s.parse().unwrap()
}

fn manager() -> MulticastRoutingManager<LabRouterSock> {
    let logger = Logger::new(std::sync::Arc::new(CaptureSink::new()), Severity::Debug);
    MulticastRoutingManager::new("wpan0", "eth0", logger)
}

fn push_upcall(src: &str, group: &str, iif: MifIndex) {
    lab().lock().unwrap().upcalls.push_back(Upcall {
        src: addr(src),
        group: addr(group),
        iif,
    });
}

/// One select round with the router socket readable.
fn drive(mgr: &mut MulticastRoutingManager<LabRouterSock>) {
    let mut read_fds = FdSet::new();
    read_fds.insert(LAB_FD);
    mgr.process(&read_fds, &FdSet::new(), &FdSet::new());
}

fn mfc_snapshot(mgr: &MulticastRoutingManager<LabRouterSock>) -> Vec<(Ip6Address, Ip6Address, MifIndex, MifIndex)> {
    mgr.mfc_entries()
        .map(|(route, info)| (route.src, route.group, info.iif, info.oif))
        .collect()
}

#[test]
fn test_block_then_unblock_then_remove_cycle() {
    let _session = lab_session();
    let mut mgr = manager();
    mgr.enable().unwrap();

    // Backbone traffic for an unregistered group gets a block entry.
    push_upcall("2001:db8::1", "ff05::beef", MifIndex::Backbone);
    drive(&mut mgr);
    assert_eq!(
        mfc_snapshot(&mgr),
        vec![(
            addr("2001:db8::1"),
            addr("ff05::beef"),
            MifIndex::Backbone,
            MifIndex::None
        )]
    );

    // Registering the group rewrites the entry into a forwarding one.
    mgr.add(addr("ff05::beef"));
    assert_eq!(
        mfc_snapshot(&mgr),
        vec![(
            addr("2001:db8::1"),
            addr("ff05::beef"),
            MifIndex::Backbone,
            MifIndex::Thread
        )]
    );
    {
        let kernel = lab().lock().unwrap();
        assert_eq!(
            kernel.installs,
            vec![
                (addr("2001:db8::1"), addr("ff05::beef"), MifIndex::Backbone, MifIndex::None),
                (addr("2001:db8::1"), addr("ff05::beef"), MifIndex::Backbone, MifIndex::Thread),
            ]
        );
    }

    // Unregistering retires the route on both sides.
    mgr.remove(addr("ff05::beef"));
    assert!(mfc_snapshot(&mgr).is_empty());
    let kernel = lab().lock().unwrap();
    assert_eq!(
        kernel.deletes,
        vec![(addr("2001:db8::1"), addr("ff05::beef"), MifIndex::Backbone)]
    );
}

#[test]
fn test_scope_policy_end_to_end() {
    let _session = lab_session();
    let mut mgr = manager();
    mgr.enable().unwrap();

    push_upcall("fd00::1", "ff0e::1", MifIndex::Thread);
    push_upcall("fd00::2", "ff03::fc", MifIndex::Thread);
    drive(&mut mgr);
    drive(&mut mgr);

    let snapshot = mfc_snapshot(&mgr);
    // Group-major iteration order: ff03::fc sorts before ff0e::1.
    assert_eq!(
        snapshot,
        vec![
            (addr("fd00::2"), addr("ff03::fc"), MifIndex::Thread, MifIndex::None),
            (addr("fd00::1"), addr("ff0e::1"), MifIndex::Thread, MifIndex::Backbone),
        ]
    );
}

#[test]
fn test_disable_clears_state_and_reenable_starts_fresh() {
    let _session = lab_session();
    let mut mgr = manager();
    mgr.enable().unwrap();
    mgr.add(addr("ff05::abcd"));

    push_upcall("2001:db8::1", "ff05::abcd", MifIndex::Backbone);
    drive(&mut mgr);
    assert_eq!(mfc_snapshot(&mgr).len(), 1);

    mgr.disable();
    assert!(!mgr.is_enabled());
    assert!(mfc_snapshot(&mgr).is_empty());
    // The listener registration survives the role change.
    assert!(mgr.listeners().contains(&addr("ff05::abcd")));

    mgr.enable().unwrap();
    assert!(mgr.is_enabled());
    assert!(mfc_snapshot(&mgr).is_empty());

    // The retained listener still gates forwarding after re-enable.
    push_upcall("2001:db8::1", "ff05::abcd", MifIndex::Backbone);
    drive(&mut mgr);
    assert_eq!(
        mfc_snapshot(&mgr),
        vec![(
            addr("2001:db8::1"),
            addr("ff05::abcd"),
            MifIndex::Backbone,
            MifIndex::Thread
        )]
    );
}

#[test]
fn test_process_reads_one_upcall_per_round() {
    let _session = lab_session();
    let mut mgr = manager();
    mgr.enable().unwrap();

    push_upcall("fd00::1", "ff0e::1", MifIndex::Thread);
    push_upcall("fd00::2", "ff0e::2", MifIndex::Thread);

    drive(&mut mgr);
    assert_eq!(mfc_snapshot(&mgr).len(), 1);
    drive(&mut mgr);
    assert_eq!(mfc_snapshot(&mgr).len(), 2);

    // A round without queued messages changes nothing.
    drive(&mut mgr);
    assert_eq!(mfc_snapshot(&mgr).len(), 2);
}
