// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tests against the real kernel MRT6 interface.
//!
//! These need CAP_NET_ADMIN plus an MRT6 table no other routing daemon
//! (pimd, smcrouted, another bbmrd) currently owns, so they are ignored by
//! default.

use bbmrd::router_sock::{DeleteOutcome, MulticastRouterSock, RouterSocket};
use bbmrd::{Ip6Address, MifIndex};

fn addr(s: &str) -> Ip6Address {
    s.parse().unwrap()
}

#[test]
#[ignore = "requires CAP_NET_ADMIN and a free MRT6 table (run with: cargo test -- --ignored)"]
fn test_open_install_query_delete() {
    // Loopback always exists; registering it for both MIFs keeps the test
    // independent of the host's interface inventory.
    let sock = MulticastRouterSock::open("lo", "lo").expect("open router socket");
    assert!(sock.raw_fd() >= 0);

    let src = addr("fd00::1");
    let group = addr("ff0e::1");

    sock.install_mfc(&src, &group, MifIndex::Thread, MifIndex::Backbone)
        .expect("install MFC entry");

    let counters = sock
        .query_counters(&src, &group)
        .expect("query MFC counters");
    assert_eq!(counters.pktcnt, 0);
    assert_eq!(counters.bytecnt, 0);

    // Reinstall with a different output set overwrites in place.
    sock.install_mfc(&src, &group, MifIndex::Thread, MifIndex::None)
        .expect("reinstall MFC entry");

    let outcome = sock
        .delete_mfc(&src, &group, MifIndex::Thread)
        .expect("delete MFC entry");
    assert_eq!(outcome, DeleteOutcome::Deleted);

    // Deleting a gone entry reports success (ENOENT is tolerated).
    let outcome = sock
        .delete_mfc(&src, &group, MifIndex::Thread)
        .expect("repeated delete");
    assert_eq!(outcome, DeleteOutcome::NotFound);
}

#[test]
#[ignore = "requires CAP_NET_ADMIN (run with: cargo test -- --ignored)"]
fn test_open_rolls_back_on_unknown_interface() {
    assert!(MulticastRouterSock::open("bbmrd-nonexistent0", "lo").is_err());

    // The failed attempt released the MRT6 table, so a follow-up open
    // succeeds.
    let sock = MulticastRouterSock::open("lo", "lo").expect("open after rollback");
    assert!(sock.raw_fd() >= 0);
}
