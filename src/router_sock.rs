// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Kernel multicast router socket (`<linux/mroute6.h>`).
//!
//! The kernel's IPv6 multicast forwarding plane is controlled through a raw
//! ICMPv6 socket: `MRT6_INIT` turns the socket into the (single) routing
//! daemon endpoint, `MRT6_ADD_MIF` registers the multicast interfaces, and
//! `MRT6_ADD_MFC`/`MRT6_DEL_MFC` install and remove forwarding cache
//! entries. Packets without a matching entry are delivered to this socket
//! as `MRT6MSG_NOCACHE` upcalls.
//!
//! The `mroute6.h` structures and option values are not exposed by the
//! `libc` crate, so they are declared here verbatim.

use std::mem;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::io::RawFd;

use nix::errno::Errno;
use nix::net::if_::if_nametoindex;
use nix::unistd;
use socket2::{Domain, Protocol, Socket, Type};

use crate::ip6::Ip6Address;
use crate::mroute::MifIndex;
use crate::RoutingError;

// ============================================================================
// linux/mroute6.h surface
// ============================================================================

const MRT6_BASE: libc::c_int = 200;
const MRT6_INIT: libc::c_int = MRT6_BASE;
const MRT6_ADD_MIF: libc::c_int = MRT6_BASE + 2;
const MRT6_ADD_MFC: libc::c_int = MRT6_BASE + 4;
const MRT6_DEL_MFC: libc::c_int = MRT6_BASE + 5;

const MRT6MSG_NOCACHE: u8 = 1;

// SIOCPROTOPRIVATE + 1
const SIOCGETSGCNT_IN6: libc::c_ulong = 0x89E1;

// netinet/icmp6.h
const ICMP6_FILTER: libc::c_int = 1;

/// `struct mif6ctl`: registers one multicast interface (MIF).
#[repr(C)]
#[derive(Clone, Copy)]
struct Mif6ctl {
    mif6c_mifi: u16,
    mif6c_flags: u8,
    vifc_threshold: u8,
    mif6c_pifi: u16,
    vifc_rate_limit: u32,
}

/// `struct if_set`: bitset over MIF indexes (256 bits).
#[repr(C)]
#[derive(Clone, Copy, Default)]
struct IfSet {
    ifs_bits: [u32; 8],
}

impl IfSet {
    fn set(&mut self, mif: u16) {
        self.ifs_bits[usize::from(mif / 32)] |= 1 << (mif % 32);
    }

    #[cfg(test)]
    fn contains(&self, mif: u16) -> bool {
        self.ifs_bits[usize::from(mif / 32)] & (1 << (mif % 32)) != 0
    }
}

/// `struct mf6cctl`: one forwarding cache entry.
#[repr(C)]
#[derive(Clone, Copy)]
struct Mf6cctl {
    mf6cc_origin: libc::sockaddr_in6,
    mf6cc_mcastgrp: libc::sockaddr_in6,
    mf6cc_parent: u16,
    mf6cc_ifset: IfSet,
}

/// `struct mrt6msg`: kernel-to-userspace upcall.
#[repr(C)]
#[derive(Clone, Copy)]
struct Mrt6msg {
    im6_mbz: u8,
    im6_msgtype: u8,
    im6_mif: u16,
    im6_pad: u32,
    im6_src: libc::in6_addr,
    im6_dst: libc::in6_addr,
}

/// `struct sioc_sg_req6`: per-(S,G) counter query.
#[repr(C)]
#[derive(Clone, Copy)]
struct SiocSgReq6 {
    src: libc::sockaddr_in6,
    grp: libc::sockaddr_in6,
    pktcnt: libc::c_ulong,
    bytecnt: libc::c_ulong,
    wrong_if: libc::c_ulong,
}

/// `struct icmp6_filter` with every message type blocked. The socket exists
/// for MRT6 upcalls only; ordinary ICMPv6 input is unwanted.
#[repr(C)]
#[derive(Clone, Copy)]
struct Icmp6FilterBlockAll {
    icmp6_filt: [u32; 8],
}

impl Icmp6FilterBlockAll {
    fn new() -> Self {
        Self {
            icmp6_filt: [u32::MAX; 8],
        }
    }
}

fn sockaddr_in6(addr: &Ip6Address) -> libc::sockaddr_in6 {
    libc::sockaddr_in6 {
        sin6_family: libc::AF_INET6 as libc::sa_family_t,
        sin6_port: 0,
        sin6_flowinfo: 0,
        sin6_addr: libc::in6_addr {
            s6_addr: addr.octets(),
        },
        sin6_scope_id: 0,
    }
}

fn setsockopt_raw<T>(fd: RawFd, level: libc::c_int, optname: libc::c_int, value: &T) -> Result<(), Errno> {
    // SAFETY: `value` points to a live, correctly sized option struct and the
    // kernel copies it before setsockopt returns.
    let res = unsafe {
        libc::setsockopt(
            fd,
            level,
            optname,
            value as *const T as *const libc::c_void,
            mem::size_of::<T>() as libc::socklen_t,
        )
    };
    Errno::result(res).map(drop)
}

// ============================================================================
// Router socket abstraction
// ============================================================================

/// One kernel `MRT6MSG_NOCACHE` record: a datagram arrived on `iif` for
/// which the kernel has no forwarding cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upcall {
    pub src: Ip6Address,
    pub group: Ip6Address,
    pub iif: MifIndex,
}

/// Per-route counters as reported by `SIOCGETSGCNT_IN6`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SgCounters {
    pub pktcnt: u64,
    pub bytecnt: u64,
    pub wrong_if: u64,
}

/// What a successful [`RouterSocket::delete_mfc`] actually did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The kernel confirmed the entry and removed it.
    #[default]
    Deleted,
    /// The kernel reported `ENOENT`: the entry was already gone. Treated
    /// as success, logged at debug by the caller.
    NotFound,
}

/// The kernel interface the routing manager is written against.
///
/// The production implementation is [`MulticastRouterSock`]; tests drive the
/// manager with a recording fake.
pub trait RouterSocket: Sized {
    /// Open the routing socket and register the Thread interface as MIF 0
    /// and the backbone interface as MIF 1. On any failure nothing is left
    /// behind: the socket closes and the kernel drops the MRT6 state.
    fn open(thread_ifname: &str, backbone_ifname: &str) -> Result<Self, RoutingError>;

    /// Install (or overwrite) a forwarding cache entry. `oif == None`
    /// installs a block entry with an empty output set.
    fn install_mfc(
        &self,
        src: &Ip6Address,
        group: &Ip6Address,
        iif: MifIndex,
        oif: MifIndex,
    ) -> Result<(), RoutingError>;

    /// Remove a forwarding cache entry. Deleting an entry the kernel no
    /// longer has is success, reported as [`DeleteOutcome::NotFound`].
    fn delete_mfc(
        &self,
        src: &Ip6Address,
        group: &Ip6Address,
        iif: MifIndex,
    ) -> Result<DeleteOutcome, RoutingError>;

    /// Read the kernel's packet/byte/wrong-interface counters for a route.
    fn query_counters(
        &self,
        src: &Ip6Address,
        group: &Ip6Address,
    ) -> Result<SgCounters, RoutingError>;

    /// Read one message from the socket. Returns the decoded record for a
    /// `NOCACHE` upcall and `None` for anything else.
    fn recv_upcall(&mut self) -> Result<Option<Upcall>, RoutingError>;

    /// File descriptor for the select loop.
    fn raw_fd(&self) -> RawFd;
}

/// The real kernel-backed router socket.
pub struct MulticastRouterSock {
    fd: OwnedFd,
}

impl MulticastRouterSock {
    fn add_mif(&self, mifi: u16, ifname: &str) -> Result<(), Errno> {
        let ifindex = if_nametoindex(ifname)?;
        let mif = Mif6ctl {
            mif6c_mifi: mifi,
            mif6c_flags: 0,
            vifc_threshold: 1,
            mif6c_pifi: u16::try_from(ifindex).map_err(|_| Errno::EINVAL)?,
            vifc_rate_limit: 0,
        };
        setsockopt_raw(self.fd.as_raw_fd(), libc::IPPROTO_IPV6, MRT6_ADD_MIF, &mif)
    }

    fn mfc_request(src: &Ip6Address, group: &Ip6Address, iif: MifIndex, oif: MifIndex) -> Mf6cctl {
        let mut ifset = IfSet::default();
        if oif != MifIndex::None {
            ifset.set(oif as u16);
        }
        Mf6cctl {
            mf6cc_origin: sockaddr_in6(src),
            mf6cc_mcastgrp: sockaddr_in6(group),
            mf6cc_parent: iif as u16,
            mf6cc_ifset: ifset,
        }
    }
}

impl RouterSocket for MulticastRouterSock {
    fn open(thread_ifname: &str, backbone_ifname: &str) -> Result<Self, RoutingError> {
        let socket = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6))
            .map_err(|e| Errno::from_i32(e.raw_os_error().unwrap_or(libc::EIO)))?;
        let sock = Self {
            fd: OwnedFd::from(socket),
        };

        // Become the kernel's multicast routing daemon for this table. An
        // early return below closes the socket, which undoes everything.
        let one: libc::c_int = 1;
        setsockopt_raw(sock.raw_fd(), libc::IPPROTO_IPV6, MRT6_INIT, &one)?;

        setsockopt_raw(
            sock.raw_fd(),
            libc::IPPROTO_ICMPV6,
            ICMP6_FILTER,
            &Icmp6FilterBlockAll::new(),
        )?;

        sock.add_mif(MifIndex::Thread as u16, thread_ifname)?;
        sock.add_mif(MifIndex::Backbone as u16, backbone_ifname)?;

        Ok(sock)
    }

    fn install_mfc(
        &self,
        src: &Ip6Address,
        group: &Ip6Address,
        iif: MifIndex,
        oif: MifIndex,
    ) -> Result<(), RoutingError> {
        let req = Self::mfc_request(src, group, iif, oif);
        setsockopt_raw(self.fd.as_raw_fd(), libc::IPPROTO_IPV6, MRT6_ADD_MFC, &req)?;
        Ok(())
    }

    fn delete_mfc(
        &self,
        src: &Ip6Address,
        group: &Ip6Address,
        iif: MifIndex,
    ) -> Result<DeleteOutcome, RoutingError> {
        let req = Self::mfc_request(src, group, iif, MifIndex::None);
        match setsockopt_raw(self.fd.as_raw_fd(), libc::IPPROTO_IPV6, MRT6_DEL_MFC, &req) {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(Errno::ENOENT) => Ok(DeleteOutcome::NotFound),
            Err(errno) => Err(errno.into()),
        }
    }

    fn query_counters(
        &self,
        src: &Ip6Address,
        group: &Ip6Address,
    ) -> Result<SgCounters, RoutingError> {
        let mut req = SiocSgReq6 {
            src: sockaddr_in6(src),
            grp: sockaddr_in6(group),
            pktcnt: 0,
            bytecnt: 0,
            wrong_if: 0,
        };
        // SAFETY: `req` is a correctly laid out sioc_sg_req6 and outlives
        // the call; the kernel fills the counter fields in place.
        let res = unsafe { libc::ioctl(self.fd.as_raw_fd(), SIOCGETSGCNT_IN6, &mut req) };
        Errno::result(res)?;
        Ok(SgCounters {
            pktcnt: req.pktcnt as u64,
            bytecnt: req.bytecnt as u64,
            wrong_if: req.wrong_if as u64,
        })
    }

    fn recv_upcall(&mut self) -> Result<Option<Upcall>, RoutingError> {
        let mut buf = [0u8; 128];
        let len = unistd::read(self.fd.as_raw_fd(), &mut buf)?;
        Ok(parse_upcall(&buf[..len]))
    }

    fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Decode one routing-socket message, keeping only `NOCACHE` records.
fn parse_upcall(buf: &[u8]) -> Option<Upcall> {
    if buf.len() < mem::size_of::<Mrt6msg>() {
        return None;
    }
    // SAFETY: the length check above guarantees the buffer covers an
    // Mrt6msg; every bit pattern is a valid value for its fields.
    let msg: Mrt6msg = unsafe { std::ptr::read_unaligned(buf.as_ptr() as *const Mrt6msg) };

    if msg.im6_mbz != 0 || msg.im6_msgtype != MRT6MSG_NOCACHE {
        return None;
    }

    Some(Upcall {
        src: Ip6Address::new(msg.im6_src.s6_addr),
        group: Ip6Address::new(msg.im6_dst.s6_addr),
        iif: MifIndex::from_mif(msg.im6_mif),
    })
}
