// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Forwarding policy: which output MIF a cache-miss gets.
//!
//! | iif      | condition               | oif            |
//! |----------|-------------------------|----------------|
//! | Backbone | group registered by MLR | Thread         |
//! | Backbone | otherwise               | None (block)   |
//! | Thread   | scope > realm-local     | Backbone       |
//! | Thread   | otherwise               | None (block)   |
//!
//! Thread-originated traffic stays inside the realm unless its scope is
//! administratively wider; backbone traffic enters the mesh only for groups
//! a Thread listener registered. Block entries are negative cache: the
//! kernel drops matching packets instead of raising an upcall per packet.

use crate::ip6::{scope, Ip6Address};
use crate::mroute::{ListenerSet, MifIndex};
use crate::RoutingError;

/// Compute the output MIF for traffic arriving on `iif` for `group`.
///
/// Returns `InvalidArgs` when `iif` is not one of the two registered MIFs,
/// which happens if the kernel reports an upcall for a MIF this manager
/// never added.
pub fn forward_mif(
    iif: MifIndex,
    group: &Ip6Address,
    listeners: &ListenerSet,
) -> Result<MifIndex, RoutingError> {
    match iif {
        MifIndex::Backbone => {
            if listeners.contains(group) {
                Ok(MifIndex::Thread)
            } else {
                Ok(MifIndex::None)
            }
        }
        MifIndex::Thread => {
            if group.scope() > scope::REALM_LOCAL {
                Ok(MifIndex::Backbone)
            } else {
                Ok(MifIndex::None)
            }
        }
        MifIndex::None => Err(RoutingError::InvalidArgs),
    }
}
