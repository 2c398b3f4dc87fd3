// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging facilities (component identifiers)

use serde::{Deserialize, Serialize};

/// Logging facility - identifies which component generated the log message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Facility {
    /// Daemon startup, configuration, main loop
    Agent = 0,
    /// Kernel-direct multicast routing manager
    MulticastRouting = 1,
    /// smcroutectl-based routing backend
    Smcroute = 2,
    /// Socket and interface operations
    Network = 3,
    /// Test harness and fixtures
    Test = 4,
}

impl Facility {
    /// Get facility name as static string
    pub const fn as_str(self) -> &'static str {
        match self {
            Facility::Agent => "Agent",
            Facility::MulticastRouting => "MulticastRouting",
            Facility::Smcroute => "Smcroute",
            Facility::Network => "Network",
            Facility::Test => "Test",
        }
    }
}

impl std::fmt::Display for Facility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
