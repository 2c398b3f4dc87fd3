// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Facility/severity logging for the daemon.
//!
//! Every component logs through a cloneable [`Logger`] handle tagged with a
//! [`Facility`]. The handle filters by a runtime-adjustable severity
//! threshold and hands surviving entries to a [`LogSink`] (stderr in the
//! daemon, a capture buffer in tests).

mod facility;
mod logger;
mod severity;

pub use facility::Facility;
pub use logger::{CaptureSink, LogSink, Logger, StderrSink};
pub use severity::Severity;
