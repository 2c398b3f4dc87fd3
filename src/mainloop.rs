// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Single-threaded select loop driving the routing backend.
//!
//! The backend contributes its file descriptors before each `select(2)`
//! round and consumes readiness afterwards. The loop wakes at least once a
//! second so a shutdown request is never stranded behind a quiet socket.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Context, Result};
use nix::errno::Errno;
use nix::sys::select::{select, FdSet};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::time::{TimeVal, TimeValLike};

use crate::backend::MulticastRouting;
use crate::logging::{Facility, Logger};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_shutdown_signal(_signo: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Ask the running loop to exit after the current round.
pub fn request_shutdown() {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() -> Result<(), Errno> {
    let action = SigAction::new(
        SigHandler::Handler(handle_shutdown_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // SAFETY: the handler only performs an atomic store, which is
    // async-signal-safe.
    unsafe {
        sigaction(Signal::SIGINT, &action)?;
        sigaction(Signal::SIGTERM, &action)?;
    }
    Ok(())
}

/// Enable the backend and run the select loop until SIGINT/SIGTERM.
///
/// The backend is disabled on the way out, releasing the routing socket and
/// the kernel forwarding state with it.
pub fn run(backend: &mut dyn MulticastRouting, logger: &Logger) -> Result<()> {
    install_signal_handlers().context("failed to install signal handlers")?;

    backend
        .enable()
        .context("failed to enable multicast routing")?;
    logger.info(Facility::Agent, "multicast routing enabled");

    while !SHUTDOWN.load(Ordering::SeqCst) {
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

        match select(
            max_fd + 1,
            &mut read_fds,
            &mut write_fds,
            &mut error_fds,
            &mut timeout,
        ) {
            Ok(0) => continue,
            Ok(_) => backend.process(&read_fds, &write_fds, &error_fds),
            Err(Errno::EINTR) => continue,
            Err(errno) => bail!("select failed: {}", errno),
        }
    }

    logger.info(Facility::Agent, "shutting down");
    backend.disable();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip6::Ip6Address;
    use crate::logging::{CaptureSink, Severity};
    use crate::RoutingError;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingBackend {
        enabled: bool,
        disabled: bool,
    }

    impl MulticastRouting for RecordingBackend {
        fn enable(&mut self) -> Result<(), RoutingError> {
            self.enabled = true;
            Ok(())
        }

        fn disable(&mut self) {
            self.disabled = true;
        }

        fn add(&mut self, _group: Ip6Address) {}

        fn remove(&mut self, _group: Ip6Address) {}

        fn update_fd_set(
            &self,
            _read_fds: &mut FdSet,
            _write_fds: &mut FdSet,
            _error_fds: &mut FdSet,
            _max_fd: &mut RawFd,
            _timeout: &mut TimeVal,
        ) {
        }

        fn process(&mut self, _read_fds: &FdSet, _write_fds: &FdSet, _error_fds: &FdSet) {}
    }

    #[test]
    fn test_run_enables_and_disables_backend() {
        let logger = Logger::new(Arc::new(CaptureSink::new()), Severity::Debug);
        let mut backend = RecordingBackend::default();

        // A pre-requested shutdown makes run() return after one check.
        request_shutdown();
        run(&mut backend, &logger).unwrap();

        assert!(backend.enabled);
        assert!(backend.disabled);
        SHUTDOWN.store(false, Ordering::SeqCst);
    }
}
