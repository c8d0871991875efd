//! Background link-recovery thread.
//!
//! The original driver's monitor task is torn down by force-killing the
//! OS thread. Rust has no safe equivalent, so this stands in a
//! cooperatively-stoppable `std::thread` instead: `Session::stop_supervisor`
//! flips a flag and wakes a condvar the supervisor is sleeping on, and
//! `Supervisor::drop` joins the thread so teardown is deterministic.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::debug;

use crate::error::{Result, VicpError};
use crate::session::Session;

/// Handle to a session's running link supervisor.
pub struct Supervisor {
    session: Arc<Session>,
    handle: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Spawn the supervisor thread. It calls `session.recover_link`
    /// repeatedly, re-initialising whenever the link is `Down` or
    /// `Unsupported`, sleeping `interval` between attempts.
    pub fn spawn(session: Arc<Session>, interval: Duration, timeout: Duration) -> Result<Self> {
        let worker = Arc::clone(&session);
        let handle = std::thread::Builder::new()
            .name(format!("vicp-supervisor-{}", session.get_ip()))
            .spawn(move || {
                debug!("{}: link supervisor started", worker.get_ip());
                if let Err(e) = worker.recover_link(Some(interval), timeout) {
                    debug!("{}: link supervisor exiting: {e}", worker.get_ip());
                }
            })
            .map_err(VicpError::OpenMontaskError)?;

        Ok(Self {
            session,
            handle: Some(handle),
        })
    }

    /// Ask the supervisor to stop and block until it has exited.
    pub fn stop(mut self) {
        self.session.stop_supervisor();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.session.stop_supervisor();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;

    #[test]
    fn supervisor_stops_promptly_on_drop() {
        let session = Arc::new(Session::new(SessionConfig {
            ip: "127.0.0.1".into(),
            ..SessionConfig::default()
        }));
        let supervisor = Supervisor::spawn(
            Arc::clone(&session),
            Duration::from_secs(30),
            Duration::from_secs(1),
        )
        .unwrap();

        let start = std::time::Instant::now();
        supervisor.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
