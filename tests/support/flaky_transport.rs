//! Loopback-backed `Transport` wrapper with targeted fault injection.
//!
//! Important: this file lives under `tests/support/` so it is **not**
//! compiled as a standalone integration test target.

use pldm_pdr::transport::{LoopbackTransport, Transport};
use pldm_pdr::{PdrError, PdrResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Fault-injection configuration for transport exchanges.
#[derive(Default)]
pub struct FaultConfig {
    /// Fail the nth (1-based) exchange of a given command with a
    /// transport error.
    pub fail_command: Option<(u8, usize)>,
    /// Exchanges seen so far, per command.
    pub calls: HashMap<u8, usize>,
}

impl FaultConfig {
    /// Exchanges seen for `command`.
    pub fn calls_for(&self, command: u8) -> usize {
        self.calls.get(&command).copied().unwrap_or(0)
    }
}

/// A loopback transport wrapper that counts exchanges and can fail a
/// chosen one, simulating a remote that drops off mid-sync.
pub struct FlakyTransport {
    inner: LoopbackTransport,
    cfg: Arc<Mutex<FaultConfig>>,
}

impl FlakyTransport {
    /// Wrap an existing loopback.
    pub fn new(inner: LoopbackTransport) -> Self {
        Self {
            inner,
            cfg: Arc::new(Mutex::new(FaultConfig::default())),
        }
    }

    /// Access the shared fault config (for arming failpoints and
    /// reading counters).
    pub fn cfg(&self) -> Arc<Mutex<FaultConfig>> {
        self.cfg.clone()
    }
}

impl Transport for FlakyTransport {
    fn send_recv(
        &self,
        eid: u8,
        pldm_type: u8,
        command: u8,
        request: &[u8],
        response: &mut [u8],
    ) -> PdrResult<usize> {
        {
            let mut cfg = self.cfg.lock().unwrap();
            let count = cfg.calls.entry(command).or_insert(0);
            *count += 1;
            let nth = *count;
            if cfg.fail_command == Some((command, nth)) {
                return Err(PdrError::Transport("injected transport failure".into()));
            }
        }
        self.inner.send_recv(eid, pldm_type, command, request, response)
    }
}
