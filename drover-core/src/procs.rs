//! Registry of owned subprocesses
//!
//! Every subprocess the scheduler spawns is registered here by pid. On
//! cancellation the registry terminates everything it owns: SIGTERM first,
//! then SIGKILL for whatever survives the grace window. The protected set is
//! supplied by the caller (at minimum the orchestrator's own pid) and is
//! never signalled.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

/// Shared registry of subprocess pids owned by this run
#[derive(Debug, Clone)]
pub struct ProcessRegistry {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct Inner {
    /// pid -> label for diagnostics
    owned: HashMap<u32, String>,
    /// pids that must never be signalled
    protected: HashSet<u32>,
}

impl ProcessRegistry {
    /// Create a registry with an explicit protected-pid set
    pub fn new(protected: impl IntoIterator<Item = u32>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                owned: HashMap::new(),
                protected: protected.into_iter().collect(),
            })),
        }
    }

    /// Record a spawned subprocess
    pub fn register(&self, pid: u32, label: impl Into<String>) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        if inner.protected.contains(&pid) {
            warn!(pid, "refusing to register a protected pid");
            return;
        }
        inner.owned.insert(pid, label.into());
    }

    /// Forget a subprocess that exited on its own
    pub fn unregister(&self, pid: u32) {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .owned
            .remove(&pid);
    }

    /// Pids currently owned
    pub fn owned_pids(&self) -> Vec<u32> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .owned
            .keys()
            .copied()
            .collect()
    }

    /// Whether a pid is in the protected set
    pub fn is_protected(&self, pid: u32) -> bool {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .protected
            .contains(&pid)
    }

    /// Terminate every owned subprocess: SIGTERM, wait out the grace window,
    /// SIGKILL the survivors. Protected pids are skipped unconditionally.
    pub async fn terminate_all(&self, grace: Duration) {
        let victims: Vec<(u32, String)> = {
            let mut inner = self.inner.lock().expect("registry lock poisoned");
            let protected = inner.protected.clone();
            inner
                .owned
                .drain()
                .filter(|(pid, _)| !protected.contains(pid))
                .collect()
        };

        if victims.is_empty() {
            return;
        }

        for (pid, label) in &victims {
            debug!(pid, label = %label, "sending SIGTERM");
            signals::terminate(*pid);
        }

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if victims.iter().all(|(pid, _)| !signals::is_alive(*pid)) {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        for (pid, label) in &victims {
            if signals::is_alive(*pid) {
                warn!(pid, label = %label, "escalating to SIGKILL");
                signals::kill(*pid);
            }
        }
    }
}

#[cfg(unix)]
mod signals {
    use nix::sys::signal::{kill as send_signal, Signal};
    use nix::unistd::Pid;

    pub fn terminate(pid: u32) {
        let _ = send_signal(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }

    pub fn kill(pid: u32) {
        let _ = send_signal(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }

    pub fn is_alive(pid: u32) -> bool {
        match send_signal(Pid::from_raw(pid as i32), None) {
            Ok(_) => true,
            Err(nix::errno::Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

#[cfg(not(unix))]
mod signals {
    pub fn terminate(_pid: u32) {}

    pub fn kill(_pid: u32) {}

    pub fn is_alive(_pid: u32) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_unregister() {
        let registry = ProcessRegistry::new([]);
        registry.register(4242, "solver #10");
        assert_eq!(registry.owned_pids(), vec![4242]);

        registry.unregister(4242);
        assert!(registry.owned_pids().is_empty());
    }

    #[test]
    fn test_protected_pids_are_never_registered() {
        let own_pid = std::process::id();
        let registry = ProcessRegistry::new([own_pid]);
        assert!(registry.is_protected(own_pid));

        registry.register(own_pid, "self");
        assert!(registry.owned_pids().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_all_kills_owned_process() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id();

        let registry = ProcessRegistry::new([std::process::id()]);
        registry.register(pid, "sleeper");

        registry.terminate_all(Duration::from_secs(2)).await;
        assert!(registry.owned_pids().is_empty());

        // the sleeper must have died from the signal, not run to completion
        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_all_skips_protected() {
        let own_pid = std::process::id();
        let registry = ProcessRegistry::new([own_pid]);
        registry.terminate_all(Duration::from_millis(50)).await;
        // still alive to assert anything at all
        assert!(signals::is_alive(own_pid));
    }
}
