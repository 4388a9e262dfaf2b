// MIT License - Copyright (c) 2026 Peter Wright
// Process-wide appliance access gate

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Exclusive access to the appliance wire.
///
/// The appliance accepts one logical session at a time, so every controller
/// in the process shares one gate (see [`ConnectionGate::global`]). A
/// transaction holds the [`GateGuard`] from before connect until after close;
/// dropping the guard is the release, so it happens on every exit path.
///
/// Not reentrant: acquiring twice from the same task deadlocks.
#[derive(Debug, Clone)]
pub struct ConnectionGate {
    inner: Arc<GateInner>,
}

#[derive(Debug)]
struct GateInner {
    lock: Arc<Mutex<()>>,
    acquired: AtomicU64,
    released: AtomicU64,
}

static GLOBAL_GATE: OnceLock<ConnectionGate> = OnceLock::new();

impl ConnectionGate {
    /// A fresh, independent gate. Use [`ConnectionGate::global`] unless
    /// controllers really talk to different wires.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GateInner {
                lock: Arc::new(Mutex::new(())),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        }
    }

    /// The gate shared by every controller in this process.
    pub fn global() -> Self {
        GLOBAL_GATE.get_or_init(ConnectionGate::new).clone()
    }

    /// Wait until no one else holds the gate.
    pub async fn acquire(&self) -> GateGuard {
        let permit = self.inner.lock.clone().lock_owned().await;
        let n = self.inner.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        trace!("Gate acquired (#{})", n);
        GateGuard {
            _permit: permit,
            inner: self.inner.clone(),
        }
    }

    /// Whether some transaction currently holds the gate.
    pub fn is_held(&self) -> bool {
        self.inner.lock.try_lock().is_err()
    }

    /// Total successful acquisitions.
    pub fn acquisitions(&self) -> u64 {
        self.inner.acquired.load(Ordering::SeqCst)
    }

    /// Total releases. Equals [`acquisitions`](Self::acquisitions) whenever
    /// the gate is idle.
    pub fn releases(&self) -> u64 {
        self.inner.released.load(Ordering::SeqCst)
    }
}

impl Default for ConnectionGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of exclusive access; releases on drop.
#[derive(Debug)]
pub struct GateGuard {
    _permit: OwnedMutexGuard<()>,
    inner: Arc<GateInner>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        let n = self.inner.released.fetch_add(1, Ordering::SeqCst) + 1;
        trace!("Gate released (#{})", n);
    }
}
