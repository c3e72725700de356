//! Memoized kernel support check for namespaced file capabilities.

use std::sync::atomic::{AtomicI8, Ordering};

const UNKNOWN: i8 = -1;
const UNSUPPORTED: i8 = 0;
const SUPPORTED: i8 = 1;

/// Tri-state cache of whether the kernel accepts VFS v3 file capabilities.
///
/// Concurrent first probes may both compute the answer; they store the same
/// value, so only the publish needs to be atomic.
#[derive(Debug)]
pub struct VfsCapsProbe {
    state: AtomicI8,
}

/// Process-wide probe used by the convenience shift functions.
pub static VFS3_FSCAPS: VfsCapsProbe = VfsCapsProbe::new();

impl VfsCapsProbe {
    /// Create a probe in the unknown state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicI8::new(UNKNOWN),
        }
    }

    /// The cached answer, if any.
    #[must_use]
    pub fn get(&self) -> Option<bool> {
        match self.state.load(Ordering::Acquire) {
            SUPPORTED => Some(true),
            UNSUPPORTED => Some(false),
            _ => None,
        }
    }

    /// Record an answer.
    pub fn set(&self, supported: bool) {
        let state = if supported { SUPPORTED } else { UNSUPPORTED };
        self.state.store(state, Ordering::Release);
    }

    /// Forget the cached answer.
    pub fn reset(&self) {
        self.state.store(UNKNOWN, Ordering::Release);
    }

    /// Return the cached answer, running `probe` once to compute it if unknown.
    pub fn resolve(&self, probe: impl FnOnce() -> bool) -> bool {
        if let Some(supported) = self.get() {
            return supported;
        }

        let supported = probe();
        tracing::debug!(supported, "Probed VFS v3 file capability support");
        self.set(supported);
        supported
    }
}

impl Default for VfsCapsProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn resolve_runs_probe_once() {
        let probe = VfsCapsProbe::new();
        let calls = Cell::new(0);

        assert!(probe.resolve(|| {
            calls.set(calls.get() + 1);
            true
        }));
        assert!(probe.resolve(|| unreachable!()));
        assert_eq!(calls.get(), 1);
        assert_eq!(probe.get(), Some(true));
    }

    #[test]
    fn reset_returns_to_unknown() {
        let probe = VfsCapsProbe::new();
        probe.set(false);
        assert_eq!(probe.get(), Some(false));
        probe.reset();
        assert_eq!(probe.get(), None);
        assert!(!probe.resolve(|| false));
    }
}
