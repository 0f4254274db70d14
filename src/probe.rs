//! Instrumentation hook around resolver passes.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

/// Observes resolver passes.
///
/// Implementations must be cheap. A panic inside a probe is caught and
/// discarded so it cannot disturb delivery.
pub trait DispatchProbe: Send + Sync {
    /// Called before a resolver pass starts walking the pending table.
    fn begin_dispatch(&self);

    /// Called after the pass has invoked `count` listeners.
    fn end_dispatch(&self, label: &str, count: usize);
}

/// Probe that does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProbe;

impl DispatchProbe for NoopProbe {
    fn begin_dispatch(&self) {}

    fn end_dispatch(&self, _label: &str, _count: usize) {}
}

/// Probe that times each pass and reports it through `tracing`.
#[derive(Debug, Default)]
pub struct TracingProbe {
    started: Mutex<Option<Instant>>,
}

impl TracingProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DispatchProbe for TracingProbe {
    fn begin_dispatch(&self) {
        *self.started.lock() = Some(Instant::now());
    }

    fn end_dispatch(&self, label: &str, count: usize) {
        let elapsed = self.started.lock().take().map(|start| start.elapsed());
        if count == 0 {
            tracing::trace!(origin = label, "resolver pass delivered nothing");
            return;
        }
        tracing::debug!(
            origin = label,
            listeners = count,
            elapsed_us = elapsed.map(|e| e.as_micros() as u64).unwrap_or(0),
            "resolver pass complete"
        );
    }
}

/// Run a probe call, swallowing any panic.
pub(crate) fn guarded(stage: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!(stage, "dispatch probe panicked; ignoring");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PanickingProbe;

    impl DispatchProbe for PanickingProbe {
        fn begin_dispatch(&self) {
            panic!("probe failure");
        }

        fn end_dispatch(&self, _label: &str, _count: usize) {
            panic!("probe failure");
        }
    }

    #[test]
    fn test_guarded_swallows_panics() {
        let probe = PanickingProbe;
        guarded("begin", || probe.begin_dispatch());
        guarded("end", || probe.end_dispatch("store-1", 3));
    }

    #[test]
    fn test_tracing_probe_resets_timer() {
        let probe = TracingProbe::new();
        probe.begin_dispatch();
        assert!(probe.started.lock().is_some());
        probe.end_dispatch("store-1", 2);
        assert!(probe.started.lock().is_none());
    }
}
