//! Shared dispatch state: the pending table, the resolver, the trigger-block
//! stack and the throttle switch.
//!
//! Every [`Store`](crate::Store) is bound to one `DispatchContext`. Stores on
//! the same context share pending deliveries (a listener subscribed to two
//! stores is invoked once per pass) and are paused together by trigger blocks.

use crate::config::DispatchConfig;
use crate::error::{DispatchError, Result};
use crate::pending::{PendingKeys, PendingTable};
use crate::probe::{self, DispatchProbe, TracingProbe};
use crate::scheduler::{Scheduler, ThreadScheduler};
use crate::subscriptions::{Changed, Listener};
use crate::types::{ListenerId, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, trace};

/// Mutable state shared by every store on a context.
struct SharedState {
    pending: PendingTable,
    /// Listeners taken from the table by the running pass but not yet invoked.
    in_flight: HashSet<ListenerId>,
    /// A resolver pass is running.
    busy: bool,
    /// Someone asked for a pass while one was running.
    rerun: bool,
    block_depth: usize,
    /// Throttling disabled: deliver entries regardless of due time.
    throttle_bypass: bool,
}

struct ContextInner {
    state: Mutex<SharedState>,
    config: DispatchConfig,
    scheduler: Arc<dyn Scheduler>,
    probe: Arc<dyn DispatchProbe>,
}

/// Point-in-time view of a context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Listeners with a queued delivery.
    pub pending: usize,
    pub block_depth: usize,
    pub throttling_enabled: bool,
    /// A resolver pass is currently running.
    pub resolving: bool,
}

/// Handle to shared dispatch state. Cheap to clone.
#[derive(Clone)]
pub struct DispatchContext {
    inner: Arc<ContextInner>,
}

impl DispatchContext {
    /// Context with wall-clock timers and `tracing` instrumentation.
    pub fn new(config: DispatchConfig) -> Self {
        Self::with_scheduler(config, Arc::new(ThreadScheduler::new()))
    }

    /// Context driven by a custom scheduler (e.g. a `ManualScheduler`).
    pub fn with_scheduler(config: DispatchConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        Self::with_parts(config, scheduler, Arc::new(TracingProbe::new()))
    }

    pub fn with_parts(
        config: DispatchConfig,
        scheduler: Arc<dyn Scheduler>,
        probe: Arc<dyn DispatchProbe>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                state: Mutex::new(SharedState {
                    pending: PendingTable::new(),
                    in_flight: HashSet::new(),
                    busy: false,
                    rerun: false,
                    block_depth: 0,
                    throttle_bypass: false,
                }),
                config,
                scheduler,
                probe,
            }),
        }
    }

    /// The process-wide context, created with default configuration on first use.
    pub fn global() -> &'static DispatchContext {
        static GLOBAL: OnceLock<DispatchContext> = OnceLock::new();
        GLOBAL.get_or_init(|| DispatchContext::new(DispatchConfig::default()))
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.inner.scheduler
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.inner.scheduler.now()
    }

    /// True if both handles refer to the same shared state.
    pub fn same_context(&self, other: &DispatchContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // --- Pending Table ---

    /// Queue a batch of deliveries under one lock.
    pub(crate) fn enqueue(
        &self,
        batch: Vec<(Listener, PendingKeys)>,
        due: Option<Timestamp>,
        bypass_block: bool,
    ) {
        let mut state = self.inner.state.lock();
        for (listener, keys) in batch {
            state.pending.merge(&listener, keys, due, bypass_block);
        }
    }

    /// Forget any queued or in-flight delivery for `id`.
    pub(crate) fn purge(&self, id: ListenerId) {
        let mut state = self.inner.state.lock();
        let queued = state.pending.purge(id);
        let in_flight = state.in_flight.remove(&id);
        if queued || in_flight {
            trace!(listener = id.0, "purged pending delivery");
        }
    }

    // --- Resolver ---

    /// Deliver every pending entry that is neither blocked nor throttled.
    ///
    /// If a pass is already running (a listener triggered from inside its
    /// callback, or a timer fired on another thread) this only records the
    /// request; the running pass does one more sweep before returning.
    pub fn resolve_pending(&self, origin: &str) {
        {
            let mut state = self.inner.state.lock();
            if state.busy {
                state.rerun = true;
                trace!(origin, "resolver busy, deferring");
                return;
            }
            state.busy = true;
        }

        let mut guard = BusyGuard {
            state: &self.inner.state,
            armed: true,
        };
        loop {
            self.run_pass(origin);

            let mut state = self.inner.state.lock();
            if state.rerun {
                state.rerun = false;
                continue;
            }
            state.busy = false;
            break;
        }
        guard.armed = false;
    }

    fn run_pass(&self, origin: &str) {
        let probe = &self.inner.probe;
        probe::guarded("begin_dispatch", || probe.begin_dispatch());

        let now = self.now();
        let ready = {
            let mut state = self.inner.state.lock();
            let blocked = state.block_depth > 0;
            let ignore_throttle = state.throttle_bypass;
            let ready = state.pending.take_ready(now, blocked, ignore_throttle);
            state
                .in_flight
                .extend(ready.iter().map(|entry| entry.listener.id()));
            ready
        };

        let mut delivered = 0;
        for entry in ready {
            let id = entry.listener.id();
            // Unsubscribed by an earlier callback in this pass.
            if !self.inner.state.lock().in_flight.remove(&id) {
                continue;
            }

            match entry.keys.deduplicated() {
                None => entry.listener.invoke(Changed::All),
                Some(keys) => entry.listener.invoke(Changed::Keys(&keys)),
            }
            delivered += 1;
        }

        probe::guarded("end_dispatch", || probe.end_dispatch(origin, delivered));
    }

    // --- Trigger Blocks ---

    /// Pause delivery for every non-bypassing store on this context.
    ///
    /// Blocks nest; delivery resumes when every push has been popped.
    pub fn push_trigger_block(&self) {
        let mut state = self.inner.state.lock();
        state.block_depth += 1;
        debug!(depth = state.block_depth, "trigger block pushed");
    }

    /// Undo one [`push_trigger_block`](Self::push_trigger_block). Popping the
    /// last block flushes everything that queued up meanwhile.
    pub fn pop_trigger_block(&self) -> Result<()> {
        let depth = {
            let mut state = self.inner.state.lock();
            if state.block_depth == 0 {
                error!("trigger block stack popped below zero");
                return Err(DispatchError::ImbalancedBlockStack);
            }
            state.block_depth -= 1;
            state.block_depth
        };

        debug!(depth, "trigger block popped");
        if depth == 0 {
            self.resolve_pending("trigger-block");
        }
        Ok(())
    }

    /// Push a trigger block that pops itself when the guard drops.
    #[must_use = "the block is released as soon as the guard is dropped"]
    pub fn block(&self) -> TriggerBlockGuard {
        self.push_trigger_block();
        TriggerBlockGuard {
            context: self.clone(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.inner.state.lock().block_depth > 0
    }

    pub fn block_depth(&self) -> usize {
        self.inner.state.lock().block_depth
    }

    // --- Throttle Switch ---

    /// Enable or disable throttling for every store on this context.
    ///
    /// Disabling delivers everything queued right away, due or not.
    /// Re-enabling applies from the next resolver pass.
    pub fn set_throttle_status(&self, enabled: bool) {
        self.inner.state.lock().throttle_bypass = !enabled;
        debug!(enabled, "throttle status changed");
        self.resolve_pending("throttle-status");
    }

    pub fn is_throttling_enabled(&self) -> bool {
        !self.inner.state.lock().throttle_bypass
    }

    // --- Diagnostics ---

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn stats(&self) -> DispatchStats {
        let state = self.inner.state.lock();
        DispatchStats {
            pending: state.pending.len(),
            block_depth: state.block_depth,
            throttling_enabled: !state.throttle_bypass,
            resolving: state.busy,
        }
    }
}

impl std::fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchContext")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Releases the busy flag if a listener panics mid-pass.
struct BusyGuard<'a> {
    state: &'a Mutex<SharedState>,
    armed: bool,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.lock();
            state.busy = false;
            state.rerun = false;
            state.in_flight.clear();
        }
    }
}

/// RAII trigger block from [`DispatchContext::block`].
pub struct TriggerBlockGuard {
    context: DispatchContext,
}

impl Drop for TriggerBlockGuard {
    fn drop(&mut self) {
        if let Err(err) = self.context.pop_trigger_block() {
            error!(%err, "trigger block guard released an unbalanced stack");
        }
    }
}
