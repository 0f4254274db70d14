//! Main Store struct: a publisher of keyed change notifications.

use crate::config::StoreOptions;
use crate::context::DispatchContext;
use crate::error::{DispatchError, Result};
use crate::pending::PendingKeys;
use crate::scheduler::TimerHandle;
use crate::subscriptions::{AutoSubscription, Listener, NoopHooks, Registry, TrackingHooks};
use crate::types::{Key, StoreId, SubscriptionToken, Timestamp, Topic};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error};

/// An open throttle window: triggers inside it share one due time.
struct ThrottleWindow {
    until: Timestamp,
    _timer: TimerHandle,
}

struct StoreInner {
    id: StoreId,
    label: String,
    options: StoreOptions,
    context: DispatchContext,
    registry: Mutex<Registry>,
    /// Lock order: `throttle`, then `registry`, then the context state.
    throttle: Mutex<Option<ThrottleWindow>>,
    hooks: Arc<dyn TrackingHooks>,
}

/// A publisher of change notifications.
///
/// Listeners subscribe to keys (or to [`Topic::All`]); the store calls
/// [`trigger`](Store::trigger) when keys change. Deliveries are merged per
/// listener across every store on the same [`DispatchContext`], optionally
/// delayed by a throttle window, and held back while trigger blocks are
/// pushed.
///
/// Cloning a `Store` yields another handle to the same store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Create a store with default options.
    pub fn new(context: &DispatchContext) -> Self {
        Self::with_options(context, StoreOptions::default())
    }

    pub fn with_options(context: &DispatchContext, options: StoreOptions) -> Self {
        Self::with_hooks(context, options, Arc::new(NoopHooks))
    }

    /// Create a store whose tracking hooks notify an embedding layer.
    pub fn with_hooks(
        context: &DispatchContext,
        options: StoreOptions,
        hooks: Arc<dyn TrackingHooks>,
    ) -> Self {
        let id = StoreId::generate();
        let label = options.label.clone().unwrap_or_else(|| id.to_string());

        Self {
            inner: Arc::new(StoreInner {
                id,
                label,
                options,
                context: context.clone(),
                registry: Mutex::new(Registry::new()),
                throttle: Mutex::new(None),
                hooks,
            }),
        }
    }

    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn options(&self) -> &StoreOptions {
        &self.inner.options
    }

    pub fn context(&self) -> &DispatchContext {
        &self.inner.context
    }

    // --- Subscriptions ---

    /// Subscribe `listener` to `topic`. Numeric keys are stringified.
    ///
    /// Fails with [`DispatchError::InvalidKey`] for an empty key.
    pub fn subscribe(
        &self,
        listener: &Listener,
        topic: impl Into<Topic>,
    ) -> Result<SubscriptionToken> {
        let topic = topic.into();
        let (token, started) = self
            .inner
            .registry
            .lock()
            .subscribe(listener.clone(), topic)
            .inspect_err(|err| error!(store = %self.inner.label, %err, "subscribe failed"))?;

        if let Some(key) = started {
            self.inner.hooks.on_key_tracking_started(&key);
        }
        Ok(token)
    }

    /// Subscribe `listener` to every key of this store.
    pub fn subscribe_all(&self, listener: &Listener) -> Result<SubscriptionToken> {
        self.subscribe(listener, Topic::All)
    }

    /// Remove a subscription.
    ///
    /// Any delivery already queued for the listener is dropped, even one the
    /// current resolver pass has not reached yet.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> Result<()> {
        let (listener, stopped) = self
            .inner
            .registry
            .lock()
            .unsubscribe(token)
            .inspect_err(|err| error!(store = %self.inner.label, %err, "unsubscribe failed"))?;

        self.inner.context.purge(listener.id());
        if let Some(key) = stopped {
            self.inner.hooks.on_key_tracking_stopped(&key);
        }
        Ok(())
    }

    /// Start tracking an auto-subscription created for this store.
    pub fn track_auto_subscription(&self, sub: &Arc<AutoSubscription>) -> Result<()> {
        if sub.store() != self.inner.id {
            let err = DispatchError::StoreMismatch {
                owner: sub.store(),
                store: self.inner.id,
            };
            error!(store = %self.inner.label, %err, "track auto-subscription failed");
            return Err(err);
        }

        let started = self
            .inner
            .registry
            .lock()
            .track_auto(Arc::clone(sub))
            .inspect_err(|err| {
                error!(store = %self.inner.label, %err, "track auto-subscription failed")
            })?;

        if let Some(key) = started {
            self.inner.hooks.on_key_tracking_started(&key);
        }
        Ok(())
    }

    /// Stop tracking an auto-subscription. The record must be the same `Arc`
    /// that was tracked.
    pub fn remove_auto_subscription(&self, sub: &Arc<AutoSubscription>) -> Result<()> {
        let stopped = self
            .inner
            .registry
            .lock()
            .remove_auto(sub)
            .inspect_err(|err| {
                error!(store = %self.inner.label, %err, "remove auto-subscription failed")
            })?;

        self.inner.context.purge(sub.listener().id());
        if let Some(key) = stopped {
            self.inner.hooks.on_key_tracking_stopped(&key);
        }
        Ok(())
    }

    /// Every topic with at least one explicit or auto subscription.
    pub fn subscription_keys(&self) -> HashSet<Topic> {
        self.inner.registry.lock().topics()
    }

    pub fn is_tracking_key(&self, topic: impl Into<Topic>) -> bool {
        self.inner.registry.lock().is_tracking(&topic.into())
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    // --- Triggers ---

    /// Notify every listener that everything in this store changed.
    ///
    /// Listeners receive [`Changed::All`](crate::Changed::All).
    pub fn trigger_all(&self) {
        self.dispatch(None);
    }

    /// Notify listeners that `key` changed.
    pub fn trigger(&self, key: impl Into<Key>) {
        self.dispatch(Some(vec![key.into()]));
    }

    /// Notify listeners that each of `keys` changed.
    ///
    /// Key-specific listeners get the keys they subscribed to; listeners on
    /// [`Topic::All`] get the whole list in the order given. An empty list is
    /// a no-op.
    pub fn trigger_keys<I, K>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let keys: Vec<Key> = keys.into_iter().map(Into::into).collect();
        if keys.is_empty() {
            debug!(store = %self.inner.label, "ignoring trigger with no keys");
            return;
        }
        self.dispatch(Some(keys));
    }

    /// True while a throttle window is open for this store.
    pub fn is_throttling(&self) -> bool {
        self.inner.throttle.lock().is_some()
    }

    fn dispatch(&self, keys: Option<Vec<Key>>) {
        let inner = &self.inner;
        let bypass = inner.options.bypass_trigger_blocks;

        // Held until the batch is queued so the timer cannot fire in between.
        let mut window = inner.throttle.lock();
        let due = inner
            .throttle_delay()
            .map(|delay| self.open_window(&mut window, delay));

        let batch = {
            let registry = inner.registry.lock();
            match &keys {
                None => registry
                    .all_listeners()
                    .into_iter()
                    .map(|listener| (listener, PendingKeys::All))
                    .collect::<Vec<_>>(),
                Some(keys) => {
                    let mut batch = Vec::new();
                    for key in keys {
                        let topic = Topic::Key(key.clone());
                        for listener in registry.listeners_for(&topic) {
                            batch.push((listener, PendingKeys::Keys(vec![key.clone()])));
                        }
                    }
                    for listener in registry.listeners_for(&Topic::All) {
                        batch.push((listener, PendingKeys::Keys(keys.clone())));
                    }
                    batch
                }
            }
        };

        debug!(
            store = %inner.label,
            keys = keys.as_ref().map_or(0, Vec::len),
            all = keys.is_none(),
            listeners = batch.len(),
            ?due,
            "trigger"
        );

        inner.context.enqueue(batch, due, bypass);
        drop(window);

        if due.is_none() || bypass {
            inner.context.resolve_pending(&inner.label);
        }
    }

    /// Due time for a trigger under `delay`: the open window's, or a new one.
    fn open_window(&self, window: &mut Option<ThrottleWindow>, delay: Duration) -> Timestamp {
        if let Some(open) = window.as_ref() {
            return open.until;
        }

        let context = &self.inner.context;
        let until = context.now().saturating_add(delay);

        let store: Weak<StoreInner> = Arc::downgrade(&self.inner);
        let fire_context = context.clone();
        let label = self.inner.label.clone();
        let timer = context.scheduler().schedule_once(
            delay,
            Box::new(move || {
                if let Some(store) = store.upgrade() {
                    store.throttle.lock().take();
                }
                fire_context.resolve_pending(&label);
            }),
        );

        *window = Some(ThrottleWindow {
            until,
            _timer: timer,
        });
        until
    }
}

impl StoreInner {
    /// Store override, else the context default. Zero means no throttling.
    fn throttle_delay(&self) -> Option<Duration> {
        self.options
            .throttle
            .or(self.context.config().default_throttle)
            .filter(|delay| !delay.is_zero())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("options", &self.inner.options)
            .finish()
    }
}
