//! Listener and subscription record types.

use crate::types::{Key, ListenerId, StoreId, Topic};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What changed, as seen by a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Changed<'a> {
    /// The store triggered without naming keys: treat everything as changed.
    All,
    /// The listed keys changed. Deduplicated, in first-trigger order.
    Keys(&'a [Key]),
}

impl<'a> Changed<'a> {
    pub fn keys(&self) -> Option<&'a [Key]> {
        match *self {
            Changed::All => None,
            Changed::Keys(keys) => Some(keys),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Changed::All)
    }

    /// True if `key` is covered by this change.
    pub fn contains(&self, key: &str) -> bool {
        match *self {
            Changed::All => true,
            Changed::Keys(keys) => keys.iter().any(|k| k.as_str() == key),
        }
    }

    /// Owned copy of the key names, `None` for [`Changed::All`].
    pub fn to_strings(&self) -> Option<Vec<String>> {
        self.keys()
            .map(|keys| keys.iter().map(|k| k.as_str().to_string()).collect())
    }
}

type ListenerFn = dyn Fn(Changed<'_>) + Send + Sync;

/// A callback that can be subscribed to one or more stores.
///
/// Cloning a listener keeps its identity: all clones share one pending entry,
/// so triggers reaching it through several subscriptions are merged into a
/// single invocation.
#[derive(Clone)]
pub struct Listener {
    id: ListenerId,
    callback: Arc<ListenerFn>,
}

impl Listener {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(Changed<'_>) + Send + Sync + 'static,
    {
        Self {
            id: ListenerId::generate(),
            callback: Arc::new(callback),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub(crate) fn invoke(&self, changed: Changed<'_>) {
        (self.callback)(changed)
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener").field(&self.id.0).finish()
    }
}

/// A subscription created by an embedding layer that discovers key usage
/// automatically (e.g. while rendering a component).
///
/// Removal is by identity of the `Arc`, never by value.
pub struct AutoSubscription {
    store: StoreId,
    listener: Listener,
    topic: Topic,
    /// Owned by the embedding layer; the dispatch engine never touches it.
    used: AtomicBool,
}

impl AutoSubscription {
    pub fn new(store: StoreId, listener: Listener, topic: impl Into<Topic>) -> Arc<Self> {
        Arc::new(Self {
            store,
            listener,
            topic: topic.into(),
            used: AtomicBool::new(true),
        })
    }

    pub fn store(&self) -> StoreId {
        self.store
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::Acquire)
    }

    pub fn set_used(&self, used: bool) {
        self.used.store(used, Ordering::Release);
    }
}

impl fmt::Debug for AutoSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoSubscription")
            .field("store", &self.store)
            .field("listener", &self.listener)
            .field("topic", &self.topic)
            .field("used", &self.is_used())
            .finish()
    }
}

/// Extension points fired when a store starts or stops tracking a key.
///
/// Called exactly once per transition: when the first subscription (explicit
/// or auto) for a key appears, and when the last one goes away. Never called
/// for [`Topic::All`].
pub trait TrackingHooks: Send + Sync {
    fn on_key_tracking_started(&self, _key: &Key) {}

    fn on_key_tracking_stopped(&self, _key: &Key) {}
}

/// Hooks that do nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHooks;

impl TrackingHooks for NoopHooks {}
