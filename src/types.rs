//! Core types for the dispatch engine.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A normalised subscription key.
///
/// Keys are plain strings. Numeric keys are converted to their decimal string
/// form at the boundary, so `Key::from(7)` and `Key::from("7")` are the same key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Arc<str>);

impl Key {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Key(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty keys are rejected by the registry.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:?})", &*self.0)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Key(Arc::from(key))
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Key(Arc::from(key))
    }
}

impl From<&String> for Key {
    fn from(key: &String) -> Self {
        Key(Arc::from(key.as_str()))
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

macro_rules! numeric_key {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Key {
                fn from(key: $ty) -> Self {
                    Key(Arc::from(key.to_string()))
                }
            }

            impl From<$ty> for Topic {
                fn from(key: $ty) -> Self {
                    Topic::Key(Key::from(key))
                }
            }
        )*
    };
}

numeric_key!(i32, i64, u32, u64, usize);

/// What a subscription listens to: one key, or every key of a store.
///
/// `All` is the reserved sentinel. It is a separate variant so it can never
/// collide with an application key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    All,
    Key(Key),
}

impl Topic {
    pub fn key(key: impl Into<Key>) -> Self {
        Topic::Key(key.into())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Topic::All)
    }

    pub fn as_key(&self) -> Option<&Key> {
        match self {
            Topic::All => None,
            Topic::Key(key) => Some(key),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::All => f.write_str("<all>"),
            Topic::Key(key) => write!(f, "{}", key),
        }
    }
}

impl From<Key> for Topic {
    fn from(key: Key) -> Self {
        Topic::Key(key)
    }
}

impl From<&Key> for Topic {
    fn from(key: &Key) -> Self {
        Topic::Key(key.clone())
    }
}

impl From<&str> for Topic {
    fn from(key: &str) -> Self {
        Topic::Key(Key::from(key))
    }
}

impl From<String> for Topic {
    fn from(key: String) -> Self {
        Topic::Key(Key::from(key))
    }
}

impl From<&String> for Topic {
    fn from(key: &String) -> Self {
        Topic::Key(Key::from(key))
    }
}

impl From<&Topic> for Topic {
    fn from(topic: &Topic) -> Self {
        topic.clone()
    }
}

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for a store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(pub u64);

impl StoreId {
    pub(crate) fn generate() -> Self {
        StoreId(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreId({})", self.0)
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store-{}", self.0)
    }
}

/// Process-unique identity of a listener. Clones of a listener share it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl ListenerId {
    pub(crate) fn generate() -> Self {
        ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerId({})", self.0)
    }
}

/// Identifies one explicit subscription on one store.
///
/// Tokens come from a per-store monotonic counter and are never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(pub u64);

impl fmt::Debug for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.0)
    }
}

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Milliseconds on a scheduler's monotonic clock.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn from_millis(ms: u64) -> Self {
        Timestamp(ms)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, delay: Duration) -> Self {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_add(ms))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}ms)", self.0)
    }
}
