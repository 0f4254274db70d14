//! Subscription bookkeeping for stores.
//!
//! This module provides:
//! - [`Listener`]: a callback with a stable identity
//! - [`AutoSubscription`]: records created by an embedding layer that tracks
//!   key usage on its own
//! - [`TrackingHooks`]: notification when a store starts or stops tracking a key
//!
//! The per-store registry itself is internal; stores expose it through
//! `Store::subscribe` and friends.
//!
//! # Example
//!
//! ```ignore
//! let listener = Listener::new(|changed| match changed {
//!     Changed::All => println!("everything changed"),
//!     Changed::Keys(keys) => println!("changed: {:?}", keys),
//! });
//!
//! let token = store.subscribe(&listener, "user:42")?;
//! store.trigger("user:42");
//! store.unsubscribe(token)?;
//! ```

mod registry;
mod types;

pub(crate) use registry::Registry;
pub use types::{AutoSubscription, Changed, Listener, NoopHooks, TrackingHooks};
